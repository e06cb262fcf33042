use std::process::exit;

use camino::Utf8PathBuf;
use clap::{Parser, ValueHint};
use mipsim_emulator::parse;
use tracing::debug;

use super::{read_source, report};

#[derive(Parser, Debug)]
pub struct PrintOpt {
    /// Input file
    #[clap(value_parser, value_hint = ValueHint::FilePath)]
    input: Utf8PathBuf,
}

impl PrintOpt {
    pub fn exec(&self) -> anyhow::Result<()> {
        let source = read_source(&self.input)?;

        debug!("Parsing program");
        let program = match parse(&source) {
            Ok(p) => p,
            Err(e) => {
                report(&self.input, &source, e);
                exit(1);
            }
        };

        print!("{program}");
        Ok(())
    }
}
