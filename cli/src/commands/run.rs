use std::process::exit;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{ArgAction, Parser, ValueHint};
use mipsim_emulator::config::Settings;
use mipsim_emulator::constants::DEFAULT_ENTRYPOINT;
use mipsim_emulator::runtime::{Fault, ProcessorError, StdConsole};
use mipsim_emulator::{compile, parse};
use tracing::{debug, info};

use super::{read_source, report};
use crate::interactive::run_interactive;

#[derive(Parser, Debug)]
pub struct RunOpt {
    /// Input file
    #[clap(value_parser, value_hint = ValueHint::FilePath)]
    input: Utf8PathBuf,

    /// Arguments passed to the program
    #[clap(value_parser, trailing_var_arg = true)]
    arguments: Vec<String>,

    /// Start label
    #[clap(short, long, value_parser, default_value = DEFAULT_ENTRYPOINT)]
    entrypoint: String,

    /// Run the program in interactive mode
    #[clap(short, long, action = ArgAction::SetTrue)]
    interactive: bool,

    /// Print the number of executed instructions when the program exits
    #[clap(long, action = ArgAction::SetTrue)]
    instruction_count: bool,

    /// Abort the program after this many instructions
    #[clap(long, value_parser)]
    max_instructions: Option<u64>,

    /// Fill the registers with random values on startup
    #[clap(long, action = ArgAction::SetTrue)]
    garbage_registers: bool,

    /// Make uninitialized memory read as random values
    #[clap(long, action = ArgAction::SetTrue)]
    garbage_memory: bool,

    /// Seed of the random number generator
    #[clap(long, value_parser)]
    seed: Option<u64>,

    /// Warn when the program reads a register before writing it
    #[clap(short = 'W', long, action = ArgAction::SetTrue)]
    warnings: bool,
}

/// Span of the non-blank part of a line of the listing
fn line_span(source: &str, line: usize) -> Option<(usize, usize)> {
    let mut offset = 0;
    for (index, text) in source.split_inclusive('\n').enumerate() {
        if index + 1 == line {
            let text = text.trim_end();
            let start = text.len() - text.trim_start().len();
            return Some((offset + start, text.len() - start));
        }
        offset += text.len();
    }
    None
}

fn report_fault(path: &Utf8Path, source: &str, fault: &Fault) {
    let labels: Vec<_> = fault
        .line
        .and_then(|line| line_span(source, line))
        .map(|span| miette::LabeledSpan::at(span, fault.exception.to_string()))
        .into_iter()
        .collect();

    let report = miette::miette!(
        labels = labels,
        "{} at {:#010x}",
        fault.exception,
        fault.pc
    )
    .with_source_code(miette::NamedSource::new(path, source.to_owned()));
    eprintln!("{report:?}");
}

impl RunOpt {
    fn settings(&self) -> Settings {
        Settings {
            display_instruction_count: self.instruction_count,
            max_instructions: self.max_instructions,
            garbage_registers: self.garbage_registers,
            garbage_memory: self.garbage_memory,
            seed: self.seed,
            warnings: self.warnings,
            entrypoint: self.entrypoint.clone(),
            arguments: self.arguments.clone(),
            ..Settings::default()
        }
    }

    pub fn exec(self) -> anyhow::Result<()> {
        let source = read_source(&self.input)?;

        debug!("Parsing program");
        let program = match parse(&source) {
            Ok(p) => p,
            Err(e) => {
                report(&self.input, &source, e);
                exit(1);
            }
        };

        debug!(entrypoint = %self.entrypoint, "Building computer");
        let (mut computer, debug_info) =
            match compile(&program, self.settings(), Box::new(StdConsole)) {
                Ok(p) => p,
                Err(e) => {
                    report(&self.input, &source, e);
                    exit(1);
                }
            };

        info!("Running program");
        if self.interactive {
            run_interactive(&mut computer, &debug_info)?;
            return Ok(());
        }

        match computer.run() {
            Ok(code) => {
                info!(code, registers = %computer.registers, "End of program");
                if code != 0 {
                    exit(code);
                }
                Ok(())
            }
            Err(ProcessorError::Fault(fault)) => {
                report_fault(&self.input, &source, &fault);
                exit(1);
            }
            Err(e) => Err(e.into()),
        }
    }
}
