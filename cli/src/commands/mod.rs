use camino::Utf8Path;
use clap::Parser;
use tracing::info;

mod completion;
mod print;
mod run;

#[derive(Parser, Debug)]
pub enum Subcommand {
    /// Load and run a program
    Run(self::run::RunOpt),

    /// Print the program as parsed
    Print(self::print::PrintOpt),

    /// Generate shell completions
    Completion(self::completion::CompletionOpt),
}

impl Subcommand {
    /// Run a subcommand
    pub fn exec(self) -> anyhow::Result<()> {
        match self {
            Self::Run(opt) => opt.exec(),
            Self::Print(opt) => opt.exec(),
            Self::Completion(opt) => opt.exec(),
        }
    }
}

/// Read a listing from the disk
fn read_source(path: &Utf8Path) -> anyhow::Result<String> {
    info!(%path, "Reading program");
    let source = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("could not read {path}: {e}"))?;
    Ok(source)
}

/// Print a diagnostic against the listing it comes from
fn report<E>(path: &Utf8Path, source: &str, error: E)
where
    E: miette::Diagnostic + Send + Sync + 'static,
{
    let report = miette::Report::new(error)
        .with_source_code(miette::NamedSource::new(path, source.to_owned()));
    eprintln!("{report:?}");
}
