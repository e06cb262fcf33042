//! Program parsing logic
//!
//! Programs are listings of basic instructions and data directives, one per
//! line. This module is split in multiple submodules to make things easier to
//! read. The parsing is handled by the `nom` library.

use miette::{Diagnostic, SourceSpan};
use nom::bytes::complete::take_while1;
use nom::combinator::{all_consuming, verify};
use nom::{Finish, IResult, Offset};
use thiserror::Error;

pub(crate) mod line;
pub(crate) mod literal;
pub mod location;
pub(crate) mod value;

pub use self::line::{Line, LineContent};
pub use self::location::Location;
pub use self::value::{Argument, DataArgument, DataItem, Operand, Value};

fn is_identifier_char(c: char) -> bool {
    is_start_identifier_char(c) || c.is_ascii_digit() || c == '.'
}

fn is_start_identifier_char(c: char) -> bool {
    c == '_' || c.is_ascii_lowercase() || c.is_ascii_uppercase()
}

/// Parse an identifier: a label or an opcode
pub(crate) fn parse_identifier(input: &str) -> IResult<&str, &str> {
    verify(take_while1(is_identifier_char), |f: &str| {
        f.chars()
            .next()
            .filter(|&c| is_start_identifier_char(c))
            .is_some()
    })(input)
}

#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
#[error("invalid syntax on line {line}")]
#[diagnostic(code(mipsim::parse::syntax))]
pub struct ParseError {
    pub line: usize,

    #[label("could not parse this")]
    pub span: SourceSpan,
}

/// A parsed listing
#[derive(Debug, PartialEq)]
pub struct Program<'a> {
    /// The whole listing, which every part of the lines references
    pub source: &'a str,
    pub lines: Vec<Line<'a>>,
}

impl Program<'_> {
    /// Location of a part of the listing
    #[must_use]
    pub fn location(&self, part: &str) -> Location {
        Location::of(self.source, part)
    }
}

impl std::fmt::Display for Program<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Parse a program
///
/// # Errors
///
/// This function will return an error if any line of the program is invalid
#[tracing::instrument(skip(input))]
pub fn parse(input: &str) -> Result<Program<'_>, ParseError> {
    let mut lines = Vec::new();
    for (index, text) in input.lines().enumerate() {
        let number = index + 1;
        let (_, line) = all_consuming(self::line::parse_line)(text)
            .finish()
            .map_err(|e: nom::error::Error<&str>| ParseError {
                line: number,
                span: (input.offset(e.input), e.input.len()).into(),
            })?;
        lines.push(Line { number, ..line });
    }

    Ok(Program {
        source: input,
        lines,
    })
}
