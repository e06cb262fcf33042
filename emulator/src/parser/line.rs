//! Program line parsing
//!
//! This module parses whole program lines, including the label definitions, the comments and the
//! line content itself (either an instruction or a directive).
//!
//! When parsing, this module does zero copy over the original input. All members of resulting Line
//! structure reference part of the input, hence the associated lifetime on the structure tied to
//! the original input. This allows computing the location of any part of a line in the listing.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, not_line_ending, space0, space1},
    combinator::{opt, peek},
    multi::{many0, separated_list1},
    sequence::{delimited, preceded, terminated},
    IResult,
};

use super::{
    parse_identifier,
    value::{parse_argument, parse_data_argument, Argument, DataArgument},
};

/// Holds the content of a line
#[derive(Clone, Debug, PartialEq)]
pub enum LineContent<'a> {
    /// Represents an instruction, with its opcode and list of arguments
    Instruction {
        opcode: &'a str,
        arguments: Vec<Argument<'a>>,
    },
    /// Represents a directive, with its name (without the leading dot) and arguments
    Directive {
        directive: &'a str,
        arguments: Vec<DataArgument<'a>>,
    },
}

impl LineContent<'_> {
    /// Check if the line is a directive
    pub(crate) fn is_directive(&self) -> bool {
        matches!(self, Self::Directive { .. })
    }
}

fn write_list<T: std::fmt::Display>(
    f: &mut std::fmt::Formatter<'_>,
    items: &[T],
) -> std::fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index == 0 {
            write!(f, " {item}")?;
        } else {
            write!(f, ", {item}")?;
        }
    }
    Ok(())
}

impl std::fmt::Display for LineContent<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineContent::Instruction { opcode, arguments } => {
                write!(f, "{opcode}")?;
                write_list(f, arguments)
            }
            LineContent::Directive {
                directive,
                arguments,
            } => {
                write!(f, ".{directive}")?;
                write_list(f, arguments)
            }
        }
    }
}

/// Holds a whole line, with the label definitions (if any), the content (if any) and the comment
/// (if any).
///
/// Note that the `Default::default()` implementation represents an empty line.
#[derive(Debug, PartialEq, Default)]
pub struct Line<'a> {
    /// Line number in the listing, starting at 1
    pub number: usize,
    pub symbols: Vec<&'a str>,
    pub content: Option<LineContent<'a>>,
    pub comment: Option<&'a str>,
}

impl std::fmt::Display for Line<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut had_something = false;
        for symbol in &self.symbols {
            write!(f, "{symbol}: ")?;
            had_something = true;
        }

        if let Some(ref c) = self.content {
            if !c.is_directive() && !had_something {
                write!(f, "    ")?;
            }
            write!(f, "{c}")?;
            had_something = true;
        }

        if let Some(c) = self.comment {
            if had_something {
                write!(f, "\t{c}")?;
            } else {
                write!(f, "{c}")?;
            }
        }

        Ok(())
    }
}

impl<'a> Line<'a> {
    #[cfg(test)] // Only used in tests for now
    pub(crate) fn comment(mut self, comment: &'a str) -> Self {
        self.comment = Some(comment);
        self
    }

    #[cfg(test)] // Only used in tests for now
    pub(crate) fn symbol(mut self, symbol: &'a str) -> Self {
        self.symbols.push(symbol);
        self
    }
}

/// Parses the arguments of an instruction or a directive
fn comma_separated<'a, O>(
    parser: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, Vec<O>> {
    separated_list1(delimited(space0, char(','), space0), parser)
}

/// Parses a directive
fn parse_directive_line(input: &str) -> IResult<&str, LineContent> {
    let (input, _) = char('.')(input)?;
    let (input, directive) = parse_identifier(input)?;
    let (input, arguments) = opt(preceded(space1, comma_separated(parse_data_argument)))(input)?;
    Ok((
        input,
        LineContent::Directive {
            directive,
            arguments: arguments.unwrap_or_default(),
        },
    ))
}

/// Parses an instruction
fn parse_instruction_line(input: &str) -> IResult<&str, LineContent> {
    let (input, opcode) = parse_identifier(input)?;
    let (input, arguments) = opt(preceded(space1, comma_separated(parse_argument)))(input)?;
    let arguments = arguments.unwrap_or_default();
    Ok((input, LineContent::Instruction { opcode, arguments }))
}

/// Parses the content of a line: an instruction or a directive
fn parse_line_content(input: &str) -> IResult<&str, LineContent> {
    alt((parse_directive_line, parse_instruction_line))(input)
}

/// Parses an inline comment
fn parse_comment(input: &str) -> IResult<&str, &str> {
    let (input, _) = peek(tag("#"))(input)?;
    not_line_ending(input)
}

/// Parses label definitions
fn parse_symbol_definition(input: &str) -> IResult<&str, &str> {
    let (input, symbol) = parse_identifier(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = char(':')(input)?;
    Ok((input, symbol))
}

/// Parses a whole line
pub(crate) fn parse_line(input: &str) -> IResult<&str, Line> {
    let (input, _) = space0(input)?;

    // Extract the list of label definitions
    let (input, symbols) = many0(terminated(parse_symbol_definition, space0))(input)?;

    // Extract the line content
    let (input, content) = opt(parse_line_content)(input)?;
    let (input, _) = space0(input)?;

    // Extract the comment
    let (input, comment) = opt(parse_comment)(input)?;

    // Build the line
    Ok((
        input,
        Line {
            number: 0,
            symbols,
            content,
            comment,
        },
    ))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::value::{DataItem, Operand, Value};
    use crate::runtime::Reg;

    #[track_caller]
    fn fully_parsed<T>(result: IResult<&str, T>) -> T {
        let (input, result) = result.unwrap();
        assert_eq!(input, "");
        result
    }

    #[test]
    fn parse_empty_line_test() {
        let line = fully_parsed(parse_line(""));
        assert_eq!(line, Line::default());
        let line = fully_parsed(parse_line("   \t "));
        assert_eq!(line, Line::default());
    }

    #[test]
    fn parse_comment_line_test() {
        let line = fully_parsed(parse_line("# hello"));
        assert_eq!(line, Line::default().comment("# hello"));
    }

    #[test]
    fn parse_symbol_line_test() {
        let line = fully_parsed(parse_line("hello:world: duplicate : duplicate:  "));
        assert_eq!(
            line,
            Line::default()
                .symbol("hello")
                .symbol("world")
                .symbol("duplicate")
                .symbol("duplicate")
        );
    }

    #[test]
    fn parse_instruction_line_test() {
        let line = fully_parsed(parse_line("loop: lw $t0, 4($sp) # load"));
        assert_eq!(line.symbols, vec!["loop"]);
        assert_eq!(line.comment, Some("# load"));

        let Some(LineContent::Instruction { opcode, arguments }) = line.content else {
            panic!("expected an instruction");
        };
        assert_eq!(opcode, "lw");
        let operands: Vec<_> = arguments.iter().map(|a| a.operand).collect();
        assert_eq!(
            operands,
            vec![
                Operand::Register(Reg::T0),
                Operand::Memory {
                    offset: Value::Literal(4),
                    base: Reg::Sp
                }
            ]
        );
    }

    #[test]
    fn parse_dotted_opcode_test() {
        let line = fully_parsed(parse_line("    c.eq.s 2, $f0, $f2"));
        let Some(LineContent::Instruction { opcode, arguments }) = line.content else {
            panic!("expected an instruction");
        };
        assert_eq!(opcode, "c.eq.s");
        assert_eq!(arguments.len(), 3);

        let line = fully_parsed(parse_line("syscall"));
        assert_eq!(
            line.content,
            Some(LineContent::Instruction {
                opcode: "syscall",
                arguments: Vec::new()
            })
        );
    }

    #[test]
    fn parse_directive_line_test() {
        let line = fully_parsed(parse_line(r#"msg: .asciiz "hello, world\n", "bye""#));
        let Some(LineContent::Directive {
            directive,
            arguments,
        }) = line.content
        else {
            panic!("expected a directive");
        };
        assert_eq!(directive, "asciiz");
        let items: Vec<_> = arguments.into_iter().map(|a| a.item).collect();
        assert_eq!(
            items,
            vec![
                DataItem::String(String::from("hello, world\n")),
                DataItem::String(String::from("bye")),
            ]
        );

        let line = fully_parsed(parse_line(".data"));
        assert_eq!(
            line.content,
            Some(LineContent::Directive {
                directive: "data",
                arguments: Vec::new()
            })
        );
    }

    #[test]
    fn display_test() {
        let line = fully_parsed(parse_line("main:   addi  $t0,$zero ,  -1   # comment"));
        assert_eq!(line.to_string(), "main: addi $t0, $zero, -1\t# comment");

        let line = fully_parsed(parse_line("  .word 1,2, label"));
        assert_eq!(line.to_string(), ".word 1, 2, label");
    }

    #[test]
    fn invalid_line_test() {
        assert!(!matches!(parse_line("add $t0, $t1,"), Ok(("", _))));
        assert!(!matches!(parse_line("lw $t0, 4($f0)"), Ok(("", _))));
    }
}
