//! Instruction operands and directive arguments

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{alphanumeric1, char, space0},
    combinator::{consumed, map, map_opt, opt, recognize},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use parse_display::Display;

use super::{
    literal::{parse_integer, parse_string_literal},
    parse_identifier,
};
use crate::runtime::{FReg, Reg};

/// A value known at load time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Value<'a> {
    #[display("{0}")]
    Literal(i64),

    /// Address of a label
    #[display("{0}")]
    Label(&'a str),

    /// Upper half of the address of a label
    #[display("%hi({0})")]
    Hi(&'a str),

    /// Lower half of the address of a label
    #[display("%lo({0})")]
    Lo(&'a str),
}

/// An instruction operand
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Operand<'a> {
    #[display("{0}")]
    Register(Reg),

    #[display("{0}")]
    FloatRegister(FReg),

    #[display("{0}")]
    Value(Value<'a>),

    /// A memory access, like `4($sp)`
    #[display("{offset}({base})")]
    Memory { offset: Value<'a>, base: Reg },
}

/// An operand with the text it was parsed from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[display("{operand}")]
pub struct Argument<'a> {
    pub text: &'a str,
    pub operand: Operand<'a>,
}

/// A directive argument
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataItem<'a> {
    /// A string literal, with its escapes already processed
    String(String),

    /// A number or a label, interpreted depending on the directive
    Token(&'a str),
}

/// A directive argument with the text it was parsed from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataArgument<'a> {
    pub text: &'a str,
    pub item: DataItem<'a>,
}

impl std::fmt::Display for DataArgument<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.text)
    }
}

/// Parse an integer or floating point register
pub(crate) fn parse_register(input: &str) -> IResult<&str, Operand> {
    map_opt(recognize(pair(char('$'), alphanumeric1)), |name: &str| {
        name.parse()
            .map(Operand::Register)
            .or_else(|_| name.parse().map(Operand::FloatRegister))
            .ok()
    })(input)
}

fn parse_general_register(input: &str) -> IResult<&str, Reg> {
    map_opt(parse_register, |operand| match operand {
        Operand::Register(reg) => Some(reg),
        _ => None,
    })(input)
}

fn parse_parenthesized_label(input: &str) -> IResult<&str, &str> {
    delimited(
        pair(char('('), space0),
        parse_identifier,
        pair(space0, char(')')),
    )(input)
}

/// Parse `%hi(label)` or `%lo(label)`
fn parse_relocation(input: &str) -> IResult<&str, Value> {
    alt((
        map(
            preceded(tag_no_case("%hi"), parse_parenthesized_label),
            Value::Hi,
        ),
        map(
            preceded(tag_no_case("%lo"), parse_parenthesized_label),
            Value::Lo,
        ),
    ))(input)
}

pub(crate) fn parse_value(input: &str) -> IResult<&str, Value> {
    alt((
        map(parse_integer, Value::Literal),
        parse_relocation,
        map(parse_identifier, Value::Label),
    ))(input)
}

/// Parse a memory operand, like `8($t0)`, `($t0)` or `%lo(label)($at)`
fn parse_memory(input: &str) -> IResult<&str, Operand> {
    let (input, (offset, _, _, _, base, _, _)) = tuple((
        opt(parse_value),
        space0,
        char('('),
        space0,
        parse_general_register,
        space0,
        char(')'),
    ))(input)?;

    let offset = offset.unwrap_or(Value::Literal(0));
    Ok((input, Operand::Memory { offset, base }))
}

/// Parse an instruction operand
pub(crate) fn parse_argument(input: &str) -> IResult<&str, Argument> {
    map(
        consumed(alt((
            parse_memory,
            parse_register,
            map(parse_value, Operand::Value),
        ))),
        |(text, operand)| Argument { text, operand },
    )(input)
}

/// Parse a directive argument
pub(crate) fn parse_data_argument(input: &str) -> IResult<&str, DataArgument> {
    let token = take_while1(|c: char| !c.is_whitespace() && c != ',' && c != '#');
    map(
        consumed(alt((
            map(parse_string_literal, DataItem::String),
            map(token, DataItem::Token),
        ))),
        |(text, item)| DataArgument { text, item },
    )(input)
}
