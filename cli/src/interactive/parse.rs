//! Addresses and values typed in the interactive mode

use std::collections::BTreeMap;
use std::str::FromStr;

use mipsim_emulator::constants as C;
use mipsim_emulator::runtime::{Computer, RegisterName};
use nom::branch::alt;
use nom::bytes::complete::{tag_no_case, take_while1};
use nom::character::complete::{char, digit1, hex_digit1, space0};
use nom::combinator::{all_consuming, map, map_res, opt, recognize, verify};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::{Finish, IResult};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Literal(i64),
    Label(String),
    Indirect(RegisterName),
    Indexed(RegisterName, i64),
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("unknown label {0}")]
    UnknownLabel(String),

    #[error("{0} is out of range")]
    OutOfRange(i64),
}

impl Address {
    /// Compute the address, reading registers from the computer
    pub fn evaluate(
        &self,
        computer: &Computer,
        labels: &BTreeMap<String, C::Address>,
    ) -> Result<C::Address, EvaluationError> {
        let value = match self {
            Self::Literal(value) => *value,
            Self::Label(label) => labels
                .get(label)
                .map(|address| i64::from(*address))
                .ok_or_else(|| EvaluationError::UnknownLabel(label.clone()))?,
            Self::Indirect(reg) => i64::from(computer.registers.read(*reg) as u32),
            Self::Indexed(reg, offset) => {
                i64::from(computer.registers.read(*reg) as u32) + offset
            }
        };

        C::Address::try_from(value).map_err(|_| EvaluationError::OutOfRange(value))
    }

    /// Compute the address as a word, for values written by the `set` command
    pub fn evaluate_word(
        &self,
        computer: &Computer,
        labels: &BTreeMap<String, C::Address>,
    ) -> Result<C::Word, EvaluationError> {
        match self {
            Self::Literal(value) => C::Word::try_from(*value)
                .or_else(|_| u32::try_from(*value).map(|value| value as C::Word))
                .map_err(|_| EvaluationError::OutOfRange(*value)),
            _ => self
                .evaluate(computer, labels)
                .map(|address| address as C::Word),
        }
    }
}

#[derive(Debug, Error)]
#[error("could not parse address: {0}")]
pub struct ParseAddressError(String);

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        all_consuming(parse_address)(s)
            .finish()
            .map(|(_, address)| address)
            .map_err(|e: nom::error::Error<&str>| ParseAddressError(e.input.to_owned()))
    }
}

/// Target of the `set` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentTarget {
    Register(RegisterName),
    Address(Address),
}

impl FromStr for AssignmentTarget {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse()
            .map(Self::Register)
            .or_else(|_| s.parse().map(Self::Address))
    }
}

fn parse_number(input: &str) -> IResult<&str, i64> {
    let hex = map_res(preceded(tag_no_case("0x"), hex_digit1), |digits| {
        i64::from_str_radix(digits, 16)
    });
    let decimal = map_res(recognize(pair(opt(char('-')), digit1)), |digits: &str| {
        digits.parse::<i64>()
    });
    alt((hex, decimal))(input)
}

fn parse_register(input: &str) -> IResult<&str, RegisterName> {
    map_res(
        recognize(pair(
            char('$'),
            take_while1(|c: char| c.is_ascii_alphanumeric()),
        )),
        RegisterName::from_str,
    )(input)
}

fn parse_label(input: &str) -> IResult<&str, &str> {
    verify(
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.'),
        |label: &str| !label.starts_with(|c: char| c.is_ascii_digit()),
    )(input)
}

fn parse_indexed(input: &str) -> IResult<&str, Address> {
    let (rest, (reg, sign, offset)) = tuple((
        parse_register,
        delimited(space0, alt((char('+'), char('-'))), space0),
        parse_number,
    ))(input)?;

    let offset = if sign == '-' { -offset } else { offset };
    Ok((rest, Address::Indexed(reg, offset)))
}

fn parse_address(input: &str) -> IResult<&str, Address> {
    alt((
        map(parse_number, Address::Literal),
        parse_indexed,
        map(parse_register, Address::Indirect),
        map(parse_label, |label| Address::Label(label.to_owned())),
    ))(input)
}
