//! Parse number, character and string literals.
//!
//! Integers can be written in base 10, base 16 (prefixed by `0x`), base 8
//! (prefixed by `0o`) and base 2 (prefixed by `0b`), with an optional sign.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag_no_case, take_while1},
    character::complete::{char, none_of, one_of},
    combinator::{map_opt, map_res, opt, value},
    sequence::{delimited, pair, preceded},
    IResult,
};

/// Parse the escape sequence after a backslash
fn parse_escape(input: &str) -> IResult<&str, char> {
    alt((
        value('\\', char('\\')),
        value('"', char('"')),
        value('\'', char('\'')),
        value('\n', char('n')),
        value('\t', char('t')),
        value('\r', char('r')),
        value('\0', char('0')),
    ))(input)
}

/// Parse a string literal
pub(crate) fn parse_string_literal(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let (input, string) = opt(escaped_transform(none_of("\"\\"), '\\', parse_escape))(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, string.unwrap_or_default()))
}

/// Parse a character literal, like `'a'` or `'\n'`
fn parse_char_literal(input: &str) -> IResult<&str, i64> {
    let (input, c) = delimited(
        char('\''),
        alt((
            preceded(char('\\'), parse_escape),
            none_of("'\\"),
        )),
        char('\''),
    )(input)?;
    Ok((input, i64::from(u32::from(c))))
}

fn take_prefixed<'a>(
    prefix: &'static str,
    radix: u32,
) -> impl FnMut(&'a str) -> IResult<&'a str, i64> {
    map_res(
        preceded(tag_no_case(prefix), take_while1(move |c: char| c.is_digit(radix))),
        move |digits| i64::from_str_radix(digits, radix),
    )
}

fn parse_unsigned(input: &str) -> IResult<&str, i64> {
    alt((
        take_prefixed("0x", 16),
        take_prefixed("0o", 8),
        take_prefixed("0b", 2),
        map_res(take_while1(|c: char| c.is_ascii_digit()), |digits: &str| {
            digits.parse::<i64>()
        }),
    ))(input)
}

/// Parse an integer literal
pub(crate) fn parse_integer(input: &str) -> IResult<&str, i64> {
    alt((
        map_opt(pair(opt(one_of("+-")), parse_unsigned), |(sign, n)| {
            if sign == Some('-') {
                n.checked_neg()
            } else {
                Some(n)
            }
        }),
        parse_char_literal,
    ))(input)
}

/// Parse a float literal, like `1.5`, `-2e10`, `inf` or `nan`
///
/// Integer literals, in any base, are accepted too.
pub(crate) fn parse_float(input: &str) -> Option<f64> {
    if let Ok(("", n)) = parse_integer(input) {
        return Some(n as f64);
    }

    let lowercase = input.to_ascii_lowercase();
    let unsigned = lowercase.trim_start_matches(['+', '-']);
    let numeric = unsigned.starts_with(|c: char| c.is_ascii_digit() || c == '.')
        || matches!(unsigned, "inf" | "infinity" | "nan");
    if !numeric {
        return None;
    }

    lowercase.parse().ok()
}
