//! Numeric helpers shared by the instructions
//!
//! Everything here is a pure function over words and floats, so that the
//! bit-exact behaviour of the instructions can be tested on its own.

use super::exception::Exception;
use crate::constants::Word;

type Result<T> = std::result::Result<T, Exception>;

/// Narrow a 64-bit result to a word, raising an overflow if it does not fit
pub fn checked_word(value: i64) -> Result<Word> {
    Word::try_from(value).map_err(|_| Exception::ArithmeticOverflow)
}

pub fn add(a: Word, b: Word, signed: bool) -> Result<Word> {
    let result = i64::from(a) + i64::from(b);
    if signed {
        checked_word(result)
    } else {
        Ok(result as Word)
    }
}

pub fn sub(a: Word, b: Word, signed: bool) -> Result<Word> {
    let result = i64::from(a) - i64::from(b);
    if signed {
        checked_word(result)
    } else {
        Ok(result as Word)
    }
}

/// Check that an immediate fits a signed 16-bit field
pub fn signed_immediate(value: i64) -> Result<Word> {
    if (-0x8000..0x8000).contains(&value) {
        Ok(value as Word)
    } else {
        Err(Exception::InvalidImmediate { value })
    }
}

/// Check that an immediate fits an unsigned 16-bit field
pub fn unsigned_immediate(value: i64) -> Result<Word> {
    if (0..0x1_0000).contains(&value) {
        Ok(value as Word)
    } else {
        Err(Exception::InvalidImmediate { value })
    }
}

/// Check that a literal shift amount is in `[0, 32)`
pub fn shift_amount(value: i64) -> Result<u32> {
    if (0..32).contains(&value) {
        Ok(value as u32)
    } else {
        Err(Exception::InvalidImmediate { value })
    }
}

#[must_use]
pub const fn sll(value: Word, amount: Word) -> Word {
    value.wrapping_shl(amount as u32 & 31)
}

#[must_use]
pub const fn srl(value: Word, amount: Word) -> Word {
    ((value as u32) >> (amount as u32 & 31)) as Word
}

#[must_use]
pub const fn sra(value: Word, amount: Word) -> Word {
    value >> (amount as u32 & 31)
}

/// Divide, returning the (quotient, remainder) pair
///
/// The quotient truncates toward zero and the remainder has the sign of the
/// dividend.
pub fn div(a: Word, b: Word, signed: bool) -> Result<(Word, Word)> {
    if b == 0 {
        return Err(Exception::DivisionByZero);
    }

    if signed {
        Ok((a.wrapping_div(b), a.wrapping_rem(b)))
    } else {
        let (a, b) = (a as u32, b as u32);
        Ok(((a / b) as Word, (a % b) as Word))
    }
}

/// Full 64-bit product of two words
#[must_use]
pub fn product(a: Word, b: Word, signed: bool) -> u64 {
    if signed {
        (i64::from(a) * i64::from(b)) as u64
    } else {
        u64::from(a as u32) * u64::from(b as u32)
    }
}

/// Split a 64-bit value in its (hi, lo) words
#[must_use]
pub const fn split(value: u64) -> (Word, Word) {
    ((value >> 32) as Word, value as Word)
}

#[must_use]
pub fn join(hi: Word, lo: Word) -> u64 {
    (u64::from(hi as u32) << 32) | u64::from(lo as u32)
}

/// Add (or subtract) the product of `a` and `b` to the `hi:lo` accumulator
#[must_use]
pub fn multiply_accumulate(
    (hi, lo): (Word, Word),
    a: Word,
    b: Word,
    signed: bool,
    subtract: bool,
) -> (Word, Word) {
    let accumulator = join(hi, lo);
    let product = product(a, b, signed);
    let result = if subtract {
        accumulator.wrapping_sub(product)
    } else {
        accumulator.wrapping_add(product)
    };
    split(result)
}

/// Rounding modes of the float to word conversions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Ceil,
    Floor,
    Round,
    Trunc,
}

/// Convert a float to a word
///
/// NaN, infinities and results that do not fit a word all give
/// [`Word::MAX`]. `Round` rounds half to even.
#[must_use]
pub fn float_to_word(value: f64, rounding: Rounding) -> Word {
    if !value.is_finite() {
        return Word::MAX;
    }

    let rounded = match rounding {
        Rounding::Ceil => value.ceil(),
        Rounding::Floor => value.floor(),
        Rounding::Round => round_half_even(value),
        Rounding::Trunc => value.trunc(),
    };

    if rounded >= f64::from(Word::MIN) && rounded <= f64::from(Word::MAX) {
        rounded as Word
    } else {
        Word::MAX
    }
}

fn round_half_even(value: f64) -> f64 {
    let rounded = value.round();
    if (value - value.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
        rounded - value.signum()
    } else {
        rounded
    }
}

/// Double division, with the sign of infinities following the dividend
#[must_use]
pub fn div_double(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        if a > 0.0 {
            f64::INFINITY
        } else if a < 0.0 {
            f64::NEG_INFINITY
        } else {
            f64::NAN
        }
    } else {
        a / b
    }
}

#[must_use]
pub fn sqrt_single(value: f32) -> f32 {
    if value < 0.0 {
        f32::NAN
    } else {
        value.sqrt()
    }
}

#[must_use]
pub fn sqrt_double(value: f64) -> f64 {
    if value < 0.0 {
        f64::NAN
    } else {
        value.sqrt()
    }
}

/// Merge of `lwl`: the bytes from the word start up to `address` land in the
/// most significant bytes of the register
#[must_use]
pub fn load_left(original: Word, memory_bytes: &[u8; 4], offset: u32) -> Word {
    let mut result: u64 = 0;
    for i in 0..=offset {
        let byte = u64::from(memory_bytes[i as usize]);
        result |= byte << (8 * (3 - offset + i));
    }
    let mask: u64 = (1 << ((3 - offset) * 8)) - 1;
    ((u64::from(original as u32) & mask) + result) as Word
}

/// Merge of `lwr`: the bytes from `address` up to the word end land in the
/// least significant bytes of the register
#[must_use]
pub fn load_right(original: Word, memory_bytes: &[u8; 4], offset: u32) -> Word {
    let mut result: u64 = 0;
    for i in 0..(4 - offset) {
        let byte = u64::from(memory_bytes[(3 - i) as usize]);
        result |= byte << (8 * (3 - i - offset));
    }
    let mask: u64 = ((1 << (offset * 8)) - 1) << ((4 - offset) * 8);
    ((u64::from(original as u32) & mask) + result) as Word
}

/// Bytes written by `swl`, as (offset from the word start, byte) pairs
pub fn store_left(data: Word, offset: u32) -> impl Iterator<Item = (u32, u8)> {
    (0..=offset).map(move |i| (offset - i, (data >> (8 * (3 - i))) as u8))
}

/// Bytes written by `swr`, as (offset from the word start, byte) pairs
pub fn store_right(data: Word, offset: u32) -> impl Iterator<Item = (u32, u8)> {
    (0..(4 - offset)).map(move |i| (offset + i, (data >> (8 * i)) as u8))
}
