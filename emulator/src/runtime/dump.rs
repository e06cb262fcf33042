//! Text renderings used by the printing and dumping syscalls

use std::fmt::Write;

use super::exception::Exception;
use super::io::FileTable;
use super::memory::Memory;
use super::registers::{Reg, RegisterName, Registers};
use crate::constants::{Address, Word};

/// Format a float the way Python's `repr` does
///
/// Uses the shortest digits that round-trip, in positional notation when the
/// decimal exponent is in `[-4, 16)` and in scientific notation otherwise.
pub fn format_float<F>(value: F) -> String
where
    F: Into<f64> + std::fmt::LowerExp + Copy,
{
    let wide: f64 = value.into();
    if wide.is_nan() {
        return "nan".to_owned();
    }
    if wide.is_infinite() {
        return if wide > 0.0 { "inf" } else { "-inf" }.to_owned();
    }

    let sign = if wide.is_sign_negative() { "-" } else { "" };

    // `{:e}` gives the shortest round-tripping digits of the original width
    let scientific = format!("{value:e}");
    let scientific = scientific.trim_start_matches('-');
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();

    if (-4..16).contains(&exponent) {
        let body = if exponent >= 0 {
            let integer_len = exponent as usize + 1;
            if digits.len() > integer_len {
                format!("{}.{}", &digits[..integer_len], &digits[integer_len..])
            } else {
                format!("{digits:0<integer_len$}.0")
            }
        } else {
            let zeros = "0".repeat((-exponent - 1) as usize);
            format!("0.{zeros}{digits}")
        };
        format!("{sign}{body}")
    } else {
        let (first, rest) = digits.split_at(1);
        let fraction = if rest.is_empty() {
            String::new()
        } else {
            format!(".{rest}")
        };
        let exponent_sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{sign}{first}{fraction}e{exponent_sign}{:02}",
            exponent.unsigned_abs()
        )
    }
}

/// Render a byte in the ASCII column of the memory dump
fn render_byte(byte: u8) -> String {
    match byte {
        0 => "\\0".to_owned(),
        b'\t' => "\\t".to_owned(),
        b'\n' => "\\n".to_owned(),
        0x20..=0x7E => char::from(byte).to_string(),
        _ => ".".to_owned(),
    }
}

/// Hexadecimal and ASCII dump of `[start, end)`, one word per row
///
/// The end is rounded up to a whole row.
pub fn memory_dump(memory: &Memory, start: Address, end: Address) -> Result<String, Exception> {
    let mut out = String::from("addr        hex             ascii       \n");

    let length = end.saturating_sub(start);
    let rows = length.div_ceil(4);
    for row in 0..rows {
        let address = start
            .checked_add(row * 4)
            .ok_or(Exception::MemoryOutOfBounds { address: start })?;

        let mut bytes = [0u8; 4];
        for (offset, byte) in (0..).zip(bytes.iter_mut()) {
            let current = address
                .checked_add(offset)
                .ok_or(Exception::MemoryOutOfBounds { address })?;
            *byte = memory.get_byte(current, false)? as u8;
        }

        let _ = write!(out, "0x{address:08x}  ");
        for byte in bytes {
            let _ = write!(out, "{byte:02x}  ");
        }
        for byte in bytes {
            let _ = write!(out, "{:<3}", render_byte(byte));
        }
        out.push('\n');
    }

    Ok(out)
}

/// Table of the general registers, `hi`, `lo` and `pc`
pub fn register_dump(registers: &Registers) -> String {
    let mut out = String::from("reg  hex        dec\n");
    let names = Reg::ALL
        .into_iter()
        .map(RegisterName::General)
        .chain([RegisterName::Hi, RegisterName::Lo, RegisterName::Pc]);

    for name in names {
        let value: Word = registers.read(name);
        let _ = writeln!(out, "{:<5}0x{:08x} {value}", name.to_string(), value as u32);
    }
    out
}

/// Open file descriptors with their names
pub fn file_dump(files: &FileTable) -> String {
    let mut out = String::new();
    for (fd, name) in files.entries() {
        let _ = writeln!(out, "{fd}\t{name}");
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::constants::DATA_MIN;

    #[test]
    fn format_float_test() {
        assert_eq!(format_float(420.42_f64), "420.42");
        assert_eq!(format_float(420.42_f32), "420.42");
        assert_eq!(format_float(1.0_f64), "1.0");
        assert_eq!(format_float(-2.0_f32), "-2.0");
        assert_eq!(format_float(0.0_f64), "0.0");
        assert_eq!(format_float(-0.0_f64), "-0.0");
        assert_eq!(format_float(0.1_f32), "0.1");
        assert_eq!(format_float(0.0001_f64), "0.0001");
        assert_eq!(format_float(0.00001_f64), "1e-05");
        assert_eq!(format_float(4.2e18_f64), "4.2e+18");
        assert_eq!(format_float(1e16_f64), "1e+16");
        assert_eq!(format_float(1e15_f64), "1000000000000000.0");
        assert_eq!(format_float(123_456.789_f64), "123456.789");
        assert_eq!(format_float(f64::NAN), "nan");
        assert_eq!(format_float(f32::INFINITY), "inf");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn memory_dump_test() {
        let mut memory = Memory::default();
        memory.add_asciiz(b"uwu hewwo worwd >.<", DATA_MIN).unwrap();

        let dump = memory_dump(&memory, DATA_MIN, DATA_MIN + 12).unwrap();
        let expected = [
            "addr        hex             ascii       \n",
            "0x10010000  20  75  77  75     u  w  u  \n",
            "0x10010004  77  77  65  68  w  w  e  h  \n",
            "0x10010008  6f  77  20  6f  o  w     o  \n",
        ]
        .concat();
        assert_eq!(dump, expected);

        // The end is rounded up to a whole row
        assert_eq!(memory_dump(&memory, DATA_MIN, DATA_MIN + 10).unwrap(), dump);
    }

    #[test]
    fn memory_dump_special_bytes_test() {
        let mut memory = Memory::default();
        memory.add_ascii(&[0x00, 0x09, 0x0A, 0xFF], DATA_MIN).unwrap();

        let dump = memory_dump(&memory, DATA_MIN, DATA_MIN + 4).unwrap();
        let row = dump.lines().nth(1).unwrap();
        assert_eq!(row, "0x10010000  00  09  0a  ff  \\0 \\t \\n .  ");
    }

    #[test]
    fn memory_dump_out_of_bounds_test() {
        let memory = Memory::default();
        assert!(memory_dump(&memory, 0, 4).is_err());
    }

    #[test]
    fn register_dump_test() {
        let mut registers = Registers::default();
        registers.set(Reg::A0, Word::MIN);
        let dump = register_dump(&registers);
        assert!(dump.starts_with("reg  hex        dec\n$zero0x00000000 0\n"));
        assert!(dump.contains("\n$a0  0x80000000 -2147483648\n"));
        assert!(dump.ends_with("pc   0x00400000 4194304\n"));
    }

    #[test]
    fn file_dump_test() {
        let files = FileTable::new();
        assert_eq!(file_dump(&files), "0\tstdin\n1\tstdout\n2\tstderr\n");
    }
}
