use parse_display::Display;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info};

use super::dump;
use super::exception::Exception;
use super::io::FileMode;
use super::memory::is_allowed_char;
use super::registers::{FReg, Reg};
use super::{Computer, ProcessorError};
use crate::constants::{Address, Word};

type Result<T> = std::result::Result<T, ProcessorError>;

/// Services available through the `syscall` instruction, selected by `$v0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "snake_case")]
pub enum Syscall {
    PrintInt,
    PrintFloat,
    PrintDouble,
    PrintString,
    ReadInt,
    Atoi,
    ReadString,
    Sbrk,
    Exit,
    PrintChar,
    Open,
    Read,
    Write,
    Close,
    Exit2,
    MemoryDump,
    RegisterDump,
    DumpFiles,
    PrintHex,
    PrintBin,
    PrintUnsigned,
    SetSeed,
    RandomInt,
    RandomIntRange,
}

impl Syscall {
    #[must_use]
    pub fn from_number(number: Word) -> Option<Self> {
        let syscall = match number {
            1 => Self::PrintInt,
            2 => Self::PrintFloat,
            3 => Self::PrintDouble,
            4 => Self::PrintString,
            5 => Self::ReadInt,
            6 => Self::Atoi,
            8 => Self::ReadString,
            9 => Self::Sbrk,
            10 => Self::Exit,
            11 => Self::PrintChar,
            13 => Self::Open,
            14 => Self::Read,
            15 => Self::Write,
            16 => Self::Close,
            17 => Self::Exit2,
            30 => Self::MemoryDump,
            31 => Self::RegisterDump,
            32 => Self::DumpFiles,
            34 => Self::PrintHex,
            35 => Self::PrintBin,
            36 => Self::PrintUnsigned,
            40 => Self::SetSeed,
            41 => Self::RandomInt,
            42 => Self::RandomIntRange,
            _ => return None,
        };
        Some(syscall)
    }
}

/// Parse a decimal integer with an optional leading minus sign
fn atoi(bytes: &[u8]) -> std::result::Result<Word, Exception> {
    let (negative, digits) = match bytes {
        [b'-', rest @ ..] => (true, rest),
        _ => (false, bytes),
    };

    if digits.is_empty() {
        return Err(Exception::InvalidCharacter {
            byte: bytes.last().copied().unwrap_or(0),
        });
    }

    let mut value: Word = 0;
    for byte in digits {
        if !byte.is_ascii_digit() {
            return Err(Exception::InvalidCharacter { byte: *byte });
        }
        value = value.wrapping_mul(10).wrapping_add(Word::from(byte - b'0'));
    }

    Ok(if negative { value.wrapping_neg() } else { value })
}

/// Size of the buffer used to copy a file into memory
const READ_CHUNK: usize = 4096;

/// Byte stored for a character read from the console. Characters outside of
/// Latin-1 become `?`.
fn latin1(c: char) -> u8 {
    u8::try_from(u32::from(c)).unwrap_or(b'?')
}

/// Copy up to `length` bytes of a file into memory, returning how many were
/// read or -1 if the first read fails
///
/// The memory range must have been checked beforehand.
fn read_file(computer: &mut Computer, fd: Word, address: Address, length: usize) -> Result<Word> {
    let mut buf = vec![0; length.min(READ_CHUNK)];
    let mut total = 0;
    while total < length {
        let wanted = (length - total).min(READ_CHUNK);
        let count = match computer
            .files
            .read(fd, &mut buf[..wanted], computer.console.as_mut())
        {
            Ok(count) => count,
            Err(_) if total == 0 => return Ok(-1),
            Err(_) => break,
        };

        computer
            .memory
            .add_ascii(&buf[..count], address + total as Address)?;
        total += count;

        // A short read means there is nothing more for now
        if count < wanted {
            break;
        }
    }

    Ok(total as Word)
}

/// Execute the syscall selected by `$v0`
#[tracing::instrument(skip(computer))]
pub(crate) fn dispatch(computer: &mut Computer) -> Result<()> {
    let number = computer.registers.get(Reg::V0);
    let syscall = Syscall::from_number(number).ok_or(Exception::InvalidSyscall { number })?;
    debug!(%syscall, "Syscall");

    // Only the registers a service uses are meaningful
    let a0 = computer.registers.peek(Reg::A0);
    let a1 = computer.registers.peek(Reg::A1);
    let a2 = computer.registers.peek(Reg::A2);

    match syscall {
        Syscall::PrintInt => computer.print(&a0.to_string())?,

        Syscall::PrintFloat => {
            let value = computer.registers.get_single(FReg::F12);
            computer.print(&dump::format_float(value))?;
        }

        Syscall::PrintDouble => {
            let value = computer.registers.get_double(FReg::F12);
            computer.print(&dump::format_float(value))?;
        }

        Syscall::PrintString => {
            let bytes = computer.memory.get_string(a0 as Address)?;
            computer.console.write(&bytes)?;
        }

        Syscall::ReadInt => {
            let line = computer.console.read_line()?;
            let value = line
                .trim()
                .parse::<Word>()
                .map_err(|_| Exception::InvalidInput {
                    input: line.trim_end().to_owned(),
                })?;
            computer.registers.set(Reg::V0, value);
        }

        Syscall::Atoi => {
            let bytes = computer.memory.get_string(a0 as Address)?;
            let value = atoi(&bytes)?;
            computer.registers.set(Reg::V0, value);
        }

        Syscall::ReadString => {
            let line = computer.console.read_line()?;
            let line = line.strip_suffix('\n').unwrap_or(&line);
            let line = line.strip_suffix('\r').unwrap_or(line);

            // Room is left for the terminator
            if let Ok(capacity) = usize::try_from(a1.saturating_sub(1)) {
                let bytes: Vec<u8> = line.chars().take(capacity).map(latin1).collect();
                computer.memory.add_asciiz(&bytes, a0 as Address)?;
            }
        }

        Syscall::Sbrk => {
            let address = computer.memory.sbrk(a0)?;
            computer.registers.set(Reg::V0, address as Word);
        }

        Syscall::Exit | Syscall::Exit2 => {
            if computer.settings.display_instruction_count {
                let message = format!("\nInstruction count: {}", computer.instruction_count);
                computer.print(&message)?;
            }

            let code = if syscall == Syscall::Exit2 { a0 } else { 0 };
            info!(code, "Program exited");
            return Err(ProcessorError::Halt { code });
        }

        Syscall::PrintChar => {
            let byte = u8::try_from(a0)
                .ok()
                .filter(|byte| is_allowed_char(*byte))
                .ok_or(Exception::InvalidCharacter { byte: a0 as u8 })?;
            computer.console.write(&[byte])?;
        }

        Syscall::Open => {
            let fd = computer
                .memory
                .get_string(a0 as Address)
                .ok()
                .and_then(|name| String::from_utf8(name).ok())
                .zip(FileMode::from_flags(a1))
                .and_then(|(name, mode)| computer.files.open(&name, mode).ok())
                .unwrap_or(-1);
            computer.registers.set(Reg::V0, fd);
        }

        Syscall::Read => {
            let result = match usize::try_from(a2) {
                Ok(length) if computer.files.is_open(a0) => {
                    let address = a1 as Address;
                    let room = usize::try_from(computer.memory.room_at(address))
                        .unwrap_or(usize::MAX);
                    if length > 0 && room == 0 {
                        return Err(Exception::MemoryOutOfBounds { address }.into());
                    }
                    read_file(computer, a0, address, length.min(room))?
                }
                _ => -1,
            };
            computer.registers.set(Reg::V0, result);
        }

        Syscall::Write => {
            let result = match Address::try_from(a2) {
                Ok(length) if computer.files.is_open(a0) => {
                    let mut bytes = Vec::new();
                    for offset in 0..length {
                        let address = (a1 as Address).wrapping_add(offset);
                        let byte = computer.memory.get_byte(address, false)?;
                        if byte == 0 {
                            break;
                        }
                        bytes.push(byte as u8);
                    }

                    match computer.files.write(a0, &bytes, computer.console.as_mut()) {
                        Ok(()) => bytes.len() as Word,
                        Err(_) => -1,
                    }
                }
                _ => -1,
            };
            computer.registers.set(Reg::V0, result);
        }

        Syscall::Close => computer.files.close(a0),

        Syscall::MemoryDump => {
            let text = dump::memory_dump(&computer.memory, a0 as Address, a1 as Address)?;
            computer.print(&text)?;
        }

        Syscall::RegisterDump => {
            let text = dump::register_dump(&computer.registers);
            computer.print(&text)?;
        }

        Syscall::DumpFiles => {
            let text = dump::file_dump(&computer.files);
            computer.print(&text)?;
        }

        Syscall::PrintHex => computer.print(&format!("0x{:08x}", a0 as u32))?,
        Syscall::PrintBin => computer.print(&format!("0b{:032b}", a0 as u32))?,
        Syscall::PrintUnsigned => computer.print(&(a0 as u32).to_string())?,

        Syscall::SetSeed => {
            computer.rng = StdRng::seed_from_u64(u64::from(a0 as u32));
        }

        Syscall::RandomInt => {
            let value: Word = computer.rng.gen();
            computer.registers.set(Reg::V0, value);
        }

        Syscall::RandomIntRange => {
            if a1 < 0 {
                return Err(Exception::InvalidArgument { value: a1 }.into());
            }
            let value = computer.rng.gen_range(0..=a1);
            computer.registers.set(Reg::V0, value);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::Settings;
    use crate::constants::{DATA_MAX, DATA_MIN, HEAP_START, TEXT_START};
    use crate::runtime::{BufferedConsole, Instruction};

    fn computer() -> (Computer, BufferedConsole) {
        let console = BufferedConsole::new();
        let computer = Computer::new(Settings::default(), Box::new(console.clone()));
        (computer, console)
    }

    fn syscall(computer: &mut Computer, number: Word) -> Result<()> {
        computer.registers.set(Reg::V0, number);
        computer.execute(&Instruction::Syscall)
    }

    fn exception(result: Result<()>) -> Exception {
        match result {
            Err(ProcessorError::Exception(e)) => e,
            other => panic!("expected an exception, got {other:?}"),
        }
    }

    #[test]
    fn print_int_test() {
        let (mut computer, console) = computer();
        for value in [0, -1, Word::MAX, Word::MIN] {
            computer.registers.set(Reg::A0, value);
            syscall(&mut computer, 1).unwrap();
            assert_eq!(console.take_output(), value.to_string());
        }
    }

    #[test]
    fn print_float_test() {
        let (mut computer, console) = computer();
        computer.registers.set_single(FReg::F12, 420.42);
        syscall(&mut computer, 2).unwrap();
        assert_eq!(console.take_output(), "420.42");

        computer.registers.set_single(FReg::F12, 42.0e17);
        syscall(&mut computer, 2).unwrap();
        assert_eq!(console.take_output(), "4.2e+18");

        computer.registers.set_single(FReg::F12, f32::INFINITY);
        syscall(&mut computer, 2).unwrap();
        assert_eq!(console.take_output(), "inf");
    }

    #[test]
    fn print_double_test() {
        let (mut computer, console) = computer();
        let bits = 420.42_f64.to_bits();
        computer.registers.set_float_bits(FReg::F12, bits as u32);
        computer
            .registers
            .set_float_bits(FReg::F13, (bits >> 32) as u32);
        syscall(&mut computer, 3).unwrap();
        assert_eq!(console.take_output(), "420.42");

        computer.registers.set_float_bits(FReg::F12, 0);
        computer
            .registers
            .set_float_bits(FReg::F13, 0x7FF0_0000);
        syscall(&mut computer, 3).unwrap();
        assert_eq!(console.take_output(), "inf");
    }

    #[test]
    fn print_string_test() {
        let (mut computer, console) = computer();
        computer.memory.add_asciiz(b"words", DATA_MIN).unwrap();
        computer.registers.set(Reg::A0, DATA_MIN as Word);
        syscall(&mut computer, 4).unwrap();
        assert_eq!(console.take_output(), "words");

        computer.memory.add_asciiz(b"", DATA_MIN).unwrap();
        syscall(&mut computer, 4).unwrap();
        assert_eq!(console.take_output(), "");

        for bad in [0xFF, 0x08] {
            computer.memory.add_asciiz(&[b'w', bad, b'w'], DATA_MIN).unwrap();
            assert_eq!(
                exception(syscall(&mut computer, 4)),
                Exception::InvalidCharacter { byte: bad }
            );
        }
    }

    #[test]
    fn read_int_test() {
        let (mut computer, console) = computer();
        console.push_input("0\n-1\nA\n");
        syscall(&mut computer, 5).unwrap();
        assert_eq!(computer.registers.get(Reg::V0), 0);
        syscall(&mut computer, 5).unwrap();
        assert_eq!(computer.registers.get(Reg::V0), -1);
        assert_eq!(
            exception(syscall(&mut computer, 5)),
            Exception::InvalidInput {
                input: "A".to_owned()
            }
        );
    }

    #[test]
    fn atoi_test() {
        let (mut computer, _) = computer();
        computer.registers.set(Reg::A0, DATA_MIN as Word);

        for (input, output) in [("02113", 2113), ("0", 0), ("-12345", -12345)] {
            computer.memory.add_asciiz(input.as_bytes(), DATA_MIN).unwrap();
            syscall(&mut computer, 6).unwrap();
            assert_eq!(computer.registers.get(Reg::V0), output);
        }

        for input in ["--12345", "123e45", ""] {
            computer.memory.add_asciiz(input.as_bytes(), DATA_MIN).unwrap();
            assert!(matches!(
                exception(syscall(&mut computer, 6)),
                Exception::InvalidCharacter { .. }
            ));
        }
    }

    #[test]
    fn read_string_test() {
        let (mut computer, console) = computer();
        computer.registers.set(Reg::A0, DATA_MIN as Word);

        console.push_input("uwu uwu\n");
        computer.registers.set(Reg::A1, 4);
        syscall(&mut computer, 8).unwrap();
        assert_eq!(computer.memory.get_string(DATA_MIN).unwrap(), b"uwu");

        console.push_input("uwu uwu\n");
        computer.registers.set(Reg::A1, 20);
        syscall(&mut computer, 8).unwrap();
        assert_eq!(computer.memory.get_string(DATA_MIN).unwrap(), b"uwu uwu");
    }

    #[test]
    fn read_latin1_string_test() {
        let (mut computer, console) = computer();
        computer.registers.set(Reg::A0, DATA_MIN as Word);
        computer.registers.set(Reg::A1, 9);

        console.push_input("\u{FF}\u{20AC}\n");
        syscall(&mut computer, 8).unwrap();
        assert_eq!(computer.memory.get_byte(DATA_MIN, false).unwrap(), 0xFF);
        assert_eq!(
            computer.memory.get_byte(DATA_MIN + 1, false).unwrap(),
            Word::from(b'?')
        );
        assert_eq!(computer.memory.get_byte(DATA_MIN + 2, false).unwrap(), 0);
    }

    #[test]
    fn read_is_clamped_to_memory_test() {
        let (mut computer, console) = computer();
        console.push_input("hello");
        computer.registers.set(Reg::A0, 0);
        computer.registers.set(Reg::A1, (DATA_MAX - 1) as Word);
        computer.registers.set(Reg::A2, Word::MAX);
        syscall(&mut computer, 14).unwrap();
        assert_eq!(computer.registers.get(Reg::V0), 2);
        assert_eq!(
            computer.memory.get_byte(DATA_MAX, false).unwrap(),
            Word::from(b'e')
        );

        // The rest of the input is still there
        computer.registers.set(Reg::A1, DATA_MIN as Word);
        syscall(&mut computer, 14).unwrap();
        assert_eq!(computer.registers.get(Reg::V0), 3);
        assert_eq!(computer.memory.get_byte(DATA_MIN + 2, false).unwrap(), Word::from(b'o'));

        // Reading into the text segment
        computer.registers.set(Reg::A1, TEXT_START as Word);
        assert_eq!(
            exception(syscall(&mut computer, 14)),
            Exception::MemoryOutOfBounds {
                address: TEXT_START
            }
        );
    }

    #[test]
    fn sbrk_test() {
        let (mut computer, _) = computer();
        computer.registers.set(Reg::A0, 5);
        syscall(&mut computer, 9).unwrap();
        assert_eq!(computer.registers.get(Reg::V0) as Address, HEAP_START);
        assert_eq!(computer.memory.heap_ptr(), HEAP_START + 8);

        computer.registers.set(Reg::A0, -1);
        assert_eq!(
            exception(syscall(&mut computer, 9)),
            Exception::InvalidArgument { value: -1 }
        );

        let remaining = computer.settings.layout.initial_sp - computer.memory.heap_ptr();
        computer.registers.set(Reg::A0, remaining as Word);
        syscall(&mut computer, 9).unwrap();
        computer.registers.set(Reg::A0, 4);
        assert!(matches!(
            exception(syscall(&mut computer, 9)),
            Exception::MemoryOutOfBounds { .. }
        ));
    }

    #[test]
    fn exit_test() {
        let (mut computer, console) = computer();
        computer.settings.display_instruction_count = true;
        computer.instruction_count = 12;

        let result = syscall(&mut computer, 10);
        assert!(matches!(result, Err(ProcessorError::Halt { code: 0 })));
        assert_eq!(console.take_output(), "\nInstruction count: 12");

        computer.registers.set(Reg::A0, 3);
        let result = syscall(&mut computer, 17);
        assert!(matches!(result, Err(ProcessorError::Halt { code: 3 })));
    }

    #[test]
    fn print_char_test() {
        let (mut computer, console) = computer();
        computer.registers.set(Reg::A0, i32::from(b'A'));
        syscall(&mut computer, 11).unwrap();
        assert_eq!(console.take_output(), "A");

        for bad in [8, 255, 0x141] {
            computer.registers.set(Reg::A0, bad);
            assert!(matches!(
                exception(syscall(&mut computer, 11)),
                Exception::InvalidCharacter { .. }
            ));
        }
    }

    #[test]
    fn print_formats_test() {
        let (mut computer, console) = computer();
        computer.registers.set(Reg::A0, -1);
        syscall(&mut computer, 34).unwrap();
        assert_eq!(console.take_output(), "0xffffffff");
        syscall(&mut computer, 35).unwrap();
        assert_eq!(console.take_output(), format!("0b{}", "1".repeat(32)));
        syscall(&mut computer, 36).unwrap();
        assert_eq!(console.take_output(), "4294967295");

        computer.registers.set(Reg::A0, 10);
        syscall(&mut computer, 34).unwrap();
        assert_eq!(console.take_output(), "0x0000000a");
    }

    #[test]
    fn random_test() {
        let (mut computer, _) = computer();
        computer.registers.set(Reg::A0, 1234);
        syscall(&mut computer, 40).unwrap();
        syscall(&mut computer, 41).unwrap();
        let first = computer.registers.get(Reg::V0);

        computer.registers.set(Reg::A0, 1234);
        syscall(&mut computer, 40).unwrap();
        syscall(&mut computer, 41).unwrap();
        assert_eq!(computer.registers.get(Reg::V0), first);

        computer.registers.set(Reg::A1, 10);
        for _ in 0..100 {
            syscall(&mut computer, 42).unwrap();
            assert!((0..=10).contains(&computer.registers.get(Reg::V0)));
        }

        computer.registers.set(Reg::A1, -1);
        assert_eq!(
            exception(syscall(&mut computer, 42)),
            Exception::InvalidArgument { value: -1 }
        );
    }

    #[test]
    fn invalid_syscall_test() {
        let (mut computer, _) = computer();
        assert_eq!(
            exception(syscall(&mut computer, 7)),
            Exception::InvalidSyscall { number: 7 }
        );
    }

    #[test]
    fn file_syscalls_test() {
        let (mut computer, console) = computer();
        let path = std::env::temp_dir().join(format!("mipsim-syscall-test-{}", std::process::id()));
        let name = path.to_str().unwrap();

        // Open for writing
        let end = computer.memory.add_asciiz(name.as_bytes(), DATA_MIN).unwrap();
        computer.registers.set(Reg::A0, DATA_MIN as Word);
        computer.registers.set(Reg::A1, 1);
        syscall(&mut computer, 13).unwrap();
        let fd = computer.registers.get(Reg::V0);
        assert_eq!(fd, 3);

        // Write stops at the terminator
        computer.memory.add_asciiz(b"hello", end).unwrap();
        computer.registers.set(Reg::A0, fd);
        computer.registers.set(Reg::A1, end as Word);
        computer.registers.set(Reg::A2, 100);
        syscall(&mut computer, 15).unwrap();
        assert_eq!(computer.registers.get(Reg::V0), 5);

        syscall(&mut computer, 32).unwrap();
        assert_eq!(
            console.take_output(),
            format!("0\tstdin\n1\tstdout\n2\tstderr\n3\t{name}\n")
        );

        syscall(&mut computer, 16).unwrap();

        // Writing to a closed descriptor fails
        syscall(&mut computer, 15).unwrap();
        assert_eq!(computer.registers.get(Reg::V0), -1);

        // Read it back
        computer.registers.set(Reg::A0, DATA_MIN as Word);
        computer.registers.set(Reg::A1, 0);
        syscall(&mut computer, 13).unwrap();
        let fd = computer.registers.get(Reg::V0);
        let buffer = HEAP_START;
        computer.registers.set(Reg::A0, fd);
        computer.registers.set(Reg::A1, buffer as Word);
        computer.registers.set(Reg::A2, 3);
        syscall(&mut computer, 14).unwrap();
        assert_eq!(computer.registers.get(Reg::V0), 3);
        assert_eq!(computer.memory.get_byte(buffer + 2, false).unwrap(), i32::from(b'l'));

        // Invalid mode
        computer.registers.set(Reg::A0, DATA_MIN as Word);
        computer.registers.set(Reg::A1, 2);
        syscall(&mut computer, 13).unwrap();
        assert_eq!(computer.registers.get(Reg::V0), -1);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn stdout_write_test() {
        let (mut computer, console) = computer();
        computer.memory.add_asciiz(b"hi there", DATA_MIN).unwrap();
        computer.registers.set(Reg::A0, 1);
        computer.registers.set(Reg::A1, DATA_MIN as Word);
        computer.registers.set(Reg::A2, 2);
        syscall(&mut computer, 15).unwrap();
        assert_eq!(computer.registers.get(Reg::V0), 2);
        assert_eq!(console.take_output(), "hi");
    }

    #[test]
    fn memory_dump_syscall_test() {
        let (mut computer, console) = computer();
        computer.memory.add_asciiz(b"abcd", DATA_MIN).unwrap();
        computer.registers.set(Reg::A0, DATA_MIN as Word);
        computer.registers.set(Reg::A1, (DATA_MIN + 4) as Word);
        syscall(&mut computer, 30).unwrap();
        assert_eq!(
            console.take_output(),
            "addr        hex             ascii       \n0x10010000  61  62  63  64  a  b  c  d  \n"
        );
    }
}
