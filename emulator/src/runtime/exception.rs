use miette::Diagnostic;
use thiserror::Error;

use crate::constants::{Address, Word};

/// Faults raised while executing an instruction
///
/// A fault aborts the instruction that raised it and stops the computer.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum Exception {
    #[error("arithmetic overflow")]
    #[diagnostic(code(mipsim::arithmetic_overflow))]
    ArithmeticOverflow,

    #[error("division by zero")]
    #[diagnostic(code(mipsim::division_by_zero))]
    DivisionByZero,

    #[error("immediate {value} is out of range")]
    #[diagnostic(code(mipsim::invalid_immediate))]
    InvalidImmediate { value: i64 },

    #[error("invalid argument {value}")]
    #[diagnostic(code(mipsim::invalid_argument))]
    InvalidArgument { value: Word },

    #[error("invalid character {byte:#04x}")]
    #[diagnostic(
        code(mipsim::invalid_character),
        help("only printable ASCII, tabs and newlines are allowed")
    )]
    InvalidCharacter { byte: u8 },

    #[error("invalid input {input:?}")]
    #[diagnostic(code(mipsim::invalid_input))]
    InvalidInput { input: String },

    #[error("address {address:#010x} is out of bounds")]
    #[diagnostic(code(mipsim::memory_out_of_bounds))]
    MemoryOutOfBounds { address: Address },

    #[error("address {address:#010x} is not aligned on {alignment} bytes")]
    #[diagnostic(code(mipsim::memory_alignment))]
    MemoryAlignment { address: Address, alignment: Address },

    #[error("invalid syscall {number}")]
    #[diagnostic(code(mipsim::invalid_syscall))]
    InvalidSyscall { number: Word },

    #[error("instruction limit of {limit} reached")]
    #[diagnostic(code(mipsim::instruction_limit))]
    InstructionLimit { limit: u64 },

    #[error("breakpoint {code}")]
    #[diagnostic(code(mipsim::breakpoint))]
    Breakpoint { code: Word },
}
