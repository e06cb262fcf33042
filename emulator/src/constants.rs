pub type Address = u32;
pub type Word = i32;

/// Size of an instruction in the text segment
pub const INSTRUCTION_SIZE: Address = 4;

/// Number of general purpose registers
pub const GENERAL_REGISTERS: usize = 32;

/// Number of coprocessor 1 registers
pub const FLOAT_REGISTERS: usize = 32;

/// Number of coprocessor 1 condition flags
pub const CONDITION_FLAGS: u8 = 8;

/// Start of the text segment, where the program is loaded
pub const TEXT_START: Address = 0x0040_0000;

/// Start of the static data segment
pub const DATA_MIN: Address = 0x1001_0000;

/// Start of the heap, grown by the `sbrk` syscall
pub const HEAP_START: Address = 0x1004_0000;

/// Initial value of the global pointer
pub const INITIAL_GP: Address = 0x1000_8000;

/// Initial value of the stack pointer. The heap can never grow past it.
pub const INITIAL_SP: Address = 0x7FFF_EFFC;

/// Last addressable byte of the data/heap/stack region
pub const DATA_MAX: Address = 0x7FFF_FFFF;

/// Start of the memory-mapped I/O region
pub const MMIO_BASE: Address = 0xFFFF_0000;

/// Default label used as the program entrypoint
pub const DEFAULT_ENTRYPOINT: &str = "main";
