use std::cell::Cell;

use bitflags::bitflags;
use parse_display::Display;
use rand::Rng;
use thiserror::Error;

use crate::config::Layout;
use crate::constants as C;

bitflags! {
    /// Condition flags of coprocessor 1, set by the `c.*` compare instructions
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct ConditionFlags: u8 {
        const CC0 = 1 << 0;
        const CC1 = 1 << 1;
        const CC2 = 1 << 2;
        const CC3 = 1 << 3;
        const CC4 = 1 << 4;
        const CC5 = 1 << 5;
        const CC6 = 1 << 6;
        const CC7 = 1 << 7;
    }
}

impl ConditionFlags {
    /// The flag with the given number. Only the low 3 bits of `n` are used.
    #[must_use]
    pub const fn number(n: u8) -> Self {
        Self::from_bits_retain(1 << (n % C::CONDITION_FLAGS))
    }
}

/// General purpose registers, in encoding order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("${}", style = "lowercase")]
#[repr(u8)]
pub enum Reg {
    Zero,
    At,
    V0,
    V1,
    A0,
    A1,
    A2,
    A3,
    T0,
    T1,
    T2,
    T3,
    T4,
    T5,
    T6,
    T7,
    S0,
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    T8,
    T9,
    K0,
    K1,
    Gp,
    Sp,
    Fp,
    Ra,
}

impl Reg {
    pub const ALL: [Reg; C::GENERAL_REGISTERS] = [
        Reg::Zero,
        Reg::At,
        Reg::V0,
        Reg::V1,
        Reg::A0,
        Reg::A1,
        Reg::A2,
        Reg::A3,
        Reg::T0,
        Reg::T1,
        Reg::T2,
        Reg::T3,
        Reg::T4,
        Reg::T5,
        Reg::T6,
        Reg::T7,
        Reg::S0,
        Reg::S1,
        Reg::S2,
        Reg::S3,
        Reg::S4,
        Reg::S5,
        Reg::S6,
        Reg::S7,
        Reg::T8,
        Reg::T9,
        Reg::K0,
        Reg::K1,
        Reg::Gp,
        Reg::Sp,
        Reg::Fp,
        Reg::Ra,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not parse register {0:?}")]
pub struct RegisterParseError(pub String);

impl std::str::FromStr for Reg {
    type Err = RegisterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.strip_prefix('$').unwrap_or(s).to_lowercase();

        // Numeric form, like `$8`
        if let Ok(index) = name.parse::<usize>() {
            return Self::from_index(index).ok_or_else(|| RegisterParseError(s.to_owned()));
        }

        // `$s8` is an alias of `$fp`
        if name == "s8" {
            return Ok(Reg::Fp);
        }

        Self::ALL
            .iter()
            .find(|reg| reg.to_string()[1..] == name)
            .copied()
            .ok_or_else(|| RegisterParseError(s.to_owned()))
    }
}

/// A coprocessor 1 register, `$f0` to `$f31`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("$f{0}")]
pub struct FReg(u8);

impl FReg {
    /// Float argument of the syscalls, low half of a double argument
    pub const F12: FReg = FReg(12);

    /// High half of a double syscall argument
    pub const F13: FReg = FReg(13);

    /// Create a register from its number, if it is in range
    #[must_use]
    pub fn new(index: u8) -> Option<Self> {
        (usize::from(index) < C::FLOAT_REGISTERS).then_some(Self(index))
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether the register can hold the low half of a double
    #[must_use]
    pub const fn is_even(self) -> bool {
        self.0 % 2 == 0
    }
}

impl std::str::FromStr for FReg {
    type Err = RegisterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("$f")
            .and_then(|n| n.parse::<u8>().ok())
            .and_then(FReg::new)
            .ok_or_else(|| RegisterParseError(s.to_owned()))
    }
}

/// Any register that can be inspected from outside of the simulated program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum RegisterName {
    #[display("{0}")]
    General(Reg),
    #[display("{0}")]
    Float(FReg),
    #[display("hi")]
    Hi,
    #[display("lo")]
    Lo,
    #[display("pc")]
    Pc,
}

impl std::str::FromStr for RegisterName {
    type Err = RegisterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hi" | "$hi" => Ok(Self::Hi),
            "lo" | "$lo" => Ok(Self::Lo),
            "pc" | "$pc" => Ok(Self::Pc),
            _ => s
                .parse::<FReg>()
                .map(Self::Float)
                .or_else(|_| s.parse::<Reg>().map(Self::General)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registers {
    general: [C::Word; C::GENERAL_REGISTERS],

    /// Raw bit patterns of the coprocessor 1 registers
    float: [u32; C::FLOAT_REGISTERS],

    /// High word of multiplications, remainder of divisions
    pub hi: C::Word,

    /// Low word of multiplications, quotient of divisions
    pub lo: C::Word,

    /// Program counter
    pub pc: C::Address,

    pub flags: ConditionFlags,

    /// General registers which were written at least once, one bit each
    initialized: u32,

    /// Registers read by the program before they were initialized
    uninitialized_reads: Cell<u32>,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            general: [0; C::GENERAL_REGISTERS],
            float: [0; C::FLOAT_REGISTERS],
            hi: 0,
            lo: 0,
            pc: C::TEXT_START,
            flags: ConditionFlags::empty(),
            initialized: 1 << Reg::Zero.index(),
            uninitialized_reads: Cell::new(0),
        }
    }
}

impl Registers {
    /// Registers as they are when a program starts
    ///
    /// `$gp`, `$sp` and `pc` get the layout defaults, everything else is zero
    /// unless a random generator is given to fill them with garbage.
    pub fn initial<R: Rng>(layout: &Layout, garbage: Option<&mut R>) -> Self {
        let mut registers = Self::default();

        if let Some(rng) = garbage {
            // Garbage does not count as an initialization
            for value in &mut registers.general[1..] {
                *value = rng.gen();
            }
            for bits in &mut registers.float {
                *bits = rng.gen();
            }
            registers.hi = rng.gen();
            registers.lo = rng.gen();
        }

        registers.set(Reg::Gp, layout.initial_gp as C::Word);
        registers.set(Reg::Sp, layout.initial_sp as C::Word);
        registers.pc = layout.text_start;
        registers
    }

    /// Read a general purpose register on behalf of the program
    ///
    /// Reading a register which was never written is remembered, see
    /// [`Registers::take_uninitialized_reads`].
    #[must_use]
    pub fn get(&self, reg: Reg) -> C::Word {
        let bit = 1 << reg.index();
        if self.initialized & bit == 0 {
            self.uninitialized_reads
                .set(self.uninitialized_reads.get() | bit);
        }
        self.general[reg.index()]
    }

    /// Read a general purpose register from outside of the program
    #[must_use]
    pub fn peek(&self, reg: Reg) -> C::Word {
        self.general[reg.index()]
    }

    /// Registers read before being written since the last call. Each register
    /// is reported once.
    pub fn take_uninitialized_reads(&mut self) -> Vec<Reg> {
        let reads = self.uninitialized_reads.take();
        self.initialized |= reads;
        Reg::ALL
            .into_iter()
            .filter(|reg| reads & (1 << reg.index()) != 0)
            .collect()
    }

    /// Set a general purpose register. Writes to `$zero` are discarded.
    pub fn set(&mut self, reg: Reg, value: C::Word) {
        self.initialized |= 1 << reg.index();
        if reg != Reg::Zero {
            self.general[reg.index()] = value;
        }
    }

    #[must_use]
    pub fn get_float_bits(&self, reg: FReg) -> u32 {
        self.float[reg.index()]
    }

    pub fn set_float_bits(&mut self, reg: FReg, bits: u32) {
        self.float[reg.index()] = bits;
    }

    #[must_use]
    pub fn get_single(&self, reg: FReg) -> f32 {
        f32::from_bits(self.get_float_bits(reg))
    }

    pub fn set_single(&mut self, reg: FReg, value: f32) {
        self.set_float_bits(reg, value.to_bits());
    }

    /// Indices of the (low, high) registers of the pair holding a double.
    ///
    /// The loader rejects odd registers in double instructions; the low bit is
    /// ignored here.
    fn pair(reg: FReg) -> (usize, usize) {
        let low = reg.index() & !1;
        (low, low + 1)
    }

    #[must_use]
    pub fn get_double_bits(&self, reg: FReg) -> u64 {
        let (low, high) = Self::pair(reg);
        (u64::from(self.float[high]) << 32) | u64::from(self.float[low])
    }

    pub fn set_double_bits(&mut self, reg: FReg, bits: u64) {
        let (low, high) = Self::pair(reg);
        self.float[low] = bits as u32;
        self.float[high] = (bits >> 32) as u32;
    }

    #[must_use]
    pub fn get_double(&self, reg: FReg) -> f64 {
        f64::from_bits(self.get_double_bits(reg))
    }

    pub fn set_double(&mut self, reg: FReg, value: f64) {
        self.set_double_bits(reg, value.to_bits());
    }

    /// Copy the bits of a general register into a float register, without
    /// any numeric conversion
    pub fn move_int_to_float_bits(&mut self, src: Reg, dest: FReg) {
        self.set_float_bits(dest, self.get(src) as u32);
    }

    /// Copy the bits of a float register into a general register, without
    /// any numeric conversion
    pub fn move_float_bits_to_int(&mut self, src: FReg, dest: Reg) {
        self.set(dest, self.get_float_bits(src) as C::Word);
    }

    #[must_use]
    pub fn flag(&self, n: u8) -> bool {
        self.flags.contains(ConditionFlags::number(n))
    }

    pub fn set_flag(&mut self, n: u8, value: bool) {
        self.flags.set(ConditionFlags::number(n), value);
    }

    /// Read any register as a word. Float registers give their raw bits.
    #[must_use]
    pub fn read(&self, name: RegisterName) -> C::Word {
        match name {
            RegisterName::General(reg) => self.peek(reg),
            RegisterName::Float(reg) => self.get_float_bits(reg) as C::Word,
            RegisterName::Hi => self.hi,
            RegisterName::Lo => self.lo,
            RegisterName::Pc => self.pc as C::Word,
        }
    }

    /// Write any register from a word. Float registers receive the raw bits.
    pub fn write(&mut self, name: RegisterName, value: C::Word) {
        match name {
            RegisterName::General(reg) => self.set(reg, value),
            RegisterName::Float(reg) => self.set_float_bits(reg, value as u32),
            RegisterName::Hi => self.hi = value,
            RegisterName::Lo => self.lo = value,
            RegisterName::Pc => self.pc = value as C::Address,
        }
    }
}

impl std::fmt::Display for Registers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pc = {:#010x} | hi = {} | lo = {}", self.pc, self.hi, self.lo)?;
        for reg in Reg::ALL.iter().skip(1) {
            let value = self.peek(*reg);
            if value != 0 {
                write!(f, " | {reg} = {value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn parse_register_test() {
        assert_eq!("$t0".parse(), Ok(Reg::T0));
        assert_eq!("$8".parse(), Ok(Reg::T0));
        assert_eq!("$zero".parse(), Ok(Reg::Zero));
        assert_eq!("$0".parse(), Ok(Reg::Zero));
        assert_eq!("$ra".parse(), Ok(Reg::Ra));
        assert_eq!("$31".parse(), Ok(Reg::Ra));
        assert_eq!("$s8".parse(), Ok(Reg::Fp));
        assert!("$32".parse::<Reg>().is_err());
        assert!("$foo".parse::<Reg>().is_err());

        assert_eq!("$f12".parse(), Ok(FReg(12)));
        assert!("$f32".parse::<FReg>().is_err());

        assert_eq!("hi".parse(), Ok(RegisterName::Hi));
        assert_eq!("pc".parse(), Ok(RegisterName::Pc));
        assert_eq!("$f2".parse(), Ok(RegisterName::Float(FReg(2))));
        assert_eq!("$a0".parse(), Ok(RegisterName::General(Reg::A0)));
    }

    #[test]
    fn display_register_test() {
        assert_eq!(Reg::Zero.to_string(), "$zero");
        assert_eq!(Reg::A0.to_string(), "$a0");
        assert_eq!(FReg(12).to_string(), "$f12");
        assert_eq!(RegisterName::Lo.to_string(), "lo");
    }

    #[test]
    fn zero_register_is_read_only_test() {
        let mut registers = Registers::default();
        registers.set(Reg::Zero, 42);
        assert_eq!(registers.get(Reg::Zero), 0);
    }

    #[test]
    fn double_pair_test() {
        let mut registers = Registers::default();
        let f12 = FReg(12);
        let f13 = FReg(13);

        registers.set_double(f12, 420.42);
        assert_eq!(registers.get_double(f12), 420.42);

        // The even register holds the low word
        let bits = 420.42_f64.to_bits();
        assert_eq!(registers.get_float_bits(f12), bits as u32);
        assert_eq!(registers.get_float_bits(f13), (bits >> 32) as u32);
    }

    #[test]
    fn bit_moves_test() {
        let mut registers = Registers::default();
        registers.set(Reg::T0, -1);
        registers.move_int_to_float_bits(Reg::T0, FReg(0));
        assert!(registers.get_single(FReg(0)).is_nan());
        assert_eq!(registers.get_float_bits(FReg(0)), 0xFFFF_FFFF);

        registers.set_single(FReg(1), -0.0);
        registers.move_float_bits_to_int(FReg(1), Reg::T1);
        assert_eq!(registers.get(Reg::T1) as u32, 0x8000_0000);
    }

    #[test]
    fn flags_test() {
        let mut registers = Registers::default();
        registers.set_flag(3, true);
        assert!(registers.flag(3));
        assert!(!registers.flag(0));
        assert_eq!(registers.flags, ConditionFlags::CC3);
        registers.set_flag(3, false);
        assert!(registers.flags.is_empty());
    }

    #[test]
    fn initial_registers_test() {
        let layout = Layout::default();
        let registers = Registers::initial::<StdRng>(&layout, None);
        assert_eq!(registers.get(Reg::Sp) as u32, C::INITIAL_SP);
        assert_eq!(registers.get(Reg::Gp) as u32, C::INITIAL_GP);
        assert_eq!(registers.pc, C::TEXT_START);
        assert_eq!(registers.get(Reg::T0), 0);
    }

    #[test]
    fn uninitialized_reads_test() {
        let layout = Layout::default();
        let mut registers = Registers::initial::<StdRng>(&layout, None);

        let _ = registers.get(Reg::Sp);
        let _ = registers.get(Reg::Zero);
        let _ = registers.peek(Reg::T1);
        assert_eq!(registers.take_uninitialized_reads(), vec![]);

        let _ = registers.get(Reg::T2);
        let _ = registers.get(Reg::T0);
        let _ = registers.get(Reg::T2);
        assert_eq!(registers.take_uninitialized_reads(), vec![Reg::T0, Reg::T2]);

        // Already reported
        let _ = registers.get(Reg::T0);
        registers.set(Reg::T3, 1);
        let _ = registers.get(Reg::T3);
        assert_eq!(registers.take_uninitialized_reads(), vec![]);
    }

    #[test]
    fn garbage_is_not_an_initialization_test() {
        use rand::SeedableRng;

        let layout = Layout::default();
        let mut rng = StdRng::seed_from_u64(42);
        let mut registers = Registers::initial(&layout, Some(&mut rng));
        assert_eq!(registers.get(Reg::Zero), 0);
        let _ = registers.get(Reg::S0);
        assert_eq!(registers.take_uninitialized_reads(), vec![Reg::S0]);
    }
}
