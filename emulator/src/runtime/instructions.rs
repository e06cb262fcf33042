use parse_display::Display;
use tracing::debug;

use super::arith::{self, Rounding};
use super::exception::Exception;
use super::registers::{FReg, Reg};
use super::{syscalls, Computer, ProcessorError};
use crate::constants::{Address, Word};

/// Target of a branch or a jump, resolved when the program is loaded
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("{label}")]
pub struct Target {
    pub label: String,
    pub address: Address,
}

impl Target {
    #[must_use]
    pub fn new(label: impl Into<String>, address: Address) -> Self {
        Self {
            label: label.into(),
            address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Display)]
pub enum Instruction {
    /// Signed addition, faults on overflow
    #[display("add  {0}, {1}, {2}")]
    Add(Reg, Reg, Reg),

    /// Wrapping addition
    #[display("addu {0}, {1}, {2}")]
    Addu(Reg, Reg, Reg),

    #[display("sub  {0}, {1}, {2}")]
    Sub(Reg, Reg, Reg),

    #[display("subu {0}, {1}, {2}")]
    Subu(Reg, Reg, Reg),

    #[display("addi {0}, {1}, {2}")]
    Addi(Reg, Reg, i64),

    #[display("addiu {0}, {1}, {2}")]
    Addiu(Reg, Reg, i64),

    /// Set on less than
    #[display("slt  {0}, {1}, {2}")]
    Slt(Reg, Reg, Reg),

    #[display("sltu {0}, {1}, {2}")]
    Sltu(Reg, Reg, Reg),

    #[display("slti {0}, {1}, {2}")]
    Slti(Reg, Reg, i64),

    #[display("sltiu {0}, {1}, {2}")]
    Sltiu(Reg, Reg, i64),

    #[display("and  {0}, {1}, {2}")]
    And(Reg, Reg, Reg),

    #[display("or   {0}, {1}, {2}")]
    Or(Reg, Reg, Reg),

    #[display("nor  {0}, {1}, {2}")]
    Nor(Reg, Reg, Reg),

    #[display("xor  {0}, {1}, {2}")]
    Xor(Reg, Reg, Reg),

    #[display("andi {0}, {1}, {2}")]
    Andi(Reg, Reg, i64),

    #[display("ori  {0}, {1}, {2}")]
    Ori(Reg, Reg, i64),

    #[display("xori {0}, {1}, {2}")]
    Xori(Reg, Reg, i64),

    /// Load the immediate in the upper half of a register
    #[display("lui  {0}, {1}")]
    Lui(Reg, i64),

    #[display("sll  {0}, {1}, {2}")]
    Sll(Reg, Reg, i64),

    #[display("srl  {0}, {1}, {2}")]
    Srl(Reg, Reg, i64),

    #[display("sra  {0}, {1}, {2}")]
    Sra(Reg, Reg, i64),

    #[display("sllv {0}, {1}, {2}")]
    Sllv(Reg, Reg, Reg),

    #[display("srlv {0}, {1}, {2}")]
    Srlv(Reg, Reg, Reg),

    #[display("srav {0}, {1}, {2}")]
    Srav(Reg, Reg, Reg),

    /// Multiplication keeping the low 32 bits
    #[display("mul  {0}, {1}, {2}")]
    Mul(Reg, Reg, Reg),

    /// Full multiplication into `hi:lo`
    #[display("mult {0}, {1}")]
    Mult(Reg, Reg),

    #[display("multu {0}, {1}")]
    Multu(Reg, Reg),

    /// Division, quotient in `lo` and remainder in `hi`
    #[display("div  {0}, {1}")]
    Div(Reg, Reg),

    #[display("divu {0}, {1}")]
    Divu(Reg, Reg),

    #[display("madd {0}, {1}")]
    Madd(Reg, Reg),

    #[display("maddu {0}, {1}")]
    Maddu(Reg, Reg),

    #[display("msub {0}, {1}")]
    Msub(Reg, Reg),

    #[display("msubu {0}, {1}")]
    Msubu(Reg, Reg),

    #[display("mfhi {0}")]
    Mfhi(Reg),

    #[display("mflo {0}")]
    Mflo(Reg),

    #[display("mthi {0}")]
    Mthi(Reg),

    #[display("mtlo {0}")]
    Mtlo(Reg),

    /// Count leading zeros
    #[display("clz  {0}, {1}")]
    Clz(Reg, Reg),

    /// Count leading ones
    #[display("clo  {0}, {1}")]
    Clo(Reg, Reg),

    /// Move if the last register is not zero
    #[display("movn {0}, {1}, {2}")]
    Movn(Reg, Reg, Reg),

    /// Move if the last register is zero
    #[display("movz {0}, {1}, {2}")]
    Movz(Reg, Reg, Reg),

    /// Move if the condition flag is set
    #[display("movt {0}, {1}, {2}")]
    Movt(Reg, Reg, u8),

    /// Move if the condition flag is clear
    #[display("movf {0}, {1}, {2}")]
    Movf(Reg, Reg, u8),

    #[display("add.s {0}, {1}, {2}")]
    AddS(FReg, FReg, FReg),

    #[display("add.d {0}, {1}, {2}")]
    AddD(FReg, FReg, FReg),

    #[display("sub.s {0}, {1}, {2}")]
    SubS(FReg, FReg, FReg),

    #[display("sub.d {0}, {1}, {2}")]
    SubD(FReg, FReg, FReg),

    #[display("mul.s {0}, {1}, {2}")]
    MulS(FReg, FReg, FReg),

    #[display("mul.d {0}, {1}, {2}")]
    MulD(FReg, FReg, FReg),

    #[display("div.s {0}, {1}, {2}")]
    DivS(FReg, FReg, FReg),

    #[display("div.d {0}, {1}, {2}")]
    DivD(FReg, FReg, FReg),

    #[display("abs.s {0}, {1}")]
    AbsS(FReg, FReg),

    #[display("abs.d {0}, {1}")]
    AbsD(FReg, FReg),

    #[display("neg.s {0}, {1}")]
    NegS(FReg, FReg),

    #[display("neg.d {0}, {1}")]
    NegD(FReg, FReg),

    #[display("mov.s {0}, {1}")]
    MovS(FReg, FReg),

    #[display("mov.d {0}, {1}")]
    MovD(FReg, FReg),

    #[display("sqrt.s {0}, {1}")]
    SqrtS(FReg, FReg),

    #[display("sqrt.d {0}, {1}")]
    SqrtD(FReg, FReg),

    #[display("ceil.w.s {0}, {1}")]
    CeilWS(FReg, FReg),

    #[display("ceil.w.d {0}, {1}")]
    CeilWD(FReg, FReg),

    #[display("floor.w.s {0}, {1}")]
    FloorWS(FReg, FReg),

    #[display("floor.w.d {0}, {1}")]
    FloorWD(FReg, FReg),

    #[display("round.w.s {0}, {1}")]
    RoundWS(FReg, FReg),

    #[display("round.w.d {0}, {1}")]
    RoundWD(FReg, FReg),

    #[display("trunc.w.s {0}, {1}")]
    TruncWS(FReg, FReg),

    #[display("trunc.w.d {0}, {1}")]
    TruncWD(FReg, FReg),

    #[display("cvt.d.s {0}, {1}")]
    CvtDS(FReg, FReg),

    #[display("cvt.d.w {0}, {1}")]
    CvtDW(FReg, FReg),

    #[display("cvt.s.d {0}, {1}")]
    CvtSD(FReg, FReg),

    #[display("cvt.s.w {0}, {1}")]
    CvtSW(FReg, FReg),

    #[display("cvt.w.s {0}, {1}")]
    CvtWS(FReg, FReg),

    #[display("cvt.w.d {0}, {1}")]
    CvtWD(FReg, FReg),

    /// Move the bits of a float register to a general register
    #[display("mfc1 {0}, {1}")]
    Mfc1(Reg, FReg),

    /// Move the bits of a general register to a float register
    #[display("mtc1 {0}, {1}")]
    Mtc1(Reg, FReg),

    #[display("c.eq.s {0}, {1}, {2}")]
    CEqS(u8, FReg, FReg),

    #[display("c.eq.d {0}, {1}, {2}")]
    CEqD(u8, FReg, FReg),

    #[display("c.le.s {0}, {1}, {2}")]
    CLeS(u8, FReg, FReg),

    #[display("c.le.d {0}, {1}, {2}")]
    CLeD(u8, FReg, FReg),

    #[display("c.lt.s {0}, {1}, {2}")]
    CLtS(u8, FReg, FReg),

    #[display("c.lt.d {0}, {1}, {2}")]
    CLtD(u8, FReg, FReg),

    /// Branch if the condition flag is set
    #[display("bc1t {0}, {1}")]
    Bc1t(u8, Target),

    /// Branch if the condition flag is clear
    #[display("bc1f {0}, {1}")]
    Bc1f(u8, Target),

    #[display("movt.s {0}, {1}, {2}")]
    MovtS(FReg, FReg, u8),

    #[display("movt.d {0}, {1}, {2}")]
    MovtD(FReg, FReg, u8),

    #[display("movf.s {0}, {1}, {2}")]
    MovfS(FReg, FReg, u8),

    #[display("movf.d {0}, {1}, {2}")]
    MovfD(FReg, FReg, u8),

    #[display("movn.s {0}, {1}, {2}")]
    MovnS(FReg, FReg, Reg),

    #[display("movn.d {0}, {1}, {2}")]
    MovnD(FReg, FReg, Reg),

    #[display("movz.s {0}, {1}, {2}")]
    MovzS(FReg, FReg, Reg),

    #[display("movz.d {0}, {1}, {2}")]
    MovzD(FReg, FReg, Reg),

    #[display("lb   {0}, {1}({2})")]
    Lb(Reg, Word, Reg),

    #[display("lbu  {0}, {1}({2})")]
    Lbu(Reg, Word, Reg),

    #[display("lh   {0}, {1}({2})")]
    Lh(Reg, Word, Reg),

    #[display("lhu  {0}, {1}({2})")]
    Lhu(Reg, Word, Reg),

    #[display("lw   {0}, {1}({2})")]
    Lw(Reg, Word, Reg),

    /// Load the left part of an unaligned word
    #[display("lwl  {0}, {1}({2})")]
    Lwl(Reg, Word, Reg),

    /// Load the right part of an unaligned word
    #[display("lwr  {0}, {1}({2})")]
    Lwr(Reg, Word, Reg),

    #[display("sb   {0}, {1}({2})")]
    Sb(Reg, Word, Reg),

    #[display("sh   {0}, {1}({2})")]
    Sh(Reg, Word, Reg),

    #[display("sw   {0}, {1}({2})")]
    Sw(Reg, Word, Reg),

    #[display("swl  {0}, {1}({2})")]
    Swl(Reg, Word, Reg),

    #[display("swr  {0}, {1}({2})")]
    Swr(Reg, Word, Reg),

    #[display("l.s  {0}, {1}({2})")]
    LS(FReg, Word, Reg),

    #[display("l.d  {0}, {1}({2})")]
    LD(FReg, Word, Reg),

    #[display("s.s  {0}, {1}({2})")]
    SS(FReg, Word, Reg),

    #[display("s.d  {0}, {1}({2})")]
    SD(FReg, Word, Reg),

    #[display("beq  {0}, {1}, {2}")]
    Beq(Reg, Reg, Target),

    #[display("bne  {0}, {1}, {2}")]
    Bne(Reg, Reg, Target),

    #[display("bgez {0}, {1}")]
    Bgez(Reg, Target),

    /// Branch if greater or equal to zero, and link
    #[display("bgezal {0}, {1}")]
    Bgezal(Reg, Target),

    #[display("bgtz {0}, {1}")]
    Bgtz(Reg, Target),

    #[display("blez {0}, {1}")]
    Blez(Reg, Target),

    #[display("bltz {0}, {1}")]
    Bltz(Reg, Target),

    /// Branch if strictly less than zero, and link
    #[display("bltzal {0}, {1}")]
    Bltzal(Reg, Target),

    /// Unconditional branch
    #[display("b    {0}")]
    B(Target),

    #[display("j    {0}")]
    J(Target),

    /// Jump and save the return address in `$ra`
    #[display("jal  {0}")]
    Jal(Target),

    #[display("jr   {0}")]
    Jr(Reg),

    /// Jump to the address in the second register, saving the return address
    /// in the first
    #[display("jalr {0}, {1}")]
    Jalr(Reg, Reg),

    #[display("nop")]
    Nop,

    /// Call the service selected by `$v0`
    #[display("syscall")]
    Syscall,

    /// Stop the program with a breakpoint fault
    #[display("break {0}")]
    Break(Word),
}

impl Instruction {
    /// Float registers used as doubles by the instruction
    ///
    /// Those must be even, which is checked when loading a program.
    #[must_use]
    pub fn double_registers(&self) -> Vec<FReg> {
        use Instruction::*;

        match self {
            AddD(a, b, c) | SubD(a, b, c) | MulD(a, b, c) | DivD(a, b, c) => vec![*a, *b, *c],
            AbsD(a, b) | NegD(a, b) | MovD(a, b) | SqrtD(a, b) => vec![*a, *b],
            CeilWD(_, b) | FloorWD(_, b) | RoundWD(_, b) | TruncWD(_, b) | CvtSD(_, b)
            | CvtWD(_, b) => vec![*b],
            CvtDS(a, _) | CvtDW(a, _) => vec![*a],
            CEqD(_, a, b) | CLeD(_, a, b) | CLtD(_, a, b) => vec![*a, *b],
            MovtD(a, b, _) | MovfD(a, b, _) => vec![*a, *b],
            MovnD(a, b, _) | MovzD(a, b, _) => vec![*a, *b],
            LD(a, _, _) | SD(a, _, _) => vec![*a],
            _ => Vec::new(),
        }
    }

    /// Execute the instruction
    ///
    /// The program counter has already been moved past the instruction.
    #[tracing::instrument(skip(computer))]
    pub(crate) fn execute(&self, computer: &mut Computer) -> Result<(), ProcessorError> {
        use Instruction::*;

        let regs = &mut computer.registers;

        match self {
            Add(rd, rs, rt) | Addu(rd, rs, rt) => {
                let (a, b) = (regs.get(*rs), regs.get(*rt));
                let res = arith::add(a, b, matches!(self, Add(..)))?;
                debug!("{} + {} = {}", a, b, res);
                regs.set(*rd, res);
            }

            Sub(rd, rs, rt) | Subu(rd, rs, rt) => {
                let (a, b) = (regs.get(*rs), regs.get(*rt));
                let res = arith::sub(a, b, matches!(self, Sub(..)))?;
                debug!("{} - {} = {}", a, b, res);
                regs.set(*rd, res);
            }

            Addi(rt, rs, imm) | Addiu(rt, rs, imm) => {
                let imm = arith::signed_immediate(*imm)?;
                let a = regs.get(*rs);
                let res = arith::add(a, imm, matches!(self, Addi(..)))?;
                debug!("{} + {} = {}", a, imm, res);
                regs.set(*rt, res);
            }

            Slt(rd, rs, rt) => {
                let res = regs.get(*rs) < regs.get(*rt);
                regs.set(*rd, res.into());
            }

            Sltu(rd, rs, rt) => {
                let res = (regs.get(*rs) as u32) < (regs.get(*rt) as u32);
                regs.set(*rd, res.into());
            }

            Slti(rt, rs, imm) => {
                let imm = arith::signed_immediate(*imm)?;
                let res = regs.get(*rs) < imm;
                regs.set(*rt, res.into());
            }

            Sltiu(rt, rs, imm) => {
                let imm = arith::signed_immediate(*imm)?;
                let res = (regs.get(*rs) as u32) < (imm as u32);
                regs.set(*rt, res.into());
            }

            And(rd, rs, rt) => regs.set(*rd, regs.get(*rs) & regs.get(*rt)),
            Or(rd, rs, rt) => regs.set(*rd, regs.get(*rs) | regs.get(*rt)),
            Nor(rd, rs, rt) => regs.set(*rd, !(regs.get(*rs) | regs.get(*rt))),
            Xor(rd, rs, rt) => regs.set(*rd, regs.get(*rs) ^ regs.get(*rt)),

            Andi(rt, rs, imm) => {
                let imm = arith::unsigned_immediate(*imm)?;
                regs.set(*rt, regs.get(*rs) & imm);
            }

            Ori(rt, rs, imm) => {
                let imm = arith::unsigned_immediate(*imm)?;
                regs.set(*rt, regs.get(*rs) | imm);
            }

            Xori(rt, rs, imm) => {
                let imm = arith::unsigned_immediate(*imm)?;
                regs.set(*rt, regs.get(*rs) ^ imm);
            }

            Lui(rt, imm) => {
                let imm = arith::unsigned_immediate(*imm)?;
                regs.set(*rt, imm << 16);
            }

            Sll(rd, rt, shamt) => {
                let shamt = arith::shift_amount(*shamt)? as Word;
                regs.set(*rd, arith::sll(regs.get(*rt), shamt));
            }

            Srl(rd, rt, shamt) => {
                let shamt = arith::shift_amount(*shamt)? as Word;
                regs.set(*rd, arith::srl(regs.get(*rt), shamt));
            }

            Sra(rd, rt, shamt) => {
                let shamt = arith::shift_amount(*shamt)? as Word;
                regs.set(*rd, arith::sra(regs.get(*rt), shamt));
            }

            Sllv(rd, rt, rs) => regs.set(*rd, arith::sll(regs.get(*rt), regs.get(*rs))),
            Srlv(rd, rt, rs) => regs.set(*rd, arith::srl(regs.get(*rt), regs.get(*rs))),
            Srav(rd, rt, rs) => regs.set(*rd, arith::sra(regs.get(*rt), regs.get(*rs))),

            Mul(rd, rs, rt) => {
                let (a, b) = (regs.get(*rs), regs.get(*rt));
                let res = a.wrapping_mul(b);
                debug!("{} * {} = {}", a, b, res);
                regs.set(*rd, res);
            }

            Mult(rs, rt) | Multu(rs, rt) => {
                let signed = matches!(self, Mult(..));
                let (hi, lo) = arith::split(arith::product(regs.get(*rs), regs.get(*rt), signed));
                regs.hi = hi;
                regs.lo = lo;
            }

            Div(rs, rt) | Divu(rs, rt) => {
                let signed = matches!(self, Div(..));
                let (a, b) = (regs.get(*rs), regs.get(*rt));
                let (quotient, remainder) = arith::div(a, b, signed)?;
                debug!(quotient, remainder, "{} / {}", a, b);
                regs.lo = quotient;
                regs.hi = remainder;
            }

            Madd(rs, rt) | Maddu(rs, rt) | Msub(rs, rt) | Msubu(rs, rt) => {
                let signed = matches!(self, Madd(..) | Msub(..));
                let subtract = matches!(self, Msub(..) | Msubu(..));
                let (hi, lo) = arith::multiply_accumulate(
                    (regs.hi, regs.lo),
                    regs.get(*rs),
                    regs.get(*rt),
                    signed,
                    subtract,
                );
                regs.hi = hi;
                regs.lo = lo;
            }

            Mfhi(rd) => regs.set(*rd, regs.hi),
            Mflo(rd) => regs.set(*rd, regs.lo),
            Mthi(rs) => regs.hi = regs.get(*rs),
            Mtlo(rs) => regs.lo = regs.get(*rs),

            Clz(rd, rs) => regs.set(*rd, regs.get(*rs).leading_zeros() as Word),
            Clo(rd, rs) => regs.set(*rd, regs.get(*rs).leading_ones() as Word),

            Movn(rd, rs, rt) => {
                if regs.get(*rt) != 0 {
                    regs.set(*rd, regs.get(*rs));
                }
            }

            Movz(rd, rs, rt) => {
                if regs.get(*rt) == 0 {
                    regs.set(*rd, regs.get(*rs));
                }
            }

            Movt(rd, rs, flag) => {
                if regs.flag(*flag) {
                    regs.set(*rd, regs.get(*rs));
                }
            }

            Movf(rd, rs, flag) => {
                if !regs.flag(*flag) {
                    regs.set(*rd, regs.get(*rs));
                }
            }

            AddS(fd, fs, ft) => regs.set_single(*fd, regs.get_single(*fs) + regs.get_single(*ft)),
            AddD(fd, fs, ft) => regs.set_double(*fd, regs.get_double(*fs) + regs.get_double(*ft)),
            SubS(fd, fs, ft) => regs.set_single(*fd, regs.get_single(*fs) - regs.get_single(*ft)),
            SubD(fd, fs, ft) => regs.set_double(*fd, regs.get_double(*fs) - regs.get_double(*ft)),
            MulS(fd, fs, ft) => regs.set_single(*fd, regs.get_single(*fs) * regs.get_single(*ft)),
            MulD(fd, fs, ft) => regs.set_double(*fd, regs.get_double(*fs) * regs.get_double(*ft)),
            DivS(fd, fs, ft) => regs.set_single(*fd, regs.get_single(*fs) / regs.get_single(*ft)),
            DivD(fd, fs, ft) => {
                let res = arith::div_double(regs.get_double(*fs), regs.get_double(*ft));
                regs.set_double(*fd, res);
            }

            AbsS(fd, fs) => regs.set_single(*fd, regs.get_single(*fs).abs()),
            AbsD(fd, fs) => regs.set_double(*fd, regs.get_double(*fs).abs()),
            NegS(fd, fs) => regs.set_single(*fd, -regs.get_single(*fs)),
            NegD(fd, fs) => regs.set_double(*fd, -regs.get_double(*fs)),
            MovS(fd, fs) => regs.set_float_bits(*fd, regs.get_float_bits(*fs)),
            MovD(fd, fs) => regs.set_double_bits(*fd, regs.get_double_bits(*fs)),
            SqrtS(fd, fs) => regs.set_single(*fd, arith::sqrt_single(regs.get_single(*fs))),
            SqrtD(fd, fs) => regs.set_double(*fd, arith::sqrt_double(regs.get_double(*fs))),

            CeilWS(fd, fs)
            | FloorWS(fd, fs)
            | RoundWS(fd, fs)
            | TruncWS(fd, fs)
            | CvtWS(fd, fs) => {
                let res = arith::float_to_word(regs.get_single(*fs).into(), self.rounding());
                regs.set_float_bits(*fd, res as u32);
            }

            CeilWD(fd, fs)
            | FloorWD(fd, fs)
            | RoundWD(fd, fs)
            | TruncWD(fd, fs)
            | CvtWD(fd, fs) => {
                let res = arith::float_to_word(regs.get_double(*fs), self.rounding());
                regs.set_float_bits(*fd, res as u32);
            }

            CvtDS(fd, fs) => regs.set_double(*fd, regs.get_single(*fs).into()),
            CvtDW(fd, fs) => regs.set_double(*fd, (regs.get_float_bits(*fs) as Word).into()),
            CvtSD(fd, fs) => regs.set_single(*fd, regs.get_double(*fs) as f32),
            CvtSW(fd, fs) => regs.set_single(*fd, regs.get_float_bits(*fs) as Word as f32),

            Mfc1(rt, fs) => regs.move_float_bits_to_int(*fs, *rt),
            Mtc1(rt, fs) => regs.move_int_to_float_bits(*rt, *fs),

            CEqS(flag, fs, ft) => {
                regs.set_flag(*flag, regs.get_single(*fs) == regs.get_single(*ft));
            }
            CEqD(flag, fs, ft) => {
                regs.set_flag(*flag, regs.get_double(*fs) == regs.get_double(*ft));
            }
            CLeS(flag, fs, ft) => {
                regs.set_flag(*flag, regs.get_single(*fs) <= regs.get_single(*ft));
            }
            CLeD(flag, fs, ft) => {
                regs.set_flag(*flag, regs.get_double(*fs) <= regs.get_double(*ft));
            }
            CLtS(flag, fs, ft) => regs.set_flag(*flag, regs.get_single(*fs) < regs.get_single(*ft)),
            CLtD(flag, fs, ft) => regs.set_flag(*flag, regs.get_double(*fs) < regs.get_double(*ft)),

            Bc1t(flag, target) => {
                if regs.flag(*flag) {
                    computer.jump(target);
                }
            }

            Bc1f(flag, target) => {
                if !regs.flag(*flag) {
                    computer.jump(target);
                }
            }

            MovtS(fd, fs, flag) => {
                if regs.flag(*flag) {
                    regs.set_float_bits(*fd, regs.get_float_bits(*fs));
                }
            }

            MovtD(fd, fs, flag) => {
                if regs.flag(*flag) {
                    regs.set_double_bits(*fd, regs.get_double_bits(*fs));
                }
            }

            MovfS(fd, fs, flag) => {
                if !regs.flag(*flag) {
                    regs.set_float_bits(*fd, regs.get_float_bits(*fs));
                }
            }

            MovfD(fd, fs, flag) => {
                if !regs.flag(*flag) {
                    regs.set_double_bits(*fd, regs.get_double_bits(*fs));
                }
            }

            MovnS(fd, fs, rt) => {
                if regs.get(*rt) != 0 {
                    regs.set_float_bits(*fd, regs.get_float_bits(*fs));
                }
            }

            MovnD(fd, fs, rt) => {
                if regs.get(*rt) != 0 {
                    regs.set_double_bits(*fd, regs.get_double_bits(*fs));
                }
            }

            MovzS(fd, fs, rt) => {
                if regs.get(*rt) == 0 {
                    regs.set_float_bits(*fd, regs.get_float_bits(*fs));
                }
            }

            MovzD(fd, fs, rt) => {
                if regs.get(*rt) == 0 {
                    regs.set_double_bits(*fd, regs.get_double_bits(*fs));
                }
            }

            Lb(rt, offset, base) | Lbu(rt, offset, base) => {
                let address = computer.effective_address(*offset, *base);
                let value = computer.memory.get_byte(address, matches!(self, Lb(..)))?;
                computer.registers.set(*rt, value);
            }

            Lh(rt, offset, base) | Lhu(rt, offset, base) => {
                let address = computer.effective_address(*offset, *base);
                let value = computer.memory.get_half(address, matches!(self, Lh(..)))?;
                computer.registers.set(*rt, value);
            }

            Lw(rt, offset, base) => {
                let address = computer.effective_address(*offset, *base);
                let value = computer.memory.get_word(address)?;
                debug!("Loaded {} from {:#010x}", value, address);
                computer.registers.set(*rt, value);
            }

            Lwl(rt, offset, base) | Lwr(rt, offset, base) => {
                let address = computer.effective_address(*offset, *base);
                let alignment = address % 4;
                let word_start = address - alignment;

                let mut bytes = [0u8; 4];
                for (i, byte) in (0..).zip(bytes.iter_mut()) {
                    // Only the bytes of the word which are merged are read
                    let used = if matches!(self, Lwl(..)) {
                        i <= alignment
                    } else {
                        i >= alignment
                    };
                    if used {
                        *byte = computer.memory.get_byte(word_start + i, false)? as u8;
                    }
                }

                let original = computer.registers.get(*rt);
                let value = if matches!(self, Lwl(..)) {
                    arith::load_left(original, &bytes, alignment)
                } else {
                    arith::load_right(original, &bytes, alignment)
                };
                computer.registers.set(*rt, value);
            }

            Sb(rt, offset, base) => {
                let address = computer.effective_address(*offset, *base);
                let value = computer.registers.get(*rt);
                computer.memory.set_byte(address, value)?;
            }

            Sh(rt, offset, base) => {
                let address = computer.effective_address(*offset, *base);
                let value = computer.registers.get(*rt);
                computer.memory.set_half(address, value)?;
            }

            Sw(rt, offset, base) => {
                let address = computer.effective_address(*offset, *base);
                let value = computer.registers.get(*rt);
                debug!("Storing {} at {:#010x}", value, address);
                computer.memory.set_word(address, value)?;
            }

            Swl(rt, offset, base) | Swr(rt, offset, base) => {
                let address = computer.effective_address(*offset, *base);
                let alignment = address % 4;
                let word_start = address - alignment;
                let data = computer.registers.get(*rt);

                let bytes: Vec<_> = if matches!(self, Swl(..)) {
                    arith::store_left(data, alignment).collect()
                } else {
                    arith::store_right(data, alignment).collect()
                };

                // All the bytes are inside the same word, so checking the
                // first one is enough for bounds
                computer.memory.get_byte(word_start, false)?;
                for (i, byte) in bytes {
                    computer.memory.set_byte(word_start + i, byte.into())?;
                }
            }

            LS(ft, offset, base) => {
                let address = computer.effective_address(*offset, *base);
                let value = computer.memory.get_float(address)?;
                computer.registers.set_single(*ft, value);
            }

            LD(ft, offset, base) => {
                let address = computer.effective_address(*offset, *base);
                let value = computer.memory.get_double(address)?;
                computer.registers.set_double(*ft, value);
            }

            SS(ft, offset, base) => {
                let address = computer.effective_address(*offset, *base);
                let value = computer.registers.get_single(*ft);
                computer.memory.set_float(address, value)?;
            }

            SD(ft, offset, base) => {
                let address = computer.effective_address(*offset, *base);
                let value = computer.registers.get_double(*ft);
                computer.memory.set_double(address, value)?;
            }

            Beq(rs, rt, target) => {
                if regs.get(*rs) == regs.get(*rt) {
                    computer.jump(target);
                }
            }

            Bne(rs, rt, target) => {
                if regs.get(*rs) != regs.get(*rt) {
                    computer.jump(target);
                }
            }

            Bgez(rs, target) => {
                if regs.get(*rs) >= 0 {
                    computer.jump(target);
                }
            }

            Bgezal(rs, target) => {
                if regs.get(*rs) >= 0 {
                    computer.link(Reg::Ra);
                    computer.jump(target);
                }
            }

            Bgtz(rs, target) => {
                if regs.get(*rs) > 0 {
                    computer.jump(target);
                }
            }

            Blez(rs, target) => {
                if regs.get(*rs) <= 0 {
                    computer.jump(target);
                }
            }

            Bltz(rs, target) => {
                if regs.get(*rs) < 0 {
                    computer.jump(target);
                }
            }

            Bltzal(rs, target) => {
                if regs.get(*rs) < 0 {
                    computer.link(Reg::Ra);
                    computer.jump(target);
                }
            }

            B(target) | J(target) => computer.jump(target),

            Jal(target) => {
                computer.link(Reg::Ra);
                computer.jump(target);
            }

            Jr(rs) => {
                let address = regs.get(*rs) as Address;
                debug!("Jumping to address {:#010x}", address);
                regs.pc = address;
            }

            Jalr(rd, rs) => {
                let address = regs.get(*rs) as Address;
                computer.link(*rd);
                debug!("Jumping to address {:#010x}", address);
                computer.registers.pc = address;
            }

            Nop => {}

            Syscall => syscalls::dispatch(computer)?,

            Break(code) => return Err(Exception::Breakpoint { code: *code }.into()),
        }

        Ok(())
    }

    /// Rounding mode of the float to word conversions
    fn rounding(&self) -> Rounding {
        use Instruction::*;

        match self {
            CeilWS(..) | CeilWD(..) => Rounding::Ceil,
            FloorWS(..) | FloorWD(..) => Rounding::Floor,
            RoundWS(..) | RoundWD(..) => Rounding::Round,
            _ => Rounding::Trunc,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::constants::{DATA_MIN, TEXT_START};

    fn f(n: u8) -> FReg {
        FReg::new(n).unwrap()
    }

    fn run(computer: &mut Computer, instruction: Instruction) -> Result<(), ProcessorError> {
        computer.execute(&instruction)
    }

    #[test]
    fn display_test() {
        assert_eq!(
            Instruction::Add(Reg::T0, Reg::T1, Reg::T2).to_string(),
            "add  $t0, $t1, $t2"
        );
        assert_eq!(
            Instruction::Lw(Reg::A0, -4, Reg::Sp).to_string(),
            "lw   $a0, -4($sp)"
        );
        assert_eq!(
            Instruction::Jal(Target::new("print", TEXT_START)).to_string(),
            "jal  print"
        );
        assert_eq!(
            Instruction::CEqD(3, f(2), f(4)).to_string(),
            "c.eq.d 3, $f2, $f4"
        );
        assert_eq!(Instruction::Syscall.to_string(), "syscall");
    }

    #[test]
    fn add_overflow_test() {
        let mut computer = Computer::default();
        computer.registers.set(Reg::T1, Word::MAX);
        computer.registers.set(Reg::T2, 1);
        computer.registers.set(Reg::T0, 42);

        let err = run(&mut computer, Instruction::Add(Reg::T0, Reg::T1, Reg::T2)).unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::Exception(Exception::ArithmeticOverflow)
        ));
        // The destination is left untouched
        assert_eq!(computer.registers.get(Reg::T0), 42);

        run(&mut computer, Instruction::Addu(Reg::T0, Reg::T1, Reg::T2)).unwrap();
        assert_eq!(computer.registers.get(Reg::T0), Word::MIN);
    }

    #[test]
    fn immediates_test() {
        let mut computer = Computer::default();
        run(&mut computer, Instruction::Addi(Reg::T0, Reg::Zero, -5)).unwrap();
        assert_eq!(computer.registers.get(Reg::T0), -5);

        assert!(run(&mut computer, Instruction::Addi(Reg::T0, Reg::Zero, 40_000)).is_err());
        assert!(run(&mut computer, Instruction::Ori(Reg::T0, Reg::Zero, -1)).is_err());

        run(&mut computer, Instruction::Lui(Reg::T1, 0xFFFF)).unwrap();
        run(&mut computer, Instruction::Ori(Reg::T1, Reg::T1, 0xFFFF)).unwrap();
        assert_eq!(computer.registers.get(Reg::T1), -1);

        run(&mut computer, Instruction::Sltiu(Reg::T2, Reg::Zero, -1)).unwrap();
        assert_eq!(computer.registers.get(Reg::T2), 1);
    }

    #[test]
    fn shifts_test() {
        let mut computer = Computer::default();
        computer.registers.set(Reg::T1, 3);
        computer.registers.set(Reg::T2, 33);

        run(&mut computer, Instruction::Sllv(Reg::T0, Reg::T1, Reg::T2)).unwrap();
        assert_eq!(computer.registers.get(Reg::T0), 6);

        let err = run(&mut computer, Instruction::Sll(Reg::T0, Reg::T1, 33)).unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::Exception(Exception::InvalidImmediate { value: 33 })
        ));
    }

    #[test]
    fn mult_div_test() {
        let mut computer = Computer::default();
        computer.registers.set(Reg::T0, -7);
        computer.registers.set(Reg::T1, 2);

        run(&mut computer, Instruction::Div(Reg::T0, Reg::T1)).unwrap();
        assert_eq!((computer.registers.hi, computer.registers.lo), (-1, -3));

        run(&mut computer, Instruction::Mult(Reg::T0, Reg::T1)).unwrap();
        assert_eq!((computer.registers.hi, computer.registers.lo), (-1, -14));

        run(&mut computer, Instruction::Multu(Reg::T0, Reg::T1)).unwrap();
        assert_eq!((computer.registers.hi, computer.registers.lo), (1, -14));

        // Nothing is written on a division by zero
        let err = run(&mut computer, Instruction::Divu(Reg::T0, Reg::Zero)).unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::Exception(Exception::DivisionByZero)
        ));
        assert_eq!((computer.registers.hi, computer.registers.lo), (1, -14));

        run(&mut computer, Instruction::Mflo(Reg::S0)).unwrap();
        assert_eq!(computer.registers.get(Reg::S0), -14);
    }

    #[test]
    fn bit_count_test() {
        let mut computer = Computer::default();
        computer.registers.set(Reg::T1, 0x00FF_0000);
        run(&mut computer, Instruction::Clz(Reg::T0, Reg::T1)).unwrap();
        assert_eq!(computer.registers.get(Reg::T0), 8);

        run(&mut computer, Instruction::Clo(Reg::T0, Reg::Zero)).unwrap();
        assert_eq!(computer.registers.get(Reg::T0), 0);

        run(&mut computer, Instruction::Clz(Reg::T0, Reg::Zero)).unwrap();
        assert_eq!(computer.registers.get(Reg::T0), 32);
    }

    #[test]
    fn float_test() {
        let mut computer = Computer::default();
        computer.registers.set_double(f(2), 1.0);
        computer.registers.set_double(f(4), 0.0);
        run(&mut computer, Instruction::DivD(f(0), f(2), f(4))).unwrap();
        assert_eq!(computer.registers.get_double(f(0)), f64::INFINITY);

        computer.registers.set_single(f(1), 2.5);
        run(&mut computer, Instruction::RoundWS(f(3), f(1))).unwrap();
        assert_eq!(computer.registers.get_float_bits(f(3)), 2);

        computer.registers.set_single(f(1), f32::NAN);
        run(&mut computer, Instruction::CeilWS(f(3), f(1))).unwrap();
        assert_eq!(computer.registers.get_float_bits(f(3)), Word::MAX as u32);

        computer.registers.set_float_bits(f(5), (-3_i32) as u32);
        run(&mut computer, Instruction::CvtDW(f(6), f(5))).unwrap();
        assert_eq!(computer.registers.get_double(f(6)), -3.0);

        computer.registers.set_single(f(7), -4.0);
        run(&mut computer, Instruction::SqrtS(f(8), f(7))).unwrap();
        assert!(computer.registers.get_single(f(8)).is_nan());
    }

    #[test]
    fn compare_and_move_test() {
        let mut computer = Computer::default();
        computer.registers.set_single(f(0), 1.0);
        computer.registers.set_single(f(1), 2.0);
        computer.registers.set(Reg::T1, 42);

        run(&mut computer, Instruction::CLtS(2, f(0), f(1))).unwrap();
        assert!(computer.registers.flag(2));
        assert!(!computer.registers.flag(0));

        run(&mut computer, Instruction::Movt(Reg::T0, Reg::T1, 2)).unwrap();
        assert_eq!(computer.registers.get(Reg::T0), 42);

        run(&mut computer, Instruction::Movf(Reg::T2, Reg::T1, 2)).unwrap();
        assert_eq!(computer.registers.get(Reg::T2), 0);

        run(&mut computer, Instruction::MovzS(f(3), f(1), Reg::Zero)).unwrap();
        assert_eq!(computer.registers.get_single(f(3)), 2.0);
    }

    #[test]
    fn load_store_test() {
        let mut computer = Computer::default();
        computer.registers.set(Reg::T1, DATA_MIN as Word);
        computer.registers.set(Reg::T0, 0x4433_2211);

        run(&mut computer, Instruction::Sw(Reg::T0, 4, Reg::T1)).unwrap();
        run(&mut computer, Instruction::Lb(Reg::T2, 7, Reg::T1)).unwrap();
        assert_eq!(computer.registers.get(Reg::T2), 0x44);
        run(&mut computer, Instruction::Lhu(Reg::T2, 4, Reg::T1)).unwrap();
        assert_eq!(computer.registers.get(Reg::T2), 0x2211);

        let err = run(&mut computer, Instruction::Lw(Reg::T2, 2, Reg::T1)).unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::Exception(Exception::MemoryAlignment { .. })
        ));
    }

    #[test]
    fn unaligned_load_store_test() {
        let mut computer = Computer::default();
        computer.registers.set(Reg::T1, DATA_MIN as Word);
        computer
            .memory
            .set_word(DATA_MIN, 0x4433_2211)
            .unwrap();

        computer.registers.set(Reg::T0, 0xAABB_CCDD_u32 as Word);
        run(&mut computer, Instruction::Lwl(Reg::T0, 1, Reg::T1)).unwrap();
        assert_eq!(computer.registers.get(Reg::T0) as u32, 0x2211_CCDD);

        computer.registers.set(Reg::T0, 0xAABB_CCDD_u32 as Word);
        run(&mut computer, Instruction::Lwr(Reg::T0, 2, Reg::T1)).unwrap();
        assert_eq!(computer.registers.get(Reg::T0) as u32, 0xAABB_4433);

        computer.registers.set(Reg::T0, 0x7766_5544);
        run(&mut computer, Instruction::Swr(Reg::T0, 2, Reg::T1)).unwrap();
        assert_eq!(computer.memory.get_word(DATA_MIN).unwrap() as u32, 0x5544_2211);

        run(&mut computer, Instruction::Swl(Reg::T0, 0, Reg::T1)).unwrap();
        assert_eq!(computer.memory.get_word(DATA_MIN).unwrap() as u32, 0x5544_2277);
    }

    #[test]
    fn jumps_test() {
        let mut computer = Computer::default();
        computer.registers.pc = TEXT_START + 8;

        run(&mut computer, Instruction::Jal(Target::new("f", TEXT_START + 40))).unwrap();
        assert_eq!(computer.registers.pc, TEXT_START + 40);
        assert_eq!(computer.registers.get(Reg::Ra) as Address, TEXT_START + 8);

        computer.registers.set(Reg::T0, (TEXT_START + 100) as Word);
        run(&mut computer, Instruction::Jalr(Reg::S0, Reg::T0)).unwrap();
        assert_eq!(computer.registers.pc, TEXT_START + 100);
        assert_eq!(computer.registers.get(Reg::S0) as Address, TEXT_START + 40);

        computer.registers.set(Reg::T1, -1);
        run(&mut computer, Instruction::Bgez(Reg::T1, Target::new("x", TEXT_START))).unwrap();
        assert_eq!(computer.registers.pc, TEXT_START + 100);
        run(&mut computer, Instruction::Bltzal(Reg::T1, Target::new("x", TEXT_START))).unwrap();
        assert_eq!(computer.registers.pc, TEXT_START);
        assert_eq!(computer.registers.get(Reg::Ra) as Address, TEXT_START + 100);
    }

    #[test]
    fn break_test() {
        let mut computer = Computer::default();
        let err = run(&mut computer, Instruction::Break(3)).unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::Exception(Exception::Breakpoint { code: 3 })
        ));
    }
}
