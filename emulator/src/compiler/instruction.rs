//! Conversion of parsed instruction lines into [`Instruction`]s

use miette::SourceSpan;

use super::layout::Labels;
use super::CompilationError;
use crate::constants::{Address, Word};
use crate::parser::{Argument, Operand, Program, Value};
use crate::runtime::{FReg, Instruction, Reg, Target};

type Result<T> = std::result::Result<T, CompilationError>;

/// Operands of an instruction line being converted
struct Operands<'c, 'a> {
    program: &'c Program<'a>,
    labels: &'c Labels<'a>,
    opcode: &'a str,
    arguments: &'c [Argument<'a>],
}

/// Convert a resolved value to a word, accepting both signed and unsigned
/// 32-bit values
fn to_word(value: i64) -> Option<Word> {
    Word::try_from(value)
        .ok()
        .or_else(|| u32::try_from(value).ok().map(|value| value as Word))
}

impl<'c, 'a> Operands<'c, 'a> {
    /// Span of the whole instruction
    fn span(&self) -> SourceSpan {
        let start = self.program.location(self.opcode).offset();
        let end = self.arguments.last().map_or(start + self.opcode.len(), |last| {
            let location = self.program.location(last.text);
            location.offset() + location.length()
        });
        (start, end - start).into()
    }

    fn invalid(&self, expected: &'static str) -> CompilationError {
        CompilationError::InvalidOperands {
            opcode: self.opcode.to_owned(),
            expected,
            span: self.span(),
        }
    }

    fn get<const N: usize>(&self, expected: &'static str) -> Result<&'c [Argument<'a>; N]> {
        self.arguments
            .try_into()
            .map_err(|_| self.invalid(expected))
    }

    fn reg(&self, argument: &Argument<'a>, expected: &'static str) -> Result<Reg> {
        match argument.operand {
            Operand::Register(reg) => Ok(reg),
            _ => Err(self.invalid(expected)),
        }
    }

    fn freg(&self, argument: &Argument<'a>, expected: &'static str) -> Result<FReg> {
        match argument.operand {
            Operand::FloatRegister(reg) => Ok(reg),
            _ => Err(self.invalid(expected)),
        }
    }

    fn lookup(&self, label: &str, argument: &Argument<'a>) -> Result<Address> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| CompilationError::UnknownLabel {
                label: label.to_owned(),
                span: self.program.location(argument.text).into(),
            })
    }

    fn resolve(&self, value: Value<'a>, argument: &Argument<'a>) -> Result<i64> {
        let value = match value {
            Value::Literal(value) => value,
            Value::Label(label) => i64::from(self.lookup(label, argument)?),
            Value::Hi(label) => i64::from(self.lookup(label, argument)? >> 16),
            Value::Lo(label) => i64::from(self.lookup(label, argument)? & 0xFFFF),
        };
        Ok(value)
    }

    /// An immediate value. Its range is checked when the instruction runs.
    fn immediate(&self, argument: &Argument<'a>, expected: &'static str) -> Result<i64> {
        match argument.operand {
            Operand::Value(value) => self.resolve(value, argument),
            _ => Err(self.invalid(expected)),
        }
    }

    fn word(&self, argument: &Argument<'a>, expected: &'static str) -> Result<Word> {
        to_word(self.immediate(argument, expected)?).ok_or_else(|| self.invalid(expected))
    }

    /// A condition flag number
    fn flag(&self, argument: &Argument<'a>, expected: &'static str) -> Result<u8> {
        match argument.operand {
            Operand::Value(Value::Literal(flag @ 0..=7)) => Ok(flag as u8),
            _ => Err(self.invalid(expected)),
        }
    }

    fn target(&self, argument: &Argument<'a>, expected: &'static str) -> Result<Target> {
        match argument.operand {
            Operand::Value(Value::Label(label)) => {
                Ok(Target::new(label, self.lookup(label, argument)?))
            }
            Operand::Value(Value::Literal(address)) => {
                let address = Address::try_from(address).map_err(|_| self.invalid(expected))?;
                Ok(Target::new(format!("{address:#x}"), address))
            }
            _ => Err(self.invalid(expected)),
        }
    }

    /// A memory operand. A lone value is an absolute address.
    fn memory(&self, argument: &Argument<'a>, expected: &'static str) -> Result<(Word, Reg)> {
        let (offset, base) = match argument.operand {
            Operand::Memory { offset, base } => (offset, base),
            Operand::Value(value) => (value, Reg::Zero),
            _ => return Err(self.invalid(expected)),
        };
        let offset =
            to_word(self.resolve(offset, argument)?).ok_or_else(|| self.invalid(expected))?;
        Ok((offset, base))
    }

    fn none(&self, instruction: Instruction) -> Result<Instruction> {
        self.get::<0>("")?;
        Ok(instruction)
    }

    fn r(&self, f: fn(Reg) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "$rs";
        let [a] = self.get(EXPECTED)?;
        Ok(f(self.reg(a, EXPECTED)?))
    }

    fn rr(&self, f: fn(Reg, Reg) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "$rs, $rt";
        let [a, b] = self.get(EXPECTED)?;
        Ok(f(self.reg(a, EXPECTED)?, self.reg(b, EXPECTED)?))
    }

    fn rrr(&self, f: fn(Reg, Reg, Reg) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "$rd, $rs, $rt";
        let [a, b, c] = self.get(EXPECTED)?;
        Ok(f(
            self.reg(a, EXPECTED)?,
            self.reg(b, EXPECTED)?,
            self.reg(c, EXPECTED)?,
        ))
    }

    fn ri(&self, f: fn(Reg, i64) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "$rt, imm";
        let [a, b] = self.get(EXPECTED)?;
        Ok(f(self.reg(a, EXPECTED)?, self.immediate(b, EXPECTED)?))
    }

    fn rri(&self, f: fn(Reg, Reg, i64) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "$rt, $rs, imm";
        let [a, b, c] = self.get(EXPECTED)?;
        Ok(f(
            self.reg(a, EXPECTED)?,
            self.reg(b, EXPECTED)?,
            self.immediate(c, EXPECTED)?,
        ))
    }

    /// Integer move on a condition flag, which defaults to 0
    fn rr_flag(&self, f: fn(Reg, Reg, u8) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "$rd, $rs[, cc]";
        match self.arguments {
            [a, b] => Ok(f(self.reg(a, EXPECTED)?, self.reg(b, EXPECTED)?, 0)),
            [a, b, c] => Ok(f(
                self.reg(a, EXPECTED)?,
                self.reg(b, EXPECTED)?,
                self.flag(c, EXPECTED)?,
            )),
            _ => Err(self.invalid(EXPECTED)),
        }
    }

    fn ff(&self, f: fn(FReg, FReg) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "$fd, $fs";
        let [a, b] = self.get(EXPECTED)?;
        Ok(f(self.freg(a, EXPECTED)?, self.freg(b, EXPECTED)?))
    }

    fn fff(&self, f: fn(FReg, FReg, FReg) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "$fd, $fs, $ft";
        let [a, b, c] = self.get(EXPECTED)?;
        Ok(f(
            self.freg(a, EXPECTED)?,
            self.freg(b, EXPECTED)?,
            self.freg(c, EXPECTED)?,
        ))
    }

    /// Float move on an integer register
    fn ffr(&self, f: fn(FReg, FReg, Reg) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "$fd, $fs, $rt";
        let [a, b, c] = self.get(EXPECTED)?;
        Ok(f(
            self.freg(a, EXPECTED)?,
            self.freg(b, EXPECTED)?,
            self.reg(c, EXPECTED)?,
        ))
    }

    /// Float move on a condition flag, which defaults to 0
    fn ff_flag(&self, f: fn(FReg, FReg, u8) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "$fd, $fs[, cc]";
        match self.arguments {
            [a, b] => Ok(f(self.freg(a, EXPECTED)?, self.freg(b, EXPECTED)?, 0)),
            [a, b, c] => Ok(f(
                self.freg(a, EXPECTED)?,
                self.freg(b, EXPECTED)?,
                self.flag(c, EXPECTED)?,
            )),
            _ => Err(self.invalid(EXPECTED)),
        }
    }

    /// Moves between the integer and the float registers
    fn rf(&self, f: fn(Reg, FReg) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "$rt, $fs";
        let [a, b] = self.get(EXPECTED)?;
        Ok(f(self.reg(a, EXPECTED)?, self.freg(b, EXPECTED)?))
    }

    /// Float comparison, setting a condition flag which defaults to 0
    fn compare(&self, f: fn(u8, FReg, FReg) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "[cc, ]$fs, $ft";
        match self.arguments {
            [a, b] => Ok(f(0, self.freg(a, EXPECTED)?, self.freg(b, EXPECTED)?)),
            [a, b, c] => Ok(f(
                self.flag(a, EXPECTED)?,
                self.freg(b, EXPECTED)?,
                self.freg(c, EXPECTED)?,
            )),
            _ => Err(self.invalid(EXPECTED)),
        }
    }

    /// Branch on a condition flag, which defaults to 0
    fn flag_branch(&self, f: fn(u8, Target) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "[cc, ]label";
        match self.arguments {
            [a] => Ok(f(0, self.target(a, EXPECTED)?)),
            [a, b] => Ok(f(self.flag(a, EXPECTED)?, self.target(b, EXPECTED)?)),
            _ => Err(self.invalid(EXPECTED)),
        }
    }

    fn load_store(&self, f: fn(Reg, Word, Reg) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "$rt, offset($base)";
        let [a, b] = self.get(EXPECTED)?;
        let (offset, base) = self.memory(b, EXPECTED)?;
        Ok(f(self.reg(a, EXPECTED)?, offset, base))
    }

    fn float_load_store(&self, f: fn(FReg, Word, Reg) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "$ft, offset($base)";
        let [a, b] = self.get(EXPECTED)?;
        let (offset, base) = self.memory(b, EXPECTED)?;
        Ok(f(self.freg(a, EXPECTED)?, offset, base))
    }

    fn rrt(&self, f: fn(Reg, Reg, Target) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "$rs, $rt, label";
        let [a, b, c] = self.get(EXPECTED)?;
        Ok(f(
            self.reg(a, EXPECTED)?,
            self.reg(b, EXPECTED)?,
            self.target(c, EXPECTED)?,
        ))
    }

    fn rt(&self, f: fn(Reg, Target) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "$rs, label";
        let [a, b] = self.get(EXPECTED)?;
        Ok(f(self.reg(a, EXPECTED)?, self.target(b, EXPECTED)?))
    }

    fn t(&self, f: fn(Target) -> Instruction) -> Result<Instruction> {
        const EXPECTED: &str = "label";
        let [a] = self.get(EXPECTED)?;
        Ok(f(self.target(a, EXPECTED)?))
    }

    /// `jalr` links to `$ra` unless told otherwise
    fn jalr(&self) -> Result<Instruction> {
        const EXPECTED: &str = "[$rd, ]$rs";
        match self.arguments {
            [a] => Ok(Instruction::Jalr(Reg::Ra, self.reg(a, EXPECTED)?)),
            [a, b] => Ok(Instruction::Jalr(
                self.reg(a, EXPECTED)?,
                self.reg(b, EXPECTED)?,
            )),
            _ => Err(self.invalid(EXPECTED)),
        }
    }

    fn break_code(&self) -> Result<Instruction> {
        const EXPECTED: &str = "[code]";
        match self.arguments {
            [] => Ok(Instruction::Break(0)),
            [a] => Ok(Instruction::Break(self.word(a, EXPECTED)?)),
            _ => Err(self.invalid(EXPECTED)),
        }
    }

    /// Build the instruction, or return `None` for unknown opcodes
    fn build(&self) -> Option<Result<Instruction>> {
        use Instruction::*;

        let instruction = match self.opcode.to_ascii_lowercase().as_str() {
            "add" => self.rrr(Add),
            "addu" => self.rrr(Addu),
            "sub" => self.rrr(Sub),
            "subu" => self.rrr(Subu),
            "addi" => self.rri(Addi),
            "addiu" => self.rri(Addiu),
            "slt" => self.rrr(Slt),
            "sltu" => self.rrr(Sltu),
            "slti" => self.rri(Slti),
            "sltiu" => self.rri(Sltiu),
            "and" => self.rrr(And),
            "or" => self.rrr(Or),
            "nor" => self.rrr(Nor),
            "xor" => self.rrr(Xor),
            "andi" => self.rri(Andi),
            "ori" => self.rri(Ori),
            "xori" => self.rri(Xori),
            "lui" => self.ri(Lui),
            "sll" => self.rri(Sll),
            "srl" => self.rri(Srl),
            "sra" => self.rri(Sra),
            "sllv" => self.rrr(Sllv),
            "srlv" => self.rrr(Srlv),
            "srav" => self.rrr(Srav),
            "mul" => self.rrr(Mul),
            "mult" => self.rr(Mult),
            "multu" => self.rr(Multu),
            "div" => self.rr(Div),
            "divu" => self.rr(Divu),
            "madd" => self.rr(Madd),
            "maddu" => self.rr(Maddu),
            "msub" => self.rr(Msub),
            "msubu" => self.rr(Msubu),
            "mfhi" => self.r(Mfhi),
            "mflo" => self.r(Mflo),
            "mthi" => self.r(Mthi),
            "mtlo" => self.r(Mtlo),
            "clz" => self.rr(Clz),
            "clo" => self.rr(Clo),
            "movn" => self.rrr(Movn),
            "movz" => self.rrr(Movz),
            "movt" => self.rr_flag(Movt),
            "movf" => self.rr_flag(Movf),

            "add.s" => self.fff(AddS),
            "add.d" => self.fff(AddD),
            "sub.s" => self.fff(SubS),
            "sub.d" => self.fff(SubD),
            "mul.s" => self.fff(MulS),
            "mul.d" => self.fff(MulD),
            "div.s" => self.fff(DivS),
            "div.d" => self.fff(DivD),
            "abs.s" => self.ff(AbsS),
            "abs.d" => self.ff(AbsD),
            "neg.s" => self.ff(NegS),
            "neg.d" => self.ff(NegD),
            "mov.s" => self.ff(MovS),
            "mov.d" => self.ff(MovD),
            "sqrt.s" => self.ff(SqrtS),
            "sqrt.d" => self.ff(SqrtD),
            "ceil.w.s" => self.ff(CeilWS),
            "ceil.w.d" => self.ff(CeilWD),
            "floor.w.s" => self.ff(FloorWS),
            "floor.w.d" => self.ff(FloorWD),
            "round.w.s" => self.ff(RoundWS),
            "round.w.d" => self.ff(RoundWD),
            "trunc.w.s" => self.ff(TruncWS),
            "trunc.w.d" => self.ff(TruncWD),
            "cvt.d.s" => self.ff(CvtDS),
            "cvt.d.w" => self.ff(CvtDW),
            "cvt.s.d" => self.ff(CvtSD),
            "cvt.s.w" => self.ff(CvtSW),
            "cvt.w.s" => self.ff(CvtWS),
            "cvt.w.d" => self.ff(CvtWD),
            "mfc1" => self.rf(Mfc1),
            "mtc1" => self.rf(Mtc1),
            "c.eq.s" => self.compare(CEqS),
            "c.eq.d" => self.compare(CEqD),
            "c.le.s" => self.compare(CLeS),
            "c.le.d" => self.compare(CLeD),
            "c.lt.s" => self.compare(CLtS),
            "c.lt.d" => self.compare(CLtD),
            "bc1t" => self.flag_branch(Bc1t),
            "bc1f" => self.flag_branch(Bc1f),
            "movt.s" => self.ff_flag(MovtS),
            "movt.d" => self.ff_flag(MovtD),
            "movf.s" => self.ff_flag(MovfS),
            "movf.d" => self.ff_flag(MovfD),
            "movn.s" => self.ffr(MovnS),
            "movn.d" => self.ffr(MovnD),
            "movz.s" => self.ffr(MovzS),
            "movz.d" => self.ffr(MovzD),

            "lb" => self.load_store(Lb),
            "lbu" => self.load_store(Lbu),
            "lh" => self.load_store(Lh),
            "lhu" => self.load_store(Lhu),
            "lw" => self.load_store(Lw),
            "lwl" => self.load_store(Lwl),
            "lwr" => self.load_store(Lwr),
            "sb" => self.load_store(Sb),
            "sh" => self.load_store(Sh),
            "sw" => self.load_store(Sw),
            "swl" => self.load_store(Swl),
            "swr" => self.load_store(Swr),
            "l.s" | "lwc1" => self.float_load_store(LS),
            "l.d" | "ldc1" => self.float_load_store(LD),
            "s.s" | "swc1" => self.float_load_store(SS),
            "s.d" | "sdc1" => self.float_load_store(SD),

            "beq" => self.rrt(Beq),
            "bne" => self.rrt(Bne),
            "bgez" => self.rt(Bgez),
            "bgezal" => self.rt(Bgezal),
            "bgtz" => self.rt(Bgtz),
            "blez" => self.rt(Blez),
            "bltz" => self.rt(Bltz),
            "bltzal" => self.rt(Bltzal),
            "b" => self.t(B),
            "j" => self.t(J),
            "jal" => self.t(Jal),
            "jr" => self.r(Jr),
            "jalr" => self.jalr(),

            "nop" => self.none(Nop),
            "syscall" => self.none(Syscall),
            "break" => self.break_code(),

            _ => return None,
        };

        Some(instruction)
    }

    /// Double precision instructions use even/odd register pairs
    fn check_double_registers(&self, instruction: &Instruction) -> Result<()> {
        match instruction.double_registers().into_iter().find(|reg| !reg.is_even()) {
            Some(register) => Err(CompilationError::OddRegister {
                register,
                span: self.span(),
            }),
            None => Ok(()),
        }
    }
}

/// Convert an instruction line, resolving the labels it references
pub(crate) fn build_instruction<'a>(
    program: &Program<'a>,
    labels: &Labels<'a>,
    opcode: &'a str,
    arguments: &[Argument<'a>],
) -> Result<Instruction> {
    let operands = Operands {
        program,
        labels,
        opcode,
        arguments,
    };

    let instruction = operands
        .build()
        .ok_or_else(|| CompilationError::UnknownOpcode {
            opcode: opcode.to_owned(),
            span: program.location(opcode).into(),
        })??;

    operands.check_double_registers(&instruction)?;
    Ok(instruction)
}
