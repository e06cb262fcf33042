use parse_display::Display;
use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::constants as C;

mod arith;
pub mod dump;
mod exception;
mod history;
mod instructions;
mod io;
mod memory;
mod registers;
mod syscalls;

pub use self::exception::Exception;
pub use self::history::DEFAULT_HISTORY_LIMIT;
pub use self::instructions::{Instruction, Target};
pub use self::io::{BufferedConsole, Console, FileMode, FileTable, StdConsole};
pub use self::memory::Memory;
pub use self::registers::{
    ConditionFlags, FReg, Reg, RegisterName, RegisterParseError, Registers,
};
pub use self::syscalls::Syscall;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("CPU exception: {0}")]
    Exception(#[from] Exception),

    #[error("{0}")]
    Fault(Fault),

    #[error("program exited with code {code}")]
    Halt { code: C::Word },

    #[error("the computer is not running anymore")]
    NotRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, ProcessorError>;

/// A fault raised by an instruction, with where it happened
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("{exception} at {pc:#010x}")]
pub struct Fault {
    pub exception: Exception,

    /// Address of the faulting instruction
    pub pc: C::Address,

    /// Line of the faulting instruction in the listing, when known
    pub line: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Loaded, no instruction executed yet
    Ready,
    Running,
    /// Exited through a syscall or by reaching the end of the program
    Halted { code: C::Word },
    Faulted(Fault),
}

impl State {
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Halted { .. } | Self::Faulted(_))
    }
}

/// Something suspicious the program did, reported when
/// [`Settings::warnings`] is enabled
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum Warning {
    #[display("{register} is read at {pc:#010x} before being written")]
    UninitializedRegister { register: Reg, pc: C::Address },
}

/// Why [`Computer::run_until`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    Halted { code: C::Word },
    Interrupted,
}

pub struct Computer {
    pub registers: Registers,
    pub memory: Memory,
    pub settings: Settings,
    pub instruction_count: u64,
    pub(crate) console: Box<dyn Console>,
    pub(crate) files: FileTable,
    pub(crate) rng: StdRng,
    state: State,
    warnings: Vec<Warning>,
    history: Option<history::History>,
}

impl Default for Computer {
    fn default() -> Self {
        Self::new(Settings::default(), Box::new(StdConsole))
    }
}

impl std::fmt::Debug for Computer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Computer {{ registers: {:?}, state: {:?}, memory: [...] }}",
            self.registers, self.state
        )
    }
}

impl Computer {
    /// Create a computer with empty memory and initial registers
    #[must_use]
    pub fn new(settings: Settings, console: Box<dyn Console>) -> Self {
        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let registers = Registers::initial(
            &settings.layout,
            settings.garbage_registers.then_some(&mut rng),
        );

        let mut memory = Memory::new(settings.layout.clone());
        if settings.garbage_memory {
            memory.fill_with_garbage(rng.gen());
        }

        Self {
            registers,
            memory,
            settings,
            instruction_count: 0,
            console,
            files: FileTable::new(),
            rng,
            state: State::Ready,
            warnings: Vec::new(),
            history: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Warnings raised so far, when enabled in the settings
    #[must_use]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Files opened by the program
    #[must_use]
    pub fn files(&self) -> &FileTable {
        &self.files
    }

    pub(crate) fn print(&mut self, text: &str) -> std::io::Result<()> {
        self.console.write(text.as_bytes())
    }

    /// Address targeted by a load or a store
    fn effective_address(&self, offset: C::Word, base: Reg) -> C::Address {
        self.registers.get(base).wrapping_add(offset) as C::Address
    }

    fn jump(&mut self, target: &Target) {
        debug!("Jumping to {} ({:#010x})", target.label, target.address);
        self.registers.pc = target.address;
    }

    /// Save the return address in a register
    fn link(&mut self, reg: Reg) {
        self.registers.set(reg, self.registers.pc as C::Word);
    }

    /// Read a register by its name, like `$t0`, `$f12`, `hi` or `pc`
    pub fn get_register(&self, name: &str) -> std::result::Result<C::Word, RegisterParseError> {
        Ok(self.registers.read(name.parse()?))
    }

    /// Write a register by its name
    pub fn set_register(
        &mut self,
        name: &str,
        value: C::Word,
    ) -> std::result::Result<(), RegisterParseError> {
        self.registers.write(name.parse()?, value);
        Ok(())
    }

    /// Execute an instruction without fetching it
    pub fn execute(&mut self, instruction: &Instruction) -> Result<()> {
        instruction.execute(self)
    }

    fn fault(&mut self, exception: Exception, pc: C::Address) -> ProcessorError {
        let fault = Fault {
            exception,
            pc,
            line: self.memory.line_at(pc),
        };
        info!(%fault, "Faulted");
        self.state = State::Faulted(fault.clone());
        ProcessorError::Fault(fault)
    }

    fn halt(&mut self, code: C::Word) -> ProcessorError {
        self.state = State::Halted { code };
        ProcessorError::Halt { code }
    }

    /// Report the registers the last instruction read before they were set
    fn check_uninitialized_reads(&mut self, pc: C::Address) {
        for register in self.registers.take_uninitialized_reads() {
            if self.settings.warnings {
                let warning = Warning::UninitializedRegister { register, pc };
                warn!(line = self.memory.line_at(pc), "{warning}");
                self.warnings.push(warning);
            }
        }
    }

    /// Keep the last `limit` steps so that they can be undone with
    /// [`Computer::reverse`]
    pub fn enable_history(&mut self, limit: usize) {
        self.history = Some(history::History::new(limit));
    }

    /// Number of steps that can be undone
    #[must_use]
    pub fn history_depth(&self) -> usize {
        self.history.as_ref().map_or(0, history::History::depth)
    }

    /// Undo the last step, including a step which stopped the program.
    /// Returns `false` when there is nothing to undo.
    ///
    /// Output already written and the contents of host files are not
    /// brought back.
    pub fn reverse(&mut self) -> bool {
        let Some(checkpoint) = self.history.as_mut().and_then(history::History::pop) else {
            return false;
        };
        checkpoint.restore(self);
        debug!(pc = self.registers.pc, "Reversed one step");
        true
    }

    /// Fetch, advance `pc` and execute one instruction
    ///
    /// Stopping is reported as an error: [`ProcessorError::Halt`] when the
    /// program exits, [`ProcessorError::Fault`] when an instruction fails.
    /// A host I/O error leaves the computer as it was before the step, so
    /// that the instruction can be retried.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn step(&mut self) -> Result<()> {
        if self.history.is_none() {
            return self.advance();
        }

        let checkpoint = history::Checkpoint::begin(self);
        let result = self.advance();
        let checkpoint = checkpoint.finish(self);
        match &result {
            Err(ProcessorError::NotRunning) => {}
            Err(ProcessorError::Io(_)) => checkpoint.restore(self),
            _ => {
                if let Some(history) = &mut self.history {
                    history.push(checkpoint);
                }
            }
        }
        result
    }

    fn advance(&mut self) -> Result<()> {
        match self.state {
            State::Halted { .. } | State::Faulted(_) => return Err(ProcessorError::NotRunning),
            State::Ready => self.state = State::Running,
            State::Running => {}
        }

        let pc = self.registers.pc;
        let Some(instruction) = self.memory.instruction_at(pc).cloned() else {
            if pc == self.memory.end_of_text() {
                info!("Reached the end of the program");
                return Err(self.halt(0));
            }
            return Err(self.fault(Exception::MemoryOutOfBounds { address: pc }, pc));
        };

        if let Some(limit) = self.settings.max_instructions {
            if self.instruction_count >= limit {
                return Err(self.fault(Exception::InstructionLimit { limit }, pc));
            }
        }

        self.registers.pc = pc.wrapping_add(C::INSTRUCTION_SIZE);
        self.instruction_count += 1;
        debug!("Executing instruction \"{}\"", instruction);

        let result = instruction.execute(self);
        self.check_uninitialized_reads(pc);

        match result {
            Ok(()) => Ok(()),
            Err(ProcessorError::Halt { code }) => Err(self.halt(code)),
            Err(ProcessorError::Exception(exception)) => {
                // A failing instruction leaves the program counter on itself
                self.registers.pc = pc;
                Err(self.fault(exception, pc))
            }
            Err(e) => {
                // Not the program's fault, so it can be retried
                self.registers.pc = pc;
                self.instruction_count -= 1;
                Err(e)
            }
        }
    }

    /// Run until the program stops, returning its exit code
    #[tracing::instrument(skip(self))]
    pub fn run(&mut self) -> Result<C::Word> {
        match self.run_until(|_| false)? {
            Stop::Halted { code } => Ok(code),
            Stop::Interrupted => unreachable!("the predicate never interrupts"),
        }
    }

    /// Run until the program stops or the predicate returns true
    ///
    /// The predicate is checked before every instruction.
    pub fn run_until<F>(&mut self, mut interrupt: F) -> Result<Stop>
    where
        F: FnMut(&Self) -> bool,
    {
        loop {
            if interrupt(self) {
                return Ok(Stop::Interrupted);
            }

            match self.step() {
                Ok(()) => {}
                Err(ProcessorError::Halt { code }) => return Ok(Stop::Halted { code }),
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::constants::{DATA_MIN, TEXT_START};

    fn load(program: Vec<Instruction>) -> (Computer, BufferedConsole) {
        let console = BufferedConsole::new();
        let mut computer = Computer::new(Settings::default(), Box::new(console.clone()));
        for instruction in program {
            computer.memory.push_instruction(instruction, None);
        }
        (computer, console)
    }

    #[test]
    fn step_test() {
        let (mut computer, _) = load(vec![
            Instruction::Addi(Reg::T0, Reg::Zero, 0x42),
            Instruction::Addi(Reg::T1, Reg::Zero, 0x24),
            Instruction::Add(Reg::T2, Reg::T0, Reg::T1),
        ]);

        assert_eq!(computer.state(), &State::Ready);
        assert_eq!(computer.registers.pc, TEXT_START);
        computer.step().unwrap();
        assert_eq!(computer.state(), &State::Running);
        assert_eq!(computer.registers.get(Reg::T0), 0x42);
        assert_eq!(computer.registers.pc, TEXT_START + 4);

        computer.step().unwrap();
        computer.step().unwrap();
        assert_eq!(computer.registers.get(Reg::T2), 0x66);
        assert_eq!(computer.instruction_count, 3);

        // Falling off the end of the program halts normally
        assert!(matches!(
            computer.step(),
            Err(ProcessorError::Halt { code: 0 })
        ));
        assert_eq!(computer.state(), &State::Halted { code: 0 });
        assert!(matches!(computer.step(), Err(ProcessorError::NotRunning)));
    }

    #[test]
    fn fault_test() {
        let (mut computer, _) = load(vec![
            Instruction::Nop,
            Instruction::Lw(Reg::T0, 0, Reg::Zero),
            Instruction::Nop,
        ]);

        computer.run().unwrap_err();
        let expected = Fault {
            exception: Exception::MemoryOutOfBounds { address: 0 },
            pc: TEXT_START + 4,
            line: None,
        };
        assert_eq!(computer.state(), &State::Faulted(expected));
        assert_eq!(computer.registers.pc, TEXT_START + 4);
        assert_eq!(computer.instruction_count, 2);
        assert!(matches!(computer.step(), Err(ProcessorError::NotRunning)));
    }

    #[test]
    fn jump_outside_text_test() {
        let (mut computer, _) = load(vec![Instruction::Jr(Reg::Zero)]);
        let err = computer.run().unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::Fault(Fault {
                exception: Exception::MemoryOutOfBounds { address: 0 },
                pc: 0,
                ..
            })
        ));
    }

    #[test]
    fn run_exit_code_test() {
        let (mut computer, console) = load(vec![
            Instruction::Addi(Reg::A0, Reg::Zero, 7),
            Instruction::Addi(Reg::V0, Reg::Zero, 1),
            Instruction::Syscall,
            Instruction::Addi(Reg::V0, Reg::Zero, 17),
            Instruction::Syscall,
            Instruction::Break(1),
        ]);
        assert_eq!(computer.run().unwrap(), 7);
        assert_eq!(console.output(), "7");
        assert_eq!(computer.state(), &State::Halted { code: 7 });
    }

    #[test]
    fn instruction_limit_test() {
        let (mut computer, _) = load(vec![Instruction::B(Target::new("loop", TEXT_START))]);
        computer.settings.max_instructions = Some(10);
        let err = computer.run().unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::Fault(Fault {
                exception: Exception::InstructionLimit { limit: 10 },
                ..
            })
        ));
        assert_eq!(computer.instruction_count, 10);
    }

    #[test]
    fn run_until_test() {
        let (mut computer, _) = load(vec![
            Instruction::Nop,
            Instruction::Nop,
            Instruction::Addi(Reg::T0, Reg::Zero, 1),
            Instruction::Nop,
        ]);

        let stop = computer
            .run_until(|c| c.registers.pc == TEXT_START + 8)
            .unwrap();
        assert_eq!(stop, Stop::Interrupted);
        assert_eq!(computer.registers.get(Reg::T0), 0);

        computer.step().unwrap();
        let stop = computer.run_until(|_| false).unwrap();
        assert_eq!(stop, Stop::Halted { code: 0 });
        assert_eq!(computer.registers.get(Reg::T0), 1);
    }

    #[test]
    fn register_by_name_test() {
        let mut computer = Computer::default();
        computer.set_register("$t0", 42).unwrap();
        assert_eq!(computer.get_register("$8").unwrap(), 42);
        computer.set_register("hi", -1).unwrap();
        assert_eq!(computer.registers.hi, -1);
        assert_eq!(computer.get_register("pc").unwrap(), TEXT_START as C::Word);
        assert!(computer.get_register("$nope").is_err());
    }

    /// Console whose output is gone
    struct BrokenConsole;

    impl Console for BrokenConsole {
        fn write(&mut self, _bytes: &[u8]) -> std::io::Result<()> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn read_line(&mut self) -> std::io::Result<String> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
    }

    #[test]
    fn io_error_does_not_skip_the_instruction_test() {
        let mut computer = Computer::new(Settings::default(), Box::new(BrokenConsole));
        for instruction in [
            Instruction::Addi(Reg::V0, Reg::Zero, 1),
            Instruction::Syscall,
            Instruction::Addi(Reg::T0, Reg::Zero, 7),
        ] {
            computer.memory.push_instruction(instruction, None);
        }

        computer.step().unwrap();
        assert!(matches!(computer.step(), Err(ProcessorError::Io(_))));
        assert_eq!(computer.state(), &State::Running);
        assert_eq!(computer.registers.pc, TEXT_START + 4);
        assert_eq!(computer.instruction_count, 1);

        // The syscall is attempted again
        assert!(matches!(computer.step(), Err(ProcessorError::Io(_))));
        assert_eq!(computer.registers.get(Reg::T0), 0);
    }

    #[test]
    fn warnings_test() {
        let program = vec![
            Instruction::Add(Reg::T0, Reg::T1, Reg::Zero),
            Instruction::Add(Reg::T2, Reg::T1, Reg::Sp),
            Instruction::Add(Reg::T3, Reg::T0, Reg::Zero),
        ];

        let (mut computer, _) = load(program.clone());
        computer.settings.warnings = true;
        computer.run().unwrap();
        assert_eq!(
            computer.warnings(),
            &[Warning::UninitializedRegister {
                register: Reg::T1,
                pc: TEXT_START
            }]
        );
        assert_eq!(
            computer.warnings()[0].to_string(),
            "$t1 is read at 0x00400000 before being written"
        );

        let (mut computer, _) = load(program);
        computer.run().unwrap();
        assert!(computer.warnings().is_empty());
    }

    #[test]
    fn reverse_test() {
        let (mut computer, console) = load(vec![
            Instruction::Addi(Reg::T0, Reg::Zero, 5),
            Instruction::Sw(Reg::T0, 0, Reg::Sp),
            Instruction::Addi(Reg::A0, Reg::Zero, 8),
            Instruction::Addi(Reg::V0, Reg::Zero, 9),
            Instruction::Syscall,
            Instruction::Addi(Reg::V0, Reg::Zero, 10),
            Instruction::Syscall,
        ]);
        assert!(!computer.reverse());

        computer.enable_history(DEFAULT_HISTORY_LIMIT);
        let sp = computer.registers.get(Reg::Sp) as C::Address;
        let heap = computer.memory.heap_ptr();
        let initial = computer.registers.clone();

        assert_eq!(computer.run().unwrap(), 0);
        assert_eq!(computer.history_depth(), 7);
        assert_eq!(computer.memory.get_word(sp).unwrap(), 5);
        assert_eq!(computer.memory.heap_ptr(), heap + 8);

        // Undoing the exit brings the program back to life
        assert!(computer.reverse());
        assert_eq!(computer.state(), &State::Running);
        assert_eq!(computer.registers.pc, TEXT_START + 24);

        // Undo the sbrk and the three instructions before it
        for _ in 0..4 {
            assert!(computer.reverse());
        }
        assert_eq!(computer.memory.heap_ptr(), heap);
        assert_eq!(computer.registers.pc, TEXT_START + 8);
        assert_eq!(computer.memory.get_word(sp).unwrap(), 5);
        assert_eq!(computer.instruction_count, 2);

        assert!(computer.reverse());
        assert!(computer.reverse());
        assert_eq!(computer.memory.get_word(sp).unwrap(), 0);
        assert_eq!(computer.registers, initial);
        assert_eq!(computer.state(), &State::Ready);
        assert!(!computer.reverse());

        // Running again gives the same result
        assert_eq!(computer.run().unwrap(), 0);
        assert_eq!(computer.registers.get(Reg::V0), 10);
        assert_eq!(console.output(), "");
    }

    #[test]
    fn reverse_fault_test() {
        let (mut computer, _) = load(vec![
            Instruction::Addi(Reg::T0, Reg::Zero, 1),
            Instruction::Div(Reg::T0, Reg::Zero),
        ]);
        computer.enable_history(1);

        computer.run().unwrap_err();
        assert!(matches!(computer.state(), State::Faulted(_)));
        assert_eq!(computer.history_depth(), 1);

        assert!(computer.reverse());
        assert_eq!(computer.state(), &State::Running);
        assert_eq!(computer.registers.pc, TEXT_START + 4);
        assert_eq!(computer.registers.get(Reg::T0), 1);

        // Only one step is kept
        assert!(!computer.reverse());
    }

    #[test]
    fn garbage_settings_test() {
        let settings = Settings {
            garbage_registers: true,
            garbage_memory: true,
            seed: Some(42),
            ..Settings::default()
        };

        let first = Computer::new(settings.clone(), Box::new(BufferedConsole::new()));
        let second = Computer::new(settings, Box::new(BufferedConsole::new()));
        assert_eq!(first.registers, second.registers);
        assert_eq!(
            first.memory.get_word(DATA_MIN).unwrap(),
            second.memory.get_word(DATA_MIN).unwrap()
        );
        assert_eq!(first.registers.get(Reg::Sp) as C::Address, C::INITIAL_SP);
        assert_eq!(first.registers.get(Reg::Zero), 0);
    }
}
