//! Loading of a parsed listing into a [`Computer`]
//!
//! Loading happens in two passes: the first one lays out the program, giving
//! an address to every instruction, data directive and label, the second one
//! fills the memory now that every label is known.

use std::collections::{BTreeMap, HashMap};

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Settings;
use crate::constants as C;
use crate::parser::Program;
use crate::runtime::{Computer, Console, Exception, FReg, Reg};

pub(crate) mod instruction;
pub(crate) mod layout;
pub(crate) mod memory;

/// Holds informations about the loaded program
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    /// Map of labels to addresses
    pub labels: HashMap<String, C::Address>,

    /// Source line of every instruction and data directive, by address
    pub lines: BTreeMap<C::Address, usize>,
}

impl DebugInfo {
    /// Labels pointing to an address
    pub fn labels_at(&self, address: C::Address) -> impl Iterator<Item = &str> {
        let mut labels: Vec<_> = self
            .labels
            .iter()
            .filter(move |(_, a)| **a == address)
            .map(|(label, _)| label.as_str())
            .collect();
        labels.sort_unstable();
        labels.into_iter()
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum CompilationError {
    #[error("duplicate label {label}")]
    #[diagnostic(code(mipsim::compile::duplicate_label))]
    DuplicateLabel {
        label: String,
        #[label("defined again here")]
        span: SourceSpan,
    },

    #[error("unknown label {label}")]
    #[diagnostic(code(mipsim::compile::unknown_label))]
    UnknownLabel {
        label: String,
        #[label("this label is not defined")]
        span: SourceSpan,
    },

    #[error("unknown instruction {opcode}")]
    #[diagnostic(code(mipsim::compile::unknown_instruction))]
    UnknownOpcode {
        opcode: String,
        #[label("not a basic instruction")]
        span: SourceSpan,
    },

    #[error("invalid operands, expected `{opcode} {expected}`")]
    #[diagnostic(code(mipsim::compile::invalid_operands))]
    InvalidOperands {
        opcode: String,
        expected: &'static str,
        #[label("invalid operands")]
        span: SourceSpan,
    },

    #[error("{register} is not an even register")]
    #[diagnostic(
        code(mipsim::compile::odd_register),
        help("double precision instructions operate on even/odd register pairs")
    )]
    OddRegister {
        register: FReg,
        #[label("odd register here")]
        span: SourceSpan,
    },

    #[error("unknown directive .{directive}")]
    #[diagnostic(code(mipsim::compile::unknown_directive))]
    UnknownDirective {
        directive: String,
        #[label("unknown directive")]
        span: SourceSpan,
    },

    #[error("invalid value for .{directive}")]
    #[diagnostic(code(mipsim::compile::invalid_data))]
    InvalidData {
        directive: String,
        #[label("invalid value")]
        span: SourceSpan,
    },

    #[error("instructions must be in the text segment")]
    #[diagnostic(code(mipsim::compile::misplaced_instruction))]
    MisplacedInstruction {
        #[label("in the data segment")]
        span: SourceSpan,
    },

    #[error("data directives must be in the data segment")]
    #[diagnostic(code(mipsim::compile::misplaced_data))]
    MisplacedData {
        #[label("in the text segment")]
        span: SourceSpan,
    },

    #[error("could not store data")]
    #[diagnostic(code(mipsim::compile::memory))]
    Memory {
        #[source]
        inner: Exception,
        #[label("while storing this")]
        span: SourceSpan,
    },

    #[error("unknown entrypoint {0}")]
    #[diagnostic(code(mipsim::compile::unknown_entrypoint))]
    UnknownEntrypoint(String),

    #[error("could not store the program arguments")]
    #[diagnostic(code(mipsim::compile::arguments))]
    Arguments(#[source] Exception),
}

/// Copy the program arguments at the top of the data region and push `argc`
/// and `argv` on the stack
fn push_arguments(computer: &mut Computer) -> Result<(), Exception> {
    let arguments = &computer.settings.arguments;
    if arguments.is_empty() {
        return Ok(());
    }

    let layout = computer.memory.layout().clone();
    let count = C::Word::try_from(arguments.len()).map_err(|_| Exception::InvalidArgument {
        value: C::Word::MAX,
    })?;

    // argc then the argv pointers, right below the initial stack pointer
    let stack = (count as C::Address)
        .checked_mul(4)
        .and_then(|size| layout.initial_sp.checked_sub(4 + size))
        .ok_or(Exception::MemoryOutOfBounds {
            address: layout.initial_sp,
        })?;
    computer.memory.set_word(stack, count)?;

    // The strings are stored downward from the top of the data region
    let mut string_address = layout.data_max - 3;
    for (index, argument) in (1..).zip(arguments) {
        let size = C::Address::try_from(argument.len() + 1).map_err(|_| {
            Exception::MemoryOutOfBounds {
                address: string_address,
            }
        })?;
        string_address = string_address
            .checked_sub(size)
            .ok_or(Exception::MemoryOutOfBounds { address: 0 })?;
        computer
            .memory
            .add_asciiz(argument.as_bytes(), string_address)?;
        computer
            .memory
            .set_word(stack + 4 * index, string_address as C::Word)?;
    }

    debug!(argc = count, argv = stack + 4, "Pushed program arguments");
    computer.registers.set(Reg::Sp, stack as C::Word);
    computer.registers.set(Reg::A0, count);
    computer.registers.set(Reg::A1, (stack + 4) as C::Word);
    Ok(())
}

/// Load a program in a new computer
///
/// The computer starts at the entrypoint label set in the settings.
#[tracing::instrument(skip(program, settings, console))]
pub fn compile(
    program: &Program<'_>,
    settings: Settings,
    console: Box<dyn Console>,
) -> Result<(Computer, DebugInfo), CompilationError> {
    let mut computer = Computer::new(settings, console);

    let layout = self::layout::layout_program(program, computer.memory.layout())?;
    self::memory::fill_memory(program, &layout, &mut computer.memory)?;

    // Lookup the entrypoint
    let entrypoint = computer.settings.entrypoint.clone();
    let pc = *layout
        .labels
        .get(entrypoint.as_str())
        .ok_or(CompilationError::UnknownEntrypoint(entrypoint.clone()))?;
    debug!(pc, %entrypoint, "Found entrypoint");
    computer.registers.pc = pc;

    push_arguments(&mut computer).map_err(CompilationError::Arguments)?;

    let labels: HashMap<String, C::Address> = layout
        .labels
        .iter()
        .map(|(label, address)| ((*label).to_owned(), *address))
        .collect();
    computer.memory.set_labels(labels.clone());

    let debug_info = DebugInfo {
        labels,
        lines: layout
            .placements
            .iter()
            .map(|placement| (placement.address, placement.line.number))
            .collect(),
    };

    info!(
        instructions = computer.memory.text().count(),
        labels = debug_info.labels.len(),
        "Program loaded"
    );
    Ok((computer, debug_info))
}
