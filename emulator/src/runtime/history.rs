//! Undo log of the executed instructions

use std::collections::VecDeque;

use rand::rngs::StdRng;

use super::io::FileJournal;
use super::memory::ByteWrite;
use super::{Computer, Registers, State};
use crate::constants::Address;

/// Number of steps the interactive mode can undo
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// What is needed to bring a computer back to where it was before a step
#[derive(Debug)]
pub(crate) struct Checkpoint {
    registers: Registers,
    state: State,
    instruction_count: u64,
    heap_ptr: Address,
    rng: StdRng,
    memory: Vec<ByteWrite>,
    files: FileJournal,
}

impl Checkpoint {
    /// Save the registers and start recording memory and file changes
    pub(crate) fn begin(computer: &mut Computer) -> Self {
        computer.memory.start_journal();
        computer.files.start_journal();
        Self {
            registers: computer.registers.clone(),
            state: computer.state.clone(),
            instruction_count: computer.instruction_count,
            heap_ptr: computer.memory.heap_ptr(),
            rng: computer.rng.clone(),
            memory: Vec::new(),
            files: FileJournal::new(),
        }
    }

    /// Stop recording, keeping what changed
    pub(crate) fn finish(mut self, computer: &mut Computer) -> Self {
        self.memory = computer.memory.take_journal();
        self.files = computer.files.take_journal();
        self
    }

    /// Undo everything recorded. Output already written and file contents
    /// stay as they are.
    pub(crate) fn restore(self, computer: &mut Computer) {
        computer.memory.rollback(&self.memory, self.heap_ptr);
        computer.files.rollback(self.files);
        computer.registers = self.registers;
        computer.state = self.state;
        computer.instruction_count = self.instruction_count;
        computer.rng = self.rng;
    }
}

/// Bounded stack of checkpoints, the oldest ones are dropped first
#[derive(Debug)]
pub(crate) struct History {
    limit: usize,
    checkpoints: VecDeque<Checkpoint>,
}

impl History {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            checkpoints: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, checkpoint: Checkpoint) {
        if self.limit == 0 {
            return;
        }
        if self.checkpoints.len() == self.limit {
            self.checkpoints.pop_front();
        }
        self.checkpoints.push_back(checkpoint);
    }

    pub(crate) fn pop(&mut self) -> Option<Checkpoint> {
        self.checkpoints.pop_back()
    }

    pub(crate) fn depth(&self) -> usize {
        self.checkpoints.len()
    }
}
