use std::collections::HashMap;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use super::exception::Exception;
use super::instructions::Instruction;
use crate::config::Layout;
use crate::constants::{Address, Word, INSTRUCTION_SIZE};

type Result<T> = std::result::Result<T, Exception>;

/// Previous content of a written byte, `None` if it was never written
pub(crate) type ByteWrite = (Address, Option<u8>);

/// Checks if a byte can appear in a string handled by the syscalls
#[must_use]
pub const fn is_allowed_char(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7E | b'\t' | b'\n')
}

/// Byte-addressable memory of the simulated computer
///
/// Data bytes are stored sparsely and composed little-endian. The text
/// segment is kept apart as a list of instructions, one every
/// [`INSTRUCTION_SIZE`] bytes from [`Layout::text_start`].
#[derive(Debug, Clone)]
pub struct Memory {
    layout: Layout,
    bytes: HashMap<Address, u8>,
    text: Vec<Instruction>,

    /// Source line of each instruction of the text segment
    lines: Vec<Option<usize>>,
    labels: HashMap<String, Address>,

    /// Next free address of the static data segment, used by the loader
    pub(crate) data_ptr: Address,

    /// Current end of the heap
    heap_ptr: Address,

    /// When set, unwritten bytes read as noise derived from this seed
    garbage_seed: Option<u64>,

    /// Bytes overwritten since the journal was started
    journal: Option<Vec<ByteWrite>>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new(Layout::default())
    }
}

impl Memory {
    #[must_use]
    pub fn new(layout: Layout) -> Self {
        Self {
            data_ptr: layout.data_min,
            heap_ptr: layout.heap_start,
            layout,
            bytes: HashMap::new(),
            text: Vec::new(),
            lines: Vec::new(),
            labels: HashMap::new(),
            garbage_seed: None,
            journal: None,
        }
    }

    pub(crate) fn fill_with_garbage(&mut self, seed: u64) {
        self.garbage_seed = Some(seed);
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Check that an access of `size` bytes at `address` is aligned and stays
    /// inside the data region
    fn check(&self, address: Address, size: Address) -> Result<()> {
        if address % size != 0 {
            return Err(Exception::MemoryAlignment {
                address,
                alignment: size,
            });
        }

        self.check_bounds(address, size)
    }

    fn check_bounds(&self, address: Address, size: Address) -> Result<()> {
        let last = address
            .checked_add(size - 1)
            .ok_or(Exception::MemoryOutOfBounds { address })?;

        if self.layout.is_data_address(address) && self.layout.is_data_address(last) {
            Ok(())
        } else {
            Err(Exception::MemoryOutOfBounds { address })
        }
    }

    /// Noise of an unwritten byte, drawn per aligned word
    fn garbage(seed: u64, address: Address) -> u8 {
        let word: [u8; 4] = StdRng::seed_from_u64(seed ^ u64::from(address & !3)).gen();
        word[(address & 3) as usize]
    }

    fn raw_byte(&self, address: Address) -> u8 {
        match (self.bytes.get(&address), self.garbage_seed) {
            (Some(byte), _) => *byte,
            (None, Some(seed)) => Self::garbage(seed, address),
            (None, None) => 0,
        }
    }

    fn read_bytes<const N: usize>(&self, address: Address) -> [u8; N] {
        let mut bytes = [0; N];
        for (offset, byte) in (0..).zip(bytes.iter_mut()) {
            *byte = self.raw_byte(address + offset);
        }
        bytes
    }

    fn store(&mut self, address: Address, byte: u8) {
        let previous = self.bytes.insert(address, byte);
        if let Some(journal) = &mut self.journal {
            journal.push((address, previous));
        }
    }

    fn write_bytes(&mut self, address: Address, bytes: &[u8]) {
        for (offset, byte) in (0..).zip(bytes) {
            self.store(address + offset, *byte);
        }
    }

    /// Start recording the bytes overwritten by the next writes
    pub(crate) fn start_journal(&mut self) {
        self.journal = Some(Vec::new());
    }

    /// Stop recording, returning the writes in the order they happened
    pub(crate) fn take_journal(&mut self) -> Vec<ByteWrite> {
        self.journal.take().unwrap_or_default()
    }

    /// Undo recorded writes and bring the heap back to `heap_ptr`
    pub(crate) fn rollback(&mut self, writes: &[ByteWrite], heap_ptr: Address) {
        for (address, previous) in writes.iter().rev() {
            match previous {
                Some(byte) => self.bytes.insert(*address, *byte),
                None => self.bytes.remove(address),
            };
        }
        self.heap_ptr = heap_ptr;
    }

    /// Number of bytes that can be accessed from `address` to the end of
    /// its region, zero outside of the data region
    #[must_use]
    pub fn room_at(&self, address: Address) -> u64 {
        let end = if address >= self.layout.mmio_base {
            Address::MAX
        } else if self.layout.is_data_address(address) {
            self.layout.data_max
        } else {
            return 0;
        };
        u64::from(end - address) + 1
    }

    /// Read one byte, sign- or zero-extended
    pub fn get_byte(&self, address: Address, signed: bool) -> Result<Word> {
        self.check_bounds(address, 1)?;
        let byte = self.raw_byte(address);
        Ok(if signed {
            Word::from(byte as i8)
        } else {
            Word::from(byte)
        })
    }

    /// Write the low byte of `value`
    pub fn set_byte(&mut self, address: Address, value: Word) -> Result<()> {
        self.check_bounds(address, 1)?;
        self.store(address, value as u8);
        Ok(())
    }

    pub fn get_half(&self, address: Address, signed: bool) -> Result<Word> {
        self.check(address, 2)?;
        let bytes = self.read_bytes::<2>(address);
        Ok(if signed {
            Word::from(i16::from_le_bytes(bytes))
        } else {
            Word::from(u16::from_le_bytes(bytes))
        })
    }

    /// Write the low half of `value`
    pub fn set_half(&mut self, address: Address, value: Word) -> Result<()> {
        self.check(address, 2)?;
        self.write_bytes(address, &(value as u16).to_le_bytes());
        Ok(())
    }

    pub fn get_word(&self, address: Address) -> Result<Word> {
        self.check(address, 4)?;
        Ok(Word::from_le_bytes(self.read_bytes(address)))
    }

    pub fn set_word(&mut self, address: Address, value: Word) -> Result<()> {
        self.check(address, 4)?;
        self.write_bytes(address, &value.to_le_bytes());
        Ok(())
    }

    pub fn get_float(&self, address: Address) -> Result<f32> {
        self.check(address, 4)?;
        Ok(f32::from_le_bytes(self.read_bytes(address)))
    }

    pub fn set_float(&mut self, address: Address, value: f32) -> Result<()> {
        self.check(address, 4)?;
        self.write_bytes(address, &value.to_le_bytes());
        Ok(())
    }

    pub fn get_double(&self, address: Address) -> Result<f64> {
        self.check(address, 8)?;
        Ok(f64::from_le_bytes(self.read_bytes(address)))
    }

    pub fn set_double(&mut self, address: Address, value: f64) -> Result<()> {
        self.check(address, 8)?;
        self.write_bytes(address, &value.to_le_bytes());
        Ok(())
    }

    /// Write raw bytes, returning the address following the last one
    pub fn add_ascii(&mut self, text: &[u8], address: Address) -> Result<Address> {
        let len =
            Address::try_from(text.len()).map_err(|_| Exception::MemoryOutOfBounds { address })?;
        if len > 0 {
            self.check_bounds(address, len)?;
        }
        self.write_bytes(address, text);
        Ok(address + len)
    }

    /// Write raw bytes followed by a zero terminator, returning the address
    /// following the terminator
    pub fn add_asciiz(&mut self, text: &[u8], address: Address) -> Result<Address> {
        let len = Address::try_from(text.len() + 1)
            .map_err(|_| Exception::MemoryOutOfBounds { address })?;
        self.check_bounds(address, len)?;

        let end = self.add_ascii(text, address)?;
        self.set_byte(end, 0)?;
        Ok(end + 1)
    }

    /// Read the bytes of a null-terminated string, without the terminator
    ///
    /// Every byte must be printable ASCII, a tab or a newline.
    pub fn get_string(&self, address: Address) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut current = address;
        loop {
            let byte = self.get_byte(current, false)? as u8;
            if byte == 0 {
                return Ok(bytes);
            }

            if !is_allowed_char(byte) {
                return Err(Exception::InvalidCharacter { byte });
            }

            bytes.push(byte);
            current = current
                .checked_add(1)
                .ok_or(Exception::MemoryOutOfBounds { address: current })?;
        }
    }

    /// Grow the heap by `amount` bytes rounded up to a multiple of 4
    ///
    /// Returns the previous end of the heap, which is the start of the newly
    /// allocated block.
    pub fn sbrk(&mut self, amount: Word) -> Result<Address> {
        let amount =
            u64::try_from(amount).map_err(|_| Exception::InvalidArgument { value: amount })?;

        let old = self.heap_ptr;
        let new = (u64::from(old) + amount + 3) & !3;
        if new > u64::from(self.layout.initial_sp) {
            return Err(Exception::MemoryOutOfBounds {
                address: Address::try_from(new).unwrap_or(Address::MAX),
            });
        }

        // `new` is below `initial_sp` so it fits in an address
        self.heap_ptr = new as Address;
        debug!(old = old, new = self.heap_ptr, "Heap grown");
        Ok(old)
    }

    #[must_use]
    pub fn heap_ptr(&self) -> Address {
        self.heap_ptr
    }

    #[must_use]
    pub fn label(&self, name: &str) -> Option<Address> {
        self.labels.get(name).copied()
    }

    #[must_use]
    pub fn labels(&self) -> &HashMap<String, Address> {
        &self.labels
    }

    pub(crate) fn set_labels(&mut self, labels: HashMap<String, Address>) {
        self.labels = labels;
    }

    pub(crate) fn push_instruction(
        &mut self,
        instruction: Instruction,
        line: Option<usize>,
    ) -> Address {
        let address = self.end_of_text();
        self.text.push(instruction);
        self.lines.push(line);
        address
    }

    fn text_index(&self, address: Address) -> Option<usize> {
        let offset = address.checked_sub(self.layout.text_start)?;
        if offset % INSTRUCTION_SIZE != 0 {
            return None;
        }
        usize::try_from(offset / INSTRUCTION_SIZE).ok()
    }

    /// Address right after the last instruction
    #[must_use]
    pub fn end_of_text(&self) -> Address {
        let count = Address::try_from(self.text.len()).unwrap_or(Address::MAX / INSTRUCTION_SIZE);
        self.layout.text_start + count * INSTRUCTION_SIZE
    }

    /// Fetch the instruction stored at an address of the text segment
    #[must_use]
    pub fn instruction_at(&self, address: Address) -> Option<&Instruction> {
        self.text.get(self.text_index(address)?)
    }

    /// Source line of the instruction stored at an address
    #[must_use]
    pub fn line_at(&self, address: Address) -> Option<usize> {
        self.lines.get(self.text_index(address)?).copied().flatten()
    }

    /// Instructions of the text segment with their addresses
    pub fn text(&self) -> impl Iterator<Item = (Address, &Instruction)> {
        let start = self.layout.text_start;
        (0..).zip(&self.text).map(move |(index, instruction): (Address, _)| {
            (start + index * INSTRUCTION_SIZE, instruction)
        })
    }
}
