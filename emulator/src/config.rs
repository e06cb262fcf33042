//! Run-time settings of the simulator
//!
//! Everything that changes how a program is loaded or executed lives in
//! [`Settings`], which is handed to the loader and stored in the
//! [`Computer`](crate::runtime::Computer) it builds.

use crate::constants as C;

/// Boundaries of the memory segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub text_start: C::Address,
    pub data_min: C::Address,
    pub heap_start: C::Address,
    pub initial_gp: C::Address,
    pub initial_sp: C::Address,
    pub data_max: C::Address,
    pub mmio_base: C::Address,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            text_start: C::TEXT_START,
            data_min: C::DATA_MIN,
            heap_start: C::HEAP_START,
            initial_gp: C::INITIAL_GP,
            initial_sp: C::INITIAL_SP,
            data_max: C::DATA_MAX,
            mmio_base: C::MMIO_BASE,
        }
    }
}

impl Layout {
    /// Checks if an address can be used by load/store instructions
    #[must_use]
    pub fn is_data_address(&self, address: C::Address) -> bool {
        (self.data_min..=self.data_max).contains(&address) || address >= self.mmio_base
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Memory segments boundaries
    pub layout: Layout,

    /// Print the number of executed instructions when the program exits
    pub display_instruction_count: bool,

    /// Abort the program after this many instructions
    pub max_instructions: Option<u64>,

    /// Fill the registers with random values on startup
    pub garbage_registers: bool,

    /// Unwritten memory reads as random values instead of zero
    pub garbage_memory: bool,

    /// Seed of the random number generator. Uses entropy when unset.
    pub seed: Option<u64>,

    /// Report suspicious behaviors of the program, like reading a register
    /// before writing it
    pub warnings: bool,

    /// Label where the execution starts
    pub entrypoint: String,

    /// Arguments passed to the program through `$a0`/`$a1`
    pub arguments: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            display_instruction_count: false,
            max_instructions: None,
            garbage_registers: false,
            garbage_memory: false,
            seed: None,
            warnings: false,
            entrypoint: C::DEFAULT_ENTRYPOINT.to_owned(),
            arguments: Vec::new(),
        }
    }
}
