/// Number of general purpose register slots carried by a [`crate::RegisterSet`].
/// Probes that capture more registers have the extra ones dropped.
pub const REGSET_SLOTS: usize = 32;

/// Register set format understood by this build.
pub const REGSET_VERSION: u16 = 1;

pub const MODULE_CACHE_CAPACITY: usize = 16;

/// Options for a [`crate::Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Number of module slots. Zero is treated as one.
    pub cache_capacity: usize,
    /// Whether `capture` may ptrace-attach to a live process when the caller
    /// did not bring its own memory reader.
    pub stack_reader: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_capacity: MODULE_CACHE_CAPACITY,
            stack_reader: true,
        }
    }
}

impl Config {
    pub(crate) fn effective_capacity(&self) -> usize {
        self.cache_capacity.max(1)
    }
}
