//! A small fixed-size cache of loaded modules.
//!
//! Loading a module means reading the whole ELF file and indexing its CFI, so
//! captures against the same binary share one [`Module`]. Slots are handed out
//! through [`ModuleHandle`]s and reference counted. A slot whose count drops to
//! zero stays loaded ("warm") until its slot is needed for another path, at
//! which point the warm slot released longest ago is evicted.

use std::path::Path;
use std::sync::Arc;

use crate::dwarf::Module;
use crate::status::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unused,
    Active,
    /// Loaded, no outstanding handles.
    Warm,
}

/// Refers to one slot for as long as the slot holds the same module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle {
    index: usize,
    generation: u64,
}

impl ModuleHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Bookkeeping of a slot, for callers that want to look at the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    pub state: SlotState,
    pub refcount: u32,
    pub warm_seq: Option<u64>,
}

#[derive(Debug)]
struct Loaded {
    path: Arc<Path>,
    module: Module,
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    loaded: Option<Loaded>,
    refcount: u32,
    warm_seq: Option<u64>,
    generation: u64,
}

impl Slot {
    fn empty() -> Self {
        Self {
            state: SlotState::Unused,
            loaded: None,
            refcount: 0,
            warm_seq: None,
            generation: 0,
        }
    }

    /// Drop whatever is loaded. Handles to the old contents stop validating.
    fn clear(&mut self) {
        self.state = SlotState::Unused;
        self.loaded = None;
        self.refcount = 0;
        self.warm_seq = None;
        self.generation += 1;
    }

    fn holds(&self, path: &Path) -> bool {
        self.state != SlotState::Unused
            && self
                .loaded
                .as_ref()
                .is_some_and(|loaded| &*loaded.path == path)
    }
}

#[derive(Debug)]
pub struct ModuleCache {
    slots: Vec<Slot>,
    warm_clock: u64,
}

impl ModuleCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::empty()).collect(),
            warm_clock: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots holding a module, active or warm.
    pub fn loaded(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state != SlotState::Unused)
            .count()
    }

    /// Get a handle to the module at `path`, loading it if it is not cached.
    ///
    /// Fails with [`Error::CacheFull`] when every slot has outstanding handles.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn acquire(&mut self, path: &Path) -> Result<ModuleHandle> {
        if let Some(index) = self.slots.iter().position(|slot| slot.holds(path)) {
            let slot = &mut self.slots[index];
            match slot.state {
                SlotState::Warm => {
                    trace!(index, "reviving warm module");
                    slot.state = SlotState::Active;
                    slot.refcount = 1;
                    slot.warm_seq = None;
                }
                _ => slot.refcount += 1,
            }
            return Ok(ModuleHandle {
                index,
                generation: slot.generation,
            });
        }

        let index = self.free_slot()?;
        let slot = &mut self.slots[index];
        if slot.state == SlotState::Warm {
            debug!(
                index,
                evicted = ?slot.loaded.as_ref().map(|loaded| &loaded.path),
                "evicting warm module"
            );
        }
        slot.clear();

        let module = Module::load(path)?;
        debug!(
            index,
            fdes = module.index().fdes().len(),
            eh_frame = module.index().sections().eh_frame.len,
            debug_frame = module.index().sections().debug_frame.len,
            "loaded module"
        );
        slot.loaded = Some(Loaded {
            path: Arc::from(path),
            module,
        });
        slot.state = SlotState::Active;
        slot.refcount = 1;

        Ok(ModuleHandle {
            index,
            generation: slot.generation,
        })
    }

    fn free_slot(&self) -> Result<usize> {
        if let Some(index) = self
            .slots
            .iter()
            .position(|slot| slot.state == SlotState::Unused)
        {
            return Ok(index);
        }

        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == SlotState::Warm)
            .min_by_key(|(_, slot)| slot.warm_seq)
            .map(|(index, _)| index)
            .ok_or(Error::CacheFull(self.slots.len()))
    }

    fn slot(&self, handle: ModuleHandle) -> Result<&Slot> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation && slot.state != SlotState::Unused)
            .ok_or_else(|| Error::invalid(format!("stale module handle {handle:?}")))
    }

    /// Give back a handle from [`acquire`](Self::acquire).
    pub fn release(&mut self, handle: ModuleHandle) -> Result<()> {
        self.slot(handle)?;
        let slot = &mut self.slots[handle.index];
        if slot.refcount == 0 {
            return Err(Error::invalid(format!(
                "module handle {handle:?} released more often than acquired"
            )));
        }

        slot.refcount -= 1;
        if slot.refcount == 0 {
            self.warm_clock += 1;
            slot.state = SlotState::Warm;
            slot.warm_seq = Some(self.warm_clock);
            trace!(index = handle.index, warm_seq = self.warm_clock, "module is warm");
        }
        Ok(())
    }

    pub fn get(&self, handle: ModuleHandle) -> Result<&Module> {
        match self.slot(handle)?.loaded.as_ref() {
            Some(loaded) => Ok(&loaded.module),
            None => Err(Error::invalid(format!("module handle {handle:?} is empty"))),
        }
    }

    /// The path the module was loaded from, shareable with the frames that
    /// are attributed to it.
    pub fn path(&self, handle: ModuleHandle) -> Result<Arc<Path>> {
        match self.slot(handle)?.loaded.as_ref() {
            Some(loaded) => Ok(loaded.path.clone()),
            None => Err(Error::invalid(format!("module handle {handle:?} is empty"))),
        }
    }

    pub fn info(&self, handle: ModuleHandle) -> Result<SlotInfo> {
        let slot = self.slot(handle)?;
        Ok(SlotInfo {
            state: slot.state,
            refcount: slot.refcount,
            warm_seq: slot.warm_seq,
        })
    }

    /// Unload everything. Outstanding handles become invalid.
    pub fn flush(&mut self) {
        debug!(loaded = self.loaded(), "flushing module cache");
        for slot in &mut self.slots {
            slot.clear();
        }
        self.warm_clock = 0;
    }
}
