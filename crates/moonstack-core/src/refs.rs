//! Handle bookkeeping for `ref` / `unref`.
//!
//! The values themselves live in the owning table at the handle's slot. The
//! book only tracks which slots are free and a generation per slot, so a
//! handle released twice, or used after its slot was recycled, can be told
//! apart from a live one.

/// Handle sentinel returned when the stored value was nil.
pub const REFNIL: i32 = -1;
/// Handle sentinel meaning "no reference".
pub const NOREF: i32 = -2;

/// A handle into a table managed with `ref`/`unref`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegistryRef {
    pub slot: i32,
    pub generation: u32,
}

impl RegistryRef {
    pub const NIL: RegistryRef = RegistryRef {
        slot: REFNIL,
        generation: 0,
    };
    pub const NONE: RegistryRef = RegistryRef {
        slot: NOREF,
        generation: 0,
    };

    /// True for the two sentinels, which own no slot.
    pub fn is_sentinel(&self) -> bool {
        self.slot < 1
    }
}

impl From<RegistryRef> for i32 {
    fn from(r: RegistryRef) -> i32 {
        r.slot
    }
}

/// Why a handle was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StaleRef {
    /// The slot was never handed out by this book.
    Unknown,
    /// The slot has been released or recycled since this handle was issued.
    Released,
}

#[derive(Clone, Debug, Default)]
struct SlotState {
    generation: u32,
    live: bool,
}

#[derive(Clone, Debug, Default)]
pub struct RefBook {
    /// Index 0 is slot 1.
    slots: Vec<SlotState>,
    free: Vec<i32>,
}

impl RefBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recycled slot if one is free. The caller confirms the table slot is
    /// empty and hands it back with `return_free` otherwise.
    pub fn pop_free(&mut self) -> Option<i32> {
        self.free.pop()
    }

    /// Put a slot taken with `pop_free` back on the free list unclaimed.
    pub fn return_free(&mut self, slot: i32) {
        self.free.push(slot);
    }

    /// Take `slot` and issue a handle for it.
    pub fn claim(&mut self, slot: i32) -> RegistryRef {
        debug_assert!(slot >= 1);
        let i = (slot - 1) as usize;
        if self.slots.len() <= i {
            self.slots.resize(i + 1, SlotState::default());
        }
        let state = &mut self.slots[i];
        state.generation = state.generation.wrapping_add(1);
        state.live = true;
        RegistryRef {
            slot,
            generation: state.generation,
        }
    }

    /// Confirm `r` is the live handle for its slot.
    pub fn check(&self, r: RegistryRef) -> Result<(), StaleRef> {
        let state = usize::try_from(r.slot - 1)
            .ok()
            .and_then(|i| self.slots.get(i))
            .ok_or(StaleRef::Unknown)?;
        if state.live && state.generation == r.generation {
            Ok(())
        } else {
            Err(StaleRef::Released)
        }
    }

    /// Return a handle's slot to the free list.
    pub fn release(&mut self, r: RegistryRef) -> Result<(), StaleRef> {
        self.check(r)?;
        self.slots[(r.slot - 1) as usize].live = false;
        self.free.push(r.slot);
        Ok(())
    }

    /// Release by bare slot number, whatever its generation.
    pub fn release_slot(&mut self, slot: i32) -> Result<(), StaleRef> {
        let i = usize::try_from(slot - 1).map_err(|_| StaleRef::Unknown)?;
        let state = self.slots.get_mut(i).ok_or(StaleRef::Unknown)?;
        if !state.live {
            return Err(StaleRef::Released);
        }
        state.live = false;
        self.free.push(slot);
        Ok(())
    }

    /// The live handle currently occupying `slot`.
    pub fn current(&self, slot: i32) -> Option<RegistryRef> {
        let state = self.slots.get(usize::try_from(slot - 1).ok()?)?;
        state.live.then_some(RegistryRef {
            slot,
            generation: state.generation,
        })
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.live).count()
    }
}
