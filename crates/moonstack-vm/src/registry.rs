//! `ref` / `unref`: integer handles to values stored in a table, usually
//! the registry.

use crate::error::{LuaError, LuaResult};
use crate::index::Index;
use crate::state::State;
use crate::REGISTRYINDEX;
use moonstack_core::refs::StaleRef;
use moonstack_core::{GcIdx, RefBook, RegistryRef, Table, Value};

impl State {
    fn ref_table(&self, idx: impl Into<Index>, op: &str) -> GcIdx<Table> {
        match self.index_value(idx) {
            Value::Table(t) => t,
            other => panic!("{op}: expected a table, found {}", other.type_name()),
        }
    }

    fn stale(r: RegistryRef, why: StaleRef) -> LuaError {
        match why {
            StaleRef::Unknown => LuaError::contract(format!("reference {} was never issued", r.slot)),
            StaleRef::Released => LuaError::contract(format!(
                "reference {} (generation {}) was released",
                r.slot, r.generation
            )),
        }
    }

    /// Pop the top value, store it in the table at `idx` and return a
    /// handle for it. Nil gives [`RegistryRef::NIL`]; running out of
    /// integer keys gives [`RegistryRef::NONE`].
    pub fn ref_(&mut self, idx: impl Into<Index>) -> RegistryRef {
        self.release_dropped_refs();
        let t = self.ref_table(idx, "ref");
        let v = self.pop_value();
        if v.is_nil() {
            return RegistryRef::NIL;
        }
        let table = self.heap.get_table_mut(t);
        let mut book = table.refs.take().unwrap_or_default();
        // free slots the host has since written to stay on the list
        let mut occupied = Vec::new();
        let mut recycled = None;
        while let Some(slot) = book.pop_free() {
            if table.raw_geti(slot as i64).is_nil() {
                recycled = Some(slot);
                break;
            }
            occupied.push(slot);
        }
        for slot in occupied.into_iter().rev() {
            book.return_free(slot);
        }
        let slot = recycled.or_else(|| i32::try_from(table.length() + 1).ok());
        let r = match slot {
            Some(slot) => {
                let r = book.claim(slot);
                table.raw_seti(slot as i64, v);
                r
            }
            None => RegistryRef::NONE,
        };
        table.refs = Some(book);
        r
    }

    /// Release `r`, clearing its slot in the table at `idx`. Sentinels are
    /// ignored; a handle that is stale or was never issued is refused.
    pub fn unref(&mut self, idx: impl Into<Index>, r: RegistryRef) -> LuaResult<()> {
        if r.is_sentinel() {
            return Ok(());
        }
        let t = self.ref_table(idx, "unref");
        let table = self.heap.get_table_mut(t);
        let released = table
            .refs
            .as_mut()
            .map_or(Err(StaleRef::Unknown), |book| book.release(r));
        match released {
            Ok(()) => {
                table.raw_seti(r.slot as i64, Value::Nil);
                Ok(())
            }
            Err(why) => Err(Self::stale(r, why)),
        }
    }

    /// Release the registry slots of owning handles dropped since the last
    /// call.
    pub(crate) fn release_dropped_refs(&mut self) {
        let dropped = std::mem::take(&mut *self.dropped_refs.borrow_mut());
        for r in dropped {
            if let Err(e) = self.unref(REGISTRYINDEX, r) {
                tracing::debug!(target: "moonstack::state", error = %e, "dropped handle was already released");
            }
        }
    }

    /// Push the value behind `r`. Sentinels push nil.
    pub fn get_ref(&mut self, idx: impl Into<Index>, r: RegistryRef) -> LuaResult<()> {
        if r.is_sentinel() {
            self.push(Value::Nil);
            return Ok(());
        }
        let t = self.ref_table(idx, "get_ref");
        let table = self.heap.get_table(t);
        table
            .refs
            .as_deref()
            .map_or(Err(StaleRef::Unknown), |book: &RefBook| book.check(r))
            .map_err(|why| Self::stale(r, why))?;
        let v = table.raw_geti(r.slot as i64);
        self.push(v);
        Ok(())
    }
}
