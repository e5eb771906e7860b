//! Arena heap with typed indices and mark bits.
//!
//! Objects never move. A freed slot goes on the arena's free list and may be
//! reused by the next allocation of the same kind, so an index is only
//! meaningful while the object is reachable.

use crate::object::{Closure, UpVal, Userdata, UserdataBody};
use crate::table::Table;
use std::marker::PhantomData;

/// A typed index into an arena.
#[derive(Debug)]
pub struct GcIdx<T>(pub u32, pub PhantomData<T>);

impl<T> GcIdx<T> {
    #[inline]
    pub const fn new(index: u32) -> Self {
        GcIdx(index, PhantomData)
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl<T> Clone for GcIdx<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for GcIdx<T> {}

impl<T> PartialEq for GcIdx<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for GcIdx<T> {}

impl<T> std::hash::Hash for GcIdx<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// Slot storage for one object kind.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    marks: Vec<bool>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena {
            slots: Vec::new(),
            marks: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, value: T) -> GcIdx<T> {
        self.live += 1;
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(value);
            self.marks[idx as usize] = false;
            GcIdx::new(idx)
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Some(value));
            self.marks.push(false);
            GcIdx::new(idx)
        }
    }

    #[inline]
    pub fn get(&self, idx: GcIdx<T>) -> Option<&T> {
        self.slots.get(idx.0 as usize).and_then(Option::as_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, idx: GcIdx<T>) -> Option<&mut T> {
        self.slots.get_mut(idx.0 as usize).and_then(Option::as_mut)
    }

    pub fn contains(&self, idx: GcIdx<T>) -> bool {
        self.get(idx).is_some()
    }

    /// Remove an object immediately, bypassing the collector.
    pub fn remove(&mut self, idx: GcIdx<T>) -> Option<T> {
        let taken = self.slots.get_mut(idx.0 as usize)?.take()?;
        self.free.push(idx.0);
        self.live -= 1;
        Some(taken)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Mark an object. Returns true if it was not marked before.
    #[inline]
    pub fn mark(&mut self, idx: GcIdx<T>) -> bool {
        match self.marks.get_mut(idx.0 as usize) {
            Some(m) if !*m => {
                *m = true;
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn is_marked(&self, idx: GcIdx<T>) -> bool {
        self.marks.get(idx.0 as usize).copied().unwrap_or(false)
    }

    pub fn clear_marks(&mut self) {
        self.marks.iter_mut().for_each(|m| *m = false);
    }

    /// Indices of live objects that are not marked.
    pub fn unmarked(&self) -> Vec<GcIdx<T>> {
        self.iter()
            .map(|(idx, _)| idx)
            .filter(|&idx| !self.is_marked(idx))
            .collect()
    }

    /// Free every unmarked object, handing each to `on_free` first.
    pub fn sweep(&mut self, mut on_free: impl FnMut(GcIdx<T>, T)) -> usize {
        let mut freed = 0;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if self.marks[i] {
                continue;
            }
            if let Some(obj) = slot.take() {
                self.free.push(i as u32);
                freed += 1;
                on_free(GcIdx::new(i as u32), obj);
            }
        }
        self.live -= freed;
        freed
    }

    pub fn iter(&self) -> impl Iterator<Item = (GcIdx<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|v| (GcIdx::new(i as u32), v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (GcIdx<T>, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|v| (GcIdx::new(i as u32), v)))
    }
}

/// Per-object costs used by the heap size estimate.
const TABLE_COST: usize = 64;
const CLOSURE_COST: usize = 48;
const UPVAL_COST: usize = 32;
const USERDATA_COST: usize = 48;
const SLOT_COST: usize = 32;

/// Every collectable object except strings and threads.
#[derive(Debug, Default)]
pub struct GcHeap {
    pub tables: Arena<Table>,
    pub closures: Arena<Closure>,
    pub upvals: Arena<UpVal>,
    pub userdata: Arena<Userdata>,
    /// Running estimate of bytes allocated since the last recount.
    allocated: usize,
}

impl GcHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_table(&mut self, array_hint: usize, hash_hint: usize) -> GcIdx<Table> {
        self.allocated += TABLE_COST + (array_hint + hash_hint) * SLOT_COST;
        self.tables.alloc(Table::new(array_hint, hash_hint))
    }

    pub fn get_table(&self, idx: GcIdx<Table>) -> &Table {
        self.tables.get(idx).expect("table was freed")
    }

    pub fn get_table_mut(&mut self, idx: GcIdx<Table>) -> &mut Table {
        self.tables.get_mut(idx).expect("table was freed")
    }

    pub fn alloc_closure(&mut self, closure: Closure) -> GcIdx<Closure> {
        self.allocated += CLOSURE_COST + closure.num_upvalues() * 8;
        self.closures.alloc(closure)
    }

    pub fn get_closure(&self, idx: GcIdx<Closure>) -> &Closure {
        self.closures.get(idx).expect("closure was freed")
    }

    pub fn get_closure_mut(&mut self, idx: GcIdx<Closure>) -> &mut Closure {
        self.closures.get_mut(idx).expect("closure was freed")
    }

    pub fn alloc_upval(&mut self, upval: UpVal) -> GcIdx<UpVal> {
        self.allocated += UPVAL_COST;
        self.upvals.alloc(upval)
    }

    pub fn get_upval(&self, idx: GcIdx<UpVal>) -> &UpVal {
        self.upvals.get(idx).expect("upval was freed")
    }

    pub fn get_upval_mut(&mut self, idx: GcIdx<UpVal>) -> &mut UpVal {
        self.upvals.get_mut(idx).expect("upval was freed")
    }

    pub fn alloc_userdata(&mut self, ud: Userdata) -> GcIdx<Userdata> {
        self.allocated += USERDATA_COST + ud.size();
        self.userdata.alloc(ud)
    }

    pub fn get_userdata(&self, idx: GcIdx<Userdata>) -> &Userdata {
        self.userdata.get(idx).expect("userdata was freed")
    }

    pub fn get_userdata_mut(&mut self, idx: GcIdx<Userdata>) -> &mut Userdata {
        self.userdata.get_mut(idx).expect("userdata was freed")
    }

    /// Bytes allocated since the last `recount`, plus whatever `recount` found.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Account for growth that did not go through an `alloc_*` call.
    pub fn add_debt(&mut self, bytes: usize) {
        self.allocated += bytes;
    }

    /// Recompute the estimate from the live objects. Called after a sweep.
    pub fn recount(&mut self) -> usize {
        let tables: usize = self
            .tables
            .iter()
            .map(|(_, t)| TABLE_COST + t.capacity() * SLOT_COST)
            .sum();
        let closures: usize = self
            .closures
            .iter()
            .map(|(_, c)| CLOSURE_COST + c.num_upvalues() * 8)
            .sum();
        let userdata: usize = self
            .userdata
            .iter()
            .map(|(_, u)| {
                USERDATA_COST
                    + match &u.body {
                        UserdataBody::Raw(b) => b.len(),
                        UserdataBody::Typed(_) => 0,
                    }
            })
            .sum();
        self.allocated = tables + closures + userdata + self.upvals.len() * UPVAL_COST;
        self.allocated
    }

    pub fn clear_marks(&mut self) {
        self.tables.clear_marks();
        self.closures.clear_marks();
        self.upvals.clear_marks();
        self.userdata.clear_marks();
    }
}
