//! Scoped stack discipline for host code.

use crate::state::State;
use std::ops::{Deref, DerefMut};

/// Records the stack top on creation and restores it on drop.
///
/// Values left above the recorded top are discarded. Popping below it is a
/// host bug and panics.
pub struct StackGuard<'a> {
    state: &'a mut State,
    top: i32,
}

impl<'a> StackGuard<'a> {
    pub fn new(state: &'a mut State) -> Self {
        let top = state.gettop();
        StackGuard { state, top }
    }

    /// Let `n` more values survive the guard.
    pub fn keep(&mut self, n: i32) {
        self.top += n;
    }

    pub fn top(&self) -> i32 {
        self.top
    }
}

impl Deref for StackGuard<'_> {
    type Target = State;

    fn deref(&self) -> &State {
        self.state
    }
}

impl DerefMut for StackGuard<'_> {
    fn deref_mut(&mut self) -> &mut State {
        self.state
    }
}

impl Drop for StackGuard<'_> {
    #[track_caller]
    fn drop(&mut self) {
        let top = self.state.gettop();
        if top < self.top {
            if !std::thread::panicking() {
                panic!("{} too many stack values popped", self.top - top);
            }
            return;
        }
        if top > self.top {
            self.state.settop(self.top);
        }
    }
}

impl State {
    /// Guard the current stack top for the lifetime of the returned value.
    #[must_use]
    pub fn guard(&mut self) -> StackGuard<'_> {
        StackGuard::new(self)
    }
}
