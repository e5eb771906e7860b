//! The value stack: index resolution, shape operations and the push family.

use crate::error::{LuaError, LuaResult};
use crate::index::Index;
use crate::state::{NativeFn, State};
use moonstack_core::number::fmt_number;
use moonstack_core::{Closure, NativeClosure, Value};
use std::ffi::c_void;
use std::fmt::Write;

impl State {
    // ---- Index resolution ----

    /// Absolute slot of a stack index inside the current frame.
    pub(crate) fn slot_of(&self, idx: i32) -> Option<usize> {
        let base = self.ci().base;
        let top = self.cur.top;
        match idx {
            i if i > 0 => {
                let slot = base + i as usize - 1;
                (slot < top).then_some(slot)
            }
            i if i < 0 => {
                let back = i.unsigned_abs() as usize;
                (back <= top - base).then(|| top - back)
            }
            _ => None,
        }
    }

    /// Like `slot_of`, but an invalid index is a host bug.
    pub(crate) fn valid_slot(&self, idx: i32) -> usize {
        match self.slot_of(idx) {
            Some(slot) => slot,
            None => panic!("invalid stack index {idx} (top is {})", self.gettop()),
        }
    }

    /// The value an index names, `None` for an index outside the frame.
    pub(crate) fn value_at(&self, idx: impl Into<Index>) -> Option<Value> {
        match idx.into() {
            Index::Stack(i) => self.slot_of(i).map(|slot| self.cur.stack[slot]),
            Index::Registry => Some(Value::Table(self.registry)),
            Index::Globals => Some(Value::Table(self.cur.globals)),
            Index::Environ => Some(Value::Table(self.current_env())),
            Index::Upvalue(n) => match self.heap_native_upvalues() {
                Some(ups) => ups.get(n as usize - 1).copied(),
                None => None,
            },
        }
    }

    #[inline]
    pub(crate) fn index_value(&self, idx: impl Into<Index>) -> Value {
        self.value_at(idx).unwrap_or_default()
    }

    fn heap_native_upvalues(&self) -> Option<&[Value]> {
        match self.heap.get_closure(self.ci().closure()?) {
            Closure::Native(nc) => Some(&nc.upvalues),
            Closure::Lua(_) => None,
        }
    }

    /// Overwrite upvalue `n` of the running native closure, if it has one.
    pub(crate) fn set_native_upvalue(&mut self, n: u32, v: Value) {
        let Some(cl) = self.ci().closure() else { return };
        if let Closure::Native(nc) = self.heap.get_closure_mut(cl) {
            if let Some(slot) = nc.upvalues.get_mut(n as usize - 1) {
                *slot = v;
            }
        }
    }

    /// Turn a relative index into one that survives pushes and pops.
    pub fn absindex(&self, idx: i32) -> i32 {
        if idx > 0 || Index::from(idx).is_pseudo() {
            idx
        } else {
            self.gettop() + idx + 1
        }
    }

    pub(crate) fn abs_index(&self, idx: impl Into<Index>) -> Index {
        match idx.into() {
            Index::Stack(i) => Index::Stack(self.absindex(i)),
            pseudo => pseudo,
        }
    }

    // ---- Growth ----

    /// Make sure the stack vector reaches `needed` slots, within the
    /// configured limit.
    pub(crate) fn ensure_stack(&mut self, needed: usize) -> LuaResult<()> {
        let limit = self.stack_limit();
        if needed > limit {
            return Err(self.stack_overflow_error());
        }
        if self.cur.stack.len() < needed {
            self.cur.stack.resize(needed, Value::Nil);
        }
        Ok(())
    }

    fn stack_limit(&self) -> usize {
        if self.overflow_headroom {
            self.config.max_stack_slots + 5 * crate::MINSTACK
        } else {
            self.config.max_stack_slots
        }
    }

    pub(crate) fn stack_overflow_error(&mut self) -> LuaError {
        if self.overflow_headroom {
            // overflowing again while handling the first overflow
            return LuaError::ErrorHandler(Box::new(LuaError::StackOverflow(
                "stack overflow".into(),
            )));
        }
        self.overflow_headroom = true;
        match self.rt_error("stack overflow") {
            LuaError::Runtime(msg) => LuaError::StackOverflow(msg),
            other => other,
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, v: Value) {
        let top = self.cur.top;
        if top < self.cur.stack.len() {
            self.cur.stack[top] = v;
        } else {
            self.cur.stack.push(v);
        }
        self.cur.top = top + 1;
    }

    #[inline]
    pub(crate) fn pop_value(&mut self) -> Value {
        assert!(self.cur.top > self.ci().base, "stack underflow");
        self.cur.top -= 1;
        self.cur.stack[self.cur.top]
    }

    // ---- Stack shape ----

    /// Number of values in the current frame.
    pub fn gettop(&self) -> i32 {
        (self.cur.top - self.ci().base) as i32
    }

    /// Truncate to `idx` values, or pad with nil up to it. Negative values
    /// count from the top, so `settop(-2)` pops one value.
    pub fn settop(&mut self, idx: i32) {
        let base = self.ci().base;
        let new_top = if idx >= 0 {
            base + idx as usize
        } else {
            let drop = (-idx - 1) as usize;
            assert!(drop <= self.cur.top - base, "settop({idx}) below the frame");
            self.cur.top - drop
        };
        if new_top > self.cur.stack.len() {
            self.cur.stack.resize(new_top, Value::Nil);
        }
        for slot in self.cur.top..new_top {
            self.cur.stack[slot] = Value::Nil;
        }
        self.cur.top = new_top;
    }

    pub fn pop(&mut self, n: i32) {
        self.settop(-n - 1);
    }

    pub fn pushvalue(&mut self, idx: impl Into<Index>) {
        let v = self.index_value(idx);
        self.push(v);
    }

    /// Remove the value at `idx`, shifting the ones above it down.
    pub fn remove(&mut self, idx: i32) {
        let slot = self.valid_slot(idx);
        let top = self.cur.top;
        self.cur.stack.copy_within(slot + 1..top, slot);
        self.cur.top -= 1;
    }

    /// Move the top value to `idx`, shifting the ones above it up.
    pub fn insert(&mut self, idx: i32) {
        let slot = self.valid_slot(idx);
        let top = self.cur.top;
        let v = self.cur.stack[top - 1];
        self.cur.stack.copy_within(slot..top - 1, slot + 1);
        self.cur.stack[slot] = v;
    }

    /// Pop the top value into `idx`. `ENVIRONINDEX` sets the running
    /// function's environment; an upvalue index sets that upvalue.
    pub fn replace(&mut self, idx: impl Into<Index>) {
        assert!(self.cur.top > self.ci().base, "replace on an empty stack");
        let v = self.cur.stack[self.cur.top - 1];
        match idx.into() {
            Index::Stack(i) => {
                let slot = self.valid_slot(i);
                self.cur.stack[slot] = v;
            }
            Index::Environ => {
                let Value::Table(env) = v else {
                    panic!("replace(ENVIRONINDEX) needs a table");
                };
                match self.ci().closure() {
                    Some(cl) => self.heap.get_closure_mut(cl).set_env(env),
                    None => self.cur.globals = env,
                }
            }
            Index::Globals => {
                let Value::Table(g) = v else {
                    panic!("replace(GLOBALSINDEX) needs a table");
                };
                self.cur.globals = g;
            }
            Index::Upvalue(n) => self.set_native_upvalue(n, v),
            Index::Registry => panic!("the registry cannot be replaced"),
        }
        self.cur.top -= 1;
    }

    /// Reserve room for `extra` more values. Fails with an out-of-memory
    /// error rather than truncating.
    pub fn checkstack(&mut self, extra: usize) -> LuaResult<()> {
        let needed = self.cur.top + extra;
        if needed > self.config.max_stack_slots {
            return Err(LuaError::OutOfMemory);
        }
        if self.cur.stack.len() < needed {
            self.cur.stack.resize(needed, Value::Nil);
        }
        let ci = self.ci_mut();
        if ci.top < needed {
            ci.top = needed;
        }
        Ok(())
    }

    // ---- Push family ----

    pub fn pushnil(&mut self) {
        self.push(Value::Nil);
    }

    pub fn pushnumber(&mut self, n: f64) {
        self.push(Value::Number(n));
    }

    pub fn pushinteger(&mut self, n: i64) {
        self.push(Value::Number(n as f64));
    }

    pub fn pushboolean(&mut self, b: bool) {
        self.push(Value::Boolean(b));
    }

    pub fn pushlstring(&mut self, bytes: &[u8]) {
        self.gc_check();
        let v = self.intern(bytes);
        self.push(v);
    }

    pub fn pushstring(&mut self, s: &str) {
        self.pushlstring(s.as_bytes());
    }

    pub fn pushlightuserdata(&mut self, p: *mut c_void) {
        self.push(Value::LightUserdata(p));
    }

    /// Push a native closure, popping `n` upvalues into it.
    pub fn pushcclosure(&mut self, f: NativeFn, n: usize) {
        self.gc_check();
        assert!(n as i32 <= self.gettop(), "pushcclosure: not enough upvalues");
        let first = self.cur.top - n;
        let upvalues = self.cur.stack[first..self.cur.top].to_vec();
        self.cur.top = first;
        let func = self.native_id(f);
        let env = self.current_env();
        let cl = self.heap.alloc_closure(Closure::Native(NativeClosure {
            func,
            upvalues,
            env,
        }));
        self.push(Value::Function(cl));
    }

    pub fn pushcfunction(&mut self, f: NativeFn) {
        self.pushcclosure(f, 0);
    }

    // ---- Diagnostics ----

    /// One line per slot of the current frame, bottom first.
    pub fn dump_stack(&self) -> String {
        let mut out = String::new();
        let base = self.ci().base;
        for (i, v) in self.cur.stack[base..self.cur.top].iter().enumerate() {
            let _ = write!(out, "{}: {:<9} ", i + 1, v.type_name());
            let _ = match *v {
                Value::Nil => writeln!(out, "nil"),
                Value::Boolean(b) => writeln!(out, "{b}"),
                Value::Number(n) => writeln!(out, "{}", fmt_number(n)),
                Value::String(id) => writeln!(out, "{:?}", self.strings.get_lossy(id)),
                other => writeln!(out, "{:#x}", other.identity()),
            };
        }
        out
    }
}
