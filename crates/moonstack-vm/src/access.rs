//! Table access, metatables, environments, userdata and value conversions.

use crate::coerce::truncate;
use crate::error::LuaResult;
use crate::index::Index;
use crate::state::{NativeFn, State};
use crate::GLOBALSINDEX;
use moonstack_core::number::fmt_number;
use moonstack_core::{Closure, LuaType, Userdata, UserdataBody, Value};
use std::any::Any;
use std::ffi::c_void;

impl State {
    fn table_at(&self, idx: impl Into<Index>, op: &str) -> moonstack_core::GcIdx<moonstack_core::Table> {
        match self.index_value(idx) {
            Value::Table(t) => t,
            other => panic!("{op}: expected a table, found {}", other.type_name()),
        }
    }

    fn top_value(&self) -> Value {
        assert!(self.gettop() > 0, "stack is empty");
        self.cur.stack[self.cur.top - 1]
    }

    // ---- Table access ----

    /// Replace the key on top with `t[key]`, where `t` is at `idx`.
    pub fn gettable(&mut self, idx: impl Into<Index>) -> LuaResult<()> {
        let t = self.index_value(idx);
        let key = self.top_value();
        let r = self.get_table_value(t, key, None);
        let v = self.escape(r)?;
        self.cur.stack[self.cur.top - 1] = v;
        Ok(())
    }

    /// Push `t[k]`.
    pub fn getfield(&mut self, idx: impl Into<Index>, k: &str) -> LuaResult<()> {
        let t = self.index_value(idx);
        self.pushstring(k);
        let key = self.top_value();
        let r = self.get_table_value(t, key, None);
        let v = self.escape(r)?;
        self.cur.stack[self.cur.top - 1] = v;
        Ok(())
    }

    /// `t[key] = value` with the key and value on top; pops both.
    pub fn settable(&mut self, idx: impl Into<Index>) -> LuaResult<()> {
        let t = self.index_value(idx);
        assert!(self.gettop() >= 2, "settable needs a key and a value");
        let key = self.cur.stack[self.cur.top - 2];
        let v = self.cur.stack[self.cur.top - 1];
        let r = self.set_table_value(t, key, v, None);
        self.escape(r)?;
        self.cur.top -= 2;
        Ok(())
    }

    /// `t[k] = value` with the value on top; pops it.
    pub fn setfield(&mut self, idx: impl Into<Index>, k: &str) -> LuaResult<()> {
        let t = self.index_value(idx);
        let v = self.top_value();
        let key = self.intern(k.as_bytes());
        let r = self.set_table_value(t, key, v, None);
        self.escape(r)?;
        self.cur.top -= 1;
        Ok(())
    }

    pub fn getglobal(&mut self, name: &str) -> LuaResult<()> {
        self.getfield(GLOBALSINDEX, name)
    }

    pub fn setglobal(&mut self, name: &str) -> LuaResult<()> {
        self.setfield(GLOBALSINDEX, name)
    }

    /// Set global `name` to a native function.
    pub fn register(&mut self, name: &str, f: NativeFn) -> LuaResult<()> {
        self.pushcfunction(f);
        self.setglobal(name)
    }

    /// Replace the key on top with `t[key]`, without metamethods.
    pub fn rawget(&mut self, idx: impl Into<Index>) {
        let t = self.table_at(idx, "rawget");
        let key = self.top_value();
        let v = self.heap.get_table(t).raw_get(key);
        self.cur.stack[self.cur.top - 1] = v;
    }

    pub fn rawgeti(&mut self, idx: impl Into<Index>, n: i64) {
        let t = self.table_at(idx, "rawgeti");
        let v = self.heap.get_table(t).raw_geti(n);
        self.push(v);
    }

    /// `t[key] = value` without metamethods; pops key and value.
    pub fn rawset(&mut self, idx: impl Into<Index>) -> LuaResult<()> {
        let t = self.table_at(idx, "rawset");
        assert!(self.gettop() >= 2, "rawset needs a key and a value");
        let key = self.cur.stack[self.cur.top - 2];
        let v = self.cur.stack[self.cur.top - 1];
        if let Err(e) = self.heap.get_table_mut(t).raw_set(key, v) {
            let err = self.rt_error(e.message());
            return self.escape(Err(err));
        }
        self.cur.top -= 2;
        Ok(())
    }

    /// `t[n] = value` without metamethods; pops the value.
    pub fn rawseti(&mut self, idx: impl Into<Index>, n: i64) {
        let t = self.table_at(idx, "rawseti");
        let v = self.pop_value();
        self.heap.get_table_mut(t).raw_seti(n, v);
    }

    pub fn createtable(&mut self, narr: usize, nrec: usize) {
        self.gc_check();
        let t = self.heap.alloc_table(narr, nrec);
        self.push(Value::Table(t));
    }

    pub fn newtable(&mut self) {
        self.createtable(0, 0);
    }

    /// Pop a key and push the next key/value pair of the table at `idx`.
    /// Returns false, pushing nothing, when the traversal is over.
    pub fn next(&mut self, idx: impl Into<Index>) -> LuaResult<bool> {
        let t = self.table_at(idx, "next");
        let key = self.pop_value();
        match self.heap.get_table(t).next(key) {
            Ok(Some((k, v))) => {
                self.push(k);
                self.push(v);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(_) => {
                let err = self.rt_error("invalid key to 'next'");
                self.escape(Err(err))
            }
        }
    }

    /// Pop `n` values and push their concatenation. `concat(0)` pushes the
    /// empty string and `concat(1)` leaves the stack alone.
    pub fn concat(&mut self, n: usize) -> LuaResult<()> {
        match n {
            0 => self.pushlstring(b""),
            1 => {}
            _ => {
                assert!(n as i32 <= self.gettop(), "concat: not enough values");
                self.gc_check();
                let last = self.cur.top - 1;
                let r = self.concat_slots(n, last);
                self.escape(r)?;
                self.cur.top -= n - 1;
            }
        }
        Ok(())
    }

    /// Raw length: string bytes, userdata size, table border. Numbers are
    /// converted to strings in place first.
    pub fn objlen(&mut self, idx: impl Into<Index>) -> usize {
        let idx = idx.into();
        match self.index_value(idx) {
            Value::String(id) => self.string_bytes(id).len(),
            Value::Userdata(u) => self.heap.get_userdata(u).size(),
            Value::Table(t) => self.heap.get_table(t).length(),
            Value::Number(_) => self.tolstring(idx).map_or(0, |s| s.len()),
            _ => 0,
        }
    }

    // ---- Metatables and environments ----

    /// Push the metatable of the value at `idx`, if it has one.
    pub fn getmetatable(&mut self, idx: impl Into<Index>) -> bool {
        match self.value_at(idx).and_then(|v| self.metatable_of(v)) {
            Some(mt) => {
                self.push(Value::Table(mt));
                true
            }
            None => false,
        }
    }

    /// Pop a table (or nil) and make it the metatable of the value at `idx`.
    /// Values other than tables and userdata share one metatable per type.
    pub fn setmetatable(&mut self, idx: impl Into<Index>) -> bool {
        let target = self.index_value(idx);
        let mt = match self.pop_value() {
            Value::Nil => None,
            Value::Table(t) => Some(t),
            other => panic!("setmetatable: expected a table or nil, found {}", other.type_name()),
        };
        match target {
            Value::Table(t) => self.heap.get_table_mut(t).metatable = mt,
            Value::Userdata(u) => self.heap.get_userdata_mut(u).metatable = mt,
            other => self.type_mts[other.type_of().code() as usize] = mt,
        }
        true
    }

    /// Push the environment of a function, userdata or thread; nil otherwise.
    pub fn getfenv(&mut self, idx: impl Into<Index>) {
        let env = match self.index_value(idx) {
            Value::Function(f) => Value::Table(self.heap.get_closure(f).env()),
            Value::Userdata(u) => Value::Table(self.heap.get_userdata(u).env),
            Value::Thread(t) if t == self.current => Value::Table(self.cur.globals),
            Value::Thread(t) => self
                .thread_slot(t)
                .and_then(|slot| slot.data.as_ref())
                .map_or(Value::Nil, |d| Value::Table(d.globals)),
            _ => Value::Nil,
        };
        self.push(env);
    }

    /// Pop a table and make it the environment of the value at `idx`.
    /// Returns false for values that have no environment.
    pub fn setfenv(&mut self, idx: impl Into<Index>) -> bool {
        let target = self.index_value(idx);
        let Value::Table(env) = self.pop_value() else {
            panic!("setfenv: expected a table");
        };
        match target {
            Value::Function(f) => self.heap.get_closure_mut(f).set_env(env),
            Value::Userdata(u) => self.heap.get_userdata_mut(u).env = env,
            Value::Thread(t) if t == self.current => self.cur.globals = env,
            Value::Thread(t) => match self.thread_slot_mut(t).and_then(|s| s.data.as_mut()) {
                Some(d) => d.globals = env,
                None => return false,
            },
            _ => return false,
        }
        true
    }

    // ---- Userdata ----

    /// Push a new zeroed block of `size` bytes and return its address.
    pub fn newuserdata(&mut self, size: usize) -> *mut c_void {
        self.gc_check();
        let env = self.current_env();
        let u = self.heap.alloc_userdata(Userdata {
            body: UserdataBody::Raw(vec![0u8; size].into_boxed_slice()),
            metatable: None,
            env,
        });
        self.push(Value::Userdata(u));
        self.heap.get_userdata_mut(u).as_ptr()
    }

    /// Push a userdata owning `value`. Its `Drop` runs when it is collected.
    pub fn new_userdata_typed<T: Any>(&mut self, value: T) {
        self.gc_check();
        let env = self.current_env();
        let u = self.heap.alloc_userdata(Userdata {
            body: UserdataBody::Typed(Box::new(value)),
            metatable: None,
            env,
        });
        self.push(Value::Userdata(u));
    }

    /// Address of a full userdata's block, or a light userdata's pointer.
    pub fn touserdata(&mut self, idx: impl Into<Index>) -> Option<*mut c_void> {
        match self.index_value(idx) {
            Value::Userdata(u) => Some(self.heap.get_userdata_mut(u).as_ptr()),
            Value::LightUserdata(p) => Some(p),
            _ => None,
        }
    }

    /// The host value inside a typed userdata, if it holds a `T`.
    pub fn touserdata_typed<T: Any>(&mut self, idx: impl Into<Index>) -> Option<&mut T> {
        match self.index_value(idx) {
            Value::Userdata(u) => self.heap.get_userdata_mut(u).downcast_mut::<T>(),
            _ => None,
        }
    }

    // ---- Type queries ----

    /// Type of the value at `idx`; `LuaType::None` for an invalid index.
    pub fn type_of(&self, idx: impl Into<Index>) -> LuaType {
        self.value_at(idx).map_or(LuaType::None, |v| v.type_of())
    }

    pub fn typename(&self, t: LuaType) -> &'static str {
        t.name()
    }

    pub fn type_name_at(&self, idx: impl Into<Index>) -> &'static str {
        self.type_of(idx).name()
    }

    pub fn isnumber(&self, idx: impl Into<Index>) -> bool {
        self.tonumberx(idx).is_some()
    }

    /// Strings and numbers, which convert to each other.
    pub fn isstring(&self, idx: impl Into<Index>) -> bool {
        matches!(self.type_of(idx), LuaType::String | LuaType::Number)
    }

    pub fn isfunction(&self, idx: impl Into<Index>) -> bool {
        self.type_of(idx) == LuaType::Function
    }

    pub fn iscfunction(&self, idx: impl Into<Index>) -> bool {
        matches!(self.closure_of(self.index_value(idx)), Some(Closure::Native(_)))
    }

    pub fn isuserdata(&self, idx: impl Into<Index>) -> bool {
        matches!(self.type_of(idx), LuaType::Userdata | LuaType::LightUserdata)
    }

    pub fn islightuserdata(&self, idx: impl Into<Index>) -> bool {
        self.type_of(idx) == LuaType::LightUserdata
    }

    pub fn istable(&self, idx: impl Into<Index>) -> bool {
        self.type_of(idx) == LuaType::Table
    }

    pub fn isthread(&self, idx: impl Into<Index>) -> bool {
        self.type_of(idx) == LuaType::Thread
    }

    pub fn isboolean(&self, idx: impl Into<Index>) -> bool {
        self.type_of(idx) == LuaType::Boolean
    }

    pub fn isnil(&self, idx: impl Into<Index>) -> bool {
        self.type_of(idx) == LuaType::Nil
    }

    pub fn isnone(&self, idx: impl Into<Index>) -> bool {
        self.type_of(idx) == LuaType::None
    }

    pub fn isnoneornil(&self, idx: impl Into<Index>) -> bool {
        matches!(self.type_of(idx), LuaType::None | LuaType::Nil)
    }

    // ---- Conversions ----

    /// Numeric value, converting numeric strings. 0 when there is none.
    pub fn tonumber(&self, idx: impl Into<Index>) -> f64 {
        self.tonumberx(idx).unwrap_or(0.0)
    }

    pub fn tonumberx(&self, idx: impl Into<Index>) -> Option<f64> {
        self.to_number(self.value_at(idx)?)
    }

    /// Numeric value truncated toward zero. 0 when there is none.
    pub fn tointeger(&self, idx: impl Into<Index>) -> i64 {
        self.tonumberx(idx).map_or(0, truncate)
    }

    pub fn toboolean(&self, idx: impl Into<Index>) -> bool {
        self.value_at(idx).is_some_and(|v| v.is_truthy())
    }

    /// Bytes of a string, or of a number after converting the value where
    /// it lives (stack slot or native upvalue) to a string in place.
    pub fn tolstring(&mut self, idx: impl Into<Index>) -> Option<Vec<u8>> {
        let idx = idx.into();
        match self.value_at(idx)? {
            Value::String(id) => Some(self.string_bytes(id).to_vec()),
            Value::Number(n) => {
                let text = fmt_number(n);
                let converted = self.intern(text.as_bytes());
                match idx {
                    Index::Stack(i) => {
                        if let Some(slot) = self.slot_of(i) {
                            self.cur.stack[slot] = converted;
                        }
                    }
                    Index::Upvalue(k) => self.set_native_upvalue(k, converted),
                    Index::Registry | Index::Environ | Index::Globals => {}
                }
                Some(text.into_bytes())
            }
            _ => None,
        }
    }

    pub fn tostring_lossy(&mut self, idx: impl Into<Index>) -> Option<String> {
        self.tolstring(idx)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn tocfunction(&self, idx: impl Into<Index>) -> Option<NativeFn> {
        match self.closure_of(self.index_value(idx))? {
            Closure::Native(nc) => self.natives.get(nc.func.0 as usize).copied(),
            Closure::Lua(_) => None,
        }
    }

    /// Identity of an object for diagnostics. 0 for non-objects and strings.
    pub fn topointer(&self, idx: impl Into<Index>) -> usize {
        self.index_value(idx).identity()
    }

    /// A copy of the value at `idx`.
    pub fn value(&self, idx: impl Into<Index>) -> Value {
        self.index_value(idx)
    }
}
