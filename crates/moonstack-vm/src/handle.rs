//! Owning handles to Lua values.
//!
//! An [`OwnedRef`] anchors a value in the registry and releases the slot
//! once the last clone is dropped. Drop cannot reach the state, so the slot
//! goes on a queue the state drains at its next `ref_` or collection.
//! [`LuaTable`] and [`LuaFunction`] are typed wrappers over it.

use crate::convert::{FromLua, IntoLua, IntoLuaArgs};
use crate::error::{LuaError, LuaResult};
use crate::index::Index;
use crate::state::{State, StateId};
use crate::{LuaType, RegistryRef, REGISTRYINDEX};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

struct Anchor {
    r: RegistryRef,
    owner: StateId,
    release: Weak<RefCell<Vec<RegistryRef>>>,
}

impl Drop for Anchor {
    fn drop(&mut self) {
        if self.r.is_sentinel() {
            return;
        }
        // a closed state has nothing left to release
        if let Some(queue) = self.release.upgrade() {
            queue.borrow_mut().push(self.r);
        }
    }
}

/// A registry anchor that lives as long as its clones.
#[derive(Clone)]
pub struct OwnedRef(Rc<Anchor>);

impl fmt::Debug for OwnedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnedRef({})", self.0.r.slot)
    }
}

impl OwnedRef {
    /// The raw registry handle. It stays valid only while `self` is alive.
    pub fn registry_ref(&self) -> RegistryRef {
        self.0.r
    }
}

impl State {
    /// Anchor a copy of the value at `idx`.
    pub fn owned_ref(&mut self, idx: impl Into<Index>) -> OwnedRef {
        self.pushvalue(idx);
        let r = self.ref_(REGISTRYINDEX);
        OwnedRef(Rc::new(Anchor {
            r,
            owner: self.id,
            release: Rc::downgrade(&self.dropped_refs),
        }))
    }

    /// Push the value behind `r`.
    pub fn push_owned(&mut self, r: &OwnedRef) -> LuaResult<()> {
        if r.0.owner != self.id {
            return Err(LuaError::contract("handle belongs to another state"));
        }
        self.get_ref(REGISTRYINDEX, r.0.r)
    }

    /// The globals table of the running thread.
    pub fn globals(&mut self) -> LuaTable {
        self.pushvalue(crate::GLOBALSINDEX);
        let t = LuaTable(self.owned_ref(-1));
        self.pop(1);
        t
    }

    pub fn create_table(&mut self) -> LuaTable {
        self.newtable();
        let t = LuaTable(self.owned_ref(-1));
        self.pop(1);
        t
    }

    /// A function handle for a typed Rust closure; see
    /// [`State::push_function`].
    pub fn create_function<A, R, F>(&mut self, f: F) -> LuaFunction
    where
        A: crate::function::FromLuaArgs,
        R: IntoLuaArgs,
        F: Fn(&mut State, A) -> LuaResult<R> + 'static,
    {
        self.push_function(f);
        let func = LuaFunction(self.owned_ref(-1));
        self.pop(1);
        func
    }
}

impl IntoLua for &OwnedRef {
    fn push_into(self, state: &mut State) -> LuaResult<()> {
        state.push_owned(self)
    }
}

impl IntoLua for OwnedRef {
    fn push_into(self, state: &mut State) -> LuaResult<()> {
        state.push_owned(&self)
    }
}

impl FromLua for OwnedRef {
    const EXPECTED: &'static str = "value";

    fn from_lua(state: &mut State, idx: i32) -> Option<Self> {
        if state.isnone(idx) {
            return None;
        }
        Some(state.owned_ref(idx))
    }
}

// ---- Tables ----

/// Owning handle to a table.
#[derive(Clone, Debug)]
pub struct LuaTable(OwnedRef);

impl LuaTable {
    /// `t[key]`, honouring `__index`.
    pub fn get<K: IntoLua, V: FromLua>(&self, s: &mut State, key: K) -> LuaResult<V> {
        let mut g = s.guard();
        g.push_owned(&self.0)?;
        key.push_into(&mut g)?;
        g.gettable(-2)?;
        read_result(&mut g, -1)
    }

    /// `t[key] = value`, honouring `__newindex`.
    pub fn set<K: IntoLua, V: IntoLua>(&self, s: &mut State, key: K, value: V) -> LuaResult<()> {
        let mut g = s.guard();
        g.push_owned(&self.0)?;
        key.push_into(&mut g)?;
        value.push_into(&mut g)?;
        g.settable(-3)
    }

    pub fn raw_get<K: IntoLua, V: FromLua>(&self, s: &mut State, key: K) -> LuaResult<V> {
        let mut g = s.guard();
        g.push_owned(&self.0)?;
        key.push_into(&mut g)?;
        g.rawget(-2);
        read_result(&mut g, -1)
    }

    pub fn raw_set<K: IntoLua, V: IntoLua>(&self, s: &mut State, key: K, value: V) -> LuaResult<()> {
        let mut g = s.guard();
        g.push_owned(&self.0)?;
        key.push_into(&mut g)?;
        value.push_into(&mut g)?;
        g.rawset(-3)
    }

    /// Border length, as `#` reports it for a plain table.
    pub fn raw_len(&self, s: &mut State) -> LuaResult<usize> {
        let mut g = s.guard();
        g.push_owned(&self.0)?;
        Ok(g.objlen(-1))
    }

    /// Append at `raw_len + 1`.
    pub fn push<V: IntoLua>(&self, s: &mut State, value: V) -> LuaResult<()> {
        let n = self.raw_len(s)?;
        self.raw_set(s, n as i64 + 1, value)
    }

    pub fn metatable(&self, s: &mut State) -> LuaResult<Option<LuaTable>> {
        let mut g = s.guard();
        g.push_owned(&self.0)?;
        if !g.getmetatable(-1) {
            return Ok(None);
        }
        Ok(Some(LuaTable(g.owned_ref(-1))))
    }

    pub fn set_metatable(&self, s: &mut State, mt: Option<&LuaTable>) -> LuaResult<()> {
        let mut g = s.guard();
        g.push_owned(&self.0)?;
        match mt {
            Some(mt) => g.push_owned(&mt.0)?,
            None => g.pushnil(),
        }
        g.setmetatable(-2);
        Ok(())
    }

    /// Every key/value pair, in `next` order. Pairs that do not convert
    /// come back as errors.
    pub fn pairs<'s, K: FromLua, V: FromLua>(&self, s: &'s mut State) -> LuaResult<Pairs<'s, K, V>> {
        let base = s.gettop();
        s.push_owned(&self.0)?;
        s.pushnil();
        Ok(Pairs {
            state: s,
            base,
            done: false,
            _marker: PhantomData,
        })
    }

    /// Values at 1, 2, ... up to the first nil, without metamethods.
    pub fn ipairs<'s, V: FromLua>(&self, s: &'s mut State) -> LuaResult<IPairs<'s, V>> {
        let base = s.gettop();
        s.push_owned(&self.0)?;
        Ok(IPairs {
            state: s,
            base,
            index: 0,
            _marker: PhantomData,
        })
    }

    pub fn as_owned_ref(&self) -> &OwnedRef {
        &self.0
    }
}

fn read_result<V: FromLua>(s: &mut State, idx: i32) -> LuaResult<V> {
    match V::from_lua(s, idx) {
        Some(v) => Ok(v),
        None => Err(LuaError::runtime(format!(
            "{} expected, got {}",
            V::EXPECTED,
            s.type_name_at(idx)
        ))),
    }
}

/// Iterator returned by [`LuaTable::pairs`]. The table and the traversal
/// key sit on the stack until it is dropped.
pub struct Pairs<'s, K, V> {
    state: &'s mut State,
    base: i32,
    done: bool,
    _marker: PhantomData<(K, V)>,
}

impl<K: FromLua, V: FromLua> Iterator for Pairs<'_, K, V> {
    type Item = LuaResult<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let s = &mut *self.state;
        match s.next(-2) {
            Ok(true) => {}
            Ok(false) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        }
        // convert a copy so the traversal key is never turned into a string
        s.pushvalue(-2);
        let key = read_result::<K>(s, -1);
        let value = read_result::<V>(s, -2);
        s.pop(2);
        Some(key.and_then(|k| value.map(|v| (k, v))))
    }
}

impl<K, V> Drop for Pairs<'_, K, V> {
    fn drop(&mut self) {
        self.state.settop(self.base);
    }
}

/// Iterator returned by [`LuaTable::ipairs`].
pub struct IPairs<'s, V> {
    state: &'s mut State,
    base: i32,
    index: i64,
    _marker: PhantomData<V>,
}

impl<V: FromLua> Iterator for IPairs<'_, V> {
    type Item = LuaResult<(i64, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        let s = &mut *self.state;
        let i = self.index + 1;
        s.rawgeti(-1, i);
        if s.isnil(-1) {
            s.pop(1);
            return None;
        }
        self.index = i;
        let value = read_result::<V>(s, -1);
        s.pop(1);
        Some(value.map(|v| (i, v)))
    }
}

impl<V> Drop for IPairs<'_, V> {
    fn drop(&mut self) {
        self.state.settop(self.base);
    }
}

impl IntoLua for &LuaTable {
    fn push_into(self, state: &mut State) -> LuaResult<()> {
        state.push_owned(&self.0)
    }
}

impl IntoLua for LuaTable {
    fn push_into(self, state: &mut State) -> LuaResult<()> {
        state.push_owned(&self.0)
    }
}

impl FromLua for LuaTable {
    const EXPECTED: &'static str = "table";

    fn from_lua(state: &mut State, idx: i32) -> Option<Self> {
        (state.type_of(idx) == LuaType::Table).then(|| LuaTable(state.owned_ref(idx)))
    }
}

// ---- Functions ----

/// Owning handle to a function.
#[derive(Clone, Debug)]
pub struct LuaFunction(OwnedRef);

impl LuaFunction {
    /// Call under protection and convert the first result.
    pub fn call<A: IntoLuaArgs, R: FromLua>(&self, s: &mut State, args: A) -> LuaResult<R> {
        let mut g = s.guard();
        g.push_owned(&self.0)?;
        g.call_function(-1, args)
    }

    pub fn as_owned_ref(&self) -> &OwnedRef {
        &self.0
    }
}

impl IntoLua for &LuaFunction {
    fn push_into(self, state: &mut State) -> LuaResult<()> {
        state.push_owned(&self.0)
    }
}

impl IntoLua for LuaFunction {
    fn push_into(self, state: &mut State) -> LuaResult<()> {
        state.push_owned(&self.0)
    }
}

impl FromLua for LuaFunction {
    const EXPECTED: &'static str = "function";

    fn from_lua(state: &mut State, idx: i32) -> Option<Self> {
        (state.type_of(idx) == LuaType::Function).then(|| LuaFunction(state.owned_ref(idx)))
    }
}
