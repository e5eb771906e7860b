//! Metamethod lookup and the `__index` / `__newindex` chains.

use crate::error::LuaResult;
use crate::state::State;
use moonstack_core::{GcIdx, StringId, StringInterner, Table, Value};

/// Longest `__index`/`__newindex` chain followed before giving up.
pub const MAXTAGLOOP: usize = 100;

/// Metamethod events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tm {
    Index,
    NewIndex,
    Gc,
    Mode,
    Eq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Len,
    Lt,
    Le,
    Concat,
    Call,
}

/// Pre-interned event names. They are fixed so the collector never frees them.
pub struct TmNames {
    pub index: StringId,
    pub newindex: StringId,
    pub gc: StringId,
    pub mode: StringId,
    pub eq: StringId,
    pub add: StringId,
    pub sub: StringId,
    pub mul: StringId,
    pub div: StringId,
    pub mod_: StringId,
    pub pow: StringId,
    pub unm: StringId,
    pub len: StringId,
    pub lt: StringId,
    pub le: StringId,
    pub concat: StringId,
    pub call: StringId,
    pub tostring: StringId,
    pub metatable: StringId,
}

impl TmNames {
    pub fn init(strings: &mut StringInterner) -> Self {
        let mut fixed = |name: &str| {
            let id = strings.intern_str(name);
            strings.fix(id);
            id
        };
        TmNames {
            index: fixed("__index"),
            newindex: fixed("__newindex"),
            gc: fixed("__gc"),
            mode: fixed("__mode"),
            eq: fixed("__eq"),
            add: fixed("__add"),
            sub: fixed("__sub"),
            mul: fixed("__mul"),
            div: fixed("__div"),
            mod_: fixed("__mod"),
            pow: fixed("__pow"),
            unm: fixed("__unm"),
            len: fixed("__len"),
            lt: fixed("__lt"),
            le: fixed("__le"),
            concat: fixed("__concat"),
            call: fixed("__call"),
            tostring: fixed("__tostring"),
            metatable: fixed("__metatable"),
        }
    }

    pub fn get(&self, event: Tm) -> StringId {
        match event {
            Tm::Index => self.index,
            Tm::NewIndex => self.newindex,
            Tm::Gc => self.gc,
            Tm::Mode => self.mode,
            Tm::Eq => self.eq,
            Tm::Add => self.add,
            Tm::Sub => self.sub,
            Tm::Mul => self.mul,
            Tm::Div => self.div,
            Tm::Mod => self.mod_,
            Tm::Pow => self.pow,
            Tm::Unm => self.unm,
            Tm::Len => self.len,
            Tm::Lt => self.lt,
            Tm::Le => self.le,
            Tm::Concat => self.concat,
            Tm::Call => self.call,
        }
    }
}

impl State {
    /// Handler `event` in metatable `mt`, if set.
    pub(crate) fn fasttm(&self, mt: Option<GcIdx<Table>>, event: Tm) -> Option<Value> {
        let v = self
            .heap
            .get_table(mt?)
            .raw_get_str(self.tm.get(event));
        (!v.is_nil()).then_some(v)
    }

    /// Handler for `event` on `v`, or nil.
    pub(crate) fn metamethod(&self, v: Value, event: Tm) -> Value {
        self.fasttm(self.metatable_of(v), event)
            .unwrap_or_default()
    }

    /// Call `f(a, b)` for one result.
    pub(crate) fn call_tm_res(&mut self, f: Value, a: Value, b: Value) -> LuaResult<Value> {
        let func = self.cur.top;
        self.push(f);
        self.push(a);
        self.push(b);
        self.do_call(func, 1)?;
        self.cur.top -= 1;
        Ok(self.cur.stack[self.cur.top])
    }

    /// Call `f(a, b, c)` for no results.
    pub(crate) fn call_tm(&mut self, f: Value, a: Value, b: Value, c: Value) -> LuaResult<()> {
        let func = self.cur.top;
        self.push(f);
        self.push(a);
        self.push(b);
        self.push(c);
        self.do_call(func, 0)
    }

    /// `t[key]` with `__index` dispatch. `src` is the stack slot `t` was read
    /// from, used to name the variable in error messages.
    pub(crate) fn get_table_value(
        &mut self,
        mut t: Value,
        key: Value,
        mut src: Option<usize>,
    ) -> LuaResult<Value> {
        for _ in 0..MAXTAGLOOP {
            let tm = if let Value::Table(h) = t {
                let table = self.heap.get_table(h);
                let res = table.raw_get(key);
                if !res.is_nil() {
                    return Ok(res);
                }
                match self.fasttm(table.metatable, Tm::Index) {
                    Some(tm) => tm,
                    None => return Ok(Value::Nil),
                }
            } else {
                let tm = self.metamethod(t, Tm::Index);
                if tm.is_nil() {
                    return Err(self.type_error(t, "index", src));
                }
                tm
            };
            if let Value::Function(_) = tm {
                return self.call_tm_res(tm, t, key);
            }
            t = tm;
            src = None;
        }
        Err(self.rt_error("loop in gettable"))
    }

    /// `t[key] = v` with `__newindex` dispatch.
    pub(crate) fn set_table_value(
        &mut self,
        mut t: Value,
        key: Value,
        v: Value,
        mut src: Option<usize>,
    ) -> LuaResult<()> {
        for _ in 0..MAXTAGLOOP {
            let tm = if let Value::Table(h) = t {
                let table = self.heap.get_table(h);
                let tm = if table.raw_get(key).is_nil() {
                    self.fasttm(table.metatable, Tm::NewIndex)
                } else {
                    None
                };
                match tm {
                    Some(tm) => tm,
                    None => {
                        return self
                            .heap
                            .get_table_mut(h)
                            .raw_set(key, v)
                            .map_err(|e| self.rt_error(e.message()));
                    }
                }
            } else {
                let tm = self.metamethod(t, Tm::NewIndex);
                if tm.is_nil() {
                    return Err(self.type_error(t, "index", src));
                }
                tm
            };
            if let Value::Function(_) = tm {
                return self.call_tm(tm, t, key, v);
            }
            t = tm;
            src = None;
        }
        Err(self.rt_error("loop in settable"))
    }
}
