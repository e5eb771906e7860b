//! Equality and ordering with `__eq`, `__lt` and `__le` fallback.

use crate::error::LuaResult;
use crate::index::Index;
use crate::metamethod::Tm;
use crate::state::State;
use moonstack_core::{GcIdx, StringInterner, Table, Value};
use std::cmp::Ordering;

/// Primitive equality: same type and same value or identity. Strings are
/// interned, so comparing ids compares contents.
#[inline]
pub fn raw_equal(a: Value, b: Value) -> bool {
    a == b
}

/// Byte-wise string order, as `strcoll` orders under the C locale.
pub fn str_cmp(a: Value, b: Value, strings: &StringInterner) -> Ordering {
    match (a, b) {
        (Value::String(x), Value::String(y)) => strings.get_bytes(x).cmp(strings.get_bytes(y)),
        _ => Ordering::Equal,
    }
}

impl State {
    /// Handler for a comparison event when both operands agree on it.
    fn comparison_tm(
        &self,
        mt1: Option<GcIdx<Table>>,
        mt2: Option<GcIdx<Table>>,
        event: Tm,
    ) -> Option<Value> {
        let tm1 = self.fasttm(mt1, event)?;
        if mt1 == mt2 {
            return Some(tm1);
        }
        let tm2 = self.fasttm(mt2, event)?;
        raw_equal(tm1, tm2).then_some(tm1)
    }

    /// `a == b` with `__eq` for tables and userdata.
    pub(crate) fn values_equal(&mut self, a: Value, b: Value) -> LuaResult<bool> {
        if a.type_of() != b.type_of() {
            return Ok(false);
        }
        let tm = match (a, b) {
            (Value::Table(x), Value::Table(y)) => {
                if x == y {
                    return Ok(true);
                }
                let mt1 = self.heap.get_table(x).metatable;
                let mt2 = self.heap.get_table(y).metatable;
                self.comparison_tm(mt1, mt2, Tm::Eq)
            }
            (Value::Userdata(x), Value::Userdata(y)) => {
                if x == y {
                    return Ok(true);
                }
                let mt1 = self.heap.get_userdata(x).metatable;
                let mt2 = self.heap.get_userdata(y).metatable;
                self.comparison_tm(mt1, mt2, Tm::Eq)
            }
            _ => return Ok(raw_equal(a, b)),
        };
        match tm {
            Some(tm) => Ok(self.call_tm_res(tm, a, b)?.is_truthy()),
            None => Ok(false),
        }
    }

    /// Result of an ordering handler shared by both operands, if there is one.
    fn call_order_tm(&mut self, a: Value, b: Value, event: Tm) -> LuaResult<Option<bool>> {
        let tm1 = self.metamethod(a, event);
        if tm1.is_nil() {
            return Ok(None);
        }
        let tm2 = self.metamethod(b, event);
        if !raw_equal(tm1, tm2) {
            return Ok(None);
        }
        Ok(Some(self.call_tm_res(tm1, a, b)?.is_truthy()))
    }

    pub(crate) fn less_than(&mut self, a: Value, b: Value) -> LuaResult<bool> {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => Ok(x < y),
            (Value::String(_), Value::String(_)) => {
                Ok(str_cmp(a, b, &self.strings) == Ordering::Less)
            }
            _ if a.type_of() != b.type_of() => Err(self.order_error(a, b)),
            _ => match self.call_order_tm(a, b, Tm::Lt)? {
                Some(r) => Ok(r),
                None => Err(self.order_error(a, b)),
            },
        }
    }

    pub(crate) fn less_equal(&mut self, a: Value, b: Value) -> LuaResult<bool> {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => Ok(x <= y),
            (Value::String(_), Value::String(_)) => {
                Ok(str_cmp(a, b, &self.strings) != Ordering::Greater)
            }
            _ if a.type_of() != b.type_of() => Err(self.order_error(a, b)),
            _ => {
                if let Some(r) = self.call_order_tm(a, b, Tm::Le)? {
                    return Ok(r);
                }
                // a <= b is not (b < a)
                match self.call_order_tm(b, a, Tm::Lt)? {
                    Some(r) => Ok(!r),
                    None => Err(self.order_error(a, b)),
                }
            }
        }
    }

    // ---- API ----

    /// `a == b` between two slots, honoring `__eq`. An invalid index compares
    /// unequal.
    pub fn equal(&mut self, a: impl Into<Index>, b: impl Into<Index>) -> LuaResult<bool> {
        match (self.value_at(a), self.value_at(b)) {
            (Some(x), Some(y)) => {
                let r = self.values_equal(x, y);
                self.escape(r)
            }
            _ => Ok(false),
        }
    }

    pub fn rawequal(&self, a: impl Into<Index>, b: impl Into<Index>) -> bool {
        match (self.value_at(a), self.value_at(b)) {
            (Some(x), Some(y)) => raw_equal(x, y),
            _ => false,
        }
    }

    /// `a < b` between two slots, honoring `__lt`. An invalid index gives false.
    pub fn lessthan(&mut self, a: impl Into<Index>, b: impl Into<Index>) -> LuaResult<bool> {
        match (self.value_at(a), self.value_at(b)) {
            (Some(x), Some(y)) => {
                let r = self.less_than(x, y);
                self.escape(r)
            }
            _ => Ok(false),
        }
    }
}
