//! String/number coercions shared by arithmetic, concatenation and the API.

use crate::state::State;
use moonstack_core::number::{fmt_number, str_to_number};
use moonstack_core::{StringInterner, Value};

/// Numeric value of `v`. Strings that read as numbers convert.
pub fn to_number(v: Value, strings: &StringInterner) -> Option<f64> {
    match v {
        Value::Number(n) => Some(n),
        Value::String(id) => str_to_number(strings.get_bytes(id)),
        _ => None,
    }
}

/// Truncate toward zero, saturating at the `i64` range. NaN becomes 0.
pub fn truncate(n: f64) -> i64 {
    // `as` already saturates and maps NaN to 0
    n.trunc() as i64
}

impl State {
    pub(crate) fn to_number(&self, v: Value) -> Option<f64> {
        to_number(v, &self.strings)
    }

    /// Replace a number in `slot` with its string form. True if the slot
    /// now holds a string.
    pub(crate) fn tostring_slot(&mut self, slot: usize) -> bool {
        match self.cur.stack[slot] {
            Value::String(_) => true,
            Value::Number(n) => {
                let s = self.strings.intern(fmt_number(n).as_bytes());
                self.cur.stack[slot] = Value::String(s);
                true
            }
            _ => false,
        }
    }

    /// Coerce a numeric value in `slot` in place, as the `for` prologue does.
    pub(crate) fn tonumber_slot(&mut self, slot: usize) -> bool {
        match self.to_number(self.cur.stack[slot]) {
            Some(n) => {
                self.cur.stack[slot] = Value::Number(n);
                true
            }
            None => false,
        }
    }
}
