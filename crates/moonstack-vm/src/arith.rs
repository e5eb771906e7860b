//! Arithmetic, length and concatenation with metamethod fallback.

use crate::error::LuaResult;
use crate::metamethod::Tm;
use crate::state::State;
use moonstack_core::Value;

/// Binary and unary arithmetic operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
}

impl ArithOp {
    fn event(self) -> Tm {
        match self {
            ArithOp::Add => Tm::Add,
            ArithOp::Sub => Tm::Sub,
            ArithOp::Mul => Tm::Mul,
            ArithOp::Div => Tm::Div,
            ArithOp::Mod => Tm::Mod,
            ArithOp::Pow => Tm::Pow,
            ArithOp::Unm => Tm::Unm,
        }
    }
}

/// The primitive operation on two numbers. `Unm` ignores `b`.
#[inline]
pub fn float_arith(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        // floored modulo: the result takes the sign of the divisor
        ArithOp::Mod => a - (a / b).floor() * b,
        ArithOp::Pow => a.powf(b),
        ArithOp::Unm => -a,
    }
}

impl State {
    /// `a op b` with string coercion, then `__add` and friends. `src_a` and
    /// `src_b` are the stack slots the operands came from, if any.
    pub(crate) fn arith(
        &mut self,
        op: ArithOp,
        a: Value,
        b: Value,
        src_a: Option<usize>,
        src_b: Option<usize>,
    ) -> LuaResult<Value> {
        if let (Some(x), Some(y)) = (self.to_number(a), self.to_number(b)) {
            return Ok(Value::Number(float_arith(op, x, y)));
        }
        match self.binary_tm(a, b, op.event()) {
            Some(tm) => self.call_tm_res(tm, a, b),
            None => {
                // blame the first operand that is not a number
                let (culprit, src) = if self.to_number(a).is_none() {
                    (a, src_a)
                } else {
                    (b, src_b)
                };
                Err(self.type_error(culprit, "perform arithmetic on", src))
            }
        }
    }

    /// Handler for a binary event: the first operand's, else the second's.
    pub(crate) fn binary_tm(&self, a: Value, b: Value, event: Tm) -> Option<Value> {
        let tm = self.metamethod(a, event);
        let tm = if tm.is_nil() { self.metamethod(b, event) } else { tm };
        (!tm.is_nil()).then_some(tm)
    }

    /// The `#` operator.
    pub(crate) fn length_of(&mut self, v: Value, src: Option<usize>) -> LuaResult<Value> {
        match v {
            Value::String(id) => Ok(Value::Number(self.string_bytes(id).len() as f64)),
            Value::Table(t) => Ok(Value::Number(self.heap.get_table(t).length() as f64)),
            _ => {
                let tm = self.metamethod(v, Tm::Len);
                if tm.is_nil() {
                    return Err(self.type_error(v, "get length of", src));
                }
                self.call_tm_res(tm, v, Value::Nil)
            }
        }
    }

    /// Concatenate the `total` values ending at slot `last`, leaving the
    /// result in the first of them. Folds right to left, grouping runs of
    /// strings and numbers into one allocation.
    pub(crate) fn concat_slots(&mut self, mut total: usize, mut last: usize) -> LuaResult<()> {
        while total > 1 {
            let top = last + 1;
            let (l, r) = (top - 2, top - 1);
            let mut n = 2;
            let lhs = self.cur.stack[l];
            let primitive = matches!(lhs, Value::String(_) | Value::Number(_));
            if !primitive || !self.tostring_slot(r) {
                let rhs = self.cur.stack[r];
                let Some(tm) = self.binary_tm(lhs, rhs, Tm::Concat) else {
                    let culprit = if primitive { rhs } else { lhs };
                    let slot = if primitive { r } else { l };
                    return Err(self.type_error(culprit, "concatenate", Some(slot)));
                };
                let res = self.call_tm_res(tm, lhs, rhs)?;
                self.cur.stack[l] = res;
            } else if self.string_len(r) == 0 {
                // result is the left operand, as a string
                self.tostring_slot(l);
            } else {
                // at least two strings: take as many as possible
                self.tostring_slot(l);
                while n < total && self.tostring_slot(top - n - 1) {
                    n += 1;
                }
                let mut buf = Vec::new();
                for slot in top - n..top {
                    if let Value::String(id) = self.cur.stack[slot] {
                        buf.extend_from_slice(self.string_bytes(id));
                    }
                }
                let s = self.intern(&buf);
                self.cur.stack[top - n] = s;
            }
            total -= n - 1;
            last -= n - 1;
        }
        Ok(())
    }

    fn string_len(&self, slot: usize) -> usize {
        match self.cur.stack[slot] {
            Value::String(id) => self.string_bytes(id).len(),
            _ => 0,
        }
    }
}
