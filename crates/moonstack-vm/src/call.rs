//! Entering and leaving functions: frame setup, vararg adjustment, result
//! placement and the unprotected `call`.

use crate::callinfo::CallInfo;
use crate::dispatch;
use crate::error::{LuaError, LuaResult};
use crate::metamethod::Tm;
use crate::state::State;
use crate::{MINSTACK, MULTRET};
use moonstack_core::{Closure, Value};

/// Extra frames granted to error handlers once the depth limit was hit.
const CALL_DEPTH_HEADROOM: usize = 200;

/// What `precall` left behind.
pub(crate) enum PreCall {
    /// A Lua frame was pushed; the interpreter must run it.
    Lua,
    /// A native function already ran and its results are in place.
    Native,
}

impl State {
    /// Set up a call to the value at `func` with the arguments above it.
    /// Native functions run to completion here.
    pub(crate) fn precall(&mut self, func: usize, nresults: i32) -> LuaResult<PreCall> {
        let f = match self.cur.stack[func] {
            Value::Function(f) => f,
            _ => self.call_metamethod(func)?,
        };
        self.check_call_depth()?;

        let proto_id = match self.heap.get_closure(f) {
            Closure::Lua(lc) => lc.proto,
            Closure::Native(nc) => {
                let native = nc.func;
                return self.call_native(func, f, native.0 as usize, nresults);
            }
        };

        let p = self.proto(proto_id);
        let max_stack = p.max_stack_size as usize;
        let num_params = p.num_params as usize;
        self.ensure_stack(self.cur.top + max_stack + num_params + 1)?;

        let base = if p.is_vararg {
            self.adjust_varargs(func, num_params)
        } else {
            let base = func + 1;
            if self.cur.top > base + num_params {
                self.cur.top = base + num_params;
            }
            base
        };
        let frame_top = base + max_stack;
        self.ensure_stack(frame_top)?;
        for slot in self.cur.top..frame_top {
            self.cur.stack[slot] = Value::Nil;
        }
        self.cur.top = frame_top;
        self.cur
            .frames
            .push(CallInfo::lua(func, base, frame_top, nresults, f, proto_id));
        Ok(PreCall::Lua)
    }

    fn call_native(
        &mut self,
        func: usize,
        closure: moonstack_core::GcIdx<Closure>,
        native: usize,
        nresults: i32,
    ) -> LuaResult<PreCall> {
        let frame_top = self.cur.top + MINSTACK;
        self.ensure_stack(frame_top)?;
        self.cur
            .frames
            .push(CallInfo::native(func, frame_top, nresults, closure));
        let Some(&f) = self.natives.get(native) else {
            return Err(LuaError::contract("native function id out of range"));
        };
        let n = f(self)?;
        let available = self.cur.top - self.ci().base;
        if n > available {
            return Err(LuaError::contract(format!(
                "native function returned {n} results but only {available} are on its stack"
            )));
        }
        self.poscall(self.cur.top - n);
        Ok(PreCall::Native)
    }

    /// Replace a non-function callee with its `__call` handler, shifting the
    /// callee up to become the first argument.
    fn call_metamethod(&mut self, func: usize) -> LuaResult<moonstack_core::GcIdx<Closure>> {
        let v = self.cur.stack[func];
        let tm = self.metamethod(v, Tm::Call);
        let Value::Function(f) = tm else {
            return Err(self.type_error(v, "call", Some(func)));
        };
        let top = self.cur.top;
        self.ensure_stack(top + 1)?;
        self.cur.stack.copy_within(func..top, func + 1);
        self.cur.top = top + 1;
        self.cur.stack[func] = tm;
        Ok(f)
    }

    fn check_call_depth(&mut self) -> LuaResult<()> {
        let depth = self.cur.frames.len();
        let limit = self.config.max_call_depth;
        if depth >= limit + CALL_DEPTH_HEADROOM {
            // the error handler overflowed too
            return Err(LuaError::ErrorHandler(Box::new(LuaError::StackOverflow(
                "stack overflow".into(),
            ))));
        }
        if depth >= limit && !self.overflow_headroom {
            return Err(self.stack_overflow_error());
        }
        Ok(())
    }

    /// Move the fixed parameters of a vararg call above the actual
    /// arguments, leaving the extra arguments between `func` and the new
    /// base. Returns the new base.
    fn adjust_varargs(&mut self, func: usize, num_params: usize) -> usize {
        let mut nargs = self.cur.top - func - 1;
        while nargs < num_params {
            self.cur.stack[self.cur.top] = Value::Nil;
            self.cur.top += 1;
            nargs += 1;
        }
        let fixed = self.cur.top - nargs;
        let base = self.cur.top;
        for i in 0..num_params {
            self.cur.stack[base + i] = self.cur.stack[fixed + i];
            self.cur.stack[fixed + i] = Value::Nil;
        }
        self.cur.top = base + num_params;
        base
    }

    /// Pop the current frame and move its results, starting at `first`, to
    /// where the caller expects them. Returns false when the caller asked
    /// for every result.
    pub(crate) fn poscall(&mut self, mut first: usize) -> bool {
        let Some(ci) = self.cur.frames.pop() else {
            unreachable!("poscall without an active frame");
        };
        let wanted = ci.nresults;
        let mut res = ci.func;
        if wanted > 0 && self.cur.stack.len() < res + wanted as usize {
            self.cur.stack.resize(res + wanted as usize, Value::Nil);
        }
        let mut remaining = wanted;
        while remaining != 0 && first < self.cur.top {
            self.cur.stack[res] = self.cur.stack[first];
            res += 1;
            first += 1;
            remaining -= 1;
        }
        while remaining > 0 {
            self.cur.stack[res] = Value::Nil;
            res += 1;
            remaining -= 1;
        }
        self.cur.top = res;
        wanted != MULTRET
    }

    /// Call the function at `func` from native code: counts against the
    /// native re-entry limit and runs the interpreter for Lua callees.
    pub(crate) fn do_call(&mut self, func: usize, nresults: i32) -> LuaResult<()> {
        self.n_ccalls += 1;
        let limit = self.config.max_c_calls;
        if self.n_ccalls >= limit {
            if self.n_ccalls == limit {
                return Err(self.rt_error("C stack overflow"));
            }
            if self.n_ccalls >= limit + (limit >> 3) {
                // overflow while handling the overflow
                return Err(LuaError::ErrorHandler(Box::new(LuaError::runtime(
                    "C stack overflow",
                ))));
            }
        }
        let depth = self.cur.frames.len();
        if let PreCall::Lua = self.precall(func, nresults)? {
            dispatch::execute(self, depth)?;
        }
        self.n_ccalls -= 1;
        self.gc_check();
        Ok(())
    }

    // ---- API ----

    /// Call the function sitting below `nargs` arguments, leaving `nresults`
    /// results (every result for `MULTRET`). A fault is not caught: with no
    /// enclosing protected call it aborts the state.
    pub fn call(&mut self, nargs: usize, nresults: i32) -> LuaResult<()> {
        self.ensure_usable()?;
        assert!(
            (nargs as i32) < self.gettop(),
            "call: {nargs} arguments and a function need more than {} values",
            self.gettop()
        );
        let func = self.cur.top - nargs - 1;
        let r = self.do_call(func, nresults);
        self.escape(r)?;
        if nresults == MULTRET && self.ci().top < self.cur.top {
            self.ci_mut().top = self.cur.top;
        }
        Ok(())
    }
}
