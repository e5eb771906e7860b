//! Protected calls: fault containment, error handlers and the panic path.

use crate::error::{LuaError, LuaResult};
use crate::state::{NativeFn, State};
use crate::{Status, MULTRET};
use moonstack_core::Value;
use std::ffi::c_void;

impl State {
    /// The value a protected boundary leaves on the stack for `e`.
    pub fn error_value(&mut self, e: &LuaError) -> Value {
        match e {
            LuaError::Value(v) => *v,
            LuaError::Runtime(msg)
            | LuaError::Syntax(msg)
            | LuaError::File(msg)
            | LuaError::StackOverflow(msg) => self.intern(msg.as_bytes()),
            other => self.intern(other.to_string().as_bytes()),
        }
    }

    /// Turn a raised value back into a fault. UTF-8 strings become
    /// `Runtime` so their text survives; anything else is carried as is.
    pub(crate) fn error_from_value(&self, v: Value) -> LuaError {
        match v {
            Value::String(id) => match std::str::from_utf8(self.string_bytes(id)) {
                Ok(s) => LuaError::Runtime(s.to_owned()),
                Err(_) => LuaError::Value(v),
            },
            other => LuaError::Value(other),
        }
    }

    /// Rebuild the fault a failed `pcall` reported, from its status and the
    /// error value on top of the stack.
    pub(crate) fn error_for_status(&self, status: Status, v: Value) -> LuaError {
        match status {
            Status::ErrMem => LuaError::OutOfMemory,
            Status::ErrErr => {
                LuaError::ErrorHandler(Box::new(self.error_from_value(v)))
            }
            Status::ErrSyntax => match self.value_text(v) {
                Some(msg) => LuaError::Syntax(msg),
                None => self.error_from_value(v),
            },
            _ => self.error_from_value(v),
        }
    }

    /// Call the error handler in slot `handler` with the raw fault, before
    /// any frame is unwound. Its result replaces the fault.
    fn run_error_handler(&mut self, e: LuaError, handler: Option<usize>) -> LuaError {
        let Some(h) = handler else {
            return e;
        };
        if matches!(e, LuaError::OutOfMemory | LuaError::ErrorHandler(_)) {
            return e;
        }
        if self.ci().is_lua() && self.cur.top < self.ci().top {
            self.cur.top = self.ci().top;
        }
        if let Err(overflow) = self.ensure_stack(self.cur.top + 2) {
            return LuaError::ErrorHandler(Box::new(overflow));
        }
        let f = self.cur.stack[h];
        let v = self.error_value(&e);
        let func = self.cur.top;
        self.push(f);
        self.push(v);
        match self.do_call(func, 1) {
            Ok(()) => {
                let res = self.pop_value();
                match e {
                    // keep the overflow classification for the status
                    LuaError::StackOverflow(_) => match self.value_text(res) {
                        Some(msg) => LuaError::StackOverflow(msg),
                        None => LuaError::Value(res),
                    },
                    _ => self.error_from_value(res),
                }
            }
            Err(inner) if !inner.is_catchable() => inner,
            Err(inner) => LuaError::ErrorHandler(Box::new(inner)),
        }
    }

    /// Run `f` as a protected region. On a fault the stack is cut back to
    /// `old_top`, the error value is pushed and its status returned.
    /// Contract violations clean up and propagate.
    pub(crate) fn protected_call(
        &mut self,
        old_top: usize,
        handler: Option<usize>,
        f: impl FnOnce(&mut State) -> LuaResult<()>,
    ) -> LuaResult<Status> {
        let saved_frames = self.cur.frames.len();
        let saved_ccalls = self.n_ccalls;
        self.protect_depth += 1;
        let r = match f(self) {
            Ok(()) => Ok(()),
            Err(e) if !e.is_catchable() => Err(e),
            Err(e) => Err(self.run_error_handler(e, handler)),
        };
        self.protect_depth -= 1;
        let Err(e) = r else {
            return Ok(Status::Ok);
        };

        self.close_upvalues(old_top);
        self.cur.frames.truncate(saved_frames);
        self.n_ccalls = saved_ccalls;
        self.overflow_headroom = false;
        if !e.is_catchable() {
            self.cur.top = old_top;
            return Err(e);
        }
        let status = e.status();
        let v = self.error_value(&e);
        self.cur.top = old_top;
        self.push(v);
        tracing::debug!(
            target: "moonstack::call",
            status = ?status,
            error = %e,
            "protected call failed"
        );
        Ok(status)
    }

    /// Pass `r` through, aborting the state when it carries a fault that no
    /// protected boundary will catch.
    pub(crate) fn escape<T>(&mut self, r: LuaResult<T>) -> LuaResult<T> {
        if let Err(e) = &r {
            if self.protect_depth == 0 && !self.aborted && e.is_catchable() {
                tracing::error!(target: "moonstack::call", error = %e, "unprotected error");
                let v = self.error_value(e);
                self.push(v);
                if let Some(panic) = self.panic_fn {
                    panic(self);
                }
                self.aborted = true;
            }
        }
        r
    }

    // ---- API ----

    /// Call the function below `nargs` arguments in protected mode.
    ///
    /// `errfunc` is 0 or the stack index of a handler. The handler receives
    /// the fault value while the failing frames are still live, and its
    /// result becomes the error value. On a fault the function and its
    /// arguments are replaced by that single value.
    pub fn pcall(&mut self, nargs: usize, nresults: i32, errfunc: i32) -> LuaResult<Status> {
        self.ensure_usable()?;
        assert!(
            (nargs as i32) < self.gettop(),
            "pcall: {nargs} arguments and a function need more than {} values",
            self.gettop()
        );
        let handler = (errfunc != 0).then(|| self.valid_slot(errfunc));
        let func = self.cur.top - nargs - 1;
        let status = self.protected_call(func, handler, |s| s.do_call(func, nresults))?;
        if status.is_ok() && nresults == MULTRET && self.ci().top < self.cur.top {
            self.ci_mut().top = self.cur.top;
        }
        Ok(status)
    }

    /// Call `f` in protected mode with `ud` as its only argument, a light
    /// userdata. Results are discarded; on a fault the error value is left
    /// on the stack.
    pub fn cpcall(&mut self, f: NativeFn, ud: *mut c_void) -> LuaResult<Status> {
        self.ensure_usable()?;
        self.pushcfunction(f);
        self.pushlightuserdata(ud);
        self.pcall(1, 0, 0)
    }

    /// Pop the top value and turn it into a fault. A native function raises
    /// it with `return Err(state.error())`.
    pub fn error(&mut self) -> LuaError {
        let v = self.pop_value();
        self.error_from_value(v)
    }
}
