//! Coroutines: thread handles, resume/yield and cross-thread moves.

use crate::call::PreCall;
use crate::callinfo::FrameKind;
use crate::dispatch;
use crate::error::{LuaError, LuaResult};
use crate::index::Index;
use crate::state::{ExecState, State, StateId, MAIN_THREAD};
use crate::{Status, MULTRET};
use moonstack_core::{ThreadId, Value};

/// Scheduling status of a thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ThreadStatus {
    /// Created or yielded; can be resumed.
    Suspended,
    /// The thread currently executing.
    Running,
    /// Resumed another thread and is waiting for it.
    Normal,
    /// Returned or faulted.
    Dead,
}

impl ThreadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadStatus::Suspended => "suspended",
            ThreadStatus::Running => "running",
            ThreadStatus::Normal => "normal",
            ThreadStatus::Dead => "dead",
        }
    }
}

/// Arena entry for a thread. `data` is `None` while the thread runs, its
/// execution state then lives in `State::cur`.
pub(crate) struct ThreadSlot {
    pub data: Option<ExecState>,
    pub status: ThreadStatus,
    pub serial: u32,
}

/// Host handle to a thread of one particular [`State`].
///
/// The handle does not keep the thread alive. Anchor the thread value on
/// the stack or in the registry for as long as the handle is used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Thread {
    owner: StateId,
    id: ThreadId,
    serial: u32,
}

impl State {
    fn thread_handle(&self, id: ThreadId) -> Option<Thread> {
        self.thread_slot(id).map(|slot| Thread {
            owner: self.id,
            id,
            serial: slot.serial,
        })
    }

    /// Resolve a handle, refusing foreign and collected threads.
    pub(crate) fn check_thread(&self, t: &Thread) -> LuaResult<ThreadId> {
        if t.owner != self.id {
            return Err(LuaError::contract("thread belongs to another state"));
        }
        match self.thread_slot(t.id) {
            Some(slot) if slot.serial == t.serial => Ok(t.id),
            _ => Err(LuaError::contract("thread was collected")),
        }
    }

    fn set_status(&mut self, id: ThreadId, status: ThreadStatus) {
        if let Some(slot) = self.thread_slot_mut(id) {
            slot.status = status;
        }
    }

    /// Create a suspended thread sharing this state's globals and push it.
    pub fn newthread(&mut self) -> Thread {
        self.gc_check();
        let (id, serial) = self.new_thread_id();
        self.push(Value::Thread(id));
        tracing::trace!(target: "moonstack::thread", thread = id.0, "thread created");
        Thread {
            owner: self.id,
            id,
            serial,
        }
    }

    pub fn main_thread(&self) -> Thread {
        Thread {
            owner: self.id,
            id: MAIN_THREAD,
            serial: 0,
        }
    }

    /// The thread whose stack the API currently addresses.
    pub fn running(&self) -> Thread {
        Thread {
            owner: self.id,
            id: self.current,
            serial: self.thread_slot(self.current).map_or(0, |slot| slot.serial),
        }
    }

    pub fn tothread(&self, idx: impl Into<Index>) -> Option<Thread> {
        match self.value_at(idx)? {
            Value::Thread(id) => self.thread_handle(id),
            _ => None,
        }
    }

    /// Push the running thread. Returns true if it is the main thread.
    pub fn pushthread(&mut self) -> bool {
        self.push(Value::Thread(self.current));
        self.current == MAIN_THREAD
    }

    pub fn status(&self, t: &Thread) -> LuaResult<ThreadStatus> {
        let id = self.check_thread(t)?;
        if id == self.current {
            return Ok(ThreadStatus::Running);
        }
        self.thread_slot(id)
            .map(|slot| slot.status)
            .ok_or_else(|| LuaError::contract("thread was collected"))
    }

    /// Run `f` with the API pointed at `t`'s stack, then switch back.
    pub fn with_thread<R>(&mut self, t: &Thread, f: impl FnOnce(&mut State) -> R) -> LuaResult<R> {
        let id = self.check_thread(t)?;
        if id == self.current {
            return Ok(f(self));
        }
        let prev = self.current;
        self.switch_to(id);
        let r = f(self);
        self.switch_to(prev);
        Ok(r)
    }

    /// Pop `n` values from `from` and push them onto `to`.
    pub fn xmove(&mut self, from: &Thread, to: &Thread, n: usize) -> LuaResult<()> {
        let src = self.check_thread(from)?;
        let dst = self.check_thread(to)?;
        if src == dst || n == 0 {
            return Ok(());
        }
        let values = self.with_thread(from, |s| {
            assert!(n as i32 <= s.gettop(), "xmove: not enough values");
            let top = s.cur.top;
            let moved = s.cur.stack[top - n..top].to_vec();
            s.cur.top -= n;
            moved
        })?;
        self.with_thread(to, |s| {
            for v in values {
                s.push(v);
            }
        })
    }

    /// Whether the running code could yield right now.
    pub fn isyieldable(&self) -> bool {
        self.current != MAIN_THREAD && self.n_ccalls <= self.cur.base_ccalls
    }

    /// Push `msg` onto thread `id` and report a runtime fault.
    fn resume_error(&mut self, id: ThreadId, msg: &str) -> Status {
        let prev = self.current;
        self.switch_to(id);
        self.pushstring(msg);
        self.switch_to(prev);
        Status::ErrRun
    }

    /// Start or continue `co` with the `nargs` values on top of its stack.
    ///
    /// A fresh thread calls the function below those arguments. A suspended
    /// thread receives them as the results of its pending `yield`. On
    /// `Ok` or `Yield` the thread's stack holds the results or the yielded
    /// values; on a fault the thread is dead and holds one error value.
    pub fn resume(&mut self, co: &Thread, nargs: usize) -> LuaResult<Status> {
        self.ensure_usable()?;
        let id = self.check_thread(co)?;
        let status = if id == self.current {
            ThreadStatus::Running
        } else {
            self.thread_slot(id).map_or(ThreadStatus::Dead, |slot| slot.status)
        };
        match status {
            ThreadStatus::Suspended => {}
            ThreadStatus::Dead => return Ok(self.resume_error(id, "cannot resume dead coroutine")),
            _ => return Ok(self.resume_error(id, "cannot resume non-suspended coroutine")),
        }
        if self.n_ccalls >= self.config.max_c_calls {
            return Ok(self.resume_error(id, "C stack overflow"));
        }
        let (fresh, depth) = self
            .thread_slot(id)
            .and_then(|slot| slot.data.as_ref())
            .map_or((true, 0), |d| {
                (d.frames.len() == 1, d.top - d.frames[d.frames.len() - 1].base)
            });
        assert!(nargs <= depth, "resume: not enough arguments on the coroutine stack");
        if fresh && depth <= nargs {
            return Ok(self.resume_error(id, "cannot resume dead coroutine"));
        }

        let prev = self.current;
        self.set_status(prev, ThreadStatus::Normal);
        self.set_status(id, ThreadStatus::Running);
        self.switch_to(id);
        tracing::trace!(target: "moonstack::thread", thread = id.0, nargs, "resume");

        let saved_ccalls = self.n_ccalls;
        self.n_ccalls += 1;
        self.protect_depth += 1;
        self.cur.base_ccalls = self.n_ccalls;
        let r = self.resume_body(fresh, nargs);
        self.protect_depth -= 1;
        self.n_ccalls = saved_ccalls;

        let outcome = match r {
            Ok(()) => Ok((ThreadStatus::Dead, Status::Ok)),
            Err(LuaError::Yield) => Ok((ThreadStatus::Suspended, Status::Yield)),
            Err(e) => {
                let v = self.error_value(&e);
                self.close_upvalues(0);
                self.cur.frames.truncate(1);
                self.overflow_headroom = false;
                self.cur.top = 1;
                if e.is_catchable() {
                    self.push(v);
                    Ok((ThreadStatus::Dead, e.status()))
                } else {
                    Err(e)
                }
            }
        };
        self.switch_to(prev);
        self.set_status(prev, ThreadStatus::Running);
        match outcome {
            Ok((thread_status, status)) => {
                self.set_status(id, thread_status);
                tracing::trace!(
                    target: "moonstack::thread",
                    thread = id.0,
                    status = ?status,
                    "resume finished"
                );
                Ok(status)
            }
            Err(e) => {
                self.set_status(id, ThreadStatus::Dead);
                Err(e)
            }
        }
    }

    fn resume_body(&mut self, fresh: bool, nargs: usize) -> LuaResult<()> {
        if fresh {
            let func = self.cur.top - nargs - 1;
            if let PreCall::Lua = self.precall(func, MULTRET)? {
                dispatch::execute(self, 1)?;
            }
            return Ok(());
        }
        // the native that yielded returns the resume arguments
        let first = self.cur.top - nargs;
        if self.poscall(first) {
            self.cur.top = self.ci().top;
        }
        if self.cur.frames.len() > 1 {
            dispatch::execute(self, 1)?;
        }
        Ok(())
    }

    /// Suspend the running coroutine with the top `nresults` values as the
    /// yielded values. Only valid as the tail of a native function:
    /// `return state.yield_(n)`.
    pub fn yield_(&mut self, nresults: usize) -> LuaResult<usize> {
        if self.current == MAIN_THREAD {
            return Err(self.rt_error("attempt to yield from outside a coroutine"));
        }
        if self.n_ccalls > self.cur.base_ccalls {
            return Err(self.rt_error("attempt to yield across metamethod/C-call boundary"));
        }
        if !matches!(self.ci().kind, FrameKind::Native { .. }) {
            return Err(LuaError::contract("yield outside a native function"));
        }
        assert!(nresults as i32 <= self.gettop(), "yield: not enough values");
        let top = self.cur.top;
        self.ci_mut().base = top - nresults;
        tracing::trace!(target: "moonstack::thread", thread = self.current.0, nresults, "yield");
        Err(LuaError::Yield)
    }
}
