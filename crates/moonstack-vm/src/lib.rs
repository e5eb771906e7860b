//! Embedding API for a Lua 5.1 style virtual machine.
//!
//! A [`State`] owns a heap, a string table, a registry and a set of
//! coroutine threads. Host code talks to it through an indexed value stack:
//! push arguments, call under protection, read results back. The interpreter
//! loop, the collector, the loader and a minimal base library sit behind
//! that boundary.

mod access;
pub mod arith;
pub mod auxlib;
mod baselib;
mod call;
pub mod callinfo;
pub mod coerce;
pub mod compare;
pub mod config;
pub mod convert;
pub mod debug;
mod dispatch;
pub mod error;
pub mod function;
pub mod gc;
pub mod guard;
pub mod handle;
pub mod index;
pub mod load;
pub mod metamethod;
mod protect;
mod registry;
mod stack;
pub mod state;
pub mod thread;
pub mod userdata;

pub use config::StateConfig;
pub use convert::{FromLua, IntoLua, IntoLuaArgs};
pub use debug::Debug;
pub use error::{LuaError, LuaResult};
pub use function::FromLuaArgs;
pub use gc::GcOp;
pub use guard::StackGuard;
pub use handle::{IPairs, LuaFunction, LuaTable, OwnedRef, Pairs};
pub use index::Index;
pub use moonstack_core::{LuaType, RegistryRef, Value, NOREF, REFNIL};
pub use state::{NativeFn, PanicFn, State, StateId};
pub use thread::{Thread, ThreadStatus};
pub use userdata::{MethodsBuilder, UserData};

/// Pseudo-index of the registry table.
pub const REGISTRYINDEX: i32 = -10000;
/// Pseudo-index of the running function's environment.
pub const ENVIRONINDEX: i32 = -10001;
/// Pseudo-index of the running thread's globals table.
pub const GLOBALSINDEX: i32 = -10002;

/// Pseudo-index of the `i`-th upvalue (1-based) of the running native closure.
pub const fn upvalueindex(i: i32) -> i32 {
    GLOBALSINDEX - i
}

/// `nresults` value asking for every result.
pub const MULTRET: i32 = -1;
/// Free slots guaranteed to a native function on entry.
pub const MINSTACK: usize = 20;
/// Longest chunk id rendered in messages, terminator included.
pub const IDSIZE: usize = 60;
pub const VERSION: &str = "Lua 5.1";

/// Outcome of a call, resume or load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    Yield = 1,
    ErrRun = 2,
    ErrSyntax = 3,
    ErrMem = 4,
    ErrErr = 5,
    ErrFile = 6,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}
