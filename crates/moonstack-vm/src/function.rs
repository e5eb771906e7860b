//! Rust closures as Lua functions.
//!
//! A closure is boxed into a typed userdata that becomes upvalue 1 of a
//! shared native trampoline. The userdata's `Drop` frees the closure when
//! the function is collected.

use crate::convert::{FromLua, IntoLuaArgs};
use crate::error::{LuaError, LuaResult};
use crate::state::State;
use crate::upvalueindex;
use std::rc::Rc;

type Callback = Rc<dyn Fn(&mut State) -> LuaResult<usize>>;

/// Typed arguments of a host function, read from consecutive slots.
pub trait FromLuaArgs: Sized {
    /// Read the arguments starting at stack slot `first`, raising the usual
    /// bad-argument error for the first one that does not convert.
    fn from_args(state: &mut State, first: i32) -> LuaResult<Self>;
}

macro_rules! impl_from_args {
    ($($name:ident),*) => {
        impl<$($name: FromLua),*> FromLuaArgs for ($($name,)*) {
            #[allow(non_snake_case, unused_variables, unused_mut, unused_assignments)]
            fn from_args(state: &mut State, first: i32) -> LuaResult<Self> {
                let mut narg = first;
                $(
                    let $name: $name = state.check_value(narg)?;
                    narg += 1;
                )*
                Ok(($($name,)*))
            }
        }
    };
}

impl_from_args!();
impl_from_args!(A);
impl_from_args!(A, B);
impl_from_args!(A, B, C);
impl_from_args!(A, B, C, D);
impl_from_args!(A, B, C, D, E);

fn call_boxed(s: &mut State) -> LuaResult<usize> {
    let Some(cb) = s.touserdata_typed::<Callback>(upvalueindex(1)).map(|cb| Rc::clone(cb)) else {
        return Err(LuaError::contract("host closure has no callback upvalue"));
    };
    cb(s)
}

impl State {
    /// Push a function backed by a Rust closure working on the raw stack.
    /// Like a [`NativeFn`](crate::NativeFn) it returns how many results it
    /// pushed, but it may capture host state.
    pub fn push_closure<F>(&mut self, f: F)
    where
        F: Fn(&mut State) -> LuaResult<usize> + 'static,
    {
        let cb: Callback = Rc::new(f);
        self.new_userdata_typed(cb);
        self.pushcclosure(call_boxed, 1);
    }

    /// Push a function with typed arguments and results. Arguments that do
    /// not convert raise a bad-argument error naming their position.
    pub fn push_function<A, R, F>(&mut self, f: F)
    where
        A: FromLuaArgs,
        R: IntoLuaArgs,
        F: Fn(&mut State, A) -> LuaResult<R> + 'static,
    {
        self.push_closure(move |s| {
            let args = A::from_args(s, 1)?;
            let results = f(s, args)?;
            results.push_args(s)
        });
    }
}
