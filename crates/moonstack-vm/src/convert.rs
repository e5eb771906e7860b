//! Typed conversions between host values and stack slots.

use crate::error::{LuaError, LuaResult};
use crate::index::Index;
use crate::state::{NativeFn, State};
use crate::{LuaType, RegistryRef, Status, REGISTRYINDEX};

/// A host value that can be pushed.
pub trait IntoLua {
    fn push_into(self, state: &mut State) -> LuaResult<()>;
}

/// A host value that can be read from a stack slot.
pub trait FromLua: Sized {
    /// Type name used in "X expected" messages.
    const EXPECTED: &'static str;

    /// Convert the value at `idx`, or `None` when it has the wrong shape.
    fn from_lua(state: &mut State, idx: i32) -> Option<Self>;
}

/// A group of call arguments. Implemented for tuples.
pub trait IntoLuaArgs {
    /// Push every argument and return how many were pushed.
    fn push_args(self, state: &mut State) -> LuaResult<usize>;
}

// ---- IntoLua ----

impl IntoLua for () {
    fn push_into(self, _: &mut State) -> LuaResult<()> {
        Ok(())
    }
}

impl IntoLua for bool {
    fn push_into(self, state: &mut State) -> LuaResult<()> {
        state.pushboolean(self);
        Ok(())
    }
}

macro_rules! impl_into_number {
    ($($t:ty),*) => {$(
        impl IntoLua for $t {
            fn push_into(self, state: &mut State) -> LuaResult<()> {
                state.pushnumber(self as f64);
                Ok(())
            }
        }
    )*};
}

impl_into_number!(f64, f32, i32, i64, u32, usize);

impl IntoLua for &str {
    fn push_into(self, state: &mut State) -> LuaResult<()> {
        state.pushstring(self);
        Ok(())
    }
}

impl IntoLua for String {
    fn push_into(self, state: &mut State) -> LuaResult<()> {
        state.pushstring(&self);
        Ok(())
    }
}

impl IntoLua for &[u8] {
    fn push_into(self, state: &mut State) -> LuaResult<()> {
        state.pushlstring(self);
        Ok(())
    }
}

impl IntoLua for Vec<u8> {
    fn push_into(self, state: &mut State) -> LuaResult<()> {
        state.pushlstring(&self);
        Ok(())
    }
}

impl<T: IntoLua> IntoLua for Option<T> {
    fn push_into(self, state: &mut State) -> LuaResult<()> {
        match self {
            Some(v) => v.push_into(state),
            None => {
                state.pushnil();
                Ok(())
            }
        }
    }
}

/// Pushes the registry value behind the handle.
impl IntoLua for RegistryRef {
    fn push_into(self, state: &mut State) -> LuaResult<()> {
        state.get_ref(REGISTRYINDEX, self)
    }
}

impl IntoLua for NativeFn {
    fn push_into(self, state: &mut State) -> LuaResult<()> {
        state.pushcfunction(self);
        Ok(())
    }
}

// ---- FromLua ----

impl FromLua for () {
    const EXPECTED: &'static str = "nothing";

    fn from_lua(_: &mut State, _: i32) -> Option<Self> {
        Some(())
    }
}

/// Nil reads as false; other non-booleans do not convert.
impl FromLua for bool {
    const EXPECTED: &'static str = "boolean";

    fn from_lua(state: &mut State, idx: i32) -> Option<Self> {
        match state.type_of(idx) {
            LuaType::Boolean => Some(state.toboolean(idx)),
            LuaType::Nil | LuaType::None => Some(false),
            _ => None,
        }
    }
}

impl FromLua for f64 {
    const EXPECTED: &'static str = "number";

    fn from_lua(state: &mut State, idx: i32) -> Option<Self> {
        state.tonumberx(idx)
    }
}

impl FromLua for f32 {
    const EXPECTED: &'static str = "number";

    fn from_lua(state: &mut State, idx: i32) -> Option<Self> {
        state.tonumberx(idx).map(|n| n as f32)
    }
}

/// Whole numbers that fit the target type.
fn integral<T: TryFrom<i64>>(n: f64) -> Option<T> {
    if n.fract() != 0.0 || !(-9.223_372_036_854_776e18..9.223_372_036_854_776e18).contains(&n) {
        return None;
    }
    T::try_from(n as i64).ok()
}

macro_rules! impl_from_integer {
    ($($t:ty),*) => {$(
        impl FromLua for $t {
            const EXPECTED: &'static str = "integer";

            fn from_lua(state: &mut State, idx: i32) -> Option<Self> {
                state.tonumberx(idx).and_then(integral)
            }
        }
    )*};
}

impl_from_integer!(i32, i64, u32, usize);

/// Strings and numbers; invalid UTF-8 does not convert.
impl FromLua for String {
    const EXPECTED: &'static str = "string";

    fn from_lua(state: &mut State, idx: i32) -> Option<Self> {
        state.tolstring(idx).and_then(|b| String::from_utf8(b).ok())
    }
}

impl FromLua for Vec<u8> {
    const EXPECTED: &'static str = "string";

    fn from_lua(state: &mut State, idx: i32) -> Option<Self> {
        state.tolstring(idx)
    }
}

impl<T: FromLua> FromLua for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn from_lua(state: &mut State, idx: i32) -> Option<Self> {
        if state.isnoneornil(idx) {
            Some(None)
        } else {
            T::from_lua(state, idx).map(Some)
        }
    }
}

/// Anchors a copy of the value in the registry.
impl FromLua for RegistryRef {
    const EXPECTED: &'static str = "value";

    fn from_lua(state: &mut State, idx: i32) -> Option<Self> {
        if state.isnone(idx) {
            return None;
        }
        state.pushvalue(idx);
        Some(state.ref_(REGISTRYINDEX))
    }
}

impl FromLua for NativeFn {
    const EXPECTED: &'static str = "native function";

    fn from_lua(state: &mut State, idx: i32) -> Option<Self> {
        state.tocfunction(idx)
    }
}

// ---- IntoLuaArgs ----

macro_rules! impl_args {
    ($($name:ident),*) => {
        impl<$($name: IntoLua),*> IntoLuaArgs for ($($name,)*) {
            #[allow(non_snake_case, unused_variables)]
            fn push_args(self, state: &mut State) -> LuaResult<usize> {
                let ($($name,)*) = self;
                let before = state.gettop();
                $($name.push_into(state)?;)*
                Ok((state.gettop() - before) as usize)
            }
        }
    };
}

impl_args!();
impl_args!(A);
impl_args!(A, B);
impl_args!(A, B, C);
impl_args!(A, B, C, D);
impl_args!(A, B, C, D, E);
impl_args!(A, B, C, D, E, F);

impl<T: IntoLua> IntoLuaArgs for Vec<T> {
    fn push_args(self, state: &mut State) -> LuaResult<usize> {
        let n = self.len();
        state.checkstack(n)?;
        for v in self {
            v.push_into(state)?;
        }
        Ok(n)
    }
}

// ---- State entry points ----

impl State {
    pub fn push_value<T: IntoLua>(&mut self, v: T) -> LuaResult<()> {
        v.push_into(self)
    }

    /// Read the value at `idx` as a `T` without raising.
    pub fn get_value<T: FromLua>(&mut self, idx: i32) -> Option<T> {
        T::from_lua(self, idx)
    }

    /// Argument `narg` as a `T`, or the usual bad-argument error.
    pub fn check_value<T: FromLua>(&mut self, narg: i32) -> LuaResult<T> {
        match T::from_lua(self, narg) {
            Some(v) => Ok(v),
            None => Err(self.typeerror(narg, T::EXPECTED)),
        }
    }

    /// Call the function at `func` under protection with `args` and convert
    /// its first result. The stack is left as it was found.
    pub fn call_function<A, R>(&mut self, func: impl Into<Index>, args: A) -> LuaResult<R>
    where
        A: IntoLuaArgs,
        R: FromLua,
    {
        let func = self.abs_index(func);
        let mut g = self.guard();
        g.pushvalue(func);
        let nargs = args.push_args(&mut g)?;
        match g.pcall(nargs, 1, 0)? {
            Status::Ok => {}
            status => {
                let v = g.pop_value();
                return Err(g.error_for_status(status, v));
            }
        }
        match R::from_lua(&mut g, -1) {
            Some(r) => Ok(r),
            None => Err(LuaError::runtime(format!(
                "bad result ({} expected, got {})",
                R::EXPECTED,
                g.type_name_at(-1)
            ))),
        }
    }

    /// Look up the global `name` and call it like [`State::call_function`].
    pub fn call_global<A, R>(&mut self, name: &str, args: A) -> LuaResult<R>
    where
        A: IntoLuaArgs,
        R: FromLua,
    {
        let mut g = self.guard();
        g.getglobal(name)?;
        g.call_function(-1, args)
    }
}
