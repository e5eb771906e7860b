//! Host types exposed to Lua as userdata with methods.
//!
//! A value is stored as `Rc<RefCell<T>>` inside a typed userdata, so a
//! method can borrow it while also holding `&mut State`. Each type gets one
//! metatable in the registry, keyed by its Rust type name and built on first
//! use from [`UserData::methods`] and [`UserData::meta_methods`].

use crate::convert::IntoLuaArgs;
use crate::error::{LuaError, LuaResult};
use crate::function::FromLuaArgs;
use crate::state::State;
use std::any::type_name;
use std::cell::RefCell;
use std::rc::Rc;

type Method = Box<dyn Fn(&mut State) -> LuaResult<usize>>;

/// A Rust type Lua code can hold and call methods on.
///
/// Cleanup belongs in `Drop`; `__gc`, `__index` and `__newindex` are
/// reserved.
pub trait UserData: Sized + 'static {
    /// Name used in error messages and the default `__tostring`.
    fn name() -> &'static str {
        let full = type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    /// Methods reached through `obj:name(...)`.
    fn methods(_: &mut MethodsBuilder<Self>) {}

    /// Metamethods such as `__tostring`, `__len` or `__eq`.
    fn meta_methods(_: &mut MethodsBuilder<Self>) {}
}

/// Collects the methods of a [`UserData`] type.
pub struct MethodsBuilder<T> {
    entries: Vec<(&'static str, Method)>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: UserData> MethodsBuilder<T> {
    fn new() -> Self {
        MethodsBuilder {
            entries: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// A method taking `&T`. Arguments after `self` are converted to `A`.
    pub fn add<A, R, F>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        A: FromLuaArgs,
        R: IntoLuaArgs,
        F: Fn(&mut State, &T, A) -> LuaResult<R> + 'static,
    {
        self.entries.push((
            name,
            Box::new(move |s: &mut State| {
                let cell = s.check_userdata::<T>(1)?;
                let args = A::from_args(s, 2)?;
                let this = cell
                    .try_borrow()
                    .map_err(|_| LuaError::runtime(format!("{} is already borrowed", T::name())))?;
                f(s, &this, args)?.push_args(s)
            }),
        ));
        self
    }

    /// A method taking `&mut T`. Re-entering the same value while it runs is
    /// an error.
    pub fn add_mut<A, R, F>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        A: FromLuaArgs,
        R: IntoLuaArgs,
        F: Fn(&mut State, &mut T, A) -> LuaResult<R> + 'static,
    {
        self.entries.push((
            name,
            Box::new(move |s: &mut State| {
                let cell = s.check_userdata::<T>(1)?;
                let args = A::from_args(s, 2)?;
                let mut this = cell.try_borrow_mut().map_err(|_| {
                    LuaError::runtime(format!("{} is already borrowed", T::name()))
                })?;
                f(s, &mut this, args)?.push_args(s)
            }),
        ));
        self
    }
}

fn metatable_key<T: 'static>() -> String {
    format!("moonstack.userdata.{}", type_name::<T>())
}

impl State {
    /// Push `value` as a userdata carrying `T`'s method metatable.
    pub fn push_userdata<T: UserData>(&mut self, value: T) -> LuaResult<()> {
        self.new_userdata_typed(Rc::new(RefCell::new(value)));
        if let Err(e) = self.push_userdata_metatable::<T>() {
            self.pop(1);
            return Err(e);
        }
        self.setmetatable(-2);
        Ok(())
    }

    /// Shared handle to the `T` inside the userdata at `idx`, if it is one.
    pub fn get_userdata<T: UserData>(&mut self, idx: i32) -> Option<Rc<RefCell<T>>> {
        if !self.has_named_metatable(idx, &metatable_key::<T>()).unwrap_or(false) {
            return None;
        }
        self.touserdata_typed::<Rc<RefCell<T>>>(idx).map(|cell| Rc::clone(cell))
    }

    /// Argument `narg` as a `T`, or the usual bad-argument error.
    pub fn check_userdata<T: UserData>(&mut self, narg: i32) -> LuaResult<Rc<RefCell<T>>> {
        match self.get_userdata::<T>(narg) {
            Some(cell) => Ok(cell),
            None => Err(self.typeerror(narg, T::name())),
        }
    }

    fn push_userdata_metatable<T: UserData>(&mut self) -> LuaResult<()> {
        let key = metatable_key::<T>();
        self.getfield(crate::REGISTRYINDEX, &key)?;
        if !self.isnil(-1) {
            return Ok(());
        }
        self.pop(1);

        let mut builder = MethodsBuilder::<T>::new();
        T::meta_methods(&mut builder);
        let metas = std::mem::take(&mut builder.entries);
        T::methods(&mut builder);
        if let Some((name, _)) = metas
            .iter()
            .find(|(name, _)| matches!(*name, "__gc" | "__index" | "__newindex"))
        {
            return Err(LuaError::contract(format!(
                "{}: metamethod {name} is reserved",
                T::name()
            )));
        }

        self.newmetatable(&key)?;
        let mut has_tostring = false;
        for (name, method) in metas {
            has_tostring |= name == "__tostring";
            self.push_closure(method);
            self.setfield(-2, name)?;
        }
        if !has_tostring {
            let label = T::name();
            self.push_closure(move |s| {
                s.pushstring(label);
                Ok(1)
            });
            self.setfield(-2, "__tostring")?;
        }

        self.createtable(0, builder.entries.len());
        for (name, method) in builder.entries {
            self.push_closure(method);
            self.setfield(-2, name)?;
        }
        self.setfield(-2, "__index")?;
        Ok(())
    }
}
