//! Heap object types and type tags.

use crate::gc::GcIdx;
use crate::table::Table;
use crate::value::Value;
use std::any::Any;
use std::fmt;

/// Basic type tag. The discriminants are the stable type codes of the embedding API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum LuaType {
    None = -1,
    Nil = 0,
    Boolean = 1,
    LightUserdata = 2,
    Number = 3,
    String = 4,
    Table = 5,
    Function = 6,
    Userdata = 7,
    Thread = 8,
}

impl LuaType {
    /// Number of basic types that may carry a per-type metatable.
    pub const COUNT: usize = 9;

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => LuaType::None,
            0 => LuaType::Nil,
            1 => LuaType::Boolean,
            2 => LuaType::LightUserdata,
            3 => LuaType::Number,
            4 => LuaType::String,
            5 => LuaType::Table,
            6 => LuaType::Function,
            7 => LuaType::Userdata,
            8 => LuaType::Thread,
            _ => return None,
        })
    }

    /// The name `type()` reports. Light userdata reads as plain `userdata`.
    pub fn name(self) -> &'static str {
        match self {
            LuaType::None => "no value",
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::LightUserdata | LuaType::Userdata => "userdata",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::Thread => "thread",
        }
    }
}

/// Index of a registered prototype in the VM's prototype arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProtoId(pub u32);

/// Index of a registered native function pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeId(pub u32);

/// Handle to a coroutine in the VM's thread arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u32);

/// A compiled function instance with captured upvalues.
#[derive(Debug)]
pub struct LuaClosure {
    pub proto: ProtoId,
    pub upvalues: Vec<GcIdx<UpVal>>,
    pub env: GcIdx<Table>,
}

/// A host function plus the values bound to its upvalue pseudo-indices.
#[derive(Debug)]
pub struct NativeClosure {
    pub func: NativeId,
    pub upvalues: Vec<Value>,
    pub env: GcIdx<Table>,
}

#[derive(Debug)]
pub enum Closure {
    Lua(LuaClosure),
    Native(NativeClosure),
}

impl Closure {
    pub fn env(&self) -> GcIdx<Table> {
        match self {
            Closure::Lua(c) => c.env,
            Closure::Native(c) => c.env,
        }
    }

    pub fn set_env(&mut self, env: GcIdx<Table>) {
        match self {
            Closure::Lua(c) => c.env = env,
            Closure::Native(c) => c.env = env,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Closure::Native(_))
    }

    pub fn num_upvalues(&self) -> usize {
        match self {
            Closure::Lua(c) => c.upvalues.len(),
            Closure::Native(c) => c.upvalues.len(),
        }
    }
}

/// An upvalue is open while its variable still lives in a thread's stack
/// slot, and closed once the value has been moved into the upvalue itself.
#[derive(Debug, Clone, Copy)]
pub enum UpVal {
    Open { thread: ThreadId, slot: usize },
    Closed(Value),
}

/// Userdata payload: either a raw byte block or a typed host value.
pub enum UserdataBody {
    Raw(Box<[u8]>),
    Typed(Box<dyn Any>),
}

impl fmt::Debug for UserdataBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserdataBody::Raw(b) => write!(f, "Raw({} bytes)", b.len()),
            UserdataBody::Typed(_) => write!(f, "Typed(..)"),
        }
    }
}

#[derive(Debug)]
pub struct Userdata {
    pub body: UserdataBody,
    pub metatable: Option<GcIdx<Table>>,
    pub env: GcIdx<Table>,
}

impl Userdata {
    /// Stable address of the payload, valid while the userdata is alive.
    pub fn as_ptr(&mut self) -> *mut std::ffi::c_void {
        match &mut self.body {
            UserdataBody::Raw(b) => b.as_mut_ptr().cast(),
            UserdataBody::Typed(b) => (b.as_mut() as *mut dyn Any).cast(),
        }
    }

    pub fn size(&self) -> usize {
        match &self.body {
            UserdataBody::Raw(b) => b.len(),
            UserdataBody::Typed(b) => std::mem::size_of_val(b.as_ref()),
        }
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        match &mut self.body {
            UserdataBody::Typed(b) => b.downcast_mut::<T>(),
            UserdataBody::Raw(_) => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match &self.body {
            UserdataBody::Typed(b) => b.downcast_ref::<T>(),
            UserdataBody::Raw(_) => None,
        }
    }
}
