/// The tagged value every stack slot, table entry and upvalue holds.
///
/// Heap objects are referenced by typed arena indices, so a `Value` is `Copy`
/// and never owns what it points to. Reachability is the collector's business.
use crate::gc::GcIdx;
use crate::object::{Closure, LuaType, ThreadId, Userdata};
use crate::string::StringId;
use crate::table::Table;
use std::ffi::c_void;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Number(f64),
    String(StringId),
    Table(GcIdx<Table>),
    Function(GcIdx<Closure>),
    Userdata(GcIdx<Userdata>),
    Thread(ThreadId),
    LightUserdata(*mut c_void),
}

impl Value {
    #[inline]
    pub fn type_of(&self) -> LuaType {
        match self {
            Value::Nil => LuaType::Nil,
            Value::Boolean(_) => LuaType::Boolean,
            Value::Number(_) => LuaType::Number,
            Value::String(_) => LuaType::String,
            Value::Table(_) => LuaType::Table,
            Value::Function(_) => LuaType::Function,
            Value::Userdata(_) => LuaType::Userdata,
            Value::Thread(_) => LuaType::Thread,
            Value::LightUserdata(_) => LuaType::LightUserdata,
        }
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_of().name()
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Only `nil` and `false` are falsy.
    #[inline]
    pub fn is_falsy(&self) -> bool {
        matches!(self, Value::Nil | Value::Boolean(false))
    }

    #[inline]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match *self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_string_id(&self) -> Option<StringId> {
        match *self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_table(&self) -> Option<GcIdx<Table>> {
        match *self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    #[inline]
    pub fn as_function(&self) -> Option<GcIdx<Closure>> {
        match *self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// True for values that live in the collected heap.
    pub fn is_collectable(&self) -> bool {
        matches!(
            self,
            Value::String(_)
                | Value::Table(_)
                | Value::Function(_)
                | Value::Userdata(_)
                | Value::Thread(_)
        )
    }

    /// Identity used by `topointer` and `%p`-style output. Zero for values
    /// that are not objects.
    pub fn identity(&self) -> usize {
        // Spread the kinds apart so two kinds sharing an index never collide.
        match *self {
            Value::Table(t) => 0x1000_0000 | (t.index() as usize) << 4,
            Value::Function(f) => 0x2000_0000 | (f.index() as usize) << 4,
            Value::Userdata(u) => 0x3000_0000 | (u.index() as usize) << 4,
            Value::Thread(t) => 0x4000_0000 | (t.0 as usize) << 4,
            Value::LightUserdata(p) => p as usize,
            _ => 0,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<StringId> for Value {
    fn from(s: StringId) -> Self {
        Value::String(s)
    }
}

impl From<GcIdx<Table>> for Value {
    fn from(t: GcIdx<Table>) -> Self {
        Value::Table(t)
    }
}

impl fmt::Display for Value {
    /// Debug-oriented rendering; string contents need the interner, so only the id is shown.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "string#{}", s.0),
            Value::Table(t) => write!(f, "table#{}", t.index()),
            Value::Function(c) => write!(f, "function#{}", c.index()),
            Value::Userdata(u) => write!(f, "userdata#{}", u.index()),
            Value::Thread(t) => write!(f, "thread#{}", t.0),
            Value::LightUserdata(p) => write!(f, "lightuserdata({p:p})"),
        }
    }
}
