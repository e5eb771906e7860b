//! moonstack core types: values, strings, tables and the arena heap.

pub mod gc;
pub mod number;
pub mod object;
pub mod refs;
pub mod string;
pub mod table;
pub mod value;

pub use gc::{Arena, GcHeap, GcIdx};
pub use object::{Closure, LuaClosure, LuaType, NativeClosure, NativeId, ProtoId, ThreadId, UpVal, Userdata, UserdataBody};
pub use refs::{RefBook, RegistryRef, NOREF, REFNIL};
pub use string::{StringId, StringInterner};
pub use table::Table;
pub use value::Value;
