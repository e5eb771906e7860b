//! Host conveniences built on the core API: argument checking, named
//! metatables, error positions, tracebacks and library registration.

use crate::coerce::truncate;
use crate::debug::Debug;
use crate::error::{LuaError, LuaResult};
use crate::index::Index;
use crate::state::{NativeFn, State};
use crate::{LuaType, REGISTRYINDEX};
use std::any::Any;
use std::ffi::c_void;

/// Frames shown before a traceback elides the middle.
const LEVELS1: i32 = 12;
/// Frames shown after the elision.
const LEVELS2: i32 = 10;

impl State {
    /// `bad argument #narg to 'f' (extramsg)`, naming the running function
    /// as its caller saw it.
    pub fn argerror(&mut self, narg: i32, extramsg: &str) -> LuaError {
        let mut ar = Debug::default();
        if !self.getstack(0, &mut ar) {
            return self.error_msg(&format!("bad argument #{narg} ({extramsg})"));
        }
        self.getinfo("n", &mut ar);
        let mut narg = narg;
        if ar.namewhat == "method" {
            narg -= 1;
            if narg == 0 {
                let name = ar.name.as_deref().unwrap_or("?");
                return self.error_msg(&format!("calling '{name}' on bad self ({extramsg})"));
            }
        }
        let name = ar.name.as_deref().unwrap_or("?");
        self.error_msg(&format!("bad argument #{narg} to '{name}' ({extramsg})"))
    }

    /// `tname expected, got <type>` for argument `narg`.
    pub fn typeerror(&mut self, narg: i32, tname: &str) -> LuaError {
        let got = self.type_name_at(narg);
        self.argerror(narg, &format!("{tname} expected, got {got}"))
    }

    fn tag_error(&mut self, narg: i32, t: LuaType) -> LuaError {
        self.typeerror(narg, t.name())
    }

    pub fn checkany(&mut self, narg: i32) -> LuaResult<()> {
        if self.type_of(narg) == LuaType::None {
            return Err(self.argerror(narg, "value expected"));
        }
        Ok(())
    }

    pub fn checktype(&mut self, narg: i32, t: LuaType) -> LuaResult<()> {
        if self.type_of(narg) != t {
            return Err(self.tag_error(narg, t));
        }
        Ok(())
    }

    pub fn checknumber(&mut self, narg: i32) -> LuaResult<f64> {
        match self.tonumberx(narg) {
            Some(n) => Ok(n),
            None => Err(self.tag_error(narg, LuaType::Number)),
        }
    }

    pub fn checkinteger(&mut self, narg: i32) -> LuaResult<i64> {
        self.checknumber(narg).map(truncate)
    }

    /// String argument; numbers are converted in place.
    pub fn checklstring(&mut self, narg: i32) -> LuaResult<Vec<u8>> {
        match self.tolstring(narg) {
            Some(bytes) => Ok(bytes),
            None => Err(self.tag_error(narg, LuaType::String)),
        }
    }

    pub fn checkstring(&mut self, narg: i32) -> LuaResult<String> {
        self.checklstring(narg)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn optnumber(&mut self, narg: i32, def: f64) -> LuaResult<f64> {
        if self.isnoneornil(narg) {
            Ok(def)
        } else {
            self.checknumber(narg)
        }
    }

    pub fn optinteger(&mut self, narg: i32, def: i64) -> LuaResult<i64> {
        if self.isnoneornil(narg) {
            Ok(def)
        } else {
            self.checkinteger(narg)
        }
    }

    pub fn optlstring(&mut self, narg: i32, def: &[u8]) -> LuaResult<Vec<u8>> {
        if self.isnoneornil(narg) {
            Ok(def.to_vec())
        } else {
            self.checklstring(narg)
        }
    }

    /// `checkstack` that reports `stack overflow (msg)` as a runtime error.
    pub fn checkstack_msg(&mut self, extra: usize, msg: &str) -> LuaResult<()> {
        match self.checkstack(extra) {
            Ok(()) => Ok(()),
            Err(_) => Err(self.error_msg(&format!("stack overflow ({msg})"))),
        }
    }

    // ---- Named metatables ----

    /// Push the registry metatable named `tname`, creating it if needed.
    /// Returns false when it already existed.
    pub fn newmetatable(&mut self, tname: &str) -> LuaResult<bool> {
        self.getfield(REGISTRYINDEX, tname)?;
        if !self.isnil(-1) {
            return Ok(false);
        }
        self.pop(1);
        self.newtable();
        self.pushvalue(-1);
        self.setfield(REGISTRYINDEX, tname)?;
        Ok(true)
    }

    /// Push the registry metatable named `tname` (nil if there is none).
    pub fn getmetatable_named(&mut self, tname: &str) -> LuaResult<()> {
        self.getfield(REGISTRYINDEX, tname)
    }

    /// Whether the value at `narg` is a userdata whose metatable is the
    /// one registered as `tname`.
    pub(crate) fn has_named_metatable(&mut self, narg: i32, tname: &str) -> LuaResult<bool> {
        if !self.isuserdata(narg) || self.islightuserdata(narg) {
            return Ok(false);
        }
        if !self.getmetatable(narg) {
            return Ok(false);
        }
        self.getfield(REGISTRYINDEX, tname)?;
        let same = self.rawequal(-1, -2);
        self.pop(2);
        Ok(same)
    }

    /// Address of the userdata at `narg`, which must carry the metatable
    /// registered as `tname`.
    pub fn checkudata(&mut self, narg: i32, tname: &str) -> LuaResult<*mut c_void> {
        if self.has_named_metatable(narg, tname)? {
            if let Some(p) = self.touserdata(narg) {
                return Ok(p);
            }
        }
        Err(self.typeerror(narg, tname))
    }

    /// Typed form of [`State::checkudata`].
    pub fn checkudata_typed<T: Any>(&mut self, narg: i32, tname: &str) -> LuaResult<&mut T> {
        if !self.has_named_metatable(narg, tname)? {
            return Err(self.typeerror(narg, tname));
        }
        if self.touserdata_typed::<T>(narg).is_none() {
            return Err(self.typeerror(narg, tname));
        }
        self.touserdata_typed::<T>(narg)
            .ok_or_else(|| LuaError::contract("userdata changed type"))
    }

    // ---- Metafields ----

    /// Push field `event` of the metatable of the value at `obj`. Returns
    /// false, pushing nothing, when there is no such field.
    pub fn getmetafield(&mut self, obj: impl Into<Index>, event: &str) -> bool {
        let Some(mt) = self.value_at(obj).and_then(|v| self.metatable_of(v)) else {
            return false;
        };
        // a name never interned cannot be a key
        let Some(key) = self.strings.find(event.as_bytes()) else {
            return false;
        };
        let v = self.heap.get_table(mt).raw_get_str(key);
        if v.is_nil() {
            return false;
        }
        self.push(v);
        true
    }

    /// Call metamethod `event` of the value at `obj` with the value as its
    /// only argument, leaving one result. `Ok(false)` means there is no
    /// such metamethod; a fault inside it is returned as `Err`.
    pub fn callmeta(&mut self, obj: impl Into<Index>, event: &str) -> LuaResult<bool> {
        let obj = self.abs_index(obj);
        if !self.getmetafield(obj, event) {
            return Ok(false);
        }
        self.pushvalue(obj);
        self.call(1, 1)?;
        Ok(true)
    }

    // ---- Errors and positions ----

    /// `short_src:line: ` of the function `level` frames up, or "" when
    /// that frame is not Lua code.
    pub fn where_(&mut self, level: i32) -> String {
        let mut ar = Debug::default();
        if self.getstack(level, &mut ar) {
            self.getinfo("Sl", &mut ar);
            if ar.currentline > 0 {
                return format!("{}:{}: ", ar.short_src, ar.currentline);
            }
        }
        String::new()
    }

    /// A runtime error with the position of the calling Lua code.
    pub fn error_msg(&mut self, msg: &str) -> LuaError {
        let prefix = self.where_(1);
        LuaError::Runtime(format!("{prefix}{msg}"))
    }

    /// Stack traceback starting `level` frames up, optionally preceded by
    /// `msg`.
    pub fn traceback(&mut self, level: i32, msg: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(msg) = msg {
            out.push_str(msg);
            out.push('\n');
        }
        out.push_str("stack traceback:");
        let mut ar = Debug::default();
        let mut level = level;
        let mut firstpart = true;
        while self.getstack(level, &mut ar) {
            level += 1;
            if level > LEVELS1 && firstpart {
                if !self.getstack(level + LEVELS2, &mut ar) {
                    level -= 1;
                } else {
                    out.push_str("\n\t...");
                    while self.getstack(level + LEVELS2, &mut ar) {
                        level += 1;
                    }
                }
                firstpart = false;
                continue;
            }
            self.getinfo("Snl", &mut ar);
            out.push_str("\n\t");
            out.push_str(&ar.short_src);
            out.push(':');
            if ar.currentline > 0 {
                out.push_str(&format!("{}:", ar.currentline));
            }
            match (&ar.name, ar.namewhat) {
                (Some(name), namewhat) if !namewhat.is_empty() => {
                    out.push_str(&format!(" in function '{name}'"));
                }
                _ => match ar.what {
                    "main" => out.push_str(" in main chunk"),
                    "C" | "tail" => out.push_str(" ?"),
                    _ => out.push_str(&format!(" in function <{}:{}>", ar.short_src, ar.linedefined)),
                },
            }
        }
        out
    }

    // ---- Libraries ----

    /// Install `funcs` into the global table `lib` (created when missing)
    /// and leave that table on the stack. With `None` the functions go into
    /// the table already on top of the stack.
    pub fn register_lib(&mut self, lib: Option<&str>, funcs: &[(&str, NativeFn)]) -> LuaResult<()> {
        if let Some(name) = lib {
            self.getglobal(name)?;
            if !self.istable(-1) {
                self.pop(1);
                self.createtable(0, funcs.len());
                self.pushvalue(-1);
                self.setglobal(name)?;
            }
        }
        for &(name, f) in funcs {
            self.pushcfunction(f);
            self.setfield(-2, name)?;
        }
        Ok(())
    }

    /// Push the string form of the value at `idx`, honoring `__tostring`.
    pub fn tostring_meta(&mut self, idx: impl Into<Index>) -> LuaResult<()> {
        let idx = self.abs_index(idx);
        if self.callmeta(idx, "__tostring")? {
            if !self.isstring(-1) {
                return Err(self.error_msg("'__tostring' must return a string"));
            }
            return Ok(());
        }
        match self.type_of(idx) {
            LuaType::Number | LuaType::String => {
                self.pushvalue(idx);
                self.tolstring(-1);
            }
            LuaType::Boolean => {
                let text = if self.toboolean(idx) { "true" } else { "false" };
                self.pushstring(text);
            }
            LuaType::Nil | LuaType::None => self.pushstring("nil"),
            t => {
                let text = format!("{}: 0x{:08x}", t.name(), self.topointer(idx));
                self.pushstring(&text);
            }
        }
        Ok(())
    }
}
