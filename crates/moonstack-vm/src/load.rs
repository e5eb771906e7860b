//! Loading source chunks: buffers, strings and files.

use crate::debug::chunkid;
use crate::error::LuaResult;
use crate::state::State;
use crate::{Status, MULTRET};
use moonstack_core::{Closure, LuaClosure, UpVal, Value};
use std::path::Path;

/// First byte of a precompiled chunk.
const BINARY_SIGNATURE: u8 = 0x1b;

impl State {
    fn load_failure(&mut self, status: Status, msg: &str) -> LuaResult<Status> {
        tracing::debug!(target: "moonstack::load", status = ?status, error = %msg, "load failed");
        self.pushstring(msg);
        Ok(status)
    }

    /// Compile `buf` and push the resulting function. On failure push the
    /// message and return `ErrSyntax`.
    ///
    /// `mode` restricts the accepted chunk kinds; only text (`"t"`) is
    /// supported, and `None` means the default `"bt"`.
    pub fn load(&mut self, buf: &[u8], chunkname: &str, mode: Option<&str>) -> LuaResult<Status> {
        self.ensure_usable()?;
        let mode = mode.unwrap_or("bt");
        let binary = buf.first() == Some(&BINARY_SIGNATURE);
        if binary {
            let msg = format!("{}: binary chunks are not supported", chunkid(chunkname.as_bytes()));
            return self.load_failure(Status::ErrSyntax, &msg);
        }
        if !mode.contains('t') {
            let msg = format!("attempt to load a text chunk (mode is '{mode}')");
            return self.load_failure(Status::ErrSyntax, &msg);
        }

        self.gc_check();
        let proto = match moonstack_compiler::compile(buf, chunkname, &mut self.strings) {
            Ok(p) => p,
            Err(e) => {
                let msg = format!("{}:{}: {}", chunkid(chunkname.as_bytes()), e.line, e.message);
                return self.load_failure(Status::ErrSyntax, &msg);
            }
        };
        let nups = proto.upvalues.len();
        let id = self.register_proto(proto);
        let upvalues = (0..nups)
            .map(|_| self.heap.alloc_upval(UpVal::Closed(Value::Nil)))
            .collect();
        let env = self.cur.globals;
        let f = self.heap.alloc_closure(Closure::Lua(LuaClosure {
            proto: id,
            upvalues,
            env,
        }));
        self.push(Value::Function(f));
        tracing::debug!(target: "moonstack::load", chunk = %chunkid(chunkname.as_bytes()), "chunk loaded");
        Ok(Status::Ok)
    }

    /// Load a string, using the source itself as the chunk name.
    pub fn loadstring(&mut self, s: &str) -> LuaResult<Status> {
        self.load(s.as_bytes(), s, None)
    }

    /// Load a file under the chunk name `@path`. A first line starting with
    /// `#` is skipped. Read failures push the message and return `ErrFile`.
    pub fn loadfile(&mut self, path: impl AsRef<Path>) -> LuaResult<Status> {
        let path = path.as_ref();
        let chunkname = format!("@{}", path.display());
        let mut source = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                let msg = format!("cannot open {}: {e}", path.display());
                return self.load_failure(Status::ErrFile, &msg);
            }
        };
        if source.first() == Some(&b'#') {
            // keep the newline so line numbers stay right
            let end = source.iter().position(|&c| c == b'\n').unwrap_or(source.len());
            source.drain(..end);
        }
        self.load(&source, &chunkname, None)
    }

    /// Load and run a string with every result left on the stack.
    pub fn dostring(&mut self, s: &str) -> LuaResult<Status> {
        match self.loadstring(s)? {
            Status::Ok => self.pcall(0, MULTRET, 0),
            failed => Ok(failed),
        }
    }

    pub fn dofile(&mut self, path: impl AsRef<Path>) -> LuaResult<Status> {
        match self.loadfile(path)? {
            Status::Ok => self.pcall(0, MULTRET, 0),
            failed => Ok(failed),
        }
    }
}
