//! Debug introspection: frame records, variable naming for error messages,
//! locals and upvalues.

use crate::callinfo::FrameKind;
use crate::error::LuaError;
use crate::index::Index;
use crate::state::State;
use crate::IDSIZE;
use moonstack_compiler::opcode::{index_k, is_k, OpCode};
use moonstack_compiler::{Constant, Proto};
use moonstack_core::{Closure, StringId, Value};

/// One activation record, filled by [`State::getstack`] and
/// [`State::getinfo`]. Fields that were not requested keep their defaults.
#[derive(Clone, Debug)]
pub struct Debug {
    /// Name the caller used for the function, if it could be found.
    pub name: Option<String>,
    /// "global", "local", "method", "field", "upvalue" or "".
    pub namewhat: &'static str,
    /// "Lua", "C", "main" or "tail".
    pub what: &'static str,
    pub source: String,
    pub currentline: i32,
    pub nups: usize,
    pub linedefined: i32,
    pub lastlinedefined: i32,
    pub short_src: String,
    /// Frame this record describes. 0 stands for a tail call whose frame
    /// was reused.
    pub(crate) ci: usize,
}

impl Default for Debug {
    fn default() -> Self {
        Debug {
            name: None,
            namewhat: "",
            what: "",
            source: String::new(),
            currentline: -1,
            nups: 0,
            linedefined: -1,
            lastlinedefined: -1,
            short_src: String::new(),
            ci: 0,
        }
    }
}

/// Render a chunk name the way messages show it: `=name` verbatim, `@file`
/// keeping the tail of long paths, anything else as `[string "..."]`.
pub fn chunkid(source: &[u8]) -> String {
    let lossy = |b: &[u8]| String::from_utf8_lossy(b).into_owned();
    match source.first() {
        Some(b'=') => lossy(&source[1..source.len().min(IDSIZE)]),
        Some(b'@') => {
            let path = &source[1..];
            let room = IDSIZE - " '...' ".len() - 1;
            if path.len() > room {
                format!("...{}", lossy(&path[path.len() - room..]))
            } else {
                lossy(path)
            }
        }
        _ => {
            let line_end = source
                .iter()
                .position(|&c| c == b'\n' || c == b'\r')
                .unwrap_or(source.len());
            let room = IDSIZE - " [string \"...\"] ".len() - 1;
            let len = line_end.min(room);
            if len < source.len() {
                format!("[string \"{}...\"]", lossy(&source[..len]))
            } else {
                format!("[string \"{}\"]", lossy(source))
            }
        }
    }
}

fn constant_name(p: &Proto, idx: usize) -> Option<StringId> {
    match p.constants.get(idx) {
        Some(Constant::String(s)) => Some(*s),
        _ => None,
    }
}

/// Index of the last instruction before `lastpc` that wrote `reg`, if that
/// write happens unconditionally.
fn find_setreg(p: &Proto, lastpc: usize, reg: usize) -> Option<usize> {
    let mut setreg = None;
    let mut jmptarget = 0usize;
    let mut pc = 0;
    while pc < lastpc {
        let inst = p.code[pc];
        let op = inst.opcode();
        let a = inst.a() as usize;
        let changes = match op {
            OpCode::LoadNil => a <= reg && reg <= inst.b() as usize,
            OpCode::TForLoop => reg >= a + 2,
            OpCode::Call | OpCode::TailCall => reg >= a,
            OpCode::Jmp => {
                let dest = pc as i64 + 1 + inst.sbx() as i64;
                if (pc as i64) < dest && dest <= lastpc as i64 {
                    jmptarget = jmptarget.max(dest as usize);
                }
                false
            }
            _ => op.sets_a() && a == reg,
        };
        if changes {
            // a write inside a skipped block is only conditional
            setreg = (pc >= jmptarget).then_some(pc);
        }
        if op == OpCode::SetList && inst.c() == 0 {
            pc += 1;
        }
        pc += 1;
    }
    setreg
}

impl State {
    fn lossy(&self, id: StringId) -> String {
        self.strings.get_lossy(id).into_owned()
    }

    /// Describe what register `reg` holds at `lastpc`: a local, a global,
    /// a field, an upvalue or a method.
    fn getobjname(&self, p: &Proto, lastpc: usize, reg: usize) -> Option<(&'static str, String)> {
        if let Some(name) = p.local_name(reg + 1, lastpc) {
            return Some(("local", self.lossy(name)));
        }
        let pc = find_setreg(p, lastpc, reg)?;
        let inst = p.code[pc];
        match inst.opcode() {
            OpCode::GetGlobal => {
                constant_name(p, inst.bx() as usize).map(|s| ("global", self.lossy(s)))
            }
            OpCode::Move => {
                let b = inst.b() as usize;
                if b < inst.a() as usize {
                    self.getobjname(p, pc, b)
                } else {
                    None
                }
            }
            OpCode::GetTable | OpCode::Self_ => {
                let c = inst.c();
                let kind = if inst.opcode() == OpCode::Self_ { "method" } else { "field" };
                if is_k(c) {
                    constant_name(p, index_k(c) as usize).map(|s| (kind, self.lossy(s)))
                } else {
                    Some((kind, "?".to_owned()))
                }
            }
            OpCode::GetUpval => {
                let name = p
                    .upvalues
                    .get(inst.b() as usize)
                    .and_then(|uv| uv.name)
                    .map_or_else(|| "?".to_owned(), |s| self.lossy(s));
                Some(("upvalue", name))
            }
            _ => None,
        }
    }

    /// Name of the value in stack slot `slot` of the running Lua frame.
    fn varinfo(&self, slot: usize) -> Option<(&'static str, String)> {
        let ci = self.ci();
        let FrameKind::Lua { proto, .. } = ci.kind else {
            return None;
        };
        if slot < ci.base || slot >= ci.top {
            return None;
        }
        let p = self.proto(proto);
        self.getobjname(&p, ci.current_pc(), slot - ci.base)
    }

    fn short_src_of(&self, p: &Proto) -> String {
        match p.source {
            Some(s) => chunkid(self.string_bytes(s)),
            None => "?".to_owned(),
        }
    }

    /// `short_src:line:` for frame `ci`, empty unless it runs Lua code.
    pub(crate) fn where_frame(&self, ci: usize) -> String {
        let Some(frame) = self.cur.frames.get(ci) else {
            return String::new();
        };
        match self.frame_proto(frame) {
            Some(p) => format!(
                "{}:{}: ",
                self.short_src_of(&p),
                p.get_line(frame.current_pc())
            ),
            None => String::new(),
        }
    }

    /// A runtime fault located at the running Lua frame.
    pub(crate) fn rt_error(&self, msg: impl AsRef<str>) -> LuaError {
        let prefix = self.where_frame(self.cur.frames.len() - 1);
        LuaError::Runtime(format!("{prefix}{}", msg.as_ref()))
    }

    /// "attempt to {op} ..." naming the variable in `src` when possible.
    pub(crate) fn type_error(&self, v: Value, op: &str, src: Option<usize>) -> LuaError {
        let t = v.type_name();
        match src.and_then(|slot| self.varinfo(slot)) {
            Some((kind, name)) => {
                self.rt_error(format!("attempt to {op} {kind} '{name}' (a {t} value)"))
            }
            None => self.rt_error(format!("attempt to {op} a {t} value")),
        }
    }

    pub(crate) fn order_error(&self, a: Value, b: Value) -> LuaError {
        let (t1, t2) = (a.type_name(), b.type_name());
        if t1 == t2 {
            self.rt_error(format!("attempt to compare two {t1} values"))
        } else {
            self.rt_error(format!("attempt to compare {t1} with {t2}"))
        }
    }

    // ---- API ----

    /// Select the activation `level` frames below the running one. Level 0
    /// is the running function. Returns false past the bottom of the chain.
    pub fn getstack(&self, level: i32, ar: &mut Debug) -> bool {
        if level < 0 {
            return false;
        }
        let mut level = level as i64;
        let mut ci = self.cur.frames.len() - 1;
        while level > 0 && ci > 0 {
            level -= 1;
            let frame = &self.cur.frames[ci];
            if frame.is_lua() {
                level -= frame.tailcalls as i64;
            }
            ci -= 1;
        }
        if level == 0 && ci > 0 {
            ar.ci = ci;
            true
        } else if level < 0 {
            ar.ci = 0;
            true
        } else {
            false
        }
    }

    /// Fill the fields of `ar` selected by `what` for the frame chosen by
    /// `getstack`: `n` name, `S` source, `l` current line, `u` upvalue
    /// count, `f` push the function. A leading `>` inspects the function on
    /// top of the stack instead, popping it.
    pub fn getinfo(&mut self, what: &str, ar: &mut Debug) -> bool {
        if let Some(rest) = what.strip_prefix('>') {
            let f = self.pop_value();
            return self.fill_info(rest, ar, Some(f), None);
        }
        let ci = ar.ci;
        if ci == 0 {
            return self.fill_info(what, ar, None, None);
        }
        let Some(frame) = self.cur.frames.get(ci) else {
            return false;
        };
        let f = self.cur.stack[frame.func];
        self.fill_info(what, ar, Some(f), Some(ci))
    }

    /// `getinfo` on the function at the top of the stack, popping it.
    pub fn getinfo_fn(&mut self, what: &str, ar: &mut Debug) -> bool {
        let f = self.pop_value();
        self.fill_info(what, ar, Some(f), None)
    }

    fn fill_info(&mut self, what: &str, ar: &mut Debug, f: Option<Value>, ci: Option<usize>) -> bool {
        let closure = f.and_then(|v| self.closure_of(v));
        let proto = match closure {
            Some(Closure::Lua(lc)) => Some(self.proto(lc.proto)),
            _ => None,
        };
        let nups = closure.map_or(0, |c| c.num_upvalues());
        let is_function = closure.is_some();
        let mut ok = true;
        for option in what.chars() {
            match option {
                'S' => match (&proto, is_function) {
                    (Some(p), _) => {
                        ar.source = p
                            .source
                            .map_or_else(|| "=?".to_owned(), |s| self.lossy(s));
                        ar.short_src = self.short_src_of(p);
                        ar.linedefined = p.line_defined as i32;
                        ar.lastlinedefined = p.last_line_defined as i32;
                        ar.what = if p.line_defined == 0 { "main" } else { "Lua" };
                    }
                    (None, true) => {
                        ar.source = "=[C]".to_owned();
                        ar.short_src = "[C]".to_owned();
                        ar.linedefined = -1;
                        ar.lastlinedefined = -1;
                        ar.what = "C";
                    }
                    (None, false) => {
                        ar.source = "=(tail call)".to_owned();
                        ar.short_src = chunkid(ar.source.as_bytes());
                        ar.linedefined = -1;
                        ar.lastlinedefined = -1;
                        ar.what = "tail";
                    }
                },
                'l' => {
                    ar.currentline = match (ci, &proto) {
                        (Some(i), Some(p)) => p.get_line(self.cur.frames[i].current_pc()) as i32,
                        _ => -1,
                    };
                }
                'u' => ar.nups = nups,
                'n' => {
                    let found = ci.and_then(|i| self.funcname_from_call(i));
                    match found {
                        Some((namewhat, name)) => {
                            ar.namewhat = namewhat;
                            ar.name = Some(name);
                        }
                        None => {
                            ar.namewhat = "";
                            ar.name = None;
                        }
                    }
                }
                'f' => {
                    let v = f.unwrap_or_default();
                    self.push(v);
                }
                _ => ok = false,
            }
        }
        ok
    }

    /// How the caller of frame `ci` named the function it called.
    fn funcname_from_call(&self, ci: usize) -> Option<(&'static str, String)> {
        let frame = &self.cur.frames[ci];
        if frame.is_lua() && frame.tailcalls > 0 {
            return None;
        }
        let caller = self.cur.frames.get(ci.checked_sub(1)?)?;
        let p = self.frame_proto(caller)?;
        let pc = caller.current_pc();
        let inst = *p.code.get(pc)?;
        match inst.opcode() {
            OpCode::Call | OpCode::TailCall | OpCode::TForLoop => {
                self.getobjname(&p, pc, inst.a() as usize)
            }
            _ => None,
        }
    }

    /// Name and stack slot of local `n` in the frame chosen by `ar`.
    fn local_slot(&self, ar: &Debug, n: i32) -> Option<(String, usize)> {
        if ar.ci == 0 || n <= 0 {
            return None;
        }
        let frame = self.cur.frames.get(ar.ci)?;
        let n = n as usize;
        let name = self
            .frame_proto(frame)
            .and_then(|p| p.local_name(n, frame.current_pc()))
            .map(|s| self.lossy(s));
        let limit = match self.cur.frames.get(ar.ci + 1) {
            Some(next) => next.func,
            None => self.cur.top,
        };
        match name {
            Some(name) => Some((name, frame.base + n - 1)),
            None if limit >= frame.base + n => Some(("(*temporary)".to_owned(), frame.base + n - 1)),
            None => None,
        }
    }

    /// Push local `n` of the frame in `ar` and return its name, or push
    /// nothing and return `None` when there is no such local.
    pub fn getlocal(&mut self, ar: &Debug, n: i32) -> Option<String> {
        let (name, slot) = self.local_slot(ar, n)?;
        let v = self.cur.stack[slot];
        self.push(v);
        Some(name)
    }

    /// Pop the top value into local `n` of the frame in `ar`. The value is
    /// popped even when there is no such local.
    pub fn setlocal(&mut self, ar: &Debug, n: i32) -> Option<String> {
        let found = self.local_slot(ar, n);
        let v = self.pop_value();
        let (name, slot) = found?;
        self.cur.stack[slot] = v;
        Some(name)
    }

    /// Name and current value of upvalue `n` of the function at `funcindex`.
    fn upvalue_ref(&self, funcindex: Index, n: i32) -> Option<(String, UpvalueRef)> {
        let f = self.value_at(funcindex)?.as_function()?;
        let n = usize::try_from(n).ok()?.checked_sub(1)?;
        match self.heap.get_closure(f) {
            Closure::Native(nc) => {
                (n < nc.upvalues.len()).then(|| (String::new(), UpvalueRef::Native(f, n)))
            }
            Closure::Lua(lc) => {
                let uv = *lc.upvalues.get(n)?;
                let name = self
                    .proto(lc.proto)
                    .upvalues
                    .get(n)
                    .and_then(|d| d.name)
                    .map_or_else(|| "?".to_owned(), |s| self.lossy(s));
                Some((name, UpvalueRef::Lua(uv)))
            }
        }
    }

    /// Push upvalue `n` of the function at `funcindex` and return its
    /// name. Native upvalues are named "".
    pub fn getupvalue(&mut self, funcindex: impl Into<Index>, n: i32) -> Option<String> {
        let (name, r) = self.upvalue_ref(funcindex.into(), n)?;
        let v = match r {
            UpvalueRef::Lua(uv) => self.upval_get(uv),
            UpvalueRef::Native(f, i) => match self.heap.get_closure(f) {
                Closure::Native(nc) => nc.upvalues[i],
                Closure::Lua(_) => Value::Nil,
            },
        };
        self.push(v);
        Some(name)
    }

    /// Pop the top value into upvalue `n` of the function at `funcindex`.
    /// Nothing is popped when the upvalue does not exist.
    pub fn setupvalue(&mut self, funcindex: impl Into<Index>, n: i32) -> Option<String> {
        let (name, r) = self.upvalue_ref(funcindex.into(), n)?;
        let v = self.pop_value();
        match r {
            UpvalueRef::Lua(uv) => self.upval_set(uv, v),
            UpvalueRef::Native(f, i) => {
                if let Closure::Native(nc) = self.heap.get_closure_mut(f) {
                    nc.upvalues[i] = v;
                }
            }
        }
        Some(name)
    }
}

enum UpvalueRef {
    Lua(moonstack_core::GcIdx<moonstack_core::UpVal>),
    Native(moonstack_core::GcIdx<Closure>, usize),
}
