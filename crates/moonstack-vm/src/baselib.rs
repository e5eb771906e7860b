//! The base library: global functions and the `coroutine` table.

use crate::error::{LuaError, LuaResult};
use crate::gc::GcOp;
use crate::state::{NativeFn, State};
use crate::thread::{Thread, ThreadStatus};
use crate::{upvalueindex, LuaType, Status, GLOBALSINDEX, MULTRET, VERSION};
use std::io::Write;

const BASE_FUNCS: &[(&str, NativeFn)] = &[
    ("assert", native_base_assert),
    ("collectgarbage", native_base_collectgarbage),
    ("error", native_base_error),
    ("getfenv", native_base_getfenv),
    ("getmetatable", native_base_getmetatable),
    ("loadstring", native_base_loadstring),
    ("next", native_base_next),
    ("pcall", native_base_pcall),
    ("print", native_base_print),
    ("rawequal", native_base_rawequal),
    ("rawget", native_base_rawget),
    ("rawset", native_base_rawset),
    ("select", native_base_select),
    ("setfenv", native_base_setfenv),
    ("setmetatable", native_base_setmetatable),
    ("tonumber", native_base_tonumber),
    ("tostring", native_base_tostring),
    ("type", native_base_type),
    ("unpack", native_base_unpack),
    ("xpcall", native_base_xpcall),
];

const COROUTINE_FUNCS: &[(&str, NativeFn)] = &[
    ("create", native_coroutine_create),
    ("resume", native_coroutine_resume),
    ("running", native_coroutine_running),
    ("status", native_coroutine_status),
    ("wrap", native_coroutine_wrap),
    ("yield", native_coroutine_yield),
];

/// Install the base functions, `_G`, `_VERSION` and `coroutine` into the
/// globals table.
pub(crate) fn open(state: &mut State) -> LuaResult<()> {
    state.pushvalue(GLOBALSINDEX);
    state.setglobal("_G")?;
    state.pushvalue(GLOBALSINDEX);
    state.register_lib(None, BASE_FUNCS)?;
    state.pop(1);

    // iterator generators keep their step function as an upvalue
    state.pushcfunction(native_base_next);
    state.pushcclosure(native_base_pairs, 1);
    state.setglobal("pairs")?;
    state.pushcfunction(native_base_ipairs_aux);
    state.pushcclosure(native_base_ipairs, 1);
    state.setglobal("ipairs")?;

    state.pushstring(VERSION);
    state.setglobal("_VERSION")?;

    state.register_lib(Some("coroutine"), COROUTINE_FUNCS)?;
    state.pop(1);
    Ok(())
}

// ---- Output and conversion ----

/// print(...): write every argument through `tostring`, tab separated.
fn native_base_print(s: &mut State) -> LuaResult<usize> {
    let n = s.gettop();
    let mut line = Vec::new();
    for i in 1..=n {
        s.tostring_meta(i)?;
        if i > 1 {
            line.push(b'\t');
        }
        line.extend(s.tolstring(-1).unwrap_or_default());
        s.pop(1);
    }
    line.push(b'\n');
    let mut out = std::io::stdout().lock();
    out.write_all(&line)
        .and_then(|()| out.flush())
        .map_err(|e| LuaError::runtime(format!("print: {e}")))?;
    Ok(0)
}

/// type(v): the type name of `v`.
fn native_base_type(s: &mut State) -> LuaResult<usize> {
    s.checkany(1)?;
    let name = s.type_name_at(1);
    s.pushstring(name);
    Ok(1)
}

fn native_base_tostring(s: &mut State) -> LuaResult<usize> {
    s.checkany(1)?;
    s.tostring_meta(1)?;
    Ok(1)
}

/// Parse `text` as an unsigned integer in `base`, with an optional minus
/// sign and surrounding whitespace.
fn parse_in_base(text: &str, base: u32) -> Option<f64> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(base)) {
        return None;
    }
    let n = digits
        .chars()
        .filter_map(|c| c.to_digit(base))
        .fold(0.0f64, |acc, d| acc * base as f64 + d as f64);
    Some(if negative { -n } else { n })
}

/// tonumber(e [, base]): a number, or nil when `e` does not convert.
fn native_base_tonumber(s: &mut State) -> LuaResult<usize> {
    let base = s.optinteger(2, 10)?;
    if base == 10 {
        s.checkany(1)?;
        if let Some(n) = s.tonumberx(1) {
            s.pushnumber(n);
            return Ok(1);
        }
    } else {
        let text = s.checkstring(1)?;
        if !(2..=36).contains(&base) {
            return Err(s.argerror(2, "base out of range"));
        }
        if let Some(n) = parse_in_base(&text, base as u32) {
            s.pushnumber(n);
            return Ok(1);
        }
    }
    s.pushnil();
    Ok(1)
}

// ---- Errors and protected calls ----

/// error(message [, level]): raise `message`. String messages get the
/// position of the function `level` frames up.
fn native_base_error(s: &mut State) -> LuaResult<usize> {
    let level = s.optinteger(2, 1)?;
    s.settop(1);
    if s.type_of(1) == LuaType::String && level > 0 {
        let pos = s.where_(level as i32);
        s.pushstring(&pos);
        s.pushvalue(1);
        s.concat(2)?;
    }
    Err(s.error())
}

/// assert(v [, message]): all arguments when `v` is true, else raise.
fn native_base_assert(s: &mut State) -> LuaResult<usize> {
    s.checkany(1)?;
    if !s.toboolean(1) {
        let msg = s.optlstring(2, b"assertion failed!")?;
        return Err(s.error_msg(&String::from_utf8_lossy(&msg)));
    }
    Ok(s.gettop() as usize)
}

/// pcall(f, ...): true and the results, or false and the error value.
fn native_base_pcall(s: &mut State) -> LuaResult<usize> {
    s.checkany(1)?;
    let nargs = s.gettop() as usize - 1;
    let status = s.pcall(nargs, MULTRET, 0)?;
    s.pushboolean(status == Status::Ok);
    s.insert(1);
    Ok(s.gettop() as usize)
}

/// xpcall(f, handler): like pcall, with `handler` shaping the error value.
fn native_base_xpcall(s: &mut State) -> LuaResult<usize> {
    s.checkany(2)?;
    s.settop(2);
    s.insert(1);
    let status = s.pcall(0, MULTRET, 1)?;
    s.pushboolean(status == Status::Ok);
    s.replace(1);
    Ok(s.gettop() as usize)
}

fn native_base_select(s: &mut State) -> LuaResult<usize> {
    let n = s.gettop() as i64;
    if s.type_of(1) == LuaType::String && s.tolstring(1).as_deref() == Some(b"#") {
        s.pushinteger(n - 1);
        return Ok(1);
    }
    let mut i = s.checkinteger(1)?;
    if i < 0 {
        i += n;
    } else if i > n {
        i = n;
    }
    if i < 1 {
        return Err(s.argerror(1, "index out of range"));
    }
    Ok((n - i) as usize)
}

// ---- Raw access and metatables ----

fn native_base_rawequal(s: &mut State) -> LuaResult<usize> {
    s.checkany(1)?;
    s.checkany(2)?;
    let eq = s.rawequal(1, 2);
    s.pushboolean(eq);
    Ok(1)
}

fn native_base_rawget(s: &mut State) -> LuaResult<usize> {
    s.checktype(1, LuaType::Table)?;
    s.checkany(2)?;
    s.settop(2);
    s.rawget(1);
    Ok(1)
}

fn native_base_rawset(s: &mut State) -> LuaResult<usize> {
    s.checktype(1, LuaType::Table)?;
    s.checkany(2)?;
    s.checkany(3)?;
    s.settop(3);
    s.rawset(1)?;
    Ok(1)
}

/// getmetatable(v): the `__metatable` field when present, else the
/// metatable itself.
fn native_base_getmetatable(s: &mut State) -> LuaResult<usize> {
    s.checkany(1)?;
    if !s.getmetatable(1) {
        s.pushnil();
        return Ok(1);
    }
    s.getmetafield(1, "__metatable");
    Ok(1)
}

fn native_base_setmetatable(s: &mut State) -> LuaResult<usize> {
    let t = s.type_of(2);
    s.checktype(1, LuaType::Table)?;
    if t != LuaType::Nil && t != LuaType::Table {
        return Err(s.typeerror(2, "nil or table"));
    }
    if s.getmetafield(1, "__metatable") {
        return Err(s.error_msg("cannot change a protected metatable"));
    }
    s.settop(2);
    s.setmetatable(1);
    Ok(1)
}

// ---- Traversal ----

fn native_base_next(s: &mut State) -> LuaResult<usize> {
    s.checktype(1, LuaType::Table)?;
    s.settop(2);
    if s.next(1)? {
        Ok(2)
    } else {
        s.pushnil();
        Ok(1)
    }
}

/// pairs(t): next, t, nil.
fn native_base_pairs(s: &mut State) -> LuaResult<usize> {
    s.checktype(1, LuaType::Table)?;
    s.pushvalue(upvalueindex(1));
    s.pushvalue(1);
    s.pushnil();
    Ok(3)
}

fn native_base_ipairs_aux(s: &mut State) -> LuaResult<usize> {
    let i = s.checkinteger(2)? + 1;
    s.checktype(1, LuaType::Table)?;
    s.pushinteger(i);
    s.rawgeti(1, i);
    if s.isnil(-1) {
        Ok(0)
    } else {
        Ok(2)
    }
}

/// ipairs(t): the array iterator, t, 0.
fn native_base_ipairs(s: &mut State) -> LuaResult<usize> {
    s.checktype(1, LuaType::Table)?;
    s.pushvalue(upvalueindex(1));
    s.pushvalue(1);
    s.pushinteger(0);
    Ok(3)
}

/// unpack(t [, i [, j]]): t[i], ..., t[j].
fn native_base_unpack(s: &mut State) -> LuaResult<usize> {
    s.checktype(1, LuaType::Table)?;
    let i = s.optinteger(2, 1)?;
    let j = if s.isnoneornil(3) {
        s.objlen(1) as i64
    } else {
        s.checkinteger(3)?
    };
    if i > j {
        return Ok(0);
    }
    let n = j - i + 1;
    let Ok(count) = usize::try_from(n) else {
        return Err(s.error_msg("too many results to unpack"));
    };
    if s.checkstack(count).is_err() {
        return Err(s.error_msg("too many results to unpack"));
    }
    for k in i..=j {
        s.rawgeti(1, k);
    }
    Ok(count)
}

// ---- Environments ----

/// Push the function named by argument 1: a function, or a stack level.
fn push_target_function(s: &mut State, default_level: i64) -> LuaResult<()> {
    if s.isfunction(1) {
        s.pushvalue(1);
        return Ok(());
    }
    let level = s.optinteger(1, default_level)?;
    if level < 0 {
        return Err(s.argerror(1, "level must be non-negative"));
    }
    if level == 0 {
        s.pushnil();
        return Ok(());
    }
    let mut ar = crate::Debug::default();
    if !s.getstack(level as i32, &mut ar) {
        return Err(s.argerror(1, "invalid level"));
    }
    s.getinfo("f", &mut ar);
    if s.isnil(-1) {
        return Err(s.error_msg(&format!(
            "no function environment for tail call at level {level}"
        )));
    }
    Ok(())
}

/// getfenv([f]): the environment of `f`, or of the function at a level.
/// Level 0 and native functions give the thread's globals.
fn native_base_getfenv(s: &mut State) -> LuaResult<usize> {
    push_target_function(s, 1)?;
    if s.isnil(-1) || s.iscfunction(-1) {
        s.pushvalue(GLOBALSINDEX);
    } else {
        s.getfenv(-1);
    }
    Ok(1)
}

/// setfenv(f, table): level 0 changes the running thread's globals.
fn native_base_setfenv(s: &mut State) -> LuaResult<usize> {
    s.checktype(2, LuaType::Table)?;
    push_target_function(s, 1)?;
    s.pushvalue(2);
    if s.isnumber(1) && s.tonumber(1) == 0.0 {
        s.pushthread();
        s.insert(-2);
        s.setfenv(-2);
        return Ok(0);
    }
    if s.iscfunction(-2) || !s.setfenv(-2) {
        return Err(s.error_msg("'setfenv' cannot change environment of given object"));
    }
    Ok(1)
}

// ---- Collector and loading ----

/// collectgarbage([opt [, arg]])
fn native_base_collectgarbage(s: &mut State) -> LuaResult<usize> {
    let opt = s.optlstring(1, b"collect")?;
    let arg = s.optinteger(2, 0)? as i32;
    let op = match opt.as_slice() {
        b"stop" => GcOp::Stop,
        b"restart" => GcOp::Restart,
        b"collect" => GcOp::Collect,
        b"count" => GcOp::Count,
        b"step" => GcOp::Step,
        b"setpause" => GcOp::SetPause,
        b"setstepmul" => GcOp::SetStepMul,
        other => {
            let msg = format!("invalid option '{}'", String::from_utf8_lossy(other));
            return Err(s.argerror(1, &msg));
        }
    };
    let res = s.gc(op, arg);
    match op {
        GcOp::Count => {
            let b = s.gc(GcOp::CountB, 0);
            s.pushnumber(res as f64 + b as f64 / 1024.0);
        }
        GcOp::Step => s.pushboolean(res != 0),
        _ => s.pushnumber(res as f64),
    }
    Ok(1)
}

/// loadstring(s [, chunkname]): the compiled chunk, or nil and a message.
fn native_base_loadstring(s: &mut State) -> LuaResult<usize> {
    let source = s.checklstring(1)?;
    let default_name = String::from_utf8_lossy(&source).into_owned();
    let chunkname = match s.optlstring(2, default_name.as_bytes())? {
        name if name.is_empty() => default_name,
        name => String::from_utf8_lossy(&name).into_owned(),
    };
    match s.load(&source, &chunkname, None)? {
        Status::Ok => Ok(1),
        _ => {
            s.pushnil();
            s.insert(-2);
            Ok(2)
        }
    }
}

// ---- Coroutines ----

fn check_coroutine(s: &mut State, narg: i32) -> LuaResult<Thread> {
    match s.tothread(narg) {
        Some(co) => Ok(co),
        None => Err(s.typeerror(narg, "coroutine")),
    }
}

/// coroutine.create(f): a suspended coroutine running the Lua function `f`.
fn native_coroutine_create(s: &mut State) -> LuaResult<usize> {
    if !s.isfunction(1) || s.iscfunction(1) {
        return Err(s.argerror(1, "Lua function expected"));
    }
    let co = s.newthread();
    s.pushvalue(1);
    let me = s.running();
    s.xmove(&me, &co, 1)?;
    Ok(1)
}

/// Resume `co` with the top `narg` values and move its results onto the
/// caller's stack. `None` means it failed and left one error value instead.
fn aux_resume(s: &mut State, co: &Thread, narg: usize) -> LuaResult<Option<usize>> {
    let me = s.running();
    let status = s.status(co)?;
    if status != ThreadStatus::Suspended {
        let msg = format!("cannot resume {} coroutine", status.as_str());
        s.pushstring(&msg);
        return Ok(None);
    }
    if s.with_thread(co, |t| t.checkstack(narg))?.is_err() {
        s.pushstring("too many arguments to resume");
        return Ok(None);
    }
    s.xmove(&me, co, narg)?;
    match s.resume(co, narg)? {
        Status::Ok | Status::Yield => {
            let nres = s.with_thread(co, |t| t.gettop())? as usize;
            if s.checkstack(nres + 1).is_err() {
                s.pushstring("too many results to resume");
                return Ok(None);
            }
            s.xmove(co, &me, nres)?;
            Ok(Some(nres))
        }
        _ => {
            s.xmove(co, &me, 1)?;
            Ok(None)
        }
    }
}

/// coroutine.resume(co, ...): true and the yielded or returned values, or
/// false and the error value.
fn native_coroutine_resume(s: &mut State) -> LuaResult<usize> {
    let co = check_coroutine(s, 1)?;
    let narg = s.gettop() as usize - 1;
    match aux_resume(s, &co, narg)? {
        Some(nres) => {
            s.pushboolean(true);
            s.insert(-(nres as i32 + 1));
            Ok(nres + 1)
        }
        None => {
            s.pushboolean(false);
            s.insert(-2);
            Ok(2)
        }
    }
}

fn native_coroutine_yield(s: &mut State) -> LuaResult<usize> {
    let n = s.gettop() as usize;
    s.yield_(n)
}

fn native_coroutine_status(s: &mut State) -> LuaResult<usize> {
    let co = check_coroutine(s, 1)?;
    let status = s.status(&co)?;
    s.pushstring(status.as_str());
    Ok(1)
}

/// coroutine.running(): the running coroutine, or nil on the main thread.
fn native_coroutine_running(s: &mut State) -> LuaResult<usize> {
    if s.pushthread() {
        s.pushnil();
    }
    Ok(1)
}

fn native_coroutine_wrap_aux(s: &mut State) -> LuaResult<usize> {
    let Some(co) = s.tothread(upvalueindex(1)) else {
        return Err(LuaError::contract("wrapped coroutine lost its thread"));
    };
    let narg = s.gettop() as usize;
    match aux_resume(s, &co, narg)? {
        Some(nres) => Ok(nres),
        None => {
            if s.isstring(-1) {
                let pos = s.where_(1);
                s.pushstring(&pos);
                s.insert(-2);
                s.concat(2)?;
            }
            Err(s.error())
        }
    }
}

/// coroutine.wrap(f): a function that resumes a new coroutine on each call
/// and raises its errors.
fn native_coroutine_wrap(s: &mut State) -> LuaResult<usize> {
    native_coroutine_create(s)?;
    s.pushcclosure(native_coroutine_wrap_aux, 1);
    Ok(1)
}
