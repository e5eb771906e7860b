use super::helpers::*;
use moonstack_vm::{Debug, LuaResult, State, Status, MULTRET};

fn run_named(s: &mut State, src: &str, name: &str) -> Vec<String> {
    assert_eq!(s.load(src.as_bytes(), name, None).unwrap(), Status::Ok);
    assert_eq!(s.pcall(0, MULTRET, 0).unwrap(), Status::Ok, "{:?}", s.tostring_lossy(-1));
    drain(s)
}

// ── activation records ─────────────────────────────────────────────────────

/// Describe every Lua-visible caller as `namewhat:name`.
fn callers(s: &mut State) -> LuaResult<usize> {
    let mut parts = Vec::new();
    let mut ar = Debug::default();
    let mut level = 1;
    while s.getstack(level, &mut ar) {
        s.getinfo("n", &mut ar);
        parts.push(format!("{}:{}", ar.namewhat, ar.name.as_deref().unwrap_or("?")));
        level += 1;
    }
    s.pushstring(&parts.join(";"));
    Ok(1)
}

#[test]
fn e2e_frames_are_named_by_how_they_were_called() {
    let mut s = State::new();
    s.register("callers", callers).unwrap();
    let out = run_named(
        &mut s,
        "local obj = {}
         function obj:method() local r = callers() return r end
         function outer() local r = obj:method() return r end
         local r = outer()
         return r",
        "=names",
    );
    assert_eq!(out, ["method:method;global:outer;:?"]);
}

fn where_called(s: &mut State) -> LuaResult<usize> {
    let mut ar = Debug::default();
    assert!(s.getstack(1, &mut ar));
    assert!(s.getinfo("Sl", &mut ar));
    s.pushstring(&format!(
        "{}:{} {} [{}-{}]",
        ar.short_src, ar.currentline, ar.what, ar.linedefined, ar.lastlinedefined
    ));
    Ok(1)
}

#[test]
fn e2e_source_and_line_of_the_caller() {
    let mut s = State::new();
    s.register("here", where_called).unwrap();
    let out = run_named(
        &mut s,
        "local function f()
           local r = here()
           return r
         end
         local inner = f()
         local top = here()
         return inner, top",
        "=lines",
    );
    assert_eq!(out, ["lines:2 Lua [1-4]", "lines:6 main [0-0]"]);
}

// ── locals ─────────────────────────────────────────────────────────────────

/// List the caller's locals and overwrite the first one.
fn rewrite_locals(s: &mut State) -> LuaResult<usize> {
    let mut ar = Debug::default();
    assert!(s.getstack(1, &mut ar));
    let mut names = Vec::new();
    let mut n = 1;
    while let Some(name) = s.getlocal(&ar, n) {
        s.pop(1);
        names.push(name);
        n += 1;
    }
    s.pushnumber(99.0);
    assert_eq!(s.setlocal(&ar, 1).as_deref(), Some("x"));
    s.pushstring(&names.join(","));
    Ok(1)
}

#[test]
fn e2e_host_reads_and_writes_caller_locals() {
    let mut s = State::new();
    s.register("rewrite", rewrite_locals).unwrap();
    let out = run_in(
        &mut s,
        "local x = 1
         local y = 'two'
         local seen = rewrite()
         return x, y, seen",
    );
    assert_eq!(out, ["99", "two", "x,y"]);
}

#[test]
fn e2e_setlocal_on_a_missing_slot_still_pops() {
    fn touch_missing_local(s: &mut State) -> LuaResult<usize> {
        let mut ar = Debug::default();
        assert!(s.getstack(1, &mut ar));
        let before = s.gettop();
        s.pushnil();
        assert!(s.setlocal(&ar, 50).is_none());
        assert_eq!(s.gettop(), before);
        Ok(0)
    }
    let mut s = State::new();
    s.register("touch_missing_local", touch_missing_local).unwrap();
    run_in(&mut s, "local a = 1 touch_missing_local()");
}

// ── upvalues ───────────────────────────────────────────────────────────────

#[test]
fn e2e_host_swaps_a_closure_upvalue() {
    let mut s = State::new();
    run_in(
        &mut s,
        "local greeting = 'hello'
         function greet(who) return greeting .. ', ' .. who end",
    );
    s.getglobal("greet").unwrap();
    assert_eq!(s.getupvalue(-1, 1).as_deref(), Some("greeting"));
    assert_eq!(s.tostring_lossy(-1).as_deref(), Some("hello"));
    s.pop(1);
    s.pushstring("goodbye");
    assert_eq!(s.setupvalue(-2, 1).as_deref(), Some("greeting"));
    s.pop(1);
    assert_eq!(run_in(&mut s, "return greet('moon')"), ["goodbye, moon"]);
}

#[test]
fn e2e_native_upvalues_have_empty_names() {
    let mut s = bare();
    s.pushstring("stored");
    s.pushcclosure(native_sum, 1);
    assert_eq!(s.getupvalue(-1, 1).as_deref(), Some(""));
    assert_eq!(s.tostring_lossy(-1).as_deref(), Some("stored"));
    s.pop(1);
    assert!(s.getupvalue(-1, 2).is_none());
    assert!(s.getupvalue(-1, 0).is_none());
}

// ── tracebacks ─────────────────────────────────────────────────────────────

fn traceback_here(s: &mut State) -> LuaResult<usize> {
    let tb = s.traceback(1, None);
    s.pushstring(&tb);
    Ok(1)
}

#[test]
fn e2e_deep_traceback_is_elided_in_the_middle() {
    let mut s = State::new();
    s.register("tb", traceback_here).unwrap();
    let out = run_named(
        &mut s,
        "local function rec(n)
           if n == 0 then local t = tb() return t end
           local r = rec(n - 1)
           return r
         end
         local r = rec(30)
         return r",
        "=deep",
    );
    let lines: Vec<&str> = out[0].lines().collect();
    assert_eq!(lines[0], "stack traceback:");
    assert_eq!(lines[1], "\tdeep:2: in function 'rec'");
    assert!(lines.contains(&"\t..."), "{}", out[0]);
    assert_eq!(lines.len(), 1 + 11 + 1 + 10);
    assert_eq!(*lines.last().unwrap(), "\tdeep:6: in main chunk");
    let rec_lines = lines.iter().filter(|l| l.ends_with("in function 'rec'")).count();
    assert_eq!(rec_lines, 20);
}

#[test]
fn e2e_anonymous_functions_are_shown_by_definition_site() {
    let mut s = State::new();
    s.register("tb", traceback_here).unwrap();
    let out = run_named(
        &mut s,
        "local t = {}
         t[1] = function() local r = tb() return r end
         local ok, r = pcall(t[1])
         return r",
        "=anon",
    );
    let lines: Vec<&str> = out[0].lines().collect();
    assert_eq!(lines[1], "\tanon:2: in function <anon:2>");
    assert_eq!(lines[2], "\t[C]: in function 'pcall'");
    assert_eq!(lines[3], "\tanon:3: in main chunk");
}
