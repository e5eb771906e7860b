use super::helpers::*;
use moonstack_vm::{State, Status, VERSION};

// ── globals ────────────────────────────────────────────────────────────────

#[test]
fn e2e_base_globals_are_installed() {
    let out = run_lua("return _VERSION, _G._G == _G, type(coroutine.wrap), type(pairs)");
    assert_eq!(out, [VERSION, "true", "function", "function"]);
}

#[test]
fn e2e_bare_state_has_no_base_library() {
    let mut s = bare();
    assert_eq!(s.dostring("return print").unwrap(), Status::Ok);
    assert!(s.isnil(-1));
    s.settop(0);
    assert_eq!(s.dostring("print('x')").unwrap(), Status::ErrRun);
}

#[test]
fn e2e_tostring_of_reference_types() {
    let out = run_lua("return tostring({}), tostring(print), tostring(nil), tostring(1.5)");
    assert!(out[0].starts_with("table: 0x"), "{}", out[0]);
    assert!(out[1].starts_with("function: 0x"), "{}", out[1]);
    assert_eq!(&out[2..], ["nil", "1.5"]);
}

#[test]
fn e2e_tonumber_bases() {
    let out = run_lua("return tonumber('777', 8), tonumber('-ff', 16), tonumber('10', 2), tonumber('8', 8)");
    assert_eq!(out, ["511", "-255", "2", "nil"]);
    let msg = run_lua_err("tonumber('1', 99)");
    assert!(msg.ends_with("bad argument #2 to 'tonumber' (base out of range)"), "{msg}");
}

// ── errors ─────────────────────────────────────────────────────────────────

#[test]
fn e2e_error_level_two_blames_the_caller() {
    let mut s = State::new();
    assert_eq!(
        s.load(
            b"local function check(x)\n  if not x then error('x required', 2) end\nend\ncheck(nil)",
            "=levels",
            None
        )
        .unwrap(),
        Status::Ok
    );
    assert_eq!(s.pcall(0, 0, 0).unwrap(), Status::ErrRun);
    assert_eq!(s.tostring_lossy(-1).as_deref(), Some("levels:4: x required"));
}

#[test]
fn e2e_assert_with_message_and_error_objects() {
    let msg = run_lua_err("assert(1 == 2, 'numbers differ')");
    assert_eq!(msg, "[string \"assert(1 == 2, 'numbers differ')\"]:1: numbers differ");
    let out = run_lua("return select('#', assert(1, 2, 3))");
    assert_eq!(out, ["3"]);
}

#[test]
fn e2e_select_out_of_range() {
    let msg = run_lua_err("return select(-5, 'a')");
    assert!(msg.ends_with("bad argument #1 to 'select' (index out of range)"), "{msg}");
    assert_eq!(run_lua("return select(9, 'a', 'b')"), Vec::<String>::new());
}

#[test]
fn e2e_argument_type_errors_name_the_function() {
    let msg = run_lua_err("return rawget('nope', 1)");
    assert!(
        msg.ends_with("bad argument #1 to 'rawget' (table expected, got string)"),
        "{msg}"
    );
    let msg = run_lua_err("return ipairs()");
    assert!(
        msg.ends_with("bad argument #1 to 'ipairs' (table expected, got no value)"),
        "{msg}"
    );
}

// ── raw access and traversal ───────────────────────────────────────────────

#[test]
fn e2e_raw_access_skips_metamethods() {
    let out = run_lua(
        "local log = {}
         local t = setmetatable({}, {
             __index = function() return 'meta' end,
             __newindex = function(t, k, v) log[#log + 1] = k end,
         })
         t.a = 1
         rawset(t, 'b', 2)
         return t.a, rawget(t, 'a'), t.b, #log, rawequal(t, t)",
    );
    assert_eq!(out, ["meta", "nil", "2", "1", "true"]);
}

#[test]
fn e2e_next_walks_every_entry() {
    let out = run_lua(
        "local t = {10, 20, 30, x = 'a', y = 'b'}
         local count, sum = 0, 0
         local k, v = next(t)
         while k do
             count = count + 1
             if type(v) == 'number' then sum = sum + v end
             k, v = next(t, k)
         end
         return count, sum, next({})",
    );
    assert_eq!(out, ["5", "60", "nil"]);
}

#[test]
fn e2e_unpack_with_explicit_bounds() {
    let out = run_lua("return unpack({1, 2, 3, 4}, 2, 3)");
    assert_eq!(out, ["2", "3"]);
    let out = run_lua("return select('#', unpack({}, 1, 3))");
    assert_eq!(out, ["3"]);
    let out = run_lua("return select('#', unpack({1, 2}, 3))");
    assert_eq!(out, ["0"]);
}

// ── environments ───────────────────────────────────────────────────────────

#[test]
fn e2e_setfenv_on_the_running_function() {
    let out = run_lua(
        "local function sandboxed()
             setfenv(1, {result = 'sandbox'})
             return result
         end
         result = 'global'
         return sandboxed(), result",
    );
    assert_eq!(out, ["sandbox", "global"]);
}

#[test]
fn e2e_setfenv_refuses_native_functions() {
    let msg = run_lua_err("setfenv(print, {})");
    assert!(
        msg.ends_with("'setfenv' cannot change environment of given object"),
        "{msg}"
    );
}

// ── coroutine library ──────────────────────────────────────────────────────

#[test]
fn e2e_wrap_generator_with_state() {
    let out = run_lua(
        "local function range(n)
             return coroutine.wrap(function()
                 for i = 1, n do coroutine.yield(i) end
             end)
         end
         local parts = {}
         for i in range(4) do parts[#parts + 1] = i end
         return parts[1] + parts[2] + parts[3] + parts[4], #parts",
    );
    assert_eq!(out, ["10", "4"]);
}

#[test]
fn e2e_wrap_error_carries_the_position() {
    let out = run_lua(
        "local f = coroutine.wrap(function() local x = nil; return x.y end)
         return pcall(f)",
    );
    assert_eq!(out[0], "false");
    assert!(out[1].contains("attempt to index local 'x' (a nil value)"), "{}", out[1]);
}

#[test]
fn e2e_create_requires_a_lua_function() {
    let msg = run_lua_err("coroutine.create(print)");
    assert!(msg.ends_with("(Lua function expected)"), "{msg}");
    let msg = run_lua_err("coroutine.resume(42)");
    assert!(msg.ends_with("(coroutine expected, got number)"), "{msg}");
}
