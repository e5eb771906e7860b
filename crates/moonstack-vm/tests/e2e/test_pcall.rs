use super::helpers::*;
use moonstack_vm::{LuaError, LuaResult, State, StateConfig, Status, MULTRET};
use std::sync::atomic::{AtomicUsize, Ordering};

// ── statuses and error values ──────────────────────────────────────────────

#[test]
fn e2e_runtime_error_carries_position() {
    let msg = run_lua_err("local t = nil\nlocal x = t.field");
    assert_eq!(
        msg,
        "[string \"local t = nil...\"]:2: attempt to index local 't' (a nil value)"
    );
}

#[test]
fn e2e_arithmetic_on_global_names_the_variable() {
    let msg = run_lua_err("return undefined_value + 1");
    assert!(
        msg.ends_with("attempt to perform arithmetic on global 'undefined_value' (a nil value)"),
        "{msg}"
    );
}

#[test]
fn e2e_calling_nil_field() {
    let msg = run_lua_err("local t = {}\nt.missing()");
    assert!(msg.ends_with("attempt to call field 'missing' (a nil value)"), "{msg}");
}

#[test]
fn e2e_nested_pcall_only_catches_inner() {
    let out = run_lua(
        "local log = {}
         local ok1, e1 = pcall(function()
             local ok2, e2 = pcall(error, 'inner', 0)
             log[#log + 1] = tostring(ok2) .. ':' .. e2
             error('outer', 0)
         end)
         return log[1], ok1, e1",
    );
    assert_eq!(out, ["false:inner", "false", "outer"]);
}

#[test]
fn e2e_error_objects_pass_through_untouched() {
    let out = run_lua(
        "local obj = {code = 42}
         local ok, e = pcall(error, obj)
         return ok, e == obj, e.code",
    );
    assert_eq!(out, ["false", "true", "42"]);
}

#[test]
fn e2e_host_pcall_restores_the_stack() {
    let mut s = State::new();
    s.pushstring("below");
    s.loadstring("local a, b = ... error('x' .. a .. b, 0)").unwrap();
    s.pushstring("1");
    s.pushstring("2");
    assert_eq!(s.pcall(2, MULTRET, 0).unwrap(), Status::ErrRun);
    assert_eq!(s.gettop(), 2);
    assert_eq!(s.tostring_lossy(1).as_deref(), Some("below"));
    assert_eq!(s.tostring_lossy(2).as_deref(), Some("x12"));
}

// ── error handlers ─────────────────────────────────────────────────────────

fn traceback_handler(s: &mut State) -> LuaResult<usize> {
    let msg = s.tostring_lossy(1).unwrap_or_default();
    let tb = s.traceback(1, Some(&msg));
    s.pushstring(&tb);
    Ok(1)
}

#[test]
fn e2e_handler_runs_before_unwinding() {
    let mut s = State::new();
    s.pushcfunction(traceback_handler);
    let src = "local function deep() error('deep failure') end\nlocal function mid() deep() end\nmid()";
    assert_eq!(s.load(src.as_bytes(), "=chunk", None).unwrap(), Status::Ok);
    assert_eq!(s.pcall(0, 0, 1).unwrap(), Status::ErrRun);
    let text = s.tostring_lossy(-1).unwrap();
    assert!(text.starts_with("chunk:1: deep failure\nstack traceback:"), "{text}");
    assert!(text.contains("in function 'deep'"), "{text}");
    assert!(text.contains("in function 'mid'"), "{text}");
    assert!(text.contains("in main chunk"), "{text}");
}

#[test]
fn e2e_xpcall_handler_failure_is_errerr() {
    let mut s = State::new();
    s.pushcfunction(|s: &mut State| -> LuaResult<usize> {
        s.pushstring("handler broke");
        Err(s.error())
    });
    s.loadstring("error('first')").unwrap();
    assert_eq!(s.pcall(0, 0, 1).unwrap(), Status::ErrErr);
    assert_eq!(s.tostring_lossy(-1).as_deref(), Some("error in error handling"));
}

// ── overflow ───────────────────────────────────────────────────────────────

#[test]
fn e2e_lua_recursion_overflows_cleanly() {
    let mut s = State::with_config(StateConfig {
        max_call_depth: 150,
        ..StateConfig::default()
    });
    let out = run_in(
        &mut s,
        "local function down(n) return 1 + down(n + 1) end
         local ok, e = pcall(down, 1)
         return ok, e",
    );
    assert_eq!(out[0], "false");
    assert!(out[1].contains("stack overflow"), "{}", out[1]);
    // the state stays usable afterwards
    assert_eq!(run_in(&mut s, "return 1 + 1"), ["2"]);
}

#[test]
fn e2e_native_reentry_hits_the_c_stack_limit() {
    let mut s = State::with_config(StateConfig {
        max_c_calls: 20,
        ..StateConfig::default()
    });
    let out = run_in(
        &mut s,
        "local function again() local ok, e = pcall(again) if not ok then error(e, 0) end end
         return pcall(again)",
    );
    assert_eq!(out[0], "false");
    assert!(out[1].ends_with("C stack overflow"), "{}", out[1]);
}

// ── unprotected faults ─────────────────────────────────────────────────────

static PANICS: AtomicUsize = AtomicUsize::new(0);

fn count_panic(_: &mut State) {
    PANICS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn e2e_unprotected_fault_calls_panic_and_disables_the_state() {
    let mut s = State::new();
    s.atpanic(count_panic);
    s.loadstring("error('nobody catches this')").unwrap();
    let before = PANICS.load(Ordering::SeqCst);
    let err = s.call(0, 0).unwrap_err();
    assert!(err.to_string().ends_with("nobody catches this"));
    assert_eq!(PANICS.load(Ordering::SeqCst), before + 1);
    assert!(s.is_aborted());
    assert!(matches!(
        s.dostring("return 1"),
        Err(LuaError::ContractViolation(_))
    ));
}

#[test]
fn e2e_contract_violation_is_not_caught_by_pcall() {
    fn lying(_: &mut State) -> LuaResult<usize> {
        Ok(3)
    }
    let mut s = State::new();
    s.register("lying", lying).unwrap();
    let r = s.dostring("return pcall(lying)");
    assert!(matches!(r, Err(LuaError::ContractViolation(_))));
}
