use super::helpers::*;
use moonstack_vm::{LuaError, LuaResult, State, Status, ThreadStatus};

// ── host-driven coroutines ─────────────────────────────────────────────────

#[test]
fn e2e_host_resumes_a_lua_generator() {
    let mut s = State::new();
    run_in(
        &mut s,
        "function gen(limit)
             for i = 1, limit do coroutine.yield(i, i * i) end
             return 'done'
         end",
    );
    let co = s.newthread();
    s.with_thread(&co, |t| {
        t.getglobal("gen").unwrap();
        t.pushnumber(3.0);
    })
    .unwrap();

    let mut seen = Vec::new();
    let mut nargs = 1;
    loop {
        let status = s.resume(&co, nargs).unwrap();
        let values = s.with_thread(&co, drain).unwrap();
        seen.push(values);
        nargs = 0;
        if status != Status::Yield {
            assert_eq!(status, Status::Ok);
            break;
        }
        assert_eq!(s.status(&co).unwrap(), ThreadStatus::Suspended);
    }
    assert_eq!(seen, [vec!["1", "1"], vec!["2", "4"], vec!["3", "9"], vec!["done"]]);
    assert_eq!(s.status(&co).unwrap(), ThreadStatus::Dead);
}

#[test]
fn e2e_resume_passes_values_into_yield() {
    let mut s = State::new();
    let co = s.newthread();
    s.with_thread(&co, |t| {
        t.loadstring("local a = coroutine.yield('ready') return a * 2").unwrap();
    })
    .unwrap();
    assert_eq!(s.resume(&co, 0).unwrap(), Status::Yield);
    s.with_thread(&co, |t| {
        assert_eq!(t.tostring_lossy(-1).as_deref(), Some("ready"));
        t.settop(0);
        t.pushnumber(21.0);
    })
    .unwrap();
    assert_eq!(s.resume(&co, 1).unwrap(), Status::Ok);
    let result = s.with_thread(&co, |t| t.tonumber(-1)).unwrap();
    assert_eq!(result, 42.0);
}

#[test]
fn e2e_error_inside_coroutine_kills_it() {
    let mut s = State::new();
    let co = s.newthread();
    s.with_thread(&co, |t| {
        t.loadstring("coroutine.yield() error('broken', 0)").unwrap();
    })
    .unwrap();
    assert_eq!(s.resume(&co, 0).unwrap(), Status::Yield);
    assert_eq!(s.resume(&co, 0).unwrap(), Status::ErrRun);
    let msg = s.with_thread(&co, |t| t.tostring_lossy(-1)).unwrap();
    assert_eq!(msg.as_deref(), Some("broken"));
    assert_eq!(s.status(&co).unwrap(), ThreadStatus::Dead);

    assert_eq!(s.resume(&co, 0).unwrap(), Status::ErrRun);
    let msg = s.with_thread(&co, |t| t.tostring_lossy(-1)).unwrap();
    assert_eq!(msg.as_deref(), Some("cannot resume dead coroutine"));
}

// ── yield restrictions ─────────────────────────────────────────────────────

fn yield_from_nested_call(s: &mut State) -> LuaResult<usize> {
    s.getglobal("coroutine").unwrap();
    s.getfield(-1, "yield").unwrap();
    s.call(0, 0)?;
    Ok(0)
}

#[test]
fn e2e_yield_across_native_call_is_refused() {
    let mut s = State::new();
    s.register("nested", yield_from_nested_call).unwrap();
    let out = run_in(
        &mut s,
        "local co = coroutine.create(function() nested() end)
         return coroutine.resume(co)",
    );
    assert_eq!(out[0], "false");
    assert!(
        out[1].ends_with("attempt to yield across metamethod/C-call boundary"),
        "{}",
        out[1]
    );
}

#[test]
fn e2e_yield_inside_pcall_is_refused() {
    let out = run_lua(
        "local co = coroutine.create(function()
             return pcall(coroutine.yield, 1)
         end)
         return coroutine.resume(co)",
    );
    assert_eq!(out[0], "true");
    assert_eq!(out[1], "false");
    assert!(out[2].contains("attempt to yield across"), "{}", out[2]);
}

#[test]
fn e2e_isyieldable_tracks_the_running_thread() {
    fn yieldable(s: &mut State) -> LuaResult<usize> {
        let y = s.isyieldable();
        s.pushboolean(y);
        Ok(1)
    }
    let mut s = State::new();
    s.register("yieldable", yieldable).unwrap();
    let out = run_in(
        &mut s,
        "local co = coroutine.create(function() return yieldable() end)
         local _, inside = coroutine.resume(co)
         return yieldable(), inside",
    );
    assert_eq!(out, ["false", "true"]);
}

// ── statuses and handles ───────────────────────────────────────────────────

#[test]
fn e2e_statuses_seen_from_lua() {
    let out = run_lua(
        "local outer
         local inner = coroutine.create(function()
             return coroutine.status(outer)
         end)
         outer = coroutine.create(function()
             local _, st = coroutine.resume(inner)
             return st, coroutine.status(outer)
         end)
         local before = coroutine.status(outer)
         local _, a, b = coroutine.resume(outer)
         return before, a, b, coroutine.status(outer)",
    );
    assert_eq!(out, ["suspended", "normal", "running", "dead"]);
}

#[test]
fn e2e_resume_running_coroutine_fails() {
    let out = run_lua(
        "local co
         co = coroutine.create(function() return coroutine.resume(co) end)
         return coroutine.resume(co)",
    );
    assert_eq!(out, ["true", "false", "cannot resume running coroutine"]);
}

#[test]
fn e2e_threads_from_another_state_are_rejected() {
    let mut a = State::new();
    let mut b = State::new();
    let co = a.newthread();
    assert!(matches!(b.resume(&co, 0), Err(LuaError::ContractViolation(_))));
    assert!(matches!(b.status(&co), Err(LuaError::ContractViolation(_))));
    let main_b = b.main_thread();
    assert!(matches!(a.xmove(&main_b, &co, 0), Err(LuaError::ContractViolation(_))));
}

#[test]
fn e2e_tothread_and_pushthread() {
    let mut s = State::new();
    assert!(s.pushthread());
    let main = s.tothread(-1).unwrap();
    assert_eq!(main, s.main_thread());
    assert_eq!(s.running(), main);
    s.pop(1);

    let co = s.newthread();
    let from_stack = s.tothread(-1).unwrap();
    assert_eq!(from_stack, co);
    let inside = s.with_thread(&co, |t| t.pushthread()).unwrap();
    assert!(!inside);
}

#[test]
fn e2e_threads_share_globals() {
    let mut s = State::new();
    run_in(&mut s, "shared = 'from main'");
    let co = s.newthread();
    let seen = s
        .with_thread(&co, |t| {
            t.getglobal("shared").unwrap();
            t.tostring_lossy(-1)
        })
        .unwrap();
    assert_eq!(seen.as_deref(), Some("from main"));
}
