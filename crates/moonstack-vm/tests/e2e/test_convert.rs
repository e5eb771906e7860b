use super::helpers::*;
use moonstack_vm::{LuaError, LuaResult, NativeFn, RegistryRef, State, REGISTRYINDEX};

// ── host calls into Lua ────────────────────────────────────────────────────

#[test]
fn e2e_call_global_with_typed_arguments() {
    let mut s = State::new();
    run_in(
        &mut s,
        "function describe(name, count, loud)
             local text = name .. ' x' .. count
             if loud then text = text .. '!' end
             return text
         end",
    );
    let quiet: String = s.call_global("describe", ("apple", 3, false)).unwrap();
    let loud: String = s.call_global("describe", ("pear".to_owned(), 2u32, true)).unwrap();
    assert_eq!(quiet, "apple x3");
    assert_eq!(loud, "pear x2!");
    assert_eq!(s.gettop(), 0);
}

#[test]
fn e2e_lua_errors_come_back_as_typed_faults() {
    let mut s = State::new();
    run_in(
        &mut s,
        "function fails() error('plain failure') end
         function throws() error({code = 7}) end",
    );
    s.pushstring("sentinel");

    let err = s.call_global::<_, ()>("fails", ()).unwrap_err();
    assert!(matches!(&err, LuaError::Runtime(m) if m.ends_with("plain failure")), "{err}");

    let err = s.call_global::<_, ()>("throws", ()).unwrap_err();
    assert!(matches!(err, LuaError::Value(_)));
    assert_eq!(err.to_string(), "(error object is a table value)");

    assert_eq!(s.gettop(), 1);
    assert_eq!(s.tostring_lossy(1).as_deref(), Some("sentinel"));
}

#[test]
fn e2e_missing_global_is_a_call_error() {
    let mut s = State::new();
    let err = s.call_global::<_, f64>("nowhere", (1,)).unwrap_err();
    assert!(err.to_string().contains("attempt to call"), "{err}");
}

#[test]
fn e2e_vec_arguments_spread_into_varargs() {
    let mut s = State::new();
    run_in(&mut s, "function count(...) return select('#', ...) end");
    let n: usize = s.call_global("count", vec!["a", "b", "c", "d"]).unwrap();
    assert_eq!(n, 4);
    let n: usize = s.call_global("count", Vec::<i32>::new()).unwrap();
    assert_eq!(n, 0);
}

#[test]
fn e2e_optional_results() {
    let mut s = State::new();
    run_in(&mut s, "function lookup(k) local t = {a = 1} return t[k] end");
    let hit: Option<f64> = s.call_global("lookup", ("a",)).unwrap();
    let miss: Option<f64> = s.call_global("lookup", ("z",)).unwrap();
    assert_eq!(hit, Some(1.0));
    assert_eq!(miss, None);
}

// ── Lua calls into the host ────────────────────────────────────────────────

fn greet(s: &mut State) -> LuaResult<usize> {
    let name: String = s.check_value(1)?;
    let times: Option<u32> = s.check_value(2)?;
    let line = vec![format!("hi {name}"); times.unwrap_or(1) as usize].join(" ");
    s.push_value(line)?;
    Ok(1)
}

#[test]
fn e2e_typed_native_called_from_lua() {
    let mut s = State::new();
    s.push_value(greet as NativeFn).unwrap();
    s.setglobal("greet").unwrap();
    assert_eq!(
        run_in(&mut s, "return greet('moon'), greet('sun', 2)"),
        ["hi moon", "hi sun hi sun"]
    );
    let out = run_in(&mut s, "return pcall(greet, 'x', 1.5)");
    assert_eq!(out[1], "bad argument #2 to '?' (integer expected, got number)");
    let msg = run_in(&mut s, "local ok, e = pcall(function() return greet({}) end) return e");
    assert!(msg[0].ends_with("bad argument #1 to 'greet' (string expected, got table)"), "{}", msg[0]);
}

/// Calls back into Lua from inside a native: `twice(f, x)` is `f(f(x))`.
fn twice(s: &mut State) -> LuaResult<usize> {
    let x: f64 = s.check_value(2)?;
    let once: f64 = s.call_function(1, (x,))?;
    let again: f64 = s.call_function(1, (once,))?;
    s.push_value(again)?;
    Ok(1)
}

#[test]
fn e2e_reentrant_calls_through_the_typed_layer() {
    let mut s = State::new();
    s.register("twice", twice).unwrap();
    assert_eq!(run_in(&mut s, "return twice(function(n) return n * 3 end, 2)"), ["18"]);
    let out = run_in(&mut s, "return pcall(twice, function() error('inner', 0) end, 1)");
    assert_eq!(out, ["false", "inner"]);
}

// ── anchored callbacks ─────────────────────────────────────────────────────

#[test]
fn e2e_registry_ref_holds_a_lua_callback() {
    let mut s = State::new();
    run_in(
        &mut s,
        "function make_handler(prefix)
             local seen = 0
             return function(event)
                 seen = seen + 1
                 return prefix .. event .. '#' .. seen
             end
         end",
    );
    let handler: RegistryRef = s.call_global("make_handler", ("on:",)).unwrap();
    run_in(&mut s, "make_handler = nil collectgarbage()");

    let mut replies = Vec::new();
    for event in ["open", "close"] {
        s.push_value(handler).unwrap();
        let reply: String = s.call_function(-1, (event,)).unwrap();
        s.pop(1);
        replies.push(reply);
    }
    assert_eq!(replies, ["on:open#1", "on:close#2"]);
    s.unref(REGISTRYINDEX, handler).unwrap();
    assert_eq!(s.gettop(), 0);
}

#[test]
fn e2e_native_functions_round_trip() {
    let mut s = State::new();
    s.getglobal("print").unwrap();
    assert!(s.get_value::<NativeFn>(-1).is_some());
    run_in(&mut s, "function lua_fn() end");
    s.getglobal("lua_fn").unwrap();
    assert!(s.get_value::<NativeFn>(-1).is_none());
    s.settop(0);
    let err = s.check_value::<NativeFn>(1);
    assert!(err.is_err());
}
