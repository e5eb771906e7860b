use super::helpers::*;
use moonstack_vm::{GcOp, LuaResult, State};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

// ── finalizers ─────────────────────────────────────────────────────────────

#[test]
fn e2e_lua_finalizer_runs_after_collection() {
    let out = run_lua(
        "local log = {}
         local mt = {__gc = function(o) log[#log + 1] = o.name end}
         local function make(name) setmetatable({name = name}, mt) end
         make('first')
         make('second')
         collectgarbage()
         local a, b = log[1], log[2]
         if a > b then a, b = b, a end
         return #log, a, b",
    );
    assert_eq!(out, ["2", "first", "second"]);
}

#[test]
fn e2e_reachable_objects_are_not_finalized() {
    let out = run_lua(
        "local count = 0
         local keep = setmetatable({}, {__gc = function() count = count + 1 end})
         collectgarbage()
         collectgarbage()
         return count, type(keep)",
    );
    assert_eq!(out, ["0", "table"]);
}

#[test]
fn e2e_failing_finalizer_does_not_break_the_state() {
    let out = run_lua(
        "local function make() setmetatable({}, {__gc = function() error('boom') end}) end
         make()
         collectgarbage()
         return 'still alive'",
    );
    assert_eq!(out, ["still alive"]);
}

static CLOSED: AtomicUsize = AtomicUsize::new(0);

fn count_close(_: &mut State) -> LuaResult<usize> {
    CLOSED.fetch_add(1, Ordering::SeqCst);
    Ok(0)
}

#[test]
fn e2e_close_runs_pending_finalizers_and_drops_host_values() {
    struct Resource(Rc<Cell<bool>>);
    impl Drop for Resource {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }
    let dropped = Rc::new(Cell::new(false));
    let mut s = State::new();
    s.new_userdata_typed(Resource(Rc::clone(&dropped)));
    s.newtable();
    s.pushcfunction(count_close);
    s.setfield(-2, "__gc").unwrap();
    s.setmetatable(-2);
    s.setglobal("resource").unwrap();

    let before = CLOSED.load(Ordering::SeqCst);
    s.gc(GcOp::Collect, 0);
    assert_eq!(CLOSED.load(Ordering::SeqCst), before);
    assert!(!dropped.get());

    s.close();
    assert_eq!(CLOSED.load(Ordering::SeqCst), before + 1);
    assert!(dropped.get());
}

// ── weak tables ────────────────────────────────────────────────────────────

#[test]
fn e2e_weak_keys_drop_dead_entries() {
    let out = run_lua(
        "local cache = setmetatable({}, {__mode = 'k'})
         local live = {}
         cache[live] = 'kept'
         local function add() cache[{}] = 'dropped' end
         add()
         collectgarbage()
         local n = 0
         for k, v in pairs(cache) do n = n + 1 end
         return n, cache[live]",
    );
    assert_eq!(out, ["1", "kept"]);
}

#[test]
fn e2e_weak_values_keep_strings_and_numbers() {
    let out = run_lua(
        "local t = setmetatable({}, {__mode = 'v'})
         t[1] = 'text'
         t[2] = 42
         local function add() t[3] = {} end
         add()
         collectgarbage()
         return t[1], t[2], t[3]",
    );
    assert_eq!(out, ["text", "42", "nil"]);
}

// ── collector control ──────────────────────────────────────────────────────

#[test]
fn e2e_collectgarbage_options() {
    let out = run_lua(
        "local before = collectgarbage('count')
         local hold = {}
         for i = 1, 2000 do hold[i] = {i} end
         local grown = collectgarbage('count')
         hold = nil
         collectgarbage('collect')
         local after = collectgarbage('count')
         return before > 0, grown > before, after < grown, collectgarbage('step')",
    );
    assert_eq!(out, ["true", "true", "true", "true"]);
}

#[test]
fn e2e_collectgarbage_rejects_unknown_options() {
    let msg = run_lua_err("collectgarbage('bogus')");
    assert!(
        msg.ends_with("bad argument #1 to 'collectgarbage' (invalid option 'bogus')"),
        "{msg}"
    );
}

#[test]
fn e2e_stopped_collector_still_collects_on_request() {
    let mut s = State::new();
    s.gc(GcOp::Stop, 0);
    run_in(&mut s, "for i = 1, 5000 do local t = {i} end");
    let grown = s.gc(GcOp::Count, 0);
    s.gc(GcOp::Collect, 0);
    assert!(s.gc(GcOp::Count, 0) <= grown);
    s.gc(GcOp::Restart, 0);
    assert_eq!(run_in(&mut s, "return 'ok'"), ["ok"]);
}
