use super::helpers::*;
use moonstack_vm::{GcOp, LuaFunction, LuaTable, MethodsBuilder, State, UserData};
use std::cell::RefCell;
use std::rc::Rc;

// ── closures ───────────────────────────────────────────────────────────────

#[test]
fn e2e_lua_callbacks_reach_a_host_log() {
    let mut s = State::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let record = s.create_function(move |_, (level, text): (String, String)| {
        sink.borrow_mut().push(format!("[{level}] {text}"));
        Ok(())
    });
    s.globals().set(&mut s, "record", &record).unwrap();
    run_in(&mut s, "for i = 1, 2 do record('info', 'step ' .. i) end record('warn', 'done')");
    assert_eq!(*log.borrow(), ["[info] step 1", "[info] step 2", "[warn] done"]);
}

#[test]
fn e2e_function_handle_calls_lua() {
    let mut s = State::new();
    run_in(&mut s, "function greet(who) return 'hello ' .. who end");
    let greet: LuaFunction = s.globals().get(&mut s, "greet").unwrap();
    let text: String = greet.call(&mut s, ("moon",)).unwrap();
    assert_eq!(text, "hello moon");
    assert_eq!(s.gettop(), 0);
}

// ── table handles ──────────────────────────────────────────────────────────

#[test]
fn e2e_ipairs_stops_at_the_first_hole() {
    let mut s = State::new();
    run_in(&mut s, "list = {'a', 'b', 'c', nil, 'e'}");
    let list: LuaTable = s.globals().get(&mut s, "list").unwrap();
    let seen: Vec<(i64, String)> = list.ipairs(&mut s).unwrap().map(Result::unwrap).collect();
    assert_eq!(seen, [(1, "a".to_owned()), (2, "b".to_owned()), (3, "c".to_owned())]);
    assert_eq!(s.gettop(), 0);
}

#[test]
fn e2e_table_handle_honours_metatables() {
    let mut s = State::new();
    let t = s.create_table();
    let mt = s.create_table();
    run_in(&mut s, "function fallback(_, k) return 'missing ' .. k end");
    let fallback: LuaFunction = s.globals().get(&mut s, "fallback").unwrap();
    mt.set(&mut s, "__index", &fallback).unwrap();
    t.set_metatable(&mut s, Some(&mt)).unwrap();

    let via_meta: String = t.get(&mut s, "x").unwrap();
    let raw: Option<String> = t.raw_get(&mut s, "x").unwrap();
    assert_eq!(via_meta, "missing x");
    assert_eq!(raw, None);
    assert!(t.metatable(&mut s).unwrap().is_some());
}

#[test]
fn e2e_handles_outlive_their_state() {
    let mut s = bare();
    let t = s.create_table();
    let copy = t.clone();
    drop(s);
    drop(t);
    drop(copy);
}

// ── userdata ───────────────────────────────────────────────────────────────

struct Account {
    balance: f64,
}

impl UserData for Account {
    fn methods(m: &mut MethodsBuilder<Self>) {
        m.add("balance", |_, a, ()| Ok((a.balance,)));
        m.add_mut("deposit", |_, a, (amount,): (f64,)| {
            a.balance += amount;
            Ok(())
        });
        m.add_mut("audit", |s, a, (check,): (LuaFunction,)| {
            a.balance -= 1.0;
            check.call::<_, ()>(s, ())
        });
    }

    fn meta_methods(m: &mut MethodsBuilder<Self>) {
        m.add("__tostring", |_, a, ()| Ok((format!("Account({})", a.balance),)));
    }
}

#[test]
fn e2e_userdata_methods_from_lua() {
    let mut s = State::new();
    s.push_userdata(Account { balance: 10.0 }).unwrap();
    s.setglobal("acct").unwrap();
    let out = run_in(&mut s, "acct:deposit(5) return acct:balance(), tostring(acct), type(acct)");
    assert_eq!(out, ["15", "Account(15)", "userdata"]);
}

#[test]
fn e2e_reentrant_mutable_method_is_an_error() {
    let mut s = State::new();
    s.push_userdata(Account { balance: 3.0 }).unwrap();
    s.setglobal("acct").unwrap();
    let out = run_in(
        &mut s,
        "local ok, err = pcall(function()
             acct:audit(function() acct:deposit(1) end)
         end)
         return ok, err",
    );
    assert_eq!(out[0], "false");
    assert!(out[1].contains("Account is already borrowed"), "{}", out[1]);
}

#[test]
fn e2e_collected_userdata_drops_its_value() {
    struct Tracked {
        _token: Rc<()>,
    }
    impl UserData for Tracked {}

    let token = Rc::new(());
    let mut s = State::new();
    s.push_userdata(Tracked { _token: Rc::clone(&token) }).unwrap();
    assert!(s.get_userdata::<Tracked>(-1).is_some());
    assert!(s.get_userdata::<Account>(-1).is_none());
    s.pop(1);
    s.gc(GcOp::Collect, 0);
    assert_eq!(Rc::strong_count(&token), 1);
}
