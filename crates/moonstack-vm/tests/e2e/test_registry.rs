use super::helpers::*;
use moonstack_vm::{LuaError, RegistryRef, State, NOREF, REFNIL, REGISTRYINDEX};
use proptest::prelude::*;
use std::collections::HashMap;

// ── anchoring values ───────────────────────────────────────────────────────

#[test]
fn e2e_ref_keeps_a_callback_alive_across_collections() {
    let mut s = State::new();
    run_in(&mut s, "function make() local n = 0 return function() n = n + 1 return n end end");
    s.getglobal("make").unwrap();
    s.call(0, 1).unwrap();
    let callback = s.ref_(REGISTRYINDEX);
    assert_eq!(s.gettop(), 0);

    s.dostring("collectgarbage() collectgarbage()").unwrap();
    for expected in 1..=3 {
        s.get_ref(REGISTRYINDEX, callback).unwrap();
        s.call(0, 1).unwrap();
        assert_eq!(s.tonumber(-1), expected as f64);
        s.pop(1);
    }
    s.unref(REGISTRYINDEX, callback).unwrap();
}

#[test]
fn e2e_sentinels() {
    let mut s = bare();
    assert_eq!(i32::from(RegistryRef::NIL), REFNIL);
    assert_eq!(i32::from(RegistryRef::NONE), NOREF);
    s.get_ref(REGISTRYINDEX, RegistryRef::NONE).unwrap();
    assert!(s.isnil(-1));
    s.unref(REGISTRYINDEX, RegistryRef::NONE).unwrap();
    s.unref(REGISTRYINDEX, RegistryRef::NIL).unwrap();
}

#[test]
fn e2e_stale_handle_after_unref_is_refused() {
    let mut s = bare();
    s.pushstring("first");
    let r = s.ref_(REGISTRYINDEX);
    s.unref(REGISTRYINDEX, r).unwrap();
    assert!(matches!(
        s.get_ref(REGISTRYINDEX, r),
        Err(LuaError::ContractViolation(_))
    ));
    assert!(matches!(
        s.unref(REGISTRYINDEX, r),
        Err(LuaError::ContractViolation(_))
    ));
}

#[test]
fn e2e_refs_are_visible_as_integer_keys_from_lua() {
    let mut s = State::new();
    s.newtable();
    s.pushvalue(-1);
    s.setglobal("store").unwrap();
    s.pushstring("alpha");
    let a = s.ref_(1);
    s.pushstring("beta");
    let b = s.ref_(1);
    s.settop(0);
    let src = format!("return store[{}], store[{}]", a.slot, b.slot);
    assert_eq!(run_in(&mut s, &src), ["alpha", "beta"]);
}

// ── properties ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
enum RefOp {
    Take(i32),
    Release(usize),
}

fn ref_op() -> impl Strategy<Value = RefOp> {
    prop_oneof![
        (0i32..1000).prop_map(RefOp::Take),
        (0usize..16).prop_map(RefOp::Release),
    ]
}

proptest! {
    #[test]
    fn prop_live_refs_always_resolve(ops in proptest::collection::vec(ref_op(), 1..80)) {
        let mut s = bare();
        s.newtable();
        let mut live: Vec<RegistryRef> = Vec::new();
        let mut model: HashMap<RegistryRef, i32> = HashMap::new();
        for op in ops {
            match op {
                RefOp::Take(n) => {
                    s.pushinteger(n as i64);
                    let r = s.ref_(1);
                    prop_assert!(!r.is_sentinel());
                    prop_assert!(!model.contains_key(&r));
                    live.push(r);
                    model.insert(r, n);
                }
                RefOp::Release(i) if !live.is_empty() => {
                    let r = live.swap_remove(i % live.len());
                    model.remove(&r);
                    s.unref(1, r).unwrap();
                }
                RefOp::Release(_) => {}
            }
            prop_assert_eq!(s.gettop(), 1);
        }
        for (r, n) in &model {
            s.get_ref(1, *r).unwrap();
            prop_assert_eq!(s.tointeger(-1), *n as i64);
            s.pop(1);
        }
    }
}
