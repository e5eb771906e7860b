use super::helpers::*;
use moonstack_vm::{
    upvalueindex, LuaError, LuaResult, LuaType, State, StateConfig, GLOBALSINDEX, REGISTRYINDEX,
};
use proptest::prelude::*;

// ── shape operations ───────────────────────────────────────────────────────

fn numbers(s: &mut State) -> Vec<f64> {
    (1..=s.gettop()).map(|i| s.tonumber(i)).collect()
}

#[test]
fn e2e_settop_pads_with_nil_and_truncates() {
    let mut s = bare();
    s.pushnumber(1.0);
    s.settop(3);
    assert_eq!(s.gettop(), 3);
    assert!(s.isnil(2));
    assert!(s.isnil(3));
    s.settop(-3);
    assert_eq!(s.gettop(), 1);
    s.settop(0);
    assert_eq!(s.gettop(), 0);
}

#[test]
fn e2e_insert_remove_replace() {
    let mut s = bare();
    for n in 1..=4 {
        s.pushnumber(n as f64);
    }
    s.insert(1);
    assert_eq!(numbers(&mut s), [4.0, 1.0, 2.0, 3.0]);
    s.remove(2);
    assert_eq!(numbers(&mut s), [4.0, 2.0, 3.0]);
    s.pushnumber(9.0);
    s.replace(1);
    assert_eq!(numbers(&mut s), [9.0, 2.0, 3.0]);
    s.pushvalue(-2);
    assert_eq!(numbers(&mut s), [9.0, 2.0, 3.0, 2.0]);
}

#[test]
fn e2e_absindex_survives_pushes() {
    let mut s = bare();
    s.pushstring("a");
    s.pushstring("b");
    let idx = s.absindex(-2);
    assert_eq!(idx, 1);
    s.pushnil();
    assert_eq!(s.tostring_lossy(idx).as_deref(), Some("a"));
    assert_eq!(s.absindex(REGISTRYINDEX), REGISTRYINDEX);
}

#[test]
fn e2e_invalid_index_reads_as_none() {
    let mut s = bare();
    s.pushnumber(1.0);
    assert_eq!(s.type_of(5), LuaType::None);
    assert!(s.isnone(5));
    assert!(s.isnoneornil(5));
    assert_eq!(s.tonumber(5), 0.0);
    assert!(s.tolstring(5).is_none());
}

#[test]
fn e2e_checkstack_respects_the_limit() {
    let mut s = State::with_config(StateConfig {
        max_stack_slots: 200,
        open_base_library: false,
        ..StateConfig::default()
    });
    assert!(s.checkstack(50).is_ok());
    assert!(matches!(s.checkstack(10_000), Err(LuaError::OutOfMemory)));
    assert_eq!(s.gettop(), 0);
}

// ── conversions ────────────────────────────────────────────────────────────

#[test]
fn e2e_number_string_conversions() {
    let mut s = bare();
    s.pushstring("  0x1F  ");
    s.pushnumber(3.0);
    s.pushnumber(0.1);
    s.pushstring("12abc");
    assert_eq!(s.tonumberx(1), Some(31.0));
    assert_eq!(s.tostring_lossy(2).as_deref(), Some("3"));
    assert_eq!(s.type_of(2), LuaType::String);
    assert_eq!(s.tostring_lossy(3).as_deref(), Some("0.1"));
    assert_eq!(s.tonumberx(4), None);
    assert_eq!(s.tonumber(4), 0.0);
}

#[test]
fn e2e_tointeger_truncates() {
    let mut s = bare();
    s.pushnumber(-2.75);
    s.pushnumber(7.9);
    assert_eq!(s.tointeger(1), -2);
    assert_eq!(s.tointeger(2), 7);
}

#[test]
fn e2e_concat_and_objlen() {
    let mut s = bare();
    s.pushstring("x=");
    s.pushnumber(12.0);
    s.pushstring(";");
    s.concat(3).unwrap();
    assert_eq!(s.tostring_lossy(-1).as_deref(), Some("x=12;"));
    assert_eq!(s.objlen(-1), 5);
    s.concat(0).unwrap();
    assert_eq!(s.objlen(-1), 0);
    assert_eq!(s.gettop(), 2);
}

// ── pseudo-indices ─────────────────────────────────────────────────────────

fn counter(s: &mut State) -> LuaResult<usize> {
    let n = s.tonumber(upvalueindex(1)) + 1.0;
    s.pushnumber(n);
    s.pushvalue(-1);
    s.replace(upvalueindex(1));
    Ok(1)
}

#[test]
fn e2e_native_upvalues_persist_between_calls() {
    let mut s = bare();
    s.pushnumber(0.0);
    s.pushcclosure(counter, 1);
    s.setglobal("tick").unwrap();
    for expected in 1..=3 {
        s.getglobal("tick").unwrap();
        s.call(0, 1).unwrap();
        assert_eq!(s.tonumber(-1), expected as f64);
        s.pop(1);
    }
}

#[test]
fn e2e_globals_and_registry_pseudo_indices() {
    let mut s = bare();
    s.pushnumber(5.0);
    s.setfield(GLOBALSINDEX, "five").unwrap();
    s.getglobal("five").unwrap();
    assert_eq!(s.tonumber(-1), 5.0);

    s.pushstring("hidden");
    s.setfield(REGISTRYINDEX, "moonstack.test").unwrap();
    s.getglobal("moonstack.test").unwrap();
    assert!(s.isnil(-1));
    s.getfield(REGISTRYINDEX, "moonstack.test").unwrap();
    assert_eq!(s.tostring_lossy(-1).as_deref(), Some("hidden"));
}

#[test]
fn e2e_native_frames_see_only_their_arguments() {
    let mut s = bare();
    s.pushstring("outside");
    s.register("sum", native_sum).unwrap();
    s.getglobal("sum").unwrap();
    s.pushnumber(2.0);
    s.pushnumber(3.0);
    s.call(2, 1).unwrap();
    assert_eq!(s.gettop(), 2);
    assert_eq!(s.tonumber(2), 5.0);
    assert_eq!(s.tostring_lossy(1).as_deref(), Some("outside"));
}

#[test]
fn e2e_dump_stack_lists_every_slot() {
    let mut s = bare();
    s.pushnumber(1.5);
    s.pushstring("hi");
    s.pushboolean(true);
    let dump = s.dump_stack();
    assert_eq!(dump.lines().count(), 3);
    assert!(dump.lines().next().unwrap().starts_with("1: number"));
}

// ── properties ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
enum Op {
    Push(f64),
    Pop(i32),
    Insert(i32),
    Remove(i32),
    SetTop(i32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-1.0e6f64..1.0e6).prop_map(Op::Push),
        (0i32..3).prop_map(Op::Pop),
        (1i32..6).prop_map(Op::Insert),
        (1i32..6).prop_map(Op::Remove),
        (0i32..8).prop_map(Op::SetTop),
    ]
}

proptest! {
    #[test]
    fn prop_stack_matches_a_vec_model(ops in proptest::collection::vec(op(), 1..60)) {
        let mut s = bare();
        let mut model: Vec<Option<f64>> = Vec::new();
        for op in ops {
            match op {
                Op::Push(n) => {
                    s.pushnumber(n);
                    model.push(Some(n));
                }
                Op::Pop(n) if n as usize <= model.len() => {
                    s.pop(n);
                    model.truncate(model.len() - n as usize);
                }
                Op::Insert(i) if (i as usize) <= model.len() => {
                    s.insert(i);
                    let v = model.pop().unwrap();
                    model.insert(i as usize - 1, v);
                }
                Op::Remove(i) if (i as usize) <= model.len() => {
                    s.remove(i);
                    model.remove(i as usize - 1);
                }
                Op::SetTop(n) => {
                    s.settop(n);
                    model.resize(n as usize, None);
                }
                _ => {}
            }
            prop_assert_eq!(s.gettop() as usize, model.len());
        }
        for (i, v) in model.iter().enumerate() {
            prop_assert_eq!(s.tonumberx(i as i32 + 1), *v);
        }
    }
}
