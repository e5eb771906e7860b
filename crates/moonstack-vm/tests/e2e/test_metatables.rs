use super::helpers::*;
use moonstack_vm::{LuaResult, LuaType, State, Status};

// ── indexing ───────────────────────────────────────────────────────────────

#[test]
fn e2e_index_table_fallback() {
    let out = run_lua(
        "local base = {greeting = 'hello'}
         local obj = setmetatable({}, {__index = base})
         obj.own = 'mine'
         return obj.greeting, obj.own, rawget(obj, 'greeting')",
    );
    assert_eq!(out, ["hello", "mine", "nil"]);
}

#[test]
fn e2e_index_function_receives_table_and_key() {
    let out = run_lua(
        "local t = setmetatable({}, {__index = function(t, k) return k .. '!' end})
         return t.abc, t[1]",
    );
    assert_eq!(out, ["abc!", "1!"]);
}

#[test]
fn e2e_newindex_redirects_writes() {
    let out = run_lua(
        "local store = {}
         local proxy = setmetatable({}, {__newindex = store})
         proxy.x = 10
         return rawget(proxy, 'x'), store.x",
    );
    assert_eq!(out, ["nil", "10"]);
}

#[test]
fn e2e_index_loop_is_detected() {
    let msg = run_lua_err(
        "local t = {}
         setmetatable(t, {__index = function() return nil end})
         local a = setmetatable({}, {})
         getmetatable(a).__index = a
         return a.missing",
    );
    assert!(msg.ends_with("loop in gettable"), "{msg}");
}

// ── operators ──────────────────────────────────────────────────────────────

const VECTOR: &str = "
local V = {}
V.__index = V
local function new(x, y) return setmetatable({x = x, y = y}, V) end
V.__add = function(a, b) return new(a.x + b.x, a.y + b.y) end
V.__unm = function(a) return new(-a.x, -a.y) end
V.__eq = function(a, b) return a.x == b.x and a.y == b.y end
V.__lt = function(a, b) return a.x < b.x end
V.__le = function(a, b) return a.x <= b.x end
V.__concat = function(a, b) return tostring(a) .. '|' .. tostring(b) end
V.__tostring = function(a) return '(' .. a.x .. ',' .. a.y .. ')' end
V.__call = function(self, k) return self.x * k end
";

#[test]
fn e2e_arithmetic_and_comparison_metamethods() {
    let out = run_lua(&format!(
        "{VECTOR}
         local a, b = new(1, 2), new(3, 4)
         local c = a + b
         return tostring(c), tostring(-a), a == new(1, 2), a ~= b, a < b, b <= a"
    ));
    assert_eq!(out, ["(4,6)", "(-1,-2)", "true", "true", "true", "false"]);
}

#[test]
fn e2e_concat_and_call_metamethods() {
    let out = run_lua(&format!(
        "{VECTOR}
         local a = new(2, 5)
         return a .. 'tail', 'head' .. a, a(10)"
    ));
    assert_eq!(out, ["(2,5)|tail", "head|(2,5)", "20"]);
}

#[test]
fn e2e_mismatched_comparison_is_an_error() {
    let msg = run_lua_err("return {} < 1");
    assert!(msg.ends_with("attempt to compare table with number"), "{msg}");
    let msg = run_lua_err("return {} < {}");
    assert!(msg.ends_with("attempt to compare two table values"), "{msg}");
}

// ── host-side metatables ───────────────────────────────────────────────────

fn string_len_method(s: &mut State) -> LuaResult<usize> {
    let text = s.checklstring(1)?;
    s.pushnumber(text.len() as f64);
    Ok(1)
}

#[test]
fn e2e_per_type_metatable_for_strings() {
    let mut s = State::new();
    s.pushstring("");
    s.newtable();
    s.newtable();
    s.pushcfunction(string_len_method);
    s.setfield(-2, "len").unwrap();
    s.setfield(-2, "__index").unwrap();
    s.setmetatable(-2);
    s.settop(0);
    assert_eq!(run_in(&mut s, "local word = 'moon' return word:len()"), ["4"]);
}

#[test]
fn e2e_userdata_with_named_metatable() {
    struct Counter {
        hits: u32,
    }
    fn hit(s: &mut State) -> LuaResult<usize> {
        let c = s.checkudata_typed::<Counter>(1, "Counter")?;
        c.hits += 1;
        let hits = c.hits;
        s.pushnumber(hits as f64);
        Ok(1)
    }
    let mut s = State::new();
    s.newmetatable("Counter").unwrap();
    s.pushvalue(-1);
    s.setfield(-2, "__index").unwrap();
    s.pushcfunction(hit);
    s.setfield(-2, "hit").unwrap();
    s.pop(1);

    s.new_userdata_typed(Counter { hits: 0 });
    s.getmetatable_named("Counter").unwrap();
    s.setmetatable(-2);
    s.setglobal("counter").unwrap();

    assert_eq!(run_in(&mut s, "counter:hit() counter:hit() return counter:hit()"), ["3"]);
    let out = run_in(&mut s, "return pcall(counter.hit, {})");
    assert_eq!(out[0], "false");
    assert!(out[1].ends_with("(Counter expected, got table)"), "{}", out[1]);
    assert_eq!(run_in(&mut s, "return type(counter)"), ["userdata"]);
}

#[test]
fn e2e_equal_api_uses_eq_metamethod() {
    let mut s = State::new();
    assert_eq!(
        s.dostring("local mt = {__eq = function() return true end}\nreturn setmetatable({}, mt), setmetatable({}, mt)")
            .unwrap(),
        Status::Ok
    );
    assert!(s.equal(1, 2).unwrap());
    assert!(!s.rawequal(1, 2));
    assert!(!s.equal(1, 9).unwrap());
    assert_eq!(s.type_of(1), LuaType::Table);
}

#[test]
fn e2e_lessthan_api() {
    let mut s = State::new();
    s.pushstring("apple");
    s.pushstring("banana");
    assert!(s.lessthan(1, 2).unwrap());
    assert!(!s.lessthan(2, 1).unwrap());
}
