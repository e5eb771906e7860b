use super::helpers::*;

// ── closures ───────────────────────────────────────────────────────────────

#[test]
fn e2e_closures_share_upvalues() {
    let out = run_lua(
        "local function pair()
             local n = 0
             return function() n = n + 1 return n end,
                    function() return n end
         end
         local inc, get = pair()
         inc() inc() inc()
         return get()",
    );
    assert_eq!(out, ["3"]);
}

#[test]
fn e2e_loop_closures_capture_fresh_variables() {
    let out = run_lua(
        "local fns = {}
         for i = 1, 3 do fns[i] = function() return i end end
         return fns[1]() + fns[2]() * 10 + fns[3]() * 100",
    );
    assert_eq!(out, ["321"]);
}

#[test]
fn e2e_recursive_local_function() {
    let out = run_lua(
        "local function fib(n) if n < 2 then return n end return fib(n - 1) + fib(n - 2) end
         return fib(20)",
    );
    assert_eq!(out, ["6765"]);
}

#[test]
fn e2e_deep_tail_calls_do_not_grow_the_stack() {
    let out = run_lua(
        "local function count(n, acc) if n == 0 then return acc end return count(n - 1, acc + 1) end
         return count(100000, 0)",
    );
    assert_eq!(out, ["100000"]);
}

// ── control flow ───────────────────────────────────────────────────────────

#[test]
fn e2e_loops_and_breaks() {
    let out = run_lua(
        "local down = {}
         for i = 10, 1, -3 do down[#down + 1] = i end
         local n, w = 0, 0
         while true do n = n + 1 if n >= 5 then break end end
         repeat w = w + 2 until w > 7
         return down[1], down[2], down[3], down[4], #down, n, w",
    );
    assert_eq!(out, ["10", "7", "4", "1", "4", "5", "8"]);
}

#[test]
fn e2e_repeat_scope_sees_body_locals() {
    let out = run_lua(
        "local i = 0
         repeat local done = i >= 3; i = i + 1 until done
         return i",
    );
    assert_eq!(out, ["4"]);
}

#[test]
fn e2e_logical_operators_return_operands() {
    let out = run_lua("return nil or 'd', false and 1, 1 and 2, nil and nil, not nil, 0 or 1");
    assert_eq!(out, ["d", "false", "2", "nil", "true", "0"]);
}

// ── values and coercion ────────────────────────────────────────────────────

#[test]
fn e2e_arithmetic_follows_floor_semantics() {
    let out = run_lua("return -5 % 3, 5 % -3, 5.5 % 2, 2 ^ 10, 7 / 2, -(2 ^ 2)");
    assert_eq!(out, ["1", "-1", "1.5", "1024", "3.5", "-4"]);
}

#[test]
fn e2e_number_formatting() {
    let out = run_lua("return 1 / 3, 1e100, 2 ^ 53, 100, -0.5, 1 / 0, -1 / 0");
    assert_eq!(
        out,
        ["0.33333333333333", "1e+100", "9.007199254741e+15", "100", "-0.5", "inf", "-inf"]
    );
}

#[test]
fn e2e_strings_and_numbers_coerce() {
    let out = run_lua("return '10' + 5, 10 .. '', '3' * '4', 1 .. 2, '0x10' + 0");
    assert_eq!(out, ["15", "10", "12", "12", "16"]);
    let msg = run_lua_err("return 'abc' + 1");
    assert!(msg.ends_with("attempt to perform arithmetic on a string value"), "{msg}");
}

#[test]
fn e2e_comparisons() {
    let out = run_lua("return 'a' < 'b', 'abc' < 'abd', 'Z' < 'a', 1 == 1.0, '1' == 1, 2 <= 2");
    assert_eq!(out, ["true", "true", "true", "true", "false", "true"]);
}

#[test]
fn e2e_length_of_strings_and_sequences() {
    let out = run_lua("local t = {1, 2, 3} t[#t + 1] = 4 return #'hello', #t, #{}");
    assert_eq!(out, ["5", "4", "0"]);
}

// ── tables ─────────────────────────────────────────────────────────────────

#[test]
fn e2e_table_constructors() {
    let out = run_lua(
        "local function three() return 1, 2, 3 end
         local a = {three()}
         local b = {three(), three()}
         local c = {[1] = 'x', 'y'; n = 2}
         return #a, #b, c[1], c.n",
    );
    assert_eq!(out, ["3", "4", "y", "2"]);
}

#[test]
fn e2e_number_keys_are_normalized() {
    let out = run_lua(
        "local t = {}
         t[1.0] = 'one'
         t['1'] = 'string one'
         return t[1], t['1'], #t",
    );
    assert_eq!(out, ["one", "string one", "1"]);
}

#[test]
fn e2e_invalid_table_keys() {
    let msg = run_lua_err("local t = {} t[nil] = 1");
    assert!(msg.ends_with("table index is nil"), "{msg}");
    let msg = run_lua_err("local t = {} t[0/0] = 1");
    assert!(msg.ends_with("table index is NaN"), "{msg}");
}

// ── varargs and multiple results ───────────────────────────────────────────

#[test]
fn e2e_varargs_and_adjustment() {
    let out = run_lua(
        "local function pack(...) return select('#', ...), ... end
         local function first(...) local a = ... return a end
         local n, x, y = pack(nil, 'b')
         local a, b, c = (pack(1, 2))
         return n, x, y, first('p', 'q'), a, b, c",
    );
    assert_eq!(out, ["2", "nil", "b", "p", "2", "nil", "nil"]);
}

#[test]
fn e2e_multiple_assignment_evaluates_before_storing() {
    let out = run_lua(
        "local a, b = 1, 2
         a, b = b, a
         local t = {}
         local i = 1
         i, t[i] = i + 1, 'set'
         return a, b, t[1], t[2]",
    );
    assert_eq!(out, ["2", "1", "set", "nil"]);
}

#[test]
fn e2e_generic_for_with_custom_iterator() {
    let out = run_lua(
        "local function evens(limit)
             return function(_, last)
                 local nxt = last + 2
                 if nxt <= limit then return nxt end
             end, nil, 0
         end
         local sum = 0
         for v in evens(10) do sum = sum + v end
         return sum",
    );
    assert_eq!(out, ["30"]);
}

#[test]
fn e2e_string_building_in_a_loop() {
    let out = run_lua(
        "local s = ''
         for i = 1, 5 do s = s .. i .. (i < 5 and ',' or '') end
         return s, #s",
    );
    assert_eq!(out, ["1,2,3,4,5", "9"]);
}
