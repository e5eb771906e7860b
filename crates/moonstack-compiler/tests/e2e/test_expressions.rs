use super::helpers::*;
use moonstack_compiler::opcode::{is_k, OpCode};

// ── literals ───────────────────────────────────────────────────────────────

#[test]
fn e2e_return_nil_relies_on_fresh_registers() {
    let (proto, _) = compile_str("return nil");
    assert!(!has_opcode(&proto, OpCode::LoadNil));
    assert!(has_opcode(&proto, OpCode::Return));
}

#[test]
fn e2e_assigning_nil_to_a_live_local() {
    let (proto, _) = compile_str("local a; a = nil");
    assert_eq!(count_opcode(&proto, OpCode::LoadNil), 1);
    assert_eq!(proto.code[0].opcode(), OpCode::LoadNil);
    assert_eq!((proto.code[0].a(), proto.code[0].b()), (0, 0));
}

#[test]
fn e2e_return_booleans() {
    let (proto, _) = compile_str("return true, false");
    assert_eq!(count_opcode(&proto, OpCode::LoadBool), 2);
    assert_eq!(proto.code[0].b(), 1);
    assert_eq!(proto.code[1].b(), 0);
}

#[test]
fn e2e_return_number() {
    let (proto, _) = compile_str("return 3.25");
    assert!(has_opcode(&proto, OpCode::LoadK));
    assert_eq!(get_number_constant(&proto, 0), 3.25);
}

#[test]
fn e2e_negative_literal_is_folded() {
    let (proto, _) = compile_str("return -1");
    assert!(!has_opcode(&proto, OpCode::Unm));
    assert_eq!(get_number_constant(&proto, 0), -1.0);
}

#[test]
fn e2e_return_string() {
    let (proto, strings) = compile_str("return \"hello world\"");
    assert!(has_opcode(&proto, OpCode::LoadK));
    assert_eq!(get_string_constant(&proto, 0, &strings), "hello world");
}

// ── arithmetic ─────────────────────────────────────────────────────────────

#[test]
fn e2e_division_by_zero_not_folded() {
    let (proto, _) = compile_str("return 1 / 0");
    assert!(has_opcode(&proto, OpCode::Div));
}

#[test]
fn e2e_arith_uses_constant_operands() {
    let (proto, _) = compile_str("local a = ...; return a + 1");
    let add = proto.code[find_opcode(&proto, OpCode::Add).unwrap()];
    assert!(!is_k(add.b()));
    assert!(is_k(add.c()));
}

#[test]
fn e2e_pow_is_right_associative() {
    // 2 ^ (3 ^ 2) = 512
    let (proto, _) = compile_str("return 2 ^ 3 ^ 2");
    assert_eq!(get_number_constant(&proto, 0), 512.0);
}

#[test]
fn e2e_unary_ops() {
    let (proto, _) = compile_str("local a = ...; return -a, not a, #a");
    assert!(has_opcode(&proto, OpCode::Unm));
    assert!(has_opcode(&proto, OpCode::Not));
    assert!(has_opcode(&proto, OpCode::Len));
}

#[test]
fn e2e_not_constant_is_folded() {
    let (proto, _) = compile_str("return not nil");
    assert!(!has_opcode(&proto, OpCode::Not));
    assert_eq!(proto.code[0].opcode(), OpCode::LoadBool);
    assert_eq!(proto.code[0].b(), 1);
}

// ── comparisons and logic ──────────────────────────────────────────────────

#[test]
fn e2e_greater_than_swaps_operands() {
    let (proto, _) = compile_str("local a, b = ...; return a > b");
    let lt = proto.code[find_opcode(&proto, OpCode::Lt).unwrap()];
    assert_eq!((lt.a(), lt.b(), lt.c()), (1, 1, 0));
}

#[test]
fn e2e_not_equal_uses_eq_with_false() {
    let (proto, _) = compile_str("local a, b = ...; return a ~= b");
    let eq = proto.code[find_opcode(&proto, OpCode::Eq).unwrap()];
    assert_eq!(eq.a(), 0);
}

#[test]
fn e2e_and_or_use_testset() {
    let (proto, _) = compile_str("local a, b, c = ...; return a and b or c");
    assert!(has_opcode(&proto, OpCode::TestSet));
    assert!(!has_opcode(&proto, OpCode::LoadBool));
}

#[test]
fn e2e_condition_uses_test() {
    let (proto, _) = compile_str("local a = ...; if a then a = 1 end");
    assert!(has_opcode(&proto, OpCode::Test));
    assert!(!has_opcode(&proto, OpCode::TestSet));
}

#[test]
fn e2e_not_in_condition_is_dropped() {
    let (proto, _) = compile_str("local a = ...; if not a then a = 1 end");
    assert!(!has_opcode(&proto, OpCode::Not));
    let test = proto.code[find_opcode(&proto, OpCode::Test).unwrap()];
    assert_eq!(test.c(), 1);
}

// ── tables and calls ───────────────────────────────────────────────────────

#[test]
fn e2e_field_access_uses_constant_key() {
    let (proto, strings) = compile_str("local t = ...; return t.name");
    let get = proto.code[find_opcode(&proto, OpCode::GetTable).unwrap()];
    assert!(is_k(get.c()));
    assert_eq!(get_string_constant(&proto, 0, &strings), "name");
}

#[test]
fn e2e_method_call_uses_self() {
    let (proto, _) = compile_str("local obj = ...; return obj:get(1)");
    assert!(has_opcode(&proto, OpCode::Self_));
    assert!(has_opcode(&proto, OpCode::TailCall));
}

#[test]
fn e2e_string_and_table_call_sugar() {
    let (proto, _) = compile_str("f 'x'\nf { 1 }");
    assert_eq!(count_opcode(&proto, OpCode::Call), 2);
    assert!(has_opcode(&proto, OpCode::NewTable));
}

#[test]
fn e2e_multret_call_in_constructor() {
    let (proto, _) = compile_str("return { f() }");
    let setlist = proto.code[find_opcode(&proto, OpCode::SetList).unwrap()];
    assert_eq!(setlist.b(), 0);
    let call = proto.code[find_opcode(&proto, OpCode::Call).unwrap()];
    assert_eq!(call.c(), 0);
}

#[test]
fn e2e_large_constructor_flushes_in_batches() {
    let items: Vec<String> = (1..=120).map(|i| i.to_string()).collect();
    let (proto, _) = compile_str(&format!("return {{ {} }}", items.join(", ")));
    assert_eq!(count_opcode(&proto, OpCode::SetList), 3);
    assert_eq!(proto.code[0].b(), 120);
}

#[test]
fn e2e_vararg_in_call_args() {
    let (proto, _) = compile_str("print(...)");
    let va = proto.code[find_opcode(&proto, OpCode::VarArg).unwrap()];
    assert_eq!(va.b(), 0);
    let call = proto.code[find_opcode(&proto, OpCode::Call).unwrap()];
    assert_eq!(call.b(), 0);
}

#[test]
fn e2e_parenthesised_call_truncates() {
    let (proto, _) = compile_str("return (f())");
    assert!(!has_opcode(&proto, OpCode::TailCall));
    let call = proto.code[find_opcode(&proto, OpCode::Call).unwrap()];
    assert_eq!(call.c(), 2);
}
