use super::helpers::*;
use moonstack_compiler::opcode::OpCode;

// ── locals and assignment ──────────────────────────────────────────────────

#[test]
fn e2e_local_multiple_with_padding() {
    let (proto, _) = compile_str("local a, b, c = 1");
    assert_eq!(count_opcode(&proto, OpCode::LoadK), 1);
    let nil = proto.code[find_opcode(&proto, OpCode::LoadNil).unwrap()];
    assert_eq!((nil.a(), nil.b()), (1, 2));
}

#[test]
fn e2e_local_extra_values_are_evaluated() {
    let (proto, _) = compile_str("local a = 1, f()");
    let call = proto.code[find_opcode(&proto, OpCode::Call).unwrap()];
    assert_eq!(call.c(), 1);
}

#[test]
fn e2e_local_from_call_takes_all_needed_results() {
    let (proto, _) = compile_str("local a, b, c = f()");
    let call = proto.code[find_opcode(&proto, OpCode::Call).unwrap()];
    assert_eq!(call.c(), 4);
}

#[test]
fn e2e_indexed_assignment_conflict_copies_table() {
    // t is both indexed and reassigned; the old t must be used for t[1]
    let (proto, _) = compile_str("local t = {}; t[1], t = 2, 3");
    assert!(has_opcode(&proto, OpCode::Move));
    assert!(has_opcode(&proto, OpCode::SetTable));
}

#[test]
fn e2e_upvalue_assignment() {
    let (proto, _) = compile_str("local x; function set(v) x = v end");
    assert!(has_opcode(&proto.protos[0], OpCode::SetUpval));
}

// ── control flow ───────────────────────────────────────────────────────────

#[test]
fn e2e_if_elseif_else() {
    let (proto, _) = compile_str(
        "local a = ...\nif a == 1 then a = 10 elseif a == 2 then a = 20 else a = 30 end",
    );
    assert_eq!(count_opcode(&proto, OpCode::Eq), 2);
    assert!(count_opcode(&proto, OpCode::Jmp) >= 4);
}

#[test]
fn e2e_while_jumps_back() {
    let (proto, _) = compile_str("local i = 0\nwhile i < 10 do i = i + 1 end");
    let back = proto
        .code
        .iter()
        .rev()
        .find(|i| i.opcode() == OpCode::Jmp)
        .unwrap();
    assert!(back.sbx() < 0);
}

#[test]
fn e2e_repeat_sees_body_locals() {
    let (proto, _) = compile_str("repeat local done = true until done");
    assert!(has_opcode(&proto, OpCode::Test));
}

#[test]
fn e2e_repeat_with_captured_local_closes() {
    let (proto, _) =
        compile_str("repeat local x = 1; local f = function() return x end until x");
    assert!(has_opcode(&proto, OpCode::Close));
}

#[test]
fn e2e_numeric_for() {
    let (proto, strings) = compile_str("for i = 1, 10, 2 do end");
    let prep = find_opcode(&proto, OpCode::ForPrep).unwrap();
    let lp = find_opcode(&proto, OpCode::ForLoop).unwrap();
    assert_eq!(proto.code[prep].sbx() as usize + prep + 1, lp);
    assert_eq!(proto.code[lp].sbx() + lp as i32 + 1, prep as i32 + 1);
    let names: Vec<_> = proto
        .local_vars
        .iter()
        .map(|v| strings.get_lossy(v.name).into_owned())
        .collect();
    assert_eq!(names, ["(for index)", "(for limit)", "(for step)", "i"]);
}

#[test]
fn e2e_numeric_for_default_step() {
    let (proto, _) = compile_str("for i = 1, 3 do end");
    assert_eq!(count_opcode(&proto, OpCode::LoadK), 3);
}

#[test]
fn e2e_generic_for() {
    let (proto, _) = compile_str("for k, v in pairs(t) do end");
    let tfor = proto.code[find_opcode(&proto, OpCode::TForLoop).unwrap()];
    assert_eq!(tfor.c(), 2);
    let call = proto.code[find_opcode(&proto, OpCode::Call).unwrap()];
    assert_eq!(call.c(), 4);
}

#[test]
fn e2e_break_jumps_out_of_loop() {
    let (proto, _) = compile_str("while true do break end");
    let first_jmp = find_opcode(&proto, OpCode::Jmp).unwrap();
    let target = first_jmp as i32 + 1 + proto.code[first_jmp].sbx();
    assert_eq!(proto.code[target as usize].opcode(), OpCode::Return);
}

#[test]
fn e2e_do_block_scopes_locals() {
    let (proto, _) = compile_str("do local a = 1 end local b = 2");
    assert_eq!(proto.local_vars.len(), 2);
    // both reuse register 0
    assert_eq!(proto.code[0].a(), 0);
    assert_eq!(proto.code[1].a(), 0);
}

#[test]
fn e2e_semicolons_are_optional() {
    let (a, _) = compile_str("local x = 1; local y = 2;");
    let (b, _) = compile_str("local x = 1 local y = 2");
    assert_eq!(a.code, b.code);
}

#[test]
fn e2e_return_must_be_last() {
    let err = compile_str_err("return 1 local x = 2");
    assert_eq!(err, "'<eof>' expected near 'local'");
}
