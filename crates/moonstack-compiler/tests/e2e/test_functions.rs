use super::helpers::*;
use moonstack_compiler::opcode::OpCode;

#[test]
fn e2e_function_statement_sets_global() {
    let (proto, strings) = compile_str("function greet(name) return name end");
    assert!(has_opcode(&proto, OpCode::Closure));
    assert!(has_opcode(&proto, OpCode::SetGlobal));
    assert_eq!(get_string_constant(&proto, 0, &strings), "greet");
    let f = &proto.protos[0];
    assert_eq!(f.num_params, 1);
    assert!(!f.is_vararg);
    assert_eq!(f.line_defined, 1);
}

#[test]
fn e2e_nested_field_function_name() {
    let (proto, _) = compile_str("a = {b = {}}\nfunction a.b.c() end");
    assert!(count_opcode(&proto, OpCode::GetTable) >= 1);
    assert!(has_opcode(&proto, OpCode::SetTable));
}

#[test]
fn e2e_vararg_function() {
    let (proto, _) = compile_str("local function f(a, ...) return select('#', ...) end");
    let f = &proto.protos[0];
    assert!(f.is_vararg);
    assert_eq!(f.num_params, 1);
    assert!(has_opcode(f, OpCode::VarArg));
}

#[test]
fn e2e_local_function_can_recurse() {
    let (proto, _) = compile_str("local function f(n) return f(n) end");
    let f = &proto.protos[0];
    assert_eq!(f.upvalues.len(), 1);
    assert!(f.upvalues[0].in_stack);
    assert!(has_opcode(f, OpCode::GetUpval));
}

#[test]
fn e2e_upvalue_of_upvalue() {
    let src = "local x = 1\nreturn function() return function() return x end end";
    let (proto, _) = compile_str(src);
    let middle = &proto.protos[0];
    let inner = &middle.protos[0];
    assert_eq!(middle.upvalues.len(), 1);
    assert!(middle.upvalues[0].in_stack);
    assert_eq!(inner.upvalues.len(), 1);
    assert!(!inner.upvalues[0].in_stack);
    assert_eq!(inner.upvalues[0].index, 0);
}

#[test]
fn e2e_upvalues_are_deduplicated() {
    let (proto, _) = compile_str("local x = 1\nreturn function() return x + x end");
    assert_eq!(proto.protos[0].upvalues.len(), 1);
}

#[test]
fn e2e_last_line_defined() {
    let (proto, _) = compile_str("local f = function()\n\n\nend");
    let f = &proto.protos[0];
    assert_eq!((f.line_defined, f.last_line_defined), (1, 4));
}

#[test]
fn e2e_max_stack_size_tracks_registers() {
    let (proto, _) = compile_str("local a, b, c, d, e = 1, 2, 3, 4, 5");
    assert!(proto.max_stack_size >= 5);
}
