use moonstack_compiler::compile;
use moonstack_compiler::opcode::OpCode;
use moonstack_compiler::proto::{Constant, Proto};
use moonstack_core::string::StringInterner;

/// Compile a chunk and return the main prototype with its interner.
pub fn compile_str(source: &str) -> (Proto, StringInterner) {
    let mut strings = StringInterner::new();
    let proto = compile(source.as_bytes(), "=test", &mut strings).unwrap_or_else(|e| {
        panic!("compile failed: {e}\nsource:\n{source}");
    });
    (proto, strings)
}

/// Compile a chunk that must fail; returns the message.
pub fn compile_str_err(source: &str) -> String {
    let mut strings = StringInterner::new();
    match compile(source.as_bytes(), "=test", &mut strings) {
        Err(e) => e.message,
        Ok(_) => panic!("expected compile error, got success\nsource:\n{source}"),
    }
}

pub fn has_opcode(proto: &Proto, op: OpCode) -> bool {
    proto.code.iter().any(|i| i.opcode() == op)
}

pub fn count_opcode(proto: &Proto, op: OpCode) -> usize {
    proto.code.iter().filter(|i| i.opcode() == op).count()
}

#[allow(dead_code)]
pub fn find_opcode(proto: &Proto, op: OpCode) -> Option<usize> {
    proto.code.iter().position(|i| i.opcode() == op)
}

pub fn get_string_constant(proto: &Proto, idx: usize, strings: &StringInterner) -> String {
    match &proto.constants[idx] {
        Constant::String(id) => String::from_utf8(strings.get_bytes(*id).to_vec()).unwrap(),
        other => panic!("expected string constant, got {other:?}"),
    }
}

pub fn get_number_constant(proto: &Proto, idx: usize) -> f64 {
    match &proto.constants[idx] {
        Constant::Number(n) => *n,
        other => panic!("expected number constant, got {other:?}"),
    }
}
