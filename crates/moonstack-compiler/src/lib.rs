//! Lua 5.1 front end: lexer, single-pass parser/code generator and the
//! register bytecode it produces.

pub mod compiler;
pub mod disasm;
pub mod lexer;
pub mod opcode;
pub mod proto;
pub mod token;

pub use compiler::{compile, CompileError};
pub use proto::{Constant, LocalVar, Proto, UpvalDesc};
