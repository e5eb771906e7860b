//! Bytecode listing in the style of `luac -l`.
use crate::opcode::{index_k, is_k, Instruction, InstructionFormat, OpCode};
use crate::proto::{Constant, Proto};
use moonstack_core::number::fmt_number;
use moonstack_core::string::StringInterner;
use std::fmt::{self, Write};

/// List a prototype and all of its nested functions.
pub fn listing(proto: &Proto, strings: &StringInterner) -> String {
    let mut out = String::new();
    // writing into a String cannot fail
    let _ = write_proto(&mut out, proto, strings, true);
    out
}

fn source_name(proto: &Proto, strings: &StringInterner) -> String {
    let Some(id) = proto.source else {
        return "?".into();
    };
    let name = strings.get_lossy(id);
    match name.strip_prefix(['@', '=']) {
        Some(rest) => rest.to_string(),
        None => "string".into(),
    }
}

fn write_proto(
    out: &mut String,
    proto: &Proto,
    strings: &StringInterner,
    is_main: bool,
) -> fmt::Result {
    let kind = if is_main { "main" } else { "function" };
    let plural = |n: usize| if n == 1 { "" } else { "s" };
    let n = proto.code.len();
    writeln!(
        out,
        "\n{kind} <{}:{},{}> ({n} instruction{})",
        source_name(proto, strings),
        proto.line_defined,
        proto.last_line_defined,
        plural(n),
    )?;
    let vararg = if proto.is_vararg { "+" } else { "" };
    writeln!(
        out,
        "{}{vararg} param{}, {} slot{}, {} upvalue{}, {} local{}, {} constant{}, {} function{}",
        proto.num_params,
        plural(proto.num_params as usize),
        proto.max_stack_size,
        plural(proto.max_stack_size as usize),
        proto.upvalues.len(),
        plural(proto.upvalues.len()),
        proto.local_vars.len(),
        plural(proto.local_vars.len()),
        proto.constants.len(),
        plural(proto.constants.len()),
        proto.protos.len(),
        plural(proto.protos.len()),
    )?;

    for (pc, inst) in proto.code.iter().enumerate() {
        let line = proto.get_line(pc);
        if line > 0 {
            write!(out, "\t{}\t[{line}]\t", pc + 1)?;
        } else {
            write!(out, "\t{}\t[-]\t", pc + 1)?;
        }
        write_instruction(out, pc, inst, proto, strings)?;
        writeln!(out)?;
    }

    writeln!(out, "constants ({}):", proto.constants.len())?;
    for (i, k) in proto.constants.iter().enumerate() {
        write!(out, "\t{}\t", i + 1)?;
        write_constant(out, k, strings)?;
        writeln!(out)?;
    }
    writeln!(out, "locals ({}):", proto.local_vars.len())?;
    for (i, lv) in proto.local_vars.iter().enumerate() {
        writeln!(
            out,
            "\t{i}\t{}\t{}\t{}",
            strings.get_lossy(lv.name),
            lv.start_pc + 1,
            lv.end_pc + 1
        )?;
    }
    writeln!(out, "upvalues ({}):", proto.upvalues.len())?;
    for (i, up) in proto.upvalues.iter().enumerate() {
        let name = up.name.map(|id| strings.get_lossy(id)).unwrap_or_default();
        writeln!(out, "\t{i}\t{name}\t{}\t{}", up.in_stack as u8, up.index)?;
    }

    for p in &proto.protos {
        write_proto(out, p, strings, false)?;
    }
    Ok(())
}

fn write_rk(out: &mut String, x: u32, proto: &Proto, strings: &StringInterner) -> fmt::Result {
    if is_k(x) {
        match proto.constants.get(index_k(x) as usize) {
            Some(k) => write_constant(out, k, strings),
            None => write!(out, "-"),
        }
    } else {
        write!(out, "-")
    }
}

/// Operands of one instruction plus a `;` comment naming constants and targets.
pub fn write_instruction(
    out: &mut String,
    pc: usize,
    inst: &Instruction,
    proto: &Proto,
    strings: &StringInterner,
) -> fmt::Result {
    let op = inst.opcode();
    let (a, b, c) = (inst.a(), inst.b(), inst.c());
    let rk = |x: u32| if is_k(x) { -1 - index_k(x) as i64 } else { x as i64 };
    write!(out, "{:<9}\t", op.name())?;
    match op.format() {
        InstructionFormat::IABC => {
            write!(out, "{a}")?;
            match op {
                OpCode::Move | OpCode::LoadNil | OpCode::GetUpval | OpCode::SetUpval
                | OpCode::Unm | OpCode::Not | OpCode::Len | OpCode::Return | OpCode::VarArg => {
                    write!(out, " {b}")?
                }
                OpCode::TailCall | OpCode::Call | OpCode::LoadBool | OpCode::NewTable
                | OpCode::Concat | OpCode::SetList => write!(out, " {b} {c}")?,
                OpCode::Test | OpCode::TForLoop => write!(out, " {c}")?,
                OpCode::TestSet => write!(out, " {b} {c}")?,
                OpCode::Close => {}
                _ => write!(out, " {} {}", rk(b), rk(c))?,
            }
        }
        InstructionFormat::IABx => {
            let bx = inst.bx();
            if op == OpCode::Closure {
                write!(out, "{a} {bx}")?;
            } else {
                write!(out, "{a} {}", -1 - bx as i64)?;
            }
        }
        InstructionFormat::IAsBx => {
            if op == OpCode::Jmp {
                write!(out, "{}", inst.sbx())?;
            } else {
                write!(out, "{a} {}", inst.sbx())?;
            }
        }
    }

    match op {
        OpCode::LoadK => {
            if let Some(k) = proto.constants.get(inst.bx() as usize) {
                write!(out, "\t; ")?;
                write_constant(out, k, strings)?;
            }
        }
        OpCode::GetGlobal | OpCode::SetGlobal => {
            if let Some(Constant::String(id)) = proto.constants.get(inst.bx() as usize) {
                write!(out, "\t; {}", strings.get_lossy(*id))?;
            }
        }
        OpCode::GetUpval | OpCode::SetUpval => {
            let name = proto
                .upvalues
                .get(b as usize)
                .and_then(|u| u.name)
                .map(|id| strings.get_lossy(id))
                .unwrap_or_else(|| "-".into());
            write!(out, "\t; {name}")?;
        }
        OpCode::GetTable | OpCode::Self_ => {
            if is_k(c) {
                write!(out, "\t; ")?;
                write_rk(out, c, proto, strings)?;
            }
        }
        OpCode::SetTable | OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div
        | OpCode::Mod | OpCode::Pow | OpCode::Eq | OpCode::Lt | OpCode::Le => {
            if is_k(b) || is_k(c) {
                write!(out, "\t; ")?;
                write_rk(out, b, proto, strings)?;
                write!(out, " ")?;
                write_rk(out, c, proto, strings)?;
            }
        }
        OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep => {
            write!(out, "\t; to {}", pc as i64 + inst.sbx() as i64 + 2)?;
        }
        OpCode::SetList if c == 0 => {
            let extra = proto.code.get(pc + 1).map(|i| i.0).unwrap_or(0);
            write!(out, "\t; {extra}")?;
        }
        OpCode::SetList => write!(out, "\t; {c}")?,
        _ => {}
    }
    Ok(())
}

fn write_constant(out: &mut String, k: &Constant, strings: &StringInterner) -> fmt::Result {
    match k {
        Constant::Nil => write!(out, "nil"),
        Constant::Boolean(b) => write!(out, "{b}"),
        Constant::Number(n) => write!(out, "{}", fmt_number(*n)),
        Constant::String(id) => write!(out, "{:?}", strings.get_lossy(*id).as_ref()),
    }
}
