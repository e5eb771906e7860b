//! Main bytecode dispatch loop.

use crate::arith::{float_arith, ArithOp};
use crate::call::PreCall;
use crate::callinfo::FrameKind;
use crate::error::LuaResult;
use crate::state::State;
use crate::MULTRET;
use moonstack_compiler::opcode::{index_k, is_k, OpCode, FIELDS_PER_FLUSH};
use moonstack_compiler::Constant;
use moonstack_core::{Closure, GcIdx, LuaClosure, UpVal, Value};

#[inline]
fn constant_value(k: &Constant) -> Value {
    match *k {
        Constant::Nil => Value::Nil,
        Constant::Boolean(b) => Value::Boolean(b),
        Constant::Number(n) => Value::Number(n),
        Constant::String(s) => Value::String(s),
    }
}

/// Register or constant operand.
#[inline]
fn rk(st: &State, base: usize, k: &[Constant], x: u32) -> Value {
    if is_k(x) {
        constant_value(&k[index_k(x) as usize])
    } else {
        st.cur.stack[base + x as usize]
    }
}

/// Stack slot of an operand, for naming it in error messages.
#[inline]
fn rk_slot(base: usize, x: u32) -> Option<usize> {
    (!is_k(x)).then_some(base + x as usize)
}

fn lua_upvalue(st: &State, cl: GcIdx<Closure>, n: usize) -> GcIdx<UpVal> {
    match st.heap.get_closure(cl) {
        Closure::Lua(lc) => lc.upvalues[n],
        Closure::Native(_) => unreachable!("Lua frame running a native closure"),
    }
}

/// Run Lua frames until the frame count drops back to `entry_depth`.
///
/// On error the frames are left in place; the protected boundary that
/// catches the error truncates them.
pub(crate) fn execute(st: &mut State, entry_depth: usize) -> LuaResult<()> {
    'newframe: loop {
        let ci_idx = st.cur.frames.len() - 1;
        let FrameKind::Lua { closure: cl, proto: proto_id } = st.cur.frames[ci_idx].kind else {
            unreachable!("execute entered on a non-Lua frame");
        };
        let base = st.cur.frames[ci_idx].base;
        let proto = st.proto(proto_id);
        let k = &proto.constants[..];

        loop {
            let pc = st.cur.frames[ci_idx].pc;
            let inst = proto.code[pc];
            st.cur.frames[ci_idx].pc = pc + 1;
            let a = base + inst.a() as usize;

            match inst.opcode() {
                OpCode::Move => {
                    st.cur.stack[a] = st.cur.stack[base + inst.b() as usize];
                }

                OpCode::LoadK => {
                    st.cur.stack[a] = constant_value(&k[inst.bx() as usize]);
                }

                OpCode::LoadBool => {
                    st.cur.stack[a] = Value::Boolean(inst.b() != 0);
                    if inst.c() != 0 {
                        st.cur.frames[ci_idx].pc += 1;
                    }
                }

                OpCode::LoadNil => {
                    for slot in a..=base + inst.b() as usize {
                        st.cur.stack[slot] = Value::Nil;
                    }
                }

                OpCode::GetUpval => {
                    let uv = lua_upvalue(st, cl, inst.b() as usize);
                    st.cur.stack[a] = st.upval_get(uv);
                }

                OpCode::GetGlobal => {
                    let env = Value::Table(st.heap.get_closure(cl).env());
                    let key = constant_value(&k[inst.bx() as usize]);
                    st.cur.stack[a] = st.get_table_value(env, key, None)?;
                }

                OpCode::GetTable => {
                    let b = base + inst.b() as usize;
                    let t = st.cur.stack[b];
                    let key = rk(st, base, k, inst.c());
                    st.cur.stack[a] = st.get_table_value(t, key, Some(b))?;
                }

                OpCode::SetGlobal => {
                    let env = Value::Table(st.heap.get_closure(cl).env());
                    let key = constant_value(&k[inst.bx() as usize]);
                    let v = st.cur.stack[a];
                    st.set_table_value(env, key, v, None)?;
                }

                OpCode::SetUpval => {
                    let uv = lua_upvalue(st, cl, inst.b() as usize);
                    let v = st.cur.stack[a];
                    st.upval_set(uv, v);
                }

                OpCode::SetTable => {
                    let t = st.cur.stack[a];
                    let key = rk(st, base, k, inst.b());
                    let v = rk(st, base, k, inst.c());
                    st.set_table_value(t, key, v, Some(a))?;
                }

                OpCode::NewTable => {
                    let t = st.heap.alloc_table(inst.b() as usize, inst.c() as usize);
                    st.cur.stack[a] = Value::Table(t);
                    st.gc_check();
                }

                OpCode::Self_ => {
                    let b = base + inst.b() as usize;
                    let obj = st.cur.stack[b];
                    st.cur.stack[a + 1] = obj;
                    let key = rk(st, base, k, inst.c());
                    st.cur.stack[a] = st.get_table_value(obj, key, Some(b))?;
                }

                // ---- Arithmetic ----
                op @ (OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Mod
                | OpCode::Pow) => {
                    let aop = match op {
                        OpCode::Add => ArithOp::Add,
                        OpCode::Sub => ArithOp::Sub,
                        OpCode::Mul => ArithOp::Mul,
                        OpCode::Div => ArithOp::Div,
                        OpCode::Mod => ArithOp::Mod,
                        _ => ArithOp::Pow,
                    };
                    let vb = rk(st, base, k, inst.b());
                    let vc = rk(st, base, k, inst.c());
                    st.cur.stack[a] = match (vb, vc) {
                        (Value::Number(x), Value::Number(y)) => {
                            Value::Number(float_arith(aop, x, y))
                        }
                        _ => st.arith(
                            aop,
                            vb,
                            vc,
                            rk_slot(base, inst.b()),
                            rk_slot(base, inst.c()),
                        )?,
                    };
                }

                OpCode::Unm => {
                    let b = base + inst.b() as usize;
                    let vb = st.cur.stack[b];
                    st.cur.stack[a] = match vb {
                        Value::Number(x) => Value::Number(-x),
                        _ => st.arith(ArithOp::Unm, vb, vb, Some(b), Some(b))?,
                    };
                }

                OpCode::Not => {
                    st.cur.stack[a] = Value::Boolean(st.cur.stack[base + inst.b() as usize].is_falsy());
                }

                OpCode::Len => {
                    let b = base + inst.b() as usize;
                    let vb = st.cur.stack[b];
                    st.cur.stack[a] = st.length_of(vb, Some(b))?;
                }

                OpCode::Concat => {
                    let b = inst.b() as usize;
                    let c = inst.c() as usize;
                    st.concat_slots(c - b + 1, base + c)?;
                    st.cur.stack[a] = st.cur.stack[base + b];
                    st.gc_check();
                }

                // ---- Control flow ----
                OpCode::Jmp => {
                    jump(st, ci_idx, inst.sbx());
                }

                OpCode::Eq => {
                    let vb = rk(st, base, k, inst.b());
                    let vc = rk(st, base, k, inst.c());
                    let res = st.values_equal(vb, vc)?;
                    cond_jump(st, ci_idx, &proto.code, res == (inst.a() != 0));
                }

                OpCode::Lt => {
                    let vb = rk(st, base, k, inst.b());
                    let vc = rk(st, base, k, inst.c());
                    let res = st.less_than(vb, vc)?;
                    cond_jump(st, ci_idx, &proto.code, res == (inst.a() != 0));
                }

                OpCode::Le => {
                    let vb = rk(st, base, k, inst.b());
                    let vc = rk(st, base, k, inst.c());
                    let res = st.less_equal(vb, vc)?;
                    cond_jump(st, ci_idx, &proto.code, res == (inst.a() != 0));
                }

                OpCode::Test => {
                    let falsy = st.cur.stack[a].is_falsy();
                    cond_jump(st, ci_idx, &proto.code, falsy != (inst.c() != 0));
                }

                OpCode::TestSet => {
                    let vb = st.cur.stack[base + inst.b() as usize];
                    let take = vb.is_falsy() != (inst.c() != 0);
                    if take {
                        st.cur.stack[a] = vb;
                    }
                    cond_jump(st, ci_idx, &proto.code, take);
                }

                // ---- Calls ----
                OpCode::Call => {
                    let b = inst.b() as usize;
                    let nresults = inst.c() as i32 - 1;
                    if b != 0 {
                        st.cur.top = a + b;
                    }
                    match st.precall(a, nresults)? {
                        PreCall::Lua => continue 'newframe,
                        PreCall::Native => {
                            if nresults >= 0 {
                                st.cur.top = st.cur.frames[ci_idx].top;
                            }
                        }
                    }
                }

                OpCode::TailCall => {
                    let b = inst.b() as usize;
                    if b != 0 {
                        st.cur.top = a + b;
                    }
                    if let PreCall::Lua = st.precall(a, MULTRET)? {
                        // replace the caller's frame with the callee's
                        let Some(callee) = st.cur.frames.pop() else {
                            unreachable!("precall pushed no frame");
                        };
                        st.close_upvalues(base);
                        let func = st.cur.frames[ci_idx].func;
                        let delta = callee.func - func;
                        let top = st.cur.top;
                        st.cur.stack.copy_within(callee.func..top, func);
                        let caller = &mut st.cur.frames[ci_idx];
                        caller.base = callee.base - delta;
                        caller.top = top - delta;
                        caller.pc = 0;
                        caller.kind = callee.kind;
                        caller.tailcalls += 1;
                        st.cur.top = top - delta;
                        continue 'newframe;
                    }
                }

                OpCode::Return => {
                    let b = inst.b() as usize;
                    if b != 0 {
                        st.cur.top = a + b - 1;
                    }
                    st.close_upvalues(base);
                    let fixed = st.poscall(a);
                    if st.cur.frames.len() <= entry_depth {
                        return Ok(());
                    }
                    if fixed {
                        st.cur.top = st.ci().top;
                    }
                    continue 'newframe;
                }

                // ---- Loops ----
                OpCode::ForLoop => {
                    let (Value::Number(idx), Value::Number(limit), Value::Number(step)) =
                        (st.cur.stack[a], st.cur.stack[a + 1], st.cur.stack[a + 2])
                    else {
                        unreachable!("FORPREP left a non-number in the loop registers");
                    };
                    let idx = idx + step;
                    let go_on = if step > 0.0 { idx <= limit } else { limit <= idx };
                    if go_on {
                        jump(st, ci_idx, inst.sbx());
                        st.cur.stack[a] = Value::Number(idx);
                        st.cur.stack[a + 3] = Value::Number(idx);
                    }
                }

                OpCode::ForPrep => {
                    if !st.tonumber_slot(a) {
                        return Err(st.rt_error("'for' initial value must be a number"));
                    }
                    if !st.tonumber_slot(a + 1) {
                        return Err(st.rt_error("'for' limit must be a number"));
                    }
                    if !st.tonumber_slot(a + 2) {
                        return Err(st.rt_error("'for' step must be a number"));
                    }
                    if let (Value::Number(init), Value::Number(step)) =
                        (st.cur.stack[a], st.cur.stack[a + 2])
                    {
                        st.cur.stack[a] = Value::Number(init - step);
                    }
                    jump(st, ci_idx, inst.sbx());
                }

                OpCode::TForLoop => {
                    let cb = a + 3;
                    st.cur.stack[cb + 2] = st.cur.stack[a + 2];
                    st.cur.stack[cb + 1] = st.cur.stack[a + 1];
                    st.cur.stack[cb] = st.cur.stack[a];
                    st.cur.top = cb + 3;
                    st.do_call(cb, inst.c() as i32)?;
                    st.cur.top = st.cur.frames[ci_idx].top;
                    let control = st.cur.stack[cb];
                    let go_on = !control.is_nil();
                    if go_on {
                        st.cur.stack[cb - 1] = control;
                    }
                    cond_jump(st, ci_idx, &proto.code, go_on);
                }

                OpCode::SetList => {
                    let mut n = inst.b() as usize;
                    if n == 0 {
                        n = st.cur.top - a - 1;
                        st.cur.top = st.cur.frames[ci_idx].top;
                    }
                    let mut c = inst.c() as usize;
                    if c == 0 {
                        let next = st.cur.frames[ci_idx].pc;
                        c = proto.code[next].0 as usize;
                        st.cur.frames[ci_idx].pc = next + 1;
                    }
                    let Value::Table(t) = st.cur.stack[a] else {
                        unreachable!("SETLIST on a non-table register");
                    };
                    let offset = (c - 1) * FIELDS_PER_FLUSH as usize;
                    for j in 1..=n {
                        let v = st.cur.stack[a + j];
                        st.heap.get_table_mut(t).raw_seti((offset + j) as i64, v);
                    }
                }

                OpCode::Close => {
                    st.close_upvalues(a);
                }

                OpCode::Closure => {
                    let child = st.proto_entry(proto_id).children[inst.bx() as usize];
                    let child_proto = st.proto(child);
                    let upvalues = child_proto
                        .upvalues
                        .iter()
                        .map(|desc| {
                            if desc.in_stack {
                                st.find_upval(base + desc.index as usize)
                            } else {
                                lua_upvalue(st, cl, desc.index as usize)
                            }
                        })
                        .collect();
                    let env = st.heap.get_closure(cl).env();
                    let ncl = st.heap.alloc_closure(Closure::Lua(LuaClosure {
                        proto: child,
                        upvalues,
                        env,
                    }));
                    st.cur.stack[a] = Value::Function(ncl);
                    st.gc_check();
                }

                OpCode::VarArg => {
                    let ci = &st.cur.frames[ci_idx];
                    let n = ci.base - ci.func - 1 - proto.num_params as usize;
                    let wanted = inst.b() as i32 - 1;
                    let count = if wanted == MULTRET {
                        st.ensure_stack(a + n)?;
                        st.cur.top = a + n;
                        n
                    } else {
                        wanted as usize
                    };
                    for j in 0..count {
                        st.cur.stack[a + j] = if j < n {
                            st.cur.stack[base - n + j]
                        } else {
                            Value::Nil
                        };
                    }
                }
            }
        }
    }
}

#[inline]
fn jump(st: &mut State, ci_idx: usize, sbx: i32) {
    let ci = &mut st.cur.frames[ci_idx];
    ci.pc = (ci.pc as isize + sbx as isize) as usize;
}

/// Tests are followed by a jump: take it when `taken`, skip it otherwise.
#[inline]
fn cond_jump(
    st: &mut State,
    ci_idx: usize,
    code: &[moonstack_compiler::opcode::Instruction],
    taken: bool,
) {
    let pc = st.cur.frames[ci_idx].pc;
    if taken {
        let sbx = code[pc].sbx();
        st.cur.frames[ci_idx].pc = (pc as isize + 1 + sbx as isize) as usize;
    } else {
        st.cur.frames[ci_idx].pc = pc + 1;
    }
}
