/// Code generation for one function: registers, constants, jump lists and
/// the expression discharge machinery.
use super::expr::{fold_arith, BinOp, ExprDesc, ExprKind, UnOp, NO_JUMP};
use super::scope::ScopeManager;
use super::CompileError;
use crate::opcode::{
    is_k, rk_as_k, Instruction, OpCode, FIELDS_PER_FLUSH, MAX_A, MAX_BX, MAX_C, MAX_INDEX_RK,
    MAX_SBX,
};
use crate::proto::{Constant, Proto, UpvalDesc};
use moonstack_core::string::StringId;
use std::collections::HashMap;

/// Register limit per function.
pub const MAX_STACK: u32 = 250;
/// "All results" marker for calls, returns and SETLIST.
pub const MULTRET: i32 = -1;
/// No register: turns a TESTSET into a TEST when patched.
const NO_REG: u32 = MAX_A;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum ConstKey {
    Nil,
    Boolean(bool),
    Number(u64),
    String(StringId),
}

#[derive(Clone, Debug)]
pub struct UpvalInfo {
    pub name: StringId,
    pub in_stack: bool,
    pub index: u32,
}

pub struct FuncState {
    pub proto: Proto,
    pub scope: ScopeManager,
    pub upvalues: Vec<UpvalInfo>,
    /// First free register.
    pub freereg: u32,
    /// Pending jumps to the next emitted instruction.
    pub jpc: i32,
    /// pc of the last jump target.
    pub last_target: i32,
    /// Line stamped on emitted instructions.
    pub line: u32,
    /// A jump offset did not fit in sBx.
    pub too_long: bool,
    k_cache: HashMap<ConstKey, u32>,
}

impl FuncState {
    pub fn new(source: Option<StringId>, line_defined: u32) -> Self {
        let mut proto = Proto::new();
        proto.source = source;
        proto.line_defined = line_defined;
        FuncState {
            proto,
            scope: ScopeManager::new(),
            upvalues: Vec::new(),
            freereg: 0,
            jpc: NO_JUMP,
            last_target: -1,
            line: line_defined.max(1),
            too_long: false,
            k_cache: HashMap::new(),
        }
    }

    fn error(&self, msg: &str) -> CompileError {
        CompileError {
            message: msg.to_string(),
            line: self.line,
        }
    }

    pub fn into_proto(self) -> Proto {
        let mut proto = self.proto;
        proto.upvalues = self
            .upvalues
            .into_iter()
            .map(|u| UpvalDesc {
                name: Some(u.name),
                in_stack: u.in_stack,
                index: u.index as u8,
            })
            .collect();
        proto
    }

    // ---- Emission ----

    pub fn pc(&self) -> usize {
        self.proto.code_len()
    }

    pub fn code(&mut self, inst: Instruction) -> usize {
        self.discharge_jpc();
        self.proto.emit(inst, self.line)
    }

    pub fn code_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> usize {
        self.code(Instruction::abc(op, a, b, c))
    }

    pub fn code_abx(&mut self, op: OpCode, a: u32, bx: u32) -> usize {
        self.code(Instruction::abx(op, a, bx))
    }

    pub fn code_asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> usize {
        self.code(Instruction::asbx(op, a, sbx))
    }

    /// Re-stamp the last instruction with `line`.
    pub fn fix_line(&mut self, line: u32) {
        if let Some(l) = self.proto.line_info.last_mut() {
            *l = line;
        }
    }

    /// Set registers `from..from+n` to nil, merging with a preceding LOADNIL.
    pub fn nil(&mut self, from: u32, n: u32) {
        let pc = self.pc();
        if pc as i32 > self.last_target {
            if pc == 0 {
                // fresh frames start out nil
                if from >= self.scope.nactvar {
                    return;
                }
            } else {
                let prev = &mut self.proto.code[pc - 1];
                if prev.opcode() == OpCode::LoadNil {
                    let (pfrom, pto) = (prev.a(), prev.b());
                    if pfrom <= from && from <= pto + 1 {
                        if from + n - 1 > pto {
                            prev.set_b(from + n - 1);
                        }
                        return;
                    }
                }
            }
        }
        self.code_abc(OpCode::LoadNil, from, from + n - 1, 0);
    }

    pub fn ret(&mut self, first: u32, nret: i32) {
        self.code_abc(OpCode::Return, first, (nret + 1) as u32, 0);
    }

    // ---- Jump lists ----

    pub fn jump(&mut self) -> i32 {
        let jpc = std::mem::replace(&mut self.jpc, NO_JUMP);
        let mut j = self.code_asbx(OpCode::Jmp, 0, NO_JUMP) as i32;
        self.concat(&mut j, jpc);
        j
    }

    fn cond_jump(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> i32 {
        self.code_abc(op, a, b, c);
        self.jump()
    }

    fn fix_jump(&mut self, pc: usize, dest: usize) {
        let offset = dest as i64 - (pc as i64 + 1);
        if offset.abs() > MAX_SBX as i64 {
            self.too_long = true;
            return;
        }
        self.proto.code[pc].set_sbx(offset as i32);
    }

    /// Mark the current pc as a jump target and return it.
    pub fn get_label(&mut self) -> usize {
        self.last_target = self.pc() as i32;
        self.pc()
    }

    fn get_jump(&self, pc: usize) -> i32 {
        let offset = self.proto.code[pc].sbx();
        if offset == NO_JUMP {
            NO_JUMP
        } else {
            pc as i32 + 1 + offset
        }
    }

    /// The instruction controlling the jump at `pc`.
    fn jump_control(&self, pc: usize) -> usize {
        if pc >= 1 && self.proto.code[pc - 1].opcode().is_test() {
            pc - 1
        } else {
            pc
        }
    }

    /// Whether some jump in `list` does not produce a value.
    fn need_value(&self, mut list: i32) -> bool {
        while list != NO_JUMP {
            let ctl = self.proto.code[self.jump_control(list as usize)];
            if ctl.opcode() != OpCode::TestSet {
                return true;
            }
            list = self.get_jump(list as usize);
        }
        false
    }

    fn patch_test_reg(&mut self, node: usize, reg: u32) -> bool {
        let ctl = self.jump_control(node);
        let i = self.proto.code[ctl];
        if i.opcode() != OpCode::TestSet {
            return false;
        }
        if reg != NO_REG && reg != i.b() {
            self.proto.code[ctl].set_a(reg);
        } else {
            self.proto.code[ctl] = Instruction::abc(OpCode::Test, i.b(), 0, i.c());
        }
        true
    }

    fn remove_values(&mut self, mut list: i32) {
        while list != NO_JUMP {
            self.patch_test_reg(list as usize, NO_REG);
            list = self.get_jump(list as usize);
        }
    }

    fn patch_list_aux(&mut self, mut list: i32, vtarget: usize, reg: u32, dtarget: usize) {
        while list != NO_JUMP {
            let next = self.get_jump(list as usize);
            if self.patch_test_reg(list as usize, reg) {
                self.fix_jump(list as usize, vtarget);
            } else {
                self.fix_jump(list as usize, dtarget);
            }
            list = next;
        }
    }

    fn discharge_jpc(&mut self) {
        let jpc = std::mem::replace(&mut self.jpc, NO_JUMP);
        let pc = self.pc();
        self.patch_list_aux(jpc, pc, NO_REG, pc);
    }

    pub fn patch_list(&mut self, list: i32, target: usize) {
        if target == self.pc() {
            self.patch_to_here(list);
        } else {
            self.patch_list_aux(list, target, NO_REG, target);
        }
    }

    pub fn patch_to_here(&mut self, list: i32) {
        self.get_label();
        let mut jpc = self.jpc;
        self.concat(&mut jpc, list);
        self.jpc = jpc;
    }

    pub fn concat(&mut self, l1: &mut i32, l2: i32) {
        if l2 == NO_JUMP {
            return;
        }
        if *l1 == NO_JUMP {
            *l1 = l2;
            return;
        }
        let mut list = *l1 as usize;
        loop {
            let next = self.get_jump(list);
            if next == NO_JUMP {
                break;
            }
            list = next as usize;
        }
        self.fix_jump(list, l2 as usize);
    }

    // ---- Registers ----

    pub fn check_stack(&mut self, n: u32) -> Result<(), CompileError> {
        let newstack = self.freereg + n;
        if newstack > self.proto.max_stack_size as u32 {
            if newstack >= MAX_STACK {
                return Err(self.error("function or expression too complex"));
            }
            self.proto.max_stack_size = newstack as u8;
        }
        Ok(())
    }

    pub fn reserve_regs(&mut self, n: u32) -> Result<(), CompileError> {
        self.check_stack(n)?;
        self.freereg += n;
        Ok(())
    }

    fn free_reg(&mut self, reg: u32) {
        if !is_k(reg) && reg >= self.scope.nactvar {
            self.freereg -= 1;
            debug_assert_eq!(reg, self.freereg);
        }
    }

    pub fn free_exp(&mut self, e: &ExprDesc) {
        if let ExprKind::NonReloc(r) = e.kind {
            self.free_reg(r);
        }
    }

    // ---- Constants ----

    fn add_k(&mut self, key: ConstKey, k: Constant) -> Result<u32, CompileError> {
        if let Some(&idx) = self.k_cache.get(&key) {
            return Ok(idx);
        }
        let idx = self.proto.constants.len() as u32;
        if idx >= MAX_BX {
            return Err(self.error("constant table overflow"));
        }
        self.proto.constants.push(k);
        self.k_cache.insert(key, idx);
        Ok(idx)
    }

    pub fn string_k(&mut self, s: StringId) -> Result<u32, CompileError> {
        self.add_k(ConstKey::String(s), Constant::String(s))
    }

    pub fn number_k(&mut self, n: f64) -> Result<u32, CompileError> {
        self.add_k(ConstKey::Number(n.to_bits()), Constant::Number(n))
    }

    fn bool_k(&mut self, b: bool) -> Result<u32, CompileError> {
        self.add_k(ConstKey::Boolean(b), Constant::Boolean(b))
    }

    fn nil_k(&mut self) -> Result<u32, CompileError> {
        self.add_k(ConstKey::Nil, Constant::Nil)
    }

    // ---- Discharging expressions ----

    pub fn set_returns(&mut self, e: &ExprDesc, nresults: i32) -> Result<(), CompileError> {
        match e.kind {
            ExprKind::Call(pc) => self.proto.code[pc].set_c((nresults + 1) as u32),
            ExprKind::VarArg(pc) => {
                let a = self.freereg;
                let inst = &mut self.proto.code[pc];
                inst.set_b((nresults + 1) as u32);
                inst.set_a(a);
                self.reserve_regs(1)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn set_oneret(&mut self, e: &mut ExprDesc) {
        match e.kind {
            ExprKind::Call(pc) => e.kind = ExprKind::NonReloc(self.proto.code[pc].a()),
            ExprKind::VarArg(pc) => {
                self.proto.code[pc].set_b(2);
                e.kind = ExprKind::Relocable(pc);
            }
            _ => {}
        }
    }

    pub fn discharge_vars(&mut self, e: &mut ExprDesc) {
        match e.kind {
            ExprKind::Local(r) => e.kind = ExprKind::NonReloc(r),
            ExprKind::Upvalue(idx) => {
                e.kind = ExprKind::Relocable(self.code_abc(OpCode::GetUpval, 0, idx, 0));
            }
            ExprKind::Global(k) => {
                e.kind = ExprKind::Relocable(self.code_abx(OpCode::GetGlobal, 0, k));
            }
            ExprKind::Indexed { table, key } => {
                self.free_reg(key);
                self.free_reg(table);
                e.kind = ExprKind::Relocable(self.code_abc(OpCode::GetTable, 0, table, key));
            }
            ExprKind::Call(_) | ExprKind::VarArg(_) => self.set_oneret(e),
            _ => {}
        }
    }

    fn discharge2reg(&mut self, e: &mut ExprDesc, reg: u32) -> Result<(), CompileError> {
        self.discharge_vars(e);
        match e.kind {
            ExprKind::Nil => self.nil(reg, 1),
            ExprKind::False | ExprKind::True => {
                let b = (e.kind == ExprKind::True) as u32;
                self.code_abc(OpCode::LoadBool, reg, b, 0);
            }
            ExprKind::K(k) => {
                self.code_abx(OpCode::LoadK, reg, k);
            }
            ExprKind::Number(n) => {
                let k = self.number_k(n)?;
                self.code_abx(OpCode::LoadK, reg, k);
            }
            ExprKind::Relocable(pc) => self.proto.code[pc].set_a(reg),
            ExprKind::NonReloc(r) => {
                if r != reg {
                    self.code_abc(OpCode::Move, reg, r, 0);
                }
            }
            _ => return Ok(()),
        }
        e.kind = ExprKind::NonReloc(reg);
        Ok(())
    }

    fn discharge2anyreg(&mut self, e: &mut ExprDesc) -> Result<(), CompileError> {
        if !matches!(e.kind, ExprKind::NonReloc(_)) {
            self.reserve_regs(1)?;
            self.discharge2reg(e, self.freereg - 1)?;
        }
        Ok(())
    }

    fn code_label(&mut self, a: u32, b: u32, jump: u32) -> usize {
        self.get_label();
        self.code_abc(OpCode::LoadBool, a, b, jump)
    }

    fn exp2reg(&mut self, e: &mut ExprDesc, reg: u32) -> Result<(), CompileError> {
        self.discharge2reg(e, reg)?;
        if let ExprKind::Jmp(pc) = e.kind {
            self.concat(&mut e.t, pc as i32);
        }
        if e.has_jumps() {
            let mut load_false = 0;
            let mut load_true = 0;
            if self.need_value(e.t) || self.need_value(e.f) {
                let fj = if matches!(e.kind, ExprKind::Jmp(_)) {
                    NO_JUMP
                } else {
                    self.jump()
                };
                load_false = self.code_label(reg, 0, 1);
                load_true = self.code_label(reg, 1, 0);
                self.patch_to_here(fj);
            }
            let end = self.get_label();
            self.patch_list_aux(e.f, end, reg, load_false);
            self.patch_list_aux(e.t, end, reg, load_true);
        }
        e.f = NO_JUMP;
        e.t = NO_JUMP;
        e.kind = ExprKind::NonReloc(reg);
        Ok(())
    }

    pub fn exp2nextreg(&mut self, e: &mut ExprDesc) -> Result<(), CompileError> {
        self.discharge_vars(e);
        self.free_exp(e);
        self.reserve_regs(1)?;
        self.exp2reg(e, self.freereg - 1)
    }

    pub fn exp2anyreg(&mut self, e: &mut ExprDesc) -> Result<u32, CompileError> {
        self.discharge_vars(e);
        if let ExprKind::NonReloc(r) = e.kind {
            if !e.has_jumps() {
                return Ok(r);
            }
            if r >= self.scope.nactvar {
                self.exp2reg(e, r)?;
                return Ok(r);
            }
        }
        self.exp2nextreg(e)?;
        Ok(self.freereg - 1)
    }

    pub fn exp2val(&mut self, e: &mut ExprDesc) -> Result<(), CompileError> {
        if e.has_jumps() {
            self.exp2anyreg(e)?;
        } else {
            self.discharge_vars(e);
        }
        Ok(())
    }

    /// Value as an RK operand: a constant index when it fits, otherwise a register.
    pub fn exp2rk(&mut self, e: &mut ExprDesc) -> Result<u32, CompileError> {
        self.exp2val(e)?;
        match e.kind {
            ExprKind::Nil | ExprKind::True | ExprKind::False | ExprKind::Number(_)
                if self.proto.constants.len() <= MAX_INDEX_RK as usize =>
            {
                let k = match e.kind {
                    ExprKind::Nil => self.nil_k()?,
                    ExprKind::Number(n) => self.number_k(n)?,
                    kind => self.bool_k(kind == ExprKind::True)?,
                };
                e.kind = ExprKind::K(k);
                return Ok(rk_as_k(k));
            }
            ExprKind::K(k) if k <= MAX_INDEX_RK => return Ok(rk_as_k(k)),
            _ => {}
        }
        self.exp2anyreg(e)
    }

    pub fn store_var(&mut self, var: &ExprDesc, ex: &mut ExprDesc) -> Result<(), CompileError> {
        match var.kind {
            ExprKind::Local(r) => {
                self.free_exp(ex);
                return self.exp2reg(ex, r);
            }
            ExprKind::Upvalue(idx) => {
                let e = self.exp2anyreg(ex)?;
                self.code_abc(OpCode::SetUpval, e, idx, 0);
            }
            ExprKind::Global(k) => {
                let e = self.exp2anyreg(ex)?;
                self.code_abx(OpCode::SetGlobal, e, k);
            }
            ExprKind::Indexed { table, key } => {
                let e = self.exp2rk(ex)?;
                self.code_abc(OpCode::SetTable, table, key, e);
            }
            _ => return Err(self.error("syntax error")),
        }
        self.free_exp(ex);
        Ok(())
    }

    /// `e:key` prepares `R(A) = e[key]; R(A+1) = e`.
    pub fn self_(&mut self, e: &mut ExprDesc, key: &mut ExprDesc) -> Result<(), CompileError> {
        let ereg = self.exp2anyreg(e)?;
        self.free_exp(e);
        let func = self.freereg;
        self.reserve_regs(2)?;
        let k = self.exp2rk(key)?;
        self.code_abc(OpCode::Self_, func, ereg, k);
        self.free_exp(key);
        e.kind = ExprKind::NonReloc(func);
        Ok(())
    }

    /// Turn `t` (already in a register) into `t[k]`.
    pub fn indexed(&mut self, t: &mut ExprDesc, k: &mut ExprDesc) -> Result<(), CompileError> {
        let key = self.exp2rk(k)?;
        let table = match t.reg() {
            Some(r) => r,
            None => self.exp2anyreg(t)?,
        };
        t.kind = ExprKind::Indexed { table, key };
        Ok(())
    }

    // ---- Conditionals ----

    fn invert_jump(&mut self, pc: usize) {
        let ctl = self.jump_control(pc);
        let inst = &mut self.proto.code[ctl];
        let a = inst.a();
        inst.set_a((a == 0) as u32);
    }

    fn jump_on_cond(&mut self, e: &mut ExprDesc, cond: u32) -> Result<i32, CompileError> {
        if let ExprKind::Relocable(pc) = e.kind {
            let ie = self.proto.code[pc];
            if ie.opcode() == OpCode::Not {
                // drop the NOT and test its operand the other way round
                self.proto.code.pop();
                self.proto.line_info.pop();
                return Ok(self.cond_jump(OpCode::Test, ie.b(), 0, (cond == 0) as u32));
            }
        }
        self.discharge2anyreg(e)?;
        self.free_exp(e);
        let r = e.reg().unwrap_or(self.freereg);
        Ok(self.cond_jump(OpCode::TestSet, NO_REG, r, cond))
    }

    /// Fall through when `e` is true, jump (via `e.f`) when false.
    pub fn go_if_true(&mut self, e: &mut ExprDesc) -> Result<(), CompileError> {
        self.discharge_vars(e);
        let pc = match e.kind {
            ExprKind::K(_) | ExprKind::Number(_) | ExprKind::True => NO_JUMP,
            ExprKind::False => self.jump(),
            ExprKind::Jmp(pc) => {
                self.invert_jump(pc);
                pc as i32
            }
            _ => self.jump_on_cond(e, 0)?,
        };
        self.concat(&mut e.f, pc);
        self.patch_to_here(e.t);
        e.t = NO_JUMP;
        Ok(())
    }

    /// Fall through when `e` is false, jump (via `e.t`) when true.
    pub fn go_if_false(&mut self, e: &mut ExprDesc) -> Result<(), CompileError> {
        self.discharge_vars(e);
        let pc = match e.kind {
            ExprKind::Nil | ExprKind::False => NO_JUMP,
            ExprKind::True => self.jump(),
            ExprKind::Jmp(pc) => pc as i32,
            _ => self.jump_on_cond(e, 1)?,
        };
        self.concat(&mut e.t, pc);
        self.patch_to_here(e.f);
        e.f = NO_JUMP;
        Ok(())
    }

    fn code_not(&mut self, e: &mut ExprDesc) -> Result<(), CompileError> {
        self.discharge_vars(e);
        match e.kind {
            ExprKind::Nil | ExprKind::False => e.kind = ExprKind::True,
            ExprKind::K(_) | ExprKind::Number(_) | ExprKind::True => e.kind = ExprKind::False,
            ExprKind::Jmp(pc) => self.invert_jump(pc),
            ExprKind::Relocable(_) | ExprKind::NonReloc(_) => {
                self.discharge2anyreg(e)?;
                self.free_exp(e);
                let r = e.reg().unwrap_or(self.freereg);
                e.kind = ExprKind::Relocable(self.code_abc(OpCode::Not, 0, r, 0));
            }
            _ => {}
        }
        std::mem::swap(&mut e.f, &mut e.t);
        self.remove_values(e.f);
        self.remove_values(e.t);
        Ok(())
    }

    // ---- Operators ----

    fn code_arith(
        &mut self,
        op: OpCode,
        e1: &mut ExprDesc,
        e2: &mut ExprDesc,
    ) -> Result<(), CompileError> {
        if let Some(r) = fold(op, e1, e2) {
            e1.kind = ExprKind::Number(r);
            return Ok(());
        }
        let o2 = if op != OpCode::Unm && op != OpCode::Len {
            self.exp2rk(e2)?
        } else {
            0
        };
        let o1 = self.exp2rk(e1)?;
        if o1 > o2 {
            self.free_exp(e1);
            self.free_exp(e2);
        } else {
            self.free_exp(e2);
            self.free_exp(e1);
        }
        e1.kind = ExprKind::Relocable(self.code_abc(op, 0, o1, o2));
        Ok(())
    }

    fn code_comp(
        &mut self,
        op: OpCode,
        cond: u32,
        e1: &mut ExprDesc,
        e2: &mut ExprDesc,
    ) -> Result<(), CompileError> {
        let mut o1 = self.exp2rk(e1)?;
        let mut o2 = self.exp2rk(e2)?;
        self.free_exp(e2);
        self.free_exp(e1);
        let mut cond = cond;
        if cond == 0 && op != OpCode::Eq {
            // a > b is b < a
            std::mem::swap(&mut o1, &mut o2);
            cond = 1;
        }
        e1.kind = ExprKind::Jmp(self.cond_jump(op, cond, o1, o2) as usize);
        Ok(())
    }

    pub fn prefix(&mut self, op: UnOp, e: &mut ExprDesc) -> Result<(), CompileError> {
        let mut dummy = ExprDesc::new(ExprKind::Number(0.0));
        match op {
            UnOp::Neg => {
                if !e.is_numeral() {
                    self.exp2anyreg(e)?;
                }
                self.code_arith(OpCode::Unm, e, &mut dummy)
            }
            UnOp::Not => self.code_not(e),
            UnOp::Len => {
                self.exp2anyreg(e)?;
                self.code_arith(OpCode::Len, e, &mut dummy)
            }
        }
    }

    /// Prepare the left operand before the right one is parsed.
    pub fn infix(&mut self, op: BinOp, v: &mut ExprDesc) -> Result<(), CompileError> {
        match op {
            BinOp::And => self.go_if_true(v)?,
            BinOp::Or => self.go_if_false(v)?,
            BinOp::Concat => self.exp2nextreg(v)?,
            _ if op.is_arith() => {
                if !v.is_numeral() {
                    self.exp2rk(v)?;
                }
            }
            _ => {
                self.exp2rk(v)?;
            }
        }
        Ok(())
    }

    pub fn posfix(
        &mut self,
        op: BinOp,
        e1: &mut ExprDesc,
        e2: &mut ExprDesc,
    ) -> Result<(), CompileError> {
        match op {
            BinOp::And => {
                self.discharge_vars(e2);
                self.concat(&mut e2.f, e1.f);
                *e1 = *e2;
            }
            BinOp::Or => {
                self.discharge_vars(e2);
                self.concat(&mut e2.t, e1.t);
                *e1 = *e2;
            }
            BinOp::Concat => {
                self.exp2val(e2)?;
                if let ExprKind::Relocable(pc) = e2.kind {
                    if self.proto.code[pc].opcode() == OpCode::Concat {
                        // extend the chain a .. (b .. c) into one CONCAT
                        self.free_exp(e1);
                        let first = e1.reg().unwrap_or(self.proto.code[pc].b() - 1);
                        self.proto.code[pc].set_b(first);
                        e1.kind = ExprKind::Relocable(pc);
                        return Ok(());
                    }
                }
                self.exp2nextreg(e2)?;
                self.code_arith(OpCode::Concat, e1, e2)?;
            }
            BinOp::Add => self.code_arith(OpCode::Add, e1, e2)?,
            BinOp::Sub => self.code_arith(OpCode::Sub, e1, e2)?,
            BinOp::Mul => self.code_arith(OpCode::Mul, e1, e2)?,
            BinOp::Div => self.code_arith(OpCode::Div, e1, e2)?,
            BinOp::Mod => self.code_arith(OpCode::Mod, e1, e2)?,
            BinOp::Pow => self.code_arith(OpCode::Pow, e1, e2)?,
            BinOp::Eq => self.code_comp(OpCode::Eq, 1, e1, e2)?,
            BinOp::NotEq => self.code_comp(OpCode::Eq, 0, e1, e2)?,
            BinOp::Lt => self.code_comp(OpCode::Lt, 1, e1, e2)?,
            BinOp::LtEq => self.code_comp(OpCode::Le, 1, e1, e2)?,
            BinOp::Gt => self.code_comp(OpCode::Lt, 0, e1, e2)?,
            BinOp::GtEq => self.code_comp(OpCode::Le, 0, e1, e2)?,
        }
        Ok(())
    }

    /// Flush pending list items of a table constructor.
    pub fn set_list(&mut self, base: u32, nelems: u32, tostore: i32) {
        let c = (nelems.max(1) - 1) / FIELDS_PER_FLUSH + 1;
        let b = if tostore == MULTRET { 0 } else { tostore as u32 };
        if c <= MAX_C {
            self.code_abc(OpCode::SetList, base, b, c);
        } else {
            self.code_abc(OpCode::SetList, base, b, 0);
            self.code(Instruction::raw(c));
        }
        self.freereg = base + 1;
    }
}

fn fold(op: OpCode, e1: &ExprDesc, e2: &ExprDesc) -> Option<f64> {
    if !e1.is_numeral() || !e2.is_numeral() {
        return None;
    }
    let (ExprKind::Number(a), ExprKind::Number(b)) = (e1.kind, e2.kind) else {
        return None;
    };
    let bin = match op {
        OpCode::Add => BinOp::Add,
        OpCode::Sub => BinOp::Sub,
        OpCode::Mul => BinOp::Mul,
        OpCode::Div => BinOp::Div,
        OpCode::Mod => BinOp::Mod,
        OpCode::Pow => BinOp::Pow,
        OpCode::Unm => return (!a.is_nan()).then_some(-a),
        _ => return None,
    };
    fold_arith(bin, a, b)
}
