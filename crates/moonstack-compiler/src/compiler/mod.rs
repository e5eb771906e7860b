/// Single-pass compiler: source text to `Proto` bytecode, with no syntax tree
/// in between. Expressions are tracked as `ExprDesc`s and discharged into
/// registers only when a value is needed.
pub mod code;
pub mod expr;
pub mod scope;

use crate::lexer::{LexError, Lexer};
use crate::opcode::{OpCode, FIELDS_PER_FLUSH, MAX_BX};
use crate::proto::{LocalVar, Proto};
use crate::token::Token;
use code::{FuncState, UpvalInfo, MULTRET};
use expr::{BinOp, ExprDesc, ExprKind, UnOp, UNARY_PRIORITY};
use moonstack_core::string::{StringId, StringInterner};

/// Locals per function.
const MAX_VARS: u32 = 200;
/// Upvalues per function.
const MAX_UPVALUES: u32 = 60;
/// Nested syntactic constructs (blocks, sub-expressions).
const MAX_NESTING: u32 = 200;
/// Items in one constructor part.
const MAX_ITEMS: u32 = i32::MAX as u32;
/// Largest size hint stored in NEWTABLE.
const MAX_SIZE_HINT: u32 = 511;

/// A syntax error. `message` already ends in its `near '...'` context when
/// one applies; the loader prefixes the chunk name.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{line}: {message}")]
pub struct CompileError {
    pub message: String,
    pub line: u32,
}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError {
            message: e.message,
            line: e.line,
        }
    }
}

/// Table constructor bookkeeping.
struct ConsControl {
    /// Last list item read, not yet stored.
    v: ExprDesc,
    table_reg: u32,
    nh: u32,
    na: u32,
    /// List items waiting for a SETLIST.
    tostore: u32,
}

pub struct Compiler<'a> {
    lexer: Lexer<'a>,
    fs: FuncState,
    /// Enclosing functions, innermost last.
    parents: Vec<FuncState>,
    nesting: u32,
    source: StringId,
}

/// Compile a chunk. The result is the main function: vararg, no parameters.
pub fn compile(
    source: &[u8],
    chunk_name: &str,
    strings: &mut StringInterner,
) -> Result<Proto, CompileError> {
    let name = strings.intern(chunk_name.as_bytes());
    let mut fs = FuncState::new(Some(name), 0);
    fs.proto.is_vararg = true;
    let mut compiler = Compiler {
        lexer: Lexer::new(source, strings),
        fs,
        parents: Vec::new(),
        nesting: 0,
        source: name,
    };
    compiler.chunk()?;
    if !matches!(compiler.tok()?, Token::Eof) {
        return Err(compiler.error_expected(&Token::Eof));
    }
    let proto = compiler.finish_main()?;
    tracing::debug!(
        target: "moonstack::compiler",
        chunk = chunk_name,
        instructions = proto.code.len(),
        functions = proto.protos.len(),
        "compiled chunk"
    );
    Ok(proto)
}

impl<'a> Compiler<'a> {
    // ---- Token helpers ----

    fn tok(&self) -> Result<&Token, CompileError> {
        self.lexer
            .current()
            .map(|t| &t.token)
            .map_err(|e| CompileError::from(e.clone()))
    }

    fn check(&self, expected: &Token) -> bool {
        matches!(self.tok(), Ok(t) if t == expected)
    }

    fn advance(&mut self) -> Result<(), CompileError> {
        self.lexer.advance()?;
        self.fs.line = self.lexer.lastline;
        Ok(())
    }

    fn test_next(&mut self, expected: &Token) -> Result<bool, CompileError> {
        if self.check(expected) {
            self.advance()?;
            return Ok(true);
        }
        self.tok()?;
        Ok(false)
    }

    fn check_next(&mut self, expected: &Token) -> Result<(), CompileError> {
        if !self.test_next(expected)? {
            return Err(self.error_expected(expected));
        }
        Ok(())
    }

    /// Expect `what` closing a `who` opened at line `line`.
    fn check_match(&mut self, what: &Token, who: &Token, line: u32) -> Result<(), CompileError> {
        if self.test_next(what)? {
            return Ok(());
        }
        if line == self.lexer.token_line() {
            Err(self.error_expected(what))
        } else {
            Err(self.syntax_error(&format!(
                "'{what}' expected (to close '{who}' at line {line})"
            )))
        }
    }

    fn str_checkname(&mut self) -> Result<StringId, CompileError> {
        match self.tok()? {
            Token::Name(id) => {
                let id = *id;
                self.advance()?;
                Ok(id)
            }
            _ => Err(self.syntax_error("'<name>' expected")),
        }
    }

    fn syntax_error(&self, msg: &str) -> CompileError {
        CompileError {
            message: format!("{msg} near '{}'", self.lexer.near()),
            line: self.lexer.token_line(),
        }
    }

    fn error_expected(&self, t: &Token) -> CompileError {
        self.syntax_error(&format!("'{t}' expected"))
    }

    fn error_limit(&self, line_defined: u32, limit: u32, what: &str) -> CompileError {
        let message = if line_defined == 0 {
            format!("main function has more than {limit} {what}")
        } else {
            format!("function at line {line_defined} has more than {limit} {what}")
        };
        CompileError {
            message,
            line: self.lexer.token_line(),
        }
    }

    fn enter_level(&mut self) -> Result<(), CompileError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(CompileError {
                message: "chunk has too many syntax levels".into(),
                line: self.lexer.token_line(),
            });
        }
        Ok(())
    }

    // ---- Functions and variables ----

    fn open_func(&mut self, line_defined: u32) {
        let mut fs = FuncState::new(Some(self.source), line_defined);
        fs.line = self.lexer.lastline;
        let parent = std::mem::replace(&mut self.fs, fs);
        self.parents.push(parent);
    }

    fn close_func(&mut self) -> Result<Proto, CompileError> {
        self.remove_vars(0);
        self.fs.ret(0, 0);
        if self.fs.too_long {
            return Err(self.syntax_error("control structure too long"));
        }
        let Some(parent) = self.parents.pop() else {
            return Err(self.syntax_error("unbalanced function nesting"));
        };
        Ok(std::mem::replace(&mut self.fs, parent).into_proto())
    }

    fn finish_main(mut self) -> Result<Proto, CompileError> {
        self.remove_vars(0);
        self.fs.ret(0, 0);
        if self.fs.too_long {
            return Err(self.syntax_error("control structure too long"));
        }
        Ok(self.fs.into_proto())
    }

    /// Function `depth` levels out from the current one.
    fn func_at(&mut self, depth: usize) -> Option<&mut FuncState> {
        if depth == 0 {
            return Some(&mut self.fs);
        }
        let n = self.parents.len();
        self.parents.get_mut(n.checked_sub(depth)?)
    }

    fn new_localvar(&mut self, name: StringId, n: u32) -> Result<(), CompileError> {
        let level = self.fs.scope.nactvar + n;
        if level + 1 > MAX_VARS {
            return Err(self.error_limit(self.fs.proto.line_defined, MAX_VARS, "local variables"));
        }
        let idx = self.fs.proto.local_vars.len() as u32;
        self.fs.proto.local_vars.push(LocalVar {
            name,
            start_pc: 0,
            end_pc: 0,
        });
        self.fs.scope.set_pending(level, idx);
        Ok(())
    }

    fn new_localvar_literal(&mut self, name: &str, n: u32) -> Result<(), CompileError> {
        let id = self.lexer.strings.intern(name.as_bytes());
        self.new_localvar(id, n)
    }

    fn adjust_local_vars(&mut self, n: u32) {
        let pc = self.fs.pc() as u32;
        for _ in 0..n {
            let lv = self.fs.scope.local_at(self.fs.scope.nactvar) as usize;
            self.fs.proto.local_vars[lv].start_pc = pc;
            self.fs.scope.nactvar += 1;
        }
    }

    fn remove_vars(&mut self, to_level: u32) {
        let pc = self.fs.pc() as u32;
        while self.fs.scope.nactvar > to_level {
            self.fs.scope.nactvar -= 1;
            let lv = self.fs.scope.local_at(self.fs.scope.nactvar) as usize;
            self.fs.proto.local_vars[lv].end_pc = pc;
        }
    }

    fn search_var(fs: &FuncState, name: StringId) -> Option<u32> {
        (0..fs.scope.nactvar)
            .rev()
            .find(|&i| fs.proto.local_vars[fs.scope.local_at(i) as usize].name == name)
    }

    fn index_upvalue(
        &mut self,
        depth: usize,
        name: StringId,
        v: ExprKind,
    ) -> Result<u32, CompileError> {
        let (in_stack, index) = match v {
            ExprKind::Local(r) => (true, r),
            ExprKind::Upvalue(i) => (false, i),
            _ => return Err(self.syntax_error("bad upvalue")),
        };
        let Some(fs) = self.func_at(depth) else {
            return Err(self.syntax_error("bad upvalue"));
        };
        if let Some(i) = fs
            .upvalues
            .iter()
            .position(|u| u.in_stack == in_stack && u.index == index)
        {
            return Ok(i as u32);
        }
        if fs.upvalues.len() as u32 >= MAX_UPVALUES {
            let line = fs.proto.line_defined;
            return Err(self.error_limit(line, MAX_UPVALUES, "upvalues"));
        }
        fs.upvalues.push(UpvalInfo {
            name,
            in_stack,
            index,
        });
        Ok(fs.upvalues.len() as u32 - 1)
    }

    /// Resolve `name` as seen from the function `depth` levels out. `None` means global.
    fn singlevar_aux(
        &mut self,
        depth: usize,
        name: StringId,
        base: bool,
    ) -> Result<Option<ExprKind>, CompileError> {
        let Some(fs) = self.func_at(depth) else {
            return Ok(None);
        };
        if let Some(reg) = Self::search_var(fs, name) {
            if !base {
                fs.scope.mark_upval(reg);
            }
            return Ok(Some(ExprKind::Local(reg)));
        }
        match self.singlevar_aux(depth + 1, name, false)? {
            None => Ok(None),
            Some(outer) => {
                let idx = self.index_upvalue(depth, name, outer)?;
                Ok(Some(ExprKind::Upvalue(idx)))
            }
        }
    }

    fn singlevar(&mut self) -> Result<ExprDesc, CompileError> {
        let name = self.str_checkname()?;
        match self.singlevar_aux(0, name, true)? {
            Some(kind) => Ok(ExprDesc::new(kind)),
            None => {
                let k = self.fs.string_k(name)?;
                Ok(ExprDesc::new(ExprKind::Global(k)))
            }
        }
    }

    fn adjust_assign(&mut self, nvars: u32, nexps: u32, e: &mut ExprDesc) -> Result<(), CompileError> {
        let mut extra = nvars as i32 - nexps as i32;
        if e.has_multret() {
            extra = (extra + 1).max(0);
            self.fs.set_returns(e, extra)?;
            if extra > 1 {
                self.fs.reserve_regs(extra as u32 - 1)?;
            }
        } else {
            if e.kind != ExprKind::Void {
                self.fs.exp2nextreg(e)?;
            }
            if extra > 0 {
                let reg = self.fs.freereg;
                self.fs.reserve_regs(extra as u32)?;
                self.fs.nil(reg, extra as u32);
            }
        }
        Ok(())
    }

    fn enter_block(&mut self, is_loop: bool) {
        self.fs.scope.enter_block(is_loop);
    }

    fn leave_block(&mut self) {
        let Some(bl) = self.fs.scope.leave_block() else {
            return;
        };
        self.remove_vars(bl.nactvar);
        if bl.has_upval {
            self.fs.code_abc(OpCode::Close, bl.nactvar, 0, 0);
        }
        self.fs.freereg = self.fs.scope.nactvar;
        self.fs.patch_to_here(bl.break_list);
    }

    // ---- Expressions ----

    fn field(&mut self, v: &mut ExprDesc) -> Result<(), CompileError> {
        self.fs.exp2anyreg(v)?;
        // skip '.' or ':'
        self.advance()?;
        let name = self.str_checkname()?;
        let mut key = ExprDesc::new(ExprKind::K(self.fs.string_k(name)?));
        self.fs.indexed(v, &mut key)
    }

    fn yindex(&mut self) -> Result<ExprDesc, CompileError> {
        self.advance()?;
        let mut v = self.expr()?;
        self.fs.exp2val(&mut v)?;
        self.check_next(&Token::RBracket)?;
        Ok(v)
    }

    fn rec_field(&mut self, cc: &mut ConsControl) -> Result<(), CompileError> {
        let reg = self.fs.freereg;
        let mut key = match self.tok()? {
            Token::Name(id) => {
                let id = *id;
                if cc.nh >= MAX_ITEMS {
                    return Err(self.error_limit(
                        self.fs.proto.line_defined,
                        MAX_ITEMS,
                        "items in a constructor",
                    ));
                }
                self.advance()?;
                ExprDesc::new(ExprKind::K(self.fs.string_k(id)?))
            }
            _ => self.yindex()?,
        };
        cc.nh += 1;
        self.check_next(&Token::Assign)?;
        let rk_key = self.fs.exp2rk(&mut key)?;
        let mut val = self.expr()?;
        let rk_val = self.fs.exp2rk(&mut val)?;
        self.fs.code_abc(OpCode::SetTable, cc.table_reg, rk_key, rk_val);
        self.fs.freereg = reg;
        Ok(())
    }

    fn close_list_field(&mut self, cc: &mut ConsControl) -> Result<(), CompileError> {
        if cc.v.kind == ExprKind::Void {
            return Ok(());
        }
        self.fs.exp2nextreg(&mut cc.v)?;
        cc.v = ExprDesc::void();
        if cc.tostore == FIELDS_PER_FLUSH {
            self.fs.set_list(cc.table_reg, cc.na, cc.tostore as i32);
            cc.tostore = 0;
        }
        Ok(())
    }

    fn last_list_field(&mut self, cc: &mut ConsControl) -> Result<(), CompileError> {
        if cc.tostore == 0 {
            return Ok(());
        }
        if cc.v.has_multret() {
            self.fs.set_returns(&cc.v, MULTRET)?;
            self.fs.set_list(cc.table_reg, cc.na, MULTRET);
            // the open call does not count toward the size hint
            cc.na -= 1;
        } else {
            if cc.v.kind != ExprKind::Void {
                self.fs.exp2nextreg(&mut cc.v)?;
            }
            self.fs.set_list(cc.table_reg, cc.na, cc.tostore as i32);
        }
        Ok(())
    }

    fn list_field(&mut self, cc: &mut ConsControl) -> Result<(), CompileError> {
        cc.v = self.expr()?;
        if cc.na >= MAX_ITEMS {
            return Err(self.error_limit(
                self.fs.proto.line_defined,
                MAX_ITEMS,
                "items in a constructor",
            ));
        }
        cc.na += 1;
        cc.tostore += 1;
        Ok(())
    }

    fn constructor(&mut self) -> Result<ExprDesc, CompileError> {
        let line = self.lexer.token_line();
        let pc = self.fs.code_abc(OpCode::NewTable, 0, 0, 0);
        let mut t = ExprDesc::new(ExprKind::Relocable(pc));
        self.fs.exp2nextreg(&mut t)?;
        let mut cc = ConsControl {
            v: ExprDesc::void(),
            table_reg: self.fs.freereg - 1,
            nh: 0,
            na: 0,
            tostore: 0,
        };
        self.check_next(&Token::LBrace)?;
        loop {
            if self.check(&Token::RBrace) {
                break;
            }
            self.close_list_field(&mut cc)?;
            match self.tok()? {
                Token::Name(_) => {
                    if matches!(self.lexer.peek_token()?, Token::Assign) {
                        self.rec_field(&mut cc)?;
                    } else {
                        self.list_field(&mut cc)?;
                    }
                }
                Token::LBracket => self.rec_field(&mut cc)?,
                _ => self.list_field(&mut cc)?,
            }
            if !(self.test_next(&Token::Comma)? || self.test_next(&Token::Semi)?) {
                break;
            }
        }
        self.check_match(&Token::RBrace, &Token::LBrace, line)?;
        self.last_list_field(&mut cc)?;
        let inst = &mut self.fs.proto.code[pc];
        inst.set_b(cc.na.min(MAX_SIZE_HINT));
        inst.set_c(cc.nh.min(MAX_SIZE_HINT));
        Ok(t)
    }

    fn parlist(&mut self) -> Result<(), CompileError> {
        let mut nparams = 0;
        self.fs.proto.is_vararg = false;
        if !self.check(&Token::RParen) {
            loop {
                match self.tok()? {
                    Token::Name(id) => {
                        let id = *id;
                        self.advance()?;
                        self.new_localvar(id, nparams)?;
                        nparams += 1;
                    }
                    Token::DotDotDot => {
                        self.advance()?;
                        self.fs.proto.is_vararg = true;
                    }
                    _ => return Err(self.syntax_error("<name> or '...' expected")),
                }
                if self.fs.proto.is_vararg || !self.test_next(&Token::Comma)? {
                    break;
                }
            }
        }
        self.adjust_local_vars(nparams);
        self.fs.proto.num_params = self.fs.scope.nactvar as u8;
        self.fs.reserve_regs(self.fs.scope.nactvar)
    }

    fn body(&mut self, is_method: bool, line: u32) -> Result<ExprDesc, CompileError> {
        self.open_func(line);
        self.check_next(&Token::LParen)?;
        if is_method {
            self.new_localvar_literal("self", 0)?;
            self.adjust_local_vars(1);
        }
        self.parlist()?;
        self.check_next(&Token::RParen)?;
        self.chunk()?;
        self.fs.proto.last_line_defined = self.lexer.token_line();
        self.check_match(&Token::End, &Token::Function, line)?;
        let proto = self.close_func()?;
        let idx = self.fs.proto.protos.len() as u32;
        if idx >= MAX_BX {
            return Err(self.error_limit(self.fs.proto.line_defined, MAX_BX, "functions"));
        }
        self.fs.proto.protos.push(proto);
        let pc = self.fs.code_abx(OpCode::Closure, 0, idx);
        Ok(ExprDesc::new(ExprKind::Relocable(pc)))
    }

    fn explist1(&mut self) -> Result<(ExprDesc, u32), CompileError> {
        let mut n = 1;
        let mut v = self.expr()?;
        while self.test_next(&Token::Comma)? {
            self.fs.exp2nextreg(&mut v)?;
            v = self.expr()?;
            n += 1;
        }
        Ok((v, n))
    }

    fn funcargs(&mut self, f: &mut ExprDesc) -> Result<(), CompileError> {
        let line = self.lexer.token_line();
        let mut args = match self.tok()? {
            Token::LParen => {
                if line != self.lexer.lastline {
                    return Err(self.syntax_error("ambiguous syntax (function call x new statement)"));
                }
                self.advance()?;
                let args = if self.check(&Token::RParen) {
                    ExprDesc::void()
                } else {
                    let (args, _) = self.explist1()?;
                    self.fs.set_returns(&args, MULTRET)?;
                    args
                };
                self.check_match(&Token::RParen, &Token::LParen, line)?;
                args
            }
            Token::LBrace => self.constructor()?,
            Token::String(s) => {
                let s = *s;
                let k = self.fs.string_k(s)?;
                self.advance()?;
                ExprDesc::new(ExprKind::K(k))
            }
            _ => return Err(self.syntax_error("function arguments expected")),
        };
        let base = match f.kind {
            ExprKind::NonReloc(r) => r,
            _ => return Err(self.syntax_error("function arguments expected")),
        };
        let nparams = if args.has_multret() {
            MULTRET
        } else {
            if args.kind != ExprKind::Void {
                self.fs.exp2nextreg(&mut args)?;
            }
            (self.fs.freereg - (base + 1)) as i32
        };
        let pc = self.fs.code_abc(OpCode::Call, base, (nparams + 1) as u32, 2);
        f.kind = ExprKind::Call(pc);
        self.fs.fix_line(line);
        self.fs.freereg = base + 1;
        Ok(())
    }

    fn primary_exp(&mut self) -> Result<ExprDesc, CompileError> {
        match self.tok()? {
            Token::LParen => {
                let line = self.lexer.token_line();
                self.advance()?;
                let mut v = self.expr()?;
                self.check_match(&Token::RParen, &Token::LParen, line)?;
                self.fs.discharge_vars(&mut v);
                Ok(v)
            }
            Token::Name(_) => self.singlevar(),
            _ => Err(self.syntax_error("unexpected symbol")),
        }
    }

    fn prefix_exp(&mut self) -> Result<ExprDesc, CompileError> {
        let mut v = self.primary_exp()?;
        loop {
            match self.tok()? {
                Token::Dot => self.field(&mut v)?,
                Token::LBracket => {
                    self.fs.exp2anyreg(&mut v)?;
                    let mut key = self.yindex()?;
                    self.fs.indexed(&mut v, &mut key)?;
                }
                Token::Colon => {
                    self.advance()?;
                    let name = self.str_checkname()?;
                    let mut key = ExprDesc::new(ExprKind::K(self.fs.string_k(name)?));
                    self.fs.self_(&mut v, &mut key)?;
                    self.funcargs(&mut v)?;
                }
                Token::LParen | Token::String(_) | Token::LBrace => {
                    self.fs.exp2nextreg(&mut v)?;
                    self.funcargs(&mut v)?;
                }
                _ => return Ok(v),
            }
        }
    }

    fn simple_exp(&mut self) -> Result<ExprDesc, CompileError> {
        let e = match self.tok()? {
            Token::Number(n) => ExprDesc::new(ExprKind::Number(*n)),
            Token::String(s) => {
                let s = *s;
                ExprDesc::new(ExprKind::K(self.fs.string_k(s)?))
            }
            Token::Nil => ExprDesc::new(ExprKind::Nil),
            Token::True => ExprDesc::new(ExprKind::True),
            Token::False => ExprDesc::new(ExprKind::False),
            Token::DotDotDot => {
                if !self.fs.proto.is_vararg {
                    return Err(self.syntax_error("cannot use '...' outside a vararg function"));
                }
                let pc = self.fs.code_abc(OpCode::VarArg, 0, 1, 0);
                ExprDesc::new(ExprKind::VarArg(pc))
            }
            Token::LBrace => return self.constructor(),
            Token::Function => {
                let line = self.lexer.token_line();
                self.advance()?;
                return self.body(false, line);
            }
            _ => return self.prefix_exp(),
        };
        self.advance()?;
        Ok(e)
    }

    fn unary_op(t: &Token) -> Option<UnOp> {
        match t {
            Token::Not => Some(UnOp::Not),
            Token::Minus => Some(UnOp::Neg),
            Token::Hash => Some(UnOp::Len),
            _ => None,
        }
    }

    fn binary_op(t: &Token) -> Option<BinOp> {
        Some(match t {
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
            Token::Star => BinOp::Mul,
            Token::Slash => BinOp::Div,
            Token::Percent => BinOp::Mod,
            Token::Caret => BinOp::Pow,
            Token::DotDot => BinOp::Concat,
            Token::NotEqual => BinOp::NotEq,
            Token::Equal => BinOp::Eq,
            Token::Less => BinOp::Lt,
            Token::LessEq => BinOp::LtEq,
            Token::Greater => BinOp::Gt,
            Token::GreaterEq => BinOp::GtEq,
            Token::And => BinOp::And,
            Token::Or => BinOp::Or,
            _ => return None,
        })
    }

    /// Parse operators binding tighter than `limit`; returns the first
    /// operator that was not consumed.
    fn subexpr(&mut self, limit: u8) -> Result<(ExprDesc, Option<BinOp>), CompileError> {
        self.enter_level()?;
        let mut v = match Self::unary_op(self.tok()?) {
            Some(uop) => {
                self.advance()?;
                let (mut e, _) = self.subexpr(UNARY_PRIORITY)?;
                self.fs.prefix(uop, &mut e)?;
                e
            }
            None => self.simple_exp()?,
        };
        let mut op = Self::binary_op(self.tok()?);
        while let Some(o) = op {
            let (left, right) = o.priority();
            if left <= limit {
                break;
            }
            self.advance()?;
            self.fs.infix(o, &mut v)?;
            let (mut v2, next) = self.subexpr(right)?;
            self.fs.posfix(o, &mut v, &mut v2)?;
            op = next;
        }
        self.nesting -= 1;
        Ok((v, op))
    }

    fn expr(&mut self) -> Result<ExprDesc, CompileError> {
        Ok(self.subexpr(0)?.0)
    }

    // ---- Statements ----

    fn chunk(&mut self) -> Result<(), CompileError> {
        self.enter_level()?;
        let mut is_last = false;
        while !is_last && !self.tok()?.is_block_follow() {
            is_last = self.statement()?;
            self.test_next(&Token::Semi)?;
            debug_assert!(self.fs.freereg >= self.fs.scope.nactvar);
            self.fs.freereg = self.fs.scope.nactvar;
            if self.fs.too_long {
                return Err(self.syntax_error("control structure too long"));
            }
        }
        self.nesting -= 1;
        Ok(())
    }

    fn block(&mut self) -> Result<(), CompileError> {
        self.enter_block(false);
        self.chunk()?;
        self.leave_block();
        Ok(())
    }

    /// Returns true for statements that must end a block.
    fn statement(&mut self) -> Result<bool, CompileError> {
        let line = self.lexer.token_line();
        match self.tok()? {
            Token::If => self.ifstat(line)?,
            Token::While => self.whilestat(line)?,
            Token::Do => {
                self.advance()?;
                self.block()?;
                self.check_match(&Token::End, &Token::Do, line)?;
            }
            Token::For => self.forstat(line)?,
            Token::Repeat => self.repeatstat(line)?,
            Token::Function => self.funcstat(line)?,
            Token::Local => {
                self.advance()?;
                if self.test_next(&Token::Function)? {
                    self.localfunc()?;
                } else {
                    self.localstat()?;
                }
            }
            Token::Return => {
                self.advance()?;
                self.retstat()?;
                return Ok(true);
            }
            Token::Break => {
                self.advance()?;
                self.breakstat()?;
                return Ok(true);
            }
            _ => self.exprstat()?,
        }
        Ok(false)
    }

    fn cond(&mut self) -> Result<i32, CompileError> {
        let mut v = self.expr()?;
        // `nil` as a condition is plain false
        if v.kind == ExprKind::Nil {
            v.kind = ExprKind::False;
        }
        self.fs.go_if_true(&mut v)?;
        Ok(v.f)
    }

    fn breakstat(&mut self) -> Result<(), CompileError> {
        let Some((idx, upval)) = self.fs.scope.innermost_loop() else {
            return Err(self.syntax_error("no loop to break"));
        };
        if upval {
            let level = self.fs.scope.blocks[idx].nactvar;
            self.fs.code_abc(OpCode::Close, level, 0, 0);
        }
        let j = self.fs.jump();
        let mut list = self.fs.scope.blocks[idx].break_list;
        self.fs.concat(&mut list, j);
        self.fs.scope.blocks[idx].break_list = list;
        Ok(())
    }

    fn whilestat(&mut self, line: u32) -> Result<(), CompileError> {
        self.advance()?;
        let while_init = self.fs.get_label();
        let cond_exit = self.cond()?;
        self.enter_block(true);
        self.check_next(&Token::Do)?;
        self.block()?;
        let back = self.fs.jump();
        self.fs.patch_list(back, while_init);
        self.check_match(&Token::End, &Token::While, line)?;
        self.leave_block();
        self.fs.patch_to_here(cond_exit);
        Ok(())
    }

    fn repeatstat(&mut self, line: u32) -> Result<(), CompileError> {
        let repeat_init = self.fs.get_label();
        self.enter_block(true);
        self.enter_block(false);
        self.advance()?;
        self.chunk()?;
        self.check_match(&Token::Until, &Token::Repeat, line)?;
        // the condition can see the body's locals
        let cond_exit = self.cond()?;
        let captured = self.fs.scope.blocks.last().is_some_and(|b| b.has_upval);
        if !captured {
            self.leave_block();
            self.fs.patch_list(cond_exit, repeat_init);
        } else {
            // close the captured locals on both exits
            self.breakstat()?;
            self.fs.patch_to_here(cond_exit);
            self.leave_block();
            let back = self.fs.jump();
            self.fs.patch_list(back, repeat_init);
        }
        self.leave_block();
        Ok(())
    }

    fn exp1(&mut self) -> Result<(), CompileError> {
        let mut e = self.expr()?;
        self.fs.exp2nextreg(&mut e)
    }

    fn forbody(&mut self, base: u32, line: u32, nvars: u32, is_num: bool) -> Result<(), CompileError> {
        self.adjust_local_vars(3);
        self.check_next(&Token::Do)?;
        let prep = if is_num {
            self.fs.code_asbx(OpCode::ForPrep, base, expr::NO_JUMP) as i32
        } else {
            self.fs.jump()
        };
        self.enter_block(false);
        self.adjust_local_vars(nvars);
        self.fs.reserve_regs(nvars)?;
        self.block()?;
        self.leave_block();
        self.fs.patch_to_here(prep);
        let end_for = if is_num {
            self.fs.code_asbx(OpCode::ForLoop, base, expr::NO_JUMP)
        } else {
            self.fs.code_abc(OpCode::TForLoop, base, 0, nvars)
        };
        self.fs.fix_line(line);
        let back = if is_num { end_for as i32 } else { self.fs.jump() };
        self.fs.patch_list(back, prep as usize + 1);
        Ok(())
    }

    fn fornum(&mut self, var: StringId, line: u32) -> Result<(), CompileError> {
        let base = self.fs.freereg;
        self.new_localvar_literal("(for index)", 0)?;
        self.new_localvar_literal("(for limit)", 1)?;
        self.new_localvar_literal("(for step)", 2)?;
        self.new_localvar(var, 3)?;
        self.check_next(&Token::Assign)?;
        self.exp1()?;
        self.check_next(&Token::Comma)?;
        self.exp1()?;
        if self.test_next(&Token::Comma)? {
            self.exp1()?;
        } else {
            let k = self.fs.number_k(1.0)?;
            let reg = self.fs.freereg;
            self.fs.code_abx(OpCode::LoadK, reg, k);
            self.fs.reserve_regs(1)?;
        }
        self.forbody(base, line, 1, true)
    }

    fn forlist(&mut self, index_name: StringId) -> Result<(), CompileError> {
        let base = self.fs.freereg;
        self.new_localvar_literal("(for generator)", 0)?;
        self.new_localvar_literal("(for state)", 1)?;
        self.new_localvar_literal("(for control)", 2)?;
        self.new_localvar(index_name, 3)?;
        let mut nvars = 4;
        while self.test_next(&Token::Comma)? {
            let name = self.str_checkname()?;
            self.new_localvar(name, nvars)?;
            nvars += 1;
        }
        self.check_next(&Token::In)?;
        let line = self.lexer.token_line();
        let (mut e, nexps) = self.explist1()?;
        self.adjust_assign(3, nexps, &mut e)?;
        self.fs.check_stack(3)?;
        self.forbody(base, line, nvars - 3, false)
    }

    fn forstat(&mut self, line: u32) -> Result<(), CompileError> {
        self.enter_block(true);
        self.advance()?;
        let var = self.str_checkname()?;
        match self.tok()? {
            Token::Assign => self.fornum(var, line)?,
            Token::Comma | Token::In => self.forlist(var)?,
            _ => return Err(self.syntax_error("'=' or 'in' expected")),
        }
        self.check_match(&Token::End, &Token::For, line)?;
        self.leave_block();
        Ok(())
    }

    fn test_then_block(&mut self) -> Result<i32, CompileError> {
        // skip IF or ELSEIF
        self.advance()?;
        let cond_exit = self.cond()?;
        self.check_next(&Token::Then)?;
        self.block()?;
        Ok(cond_exit)
    }

    fn ifstat(&mut self, line: u32) -> Result<(), CompileError> {
        let mut escape_list = expr::NO_JUMP;
        let mut false_list = self.test_then_block()?;
        while self.check(&Token::ElseIf) {
            let j = self.fs.jump();
            self.fs.concat(&mut escape_list, j);
            self.fs.patch_to_here(false_list);
            false_list = self.test_then_block()?;
        }
        if self.check(&Token::Else) {
            let j = self.fs.jump();
            self.fs.concat(&mut escape_list, j);
            self.fs.patch_to_here(false_list);
            self.advance()?;
            self.block()?;
        } else {
            self.fs.concat(&mut escape_list, false_list);
        }
        self.fs.patch_to_here(escape_list);
        self.check_match(&Token::End, &Token::If, line)
    }

    fn localfunc(&mut self) -> Result<(), CompileError> {
        let name = self.str_checkname()?;
        self.new_localvar(name, 0)?;
        let v = ExprDesc::new(ExprKind::Local(self.fs.freereg));
        self.fs.reserve_regs(1)?;
        self.adjust_local_vars(1);
        let line = self.lexer.token_line();
        let mut b = self.body(false, line)?;
        self.fs.store_var(&v, &mut b)?;
        // debug information only sees the local after the closure exists
        let lv = self.fs.scope.local_at(self.fs.scope.nactvar - 1) as usize;
        self.fs.proto.local_vars[lv].start_pc = self.fs.pc() as u32;
        Ok(())
    }

    fn localstat(&mut self) -> Result<(), CompileError> {
        let mut nvars = 0;
        loop {
            let name = self.str_checkname()?;
            self.new_localvar(name, nvars)?;
            nvars += 1;
            if !self.test_next(&Token::Comma)? {
                break;
            }
        }
        let (mut e, nexps) = if self.test_next(&Token::Assign)? {
            self.explist1()?
        } else {
            (ExprDesc::void(), 0)
        };
        self.adjust_assign(nvars, nexps, &mut e)?;
        self.adjust_local_vars(nvars);
        Ok(())
    }

    fn funcname(&mut self) -> Result<(ExprDesc, bool), CompileError> {
        let mut v = self.singlevar()?;
        while self.check(&Token::Dot) {
            self.field(&mut v)?;
        }
        let is_method = self.check(&Token::Colon);
        if is_method {
            self.field(&mut v)?;
        }
        Ok((v, is_method))
    }

    fn funcstat(&mut self, line: u32) -> Result<(), CompileError> {
        self.advance()?;
        let (v, is_method) = self.funcname()?;
        let mut b = self.body(is_method, line)?;
        self.fs.store_var(&v, &mut b)?;
        self.fs.fix_line(line);
        Ok(())
    }

    fn exprstat(&mut self) -> Result<(), CompileError> {
        let v = self.prefix_exp()?;
        if let ExprKind::Call(pc) = v.kind {
            // statement call: no results wanted
            self.fs.proto.code[pc].set_c(1);
            Ok(())
        } else {
            self.assignment(v)
        }
    }

    /// If an indexed target uses local `v` as table or key, copy the local
    /// first so the assignment to `v` does not change it.
    fn check_conflict(&mut self, targets: &mut [ExprDesc], v: &ExprDesc) -> Result<(), CompileError> {
        let ExprKind::Local(local) = v.kind else {
            return Ok(());
        };
        let extra = self.fs.freereg;
        let mut conflict = false;
        for lh in targets.iter_mut() {
            if let ExprKind::Indexed { table, key } = &mut lh.kind {
                if *table == local {
                    conflict = true;
                    *table = extra;
                }
                if *key == local {
                    conflict = true;
                    *key = extra;
                }
            }
        }
        if conflict {
            self.fs.code_abc(OpCode::Move, extra, local, 0);
            self.fs.reserve_regs(1)?;
        }
        Ok(())
    }

    fn assignment(&mut self, first: ExprDesc) -> Result<(), CompileError> {
        let mut targets = vec![first];
        loop {
            let Some(last) = targets.last() else { break };
            if !matches!(
                last.kind,
                ExprKind::Local(_)
                    | ExprKind::Upvalue(_)
                    | ExprKind::Global(_)
                    | ExprKind::Indexed { .. }
            ) {
                return Err(self.syntax_error("syntax error"));
            }
            if !self.test_next(&Token::Comma)? {
                break;
            }
            let nv = self.prefix_exp()?;
            self.check_conflict(&mut targets, &nv)?;
            if targets.len() as u32 >= MAX_NESTING.saturating_sub(self.nesting) {
                return Err(self.error_limit(
                    self.fs.proto.line_defined,
                    MAX_NESTING - self.nesting,
                    "variables in assignment",
                ));
            }
            targets.push(nv);
        }
        self.check_next(&Token::Assign)?;
        let (mut e, nexps) = self.explist1()?;
        let nvars = targets.len() as u32;
        let mut pending = targets.len();
        if nexps != nvars {
            self.adjust_assign(nvars, nexps, &mut e)?;
            if nexps > nvars {
                self.fs.freereg -= nexps - nvars;
            }
        } else {
            self.fs.set_oneret(&mut e);
            pending -= 1;
            self.fs.store_var(&targets[pending], &mut e)?;
        }
        // remaining values sit in consecutive registers; store right to left
        for target in targets[..pending].iter().rev() {
            let mut e = ExprDesc::new(ExprKind::NonReloc(self.fs.freereg - 1));
            self.fs.store_var(target, &mut e)?;
        }
        Ok(())
    }

    fn retstat(&mut self) -> Result<(), CompileError> {
        let (first, nret) = if self.tok()?.is_block_follow() || self.check(&Token::Semi) {
            (0, 0)
        } else {
            let (mut e, n) = self.explist1()?;
            if e.has_multret() {
                self.fs.set_returns(&e, MULTRET)?;
                if let ExprKind::Call(pc) = e.kind {
                    if n == 1 {
                        self.fs.proto.code[pc].set_opcode(OpCode::TailCall);
                    }
                }
                (self.fs.scope.nactvar, MULTRET)
            } else if n == 1 {
                (self.fs.exp2anyreg(&mut e)?, 1)
            } else {
                self.fs.exp2nextreg(&mut e)?;
                (self.fs.scope.nactvar, n as i32)
            }
        };
        self.fs.ret(first, nret);
        Ok(())
    }
}
