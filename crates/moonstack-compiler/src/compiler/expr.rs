/// Expression descriptors and operator tables.

/// Empty jump list.
pub const NO_JUMP: i32 = -1;

/// Describes where an expression's value currently lives.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExprKind {
    /// No value (empty expression list).
    Void,
    Nil,
    True,
    False,
    /// Constant pool entry.
    K(u32),
    /// Numeric literal not yet in the constant pool.
    Number(f64),
    /// Local variable in a register.
    Local(u32),
    Upvalue(u32),
    /// Global; the payload is the constant index of the name.
    Global(u32),
    /// `table[key]` with the table in a register and the key as an RK operand.
    Indexed { table: u32, key: u32 },
    /// Comparison; the payload is the pc of its jump.
    Jmp(usize),
    /// Instruction at pc whose destination register is not yet set.
    Relocable(usize),
    /// Value fixed in a register.
    NonReloc(u32),
    /// Call instruction at pc.
    Call(usize),
    /// VARARG instruction at pc.
    VarArg(usize),
}

/// An expression plus its pending true/false exit jump lists.
#[derive(Clone, Copy, Debug)]
pub struct ExprDesc {
    pub kind: ExprKind,
    /// patch list of "exit when true"
    pub t: i32,
    /// patch list of "exit when false"
    pub f: i32,
}

impl ExprDesc {
    pub fn new(kind: ExprKind) -> Self {
        ExprDesc {
            kind,
            t: NO_JUMP,
            f: NO_JUMP,
        }
    }

    pub fn void() -> Self {
        Self::new(ExprKind::Void)
    }

    pub fn has_jumps(&self) -> bool {
        self.t != self.f
    }

    pub fn has_multret(&self) -> bool {
        matches!(self.kind, ExprKind::Call(_) | ExprKind::VarArg(_))
    }

    /// A numeric literal with no pending jumps.
    pub fn is_numeral(&self) -> bool {
        matches!(self.kind, ExprKind::Number(_)) && self.t == NO_JUMP && self.f == NO_JUMP
    }

    /// The register of a `NonReloc`/`Local` expression.
    pub fn reg(&self) -> Option<u32> {
        match self.kind {
            ExprKind::NonReloc(r) | ExprKind::Local(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}

impl BinOp {
    /// (left, right) priority; right < left makes the operator right-associative.
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinOp::Or => (1, 1),
            BinOp::And => (2, 2),
            BinOp::Lt | BinOp::Gt | BinOp::LtEq | BinOp::GtEq | BinOp::NotEq | BinOp::Eq => (3, 3),
            BinOp::Concat => (5, 4),
            BinOp::Add | BinOp::Sub => (6, 6),
            BinOp::Mul | BinOp::Div | BinOp::Mod => (7, 7),
            BinOp::Pow => (10, 9),
        }
    }

    pub fn is_arith(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow
        )
    }
}

/// Priority of unary operators.
pub const UNARY_PRIORITY: u8 = 8;

/// Fold an arithmetic operation on two numeric literals. Division or modulo
/// by zero and NaN results are left to run time.
pub fn fold_arith(op: BinOp, a: f64, b: f64) -> Option<f64> {
    let r = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div if b != 0.0 => a / b,
        BinOp::Mod if b != 0.0 => a - (a / b).floor() * b,
        BinOp::Pow => a.powf(b),
        _ => return None,
    };
    (!r.is_nan()).then_some(r)
}
