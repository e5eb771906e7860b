/// Register-machine opcodes and instruction encoding.
///
/// Instruction format (32 bits), low to high:
/// - Bits 0-5: OpCode (6 bits)
/// - Bits 6-13: A (8 bits)
/// - iABC: C = bits 14-22 (9 bits), B = bits 23-31 (9 bits)
/// - iABx: Bx = bits 14-31 (18 bits, unsigned)
/// - iAsBx: sBx = Bx - MAX_SBX
///
/// B and C operands written as RK(x) name a register when bit 8 is clear and
/// constant `x & 0xFF` when it is set.
use std::fmt;

const SIZE_OP: u32 = 6;
const SIZE_A: u32 = 8;
const SIZE_B: u32 = 9;
const SIZE_C: u32 = 9;
const SIZE_BX: u32 = SIZE_B + SIZE_C; // 18

const POS_OP: u32 = 0;
const POS_A: u32 = POS_OP + SIZE_OP; // 6
const POS_C: u32 = POS_A + SIZE_A; // 14
const POS_B: u32 = POS_C + SIZE_C; // 23
const POS_BX: u32 = POS_C;

const fn mask(n: u32) -> u32 {
    (1 << n) - 1
}

pub const MAX_A: u32 = mask(SIZE_A); // 255
pub const MAX_B: u32 = mask(SIZE_B); // 511
pub const MAX_C: u32 = mask(SIZE_C); // 511
pub const MAX_BX: u32 = mask(SIZE_BX); // 262143
pub const MAX_SBX: i32 = (MAX_BX >> 1) as i32; // 131071

/// Bit marking an RK operand as a constant index.
pub const BIT_RK: u32 = 1 << (SIZE_B - 1);
/// Largest constant index an RK operand can hold.
pub const MAX_INDEX_RK: u32 = BIT_RK - 1;

/// Array items flushed per SETLIST.
pub const FIELDS_PER_FLUSH: u32 = 50;

#[inline]
pub fn is_k(x: u32) -> bool {
    x & BIT_RK != 0
}

#[inline]
pub fn index_k(x: u32) -> u32 {
    x & !BIT_RK
}

#[inline]
pub fn rk_as_k(x: u32) -> u32 {
    x | BIT_RK
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// A B: R(A) := R(B)
    Move = 0,
    /// A Bx: R(A) := Kst(Bx)
    LoadK,
    /// A B C: R(A) := (B != 0); if C then pc++
    LoadBool,
    /// A B: R(A), ..., R(B) := nil
    LoadNil,
    /// A B: R(A) := UpValue[B]
    GetUpval,
    /// A Bx: R(A) := Env[Kst(Bx)]
    GetGlobal,
    /// A B C: R(A) := R(B)[RK(C)]
    GetTable,
    /// A Bx: Env[Kst(Bx)] := R(A)
    SetGlobal,
    /// A B: UpValue[B] := R(A)
    SetUpval,
    /// A B C: R(A)[RK(B)] := RK(C)
    SetTable,
    /// A B C: R(A) := {} with array size hint B and hash size hint C
    NewTable,
    /// A B C: R(A+1) := R(B); R(A) := R(B)[RK(C)]
    Self_,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    /// A B: R(A) := -R(B)
    Unm,
    Not,
    Len,
    /// A B C: R(A) := R(B) .. ... .. R(C)
    Concat,
    /// sBx: pc += sBx
    Jmp,
    /// A B C: if (RK(B) == RK(C)) ~= A then pc++
    Eq,
    Lt,
    Le,
    /// A C: if not (R(A) <=> C) then pc++
    Test,
    /// A B C: if (R(B) <=> C) then R(A) := R(B) else pc++
    TestSet,
    /// A B C: R(A), ..., R(A+C-2) := R(A)(R(A+1), ..., R(A+B-1))
    Call,
    /// A B: return R(A)(R(A+1), ..., R(A+B-1))
    TailCall,
    /// A B: return R(A), ..., R(A+B-2)
    Return,
    /// A sBx: R(A) += R(A+2); if R(A) <= R(A+1) then { pc += sBx; R(A+3) := R(A) }
    ForLoop,
    /// A sBx: R(A) -= R(A+2); pc += sBx
    ForPrep,
    /// A C: R(A+3), ..., R(A+2+C) := R(A)(R(A+1), R(A+2)); if R(A+3) ~= nil then R(A+2) := R(A+3) else pc++
    TForLoop,
    /// A B C: R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B
    SetList,
    /// A: close all upvalues >= R(A)
    Close,
    /// A Bx: R(A) := closure(KPROTO[Bx])
    Closure,
    /// A B: R(A), ..., R(A+B-2) = vararg
    VarArg,
}

impl OpCode {
    pub const COUNT: usize = 38;

    pub fn from_u8(val: u8) -> Option<OpCode> {
        use OpCode::*;
        const ALL: [OpCode; OpCode::COUNT] = [
            Move, LoadK, LoadBool, LoadNil, GetUpval, GetGlobal, GetTable, SetGlobal, SetUpval,
            SetTable, NewTable, Self_, Add, Sub, Mul, Div, Mod, Pow, Unm, Not, Len, Concat, Jmp,
            Eq, Lt, Le, Test, TestSet, Call, TailCall, Return, ForLoop, ForPrep, TForLoop,
            SetList, Close, Closure, VarArg,
        ];
        ALL.get(val as usize).copied()
    }

    pub fn format(&self) -> InstructionFormat {
        use OpCode::*;
        match self {
            LoadK | GetGlobal | SetGlobal | Closure => InstructionFormat::IABx,
            Jmp | ForLoop | ForPrep => InstructionFormat::IAsBx,
            _ => InstructionFormat::IABC,
        }
    }

    pub fn name(&self) -> &'static str {
        use OpCode::*;
        match self {
            Move => "MOVE",
            LoadK => "LOADK",
            LoadBool => "LOADBOOL",
            LoadNil => "LOADNIL",
            GetUpval => "GETUPVAL",
            GetGlobal => "GETGLOBAL",
            GetTable => "GETTABLE",
            SetGlobal => "SETGLOBAL",
            SetUpval => "SETUPVAL",
            SetTable => "SETTABLE",
            NewTable => "NEWTABLE",
            Self_ => "SELF",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Pow => "POW",
            Unm => "UNM",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Jmp => "JMP",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Test => "TEST",
            TestSet => "TESTSET",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            ForLoop => "FORLOOP",
            ForPrep => "FORPREP",
            TForLoop => "TFORLOOP",
            SetList => "SETLIST",
            Close => "CLOSE",
            Closure => "CLOSURE",
            VarArg => "VARARG",
        }
    }

    /// Comparisons and tests are always followed by a jump.
    pub fn is_test(&self) -> bool {
        use OpCode::*;
        matches!(self, Eq | Lt | Le | Test | TestSet)
    }

    /// Opcodes whose A operand names the register they write.
    pub fn sets_a(&self) -> bool {
        use OpCode::*;
        !matches!(
            self,
            SetGlobal | SetUpval | SetTable | Jmp | Eq | Lt | Le | Test | TailCall | Return
                | SetList | Close
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstructionFormat {
    IABC,
    IABx,
    IAsBx,
}

/// A 32-bit bytecode instruction.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

impl Instruction {
    pub fn abc(op: OpCode, a: u32, b: u32, c: u32) -> Self {
        debug_assert!(a <= MAX_A && b <= MAX_B && c <= MAX_C);
        Instruction(
            ((op as u32) << POS_OP) | (a << POS_A) | (b << POS_B) | (c << POS_C),
        )
    }

    pub fn abx(op: OpCode, a: u32, bx: u32) -> Self {
        debug_assert!(a <= MAX_A && bx <= MAX_BX, "Bx out of range: {bx}");
        Instruction(((op as u32) << POS_OP) | (a << POS_A) | (bx << POS_BX))
    }

    pub fn asbx(op: OpCode, a: u32, sbx: i32) -> Self {
        debug_assert!((-MAX_SBX..=MAX_SBX).contains(&sbx), "sBx out of range: {sbx}");
        Self::abx(op, a, (sbx + MAX_SBX) as u32)
    }

    /// Raw word used as the extra operand after a SETLIST with C = 0.
    pub fn raw(word: u32) -> Self {
        Instruction(word)
    }

    #[inline]
    pub fn opcode(&self) -> OpCode {
        OpCode::from_u8(((self.0 >> POS_OP) & mask(SIZE_OP)) as u8).unwrap_or(OpCode::Move)
    }

    #[inline]
    pub fn a(&self) -> u32 {
        (self.0 >> POS_A) & mask(SIZE_A)
    }

    #[inline]
    pub fn b(&self) -> u32 {
        (self.0 >> POS_B) & mask(SIZE_B)
    }

    #[inline]
    pub fn c(&self) -> u32 {
        (self.0 >> POS_C) & mask(SIZE_C)
    }

    #[inline]
    pub fn bx(&self) -> u32 {
        (self.0 >> POS_BX) & mask(SIZE_BX)
    }

    #[inline]
    pub fn sbx(&self) -> i32 {
        self.bx() as i32 - MAX_SBX
    }

    // ---- Mutators (for backpatching) ----

    pub fn set_opcode(&mut self, op: OpCode) {
        self.0 = (self.0 & !(mask(SIZE_OP) << POS_OP)) | ((op as u32) << POS_OP);
    }

    pub fn set_a(&mut self, a: u32) {
        self.0 = (self.0 & !(mask(SIZE_A) << POS_A)) | (a << POS_A);
    }

    pub fn set_b(&mut self, b: u32) {
        self.0 = (self.0 & !(mask(SIZE_B) << POS_B)) | (b << POS_B);
    }

    pub fn set_c(&mut self, c: u32) {
        self.0 = (self.0 & !(mask(SIZE_C) << POS_C)) | (c << POS_C);
    }

    pub fn set_sbx(&mut self, sbx: i32) {
        debug_assert!((-MAX_SBX..=MAX_SBX).contains(&sbx));
        let bx = (sbx + MAX_SBX) as u32;
        self.0 = (self.0 & !(mask(SIZE_BX) << POS_BX)) | (bx << POS_BX);
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode();
        write!(f, "{}", op.name())?;
        match op.format() {
            InstructionFormat::IABC => write!(f, " A={} B={} C={}", self.a(), self.b(), self.c()),
            InstructionFormat::IABx => write!(f, " A={} Bx={}", self.a(), self.bx()),
            InstructionFormat::IAsBx => write!(f, " A={} sBx={}", self.a(), self.sbx()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
