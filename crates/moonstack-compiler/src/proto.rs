/// Function prototype: compiled bytecode, constants and debug info.
use crate::opcode::Instruction;
use moonstack_core::string::StringId;

#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Number(f64),
    String(StringId),
}

/// How a closure finds one of its upvalues when it is created.
#[derive(Clone, Debug)]
pub struct UpvalDesc {
    pub name: Option<StringId>,
    /// True if the upvalue is a register of the enclosing function,
    /// false if it is one of the enclosing function's own upvalues.
    pub in_stack: bool,
    pub index: u8,
}

#[derive(Clone, Debug)]
pub struct LocalVar {
    pub name: StringId,
    /// First pc where the variable is active.
    pub start_pc: u32,
    /// First pc where the variable is dead.
    pub end_pc: u32,
}

#[derive(Clone, Debug)]
pub struct Proto {
    pub code: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub protos: Vec<Proto>,
    pub upvalues: Vec<UpvalDesc>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    /// Chunk name, e.g. `@file.lua` or `=stdin`.
    pub source: Option<StringId>,
    pub line_defined: u32,
    pub last_line_defined: u32,
    /// Source line of each instruction.
    pub line_info: Vec<u32>,
    pub local_vars: Vec<LocalVar>,
}

impl Proto {
    pub fn new() -> Self {
        Proto {
            code: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            upvalues: Vec::new(),
            num_params: 0,
            is_vararg: false,
            max_stack_size: 2,
            source: None,
            line_defined: 0,
            last_line_defined: 0,
            line_info: Vec::new(),
            local_vars: Vec::new(),
        }
    }

    pub fn emit(&mut self, inst: Instruction, line: u32) -> usize {
        let pc = self.code.len();
        self.code.push(inst);
        self.line_info.push(line);
        pc
    }

    /// Add a constant to the pool, returning its index. Deduplicates by bit pattern.
    pub fn add_constant(&mut self, k: Constant) -> usize {
        if let Some(i) = self.constants.iter().position(|e| constants_equal(e, &k)) {
            return i;
        }
        self.constants.push(k);
        self.constants.len() - 1
    }

    /// Source line of `pc`, 0 when unknown.
    pub fn get_line(&self, pc: usize) -> u32 {
        self.line_info.get(pc).copied().unwrap_or(0)
    }

    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    pub fn get_mut(&mut self, pc: usize) -> &mut Instruction {
        &mut self.code[pc]
    }

    /// Name of the `n`-th (1-based) local active at `pc`.
    pub fn local_name(&self, n: usize, pc: usize) -> Option<StringId> {
        self.local_vars
            .iter()
            .filter(|v| (v.start_pc as usize) <= pc && pc < v.end_pc as usize)
            .nth(n.checked_sub(1)?)
            .map(|v| v.name)
    }

    /// Every string this prototype tree refers to.
    pub fn for_each_string(&self, f: &mut impl FnMut(StringId)) {
        if let Some(s) = self.source {
            f(s);
        }
        for k in &self.constants {
            if let Constant::String(s) = k {
                f(*s);
            }
        }
        for lv in &self.local_vars {
            f(lv.name);
        }
        for uv in &self.upvalues {
            if let Some(n) = uv.name {
                f(n);
            }
        }
        for p in &self.protos {
            p.for_each_string(f);
        }
    }
}

impl Default for Proto {
    fn default() -> Self {
        Self::new()
    }
}

fn constants_equal(a: &Constant, b: &Constant) -> bool {
    match (a, b) {
        (Constant::Nil, Constant::Nil) => true,
        (Constant::Boolean(a), Constant::Boolean(b)) => a == b,
        (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
        (Constant::String(a), Constant::String(b)) => a == b,
        _ => false,
    }
}
