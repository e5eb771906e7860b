/// Block and local-variable bookkeeping for one function.
use super::expr::NO_JUMP;

/// One nested block.
#[derive(Clone, Debug)]
pub struct BlockScope {
    /// Jumps out of the loop, patched when the block closes.
    pub break_list: i32,
    /// Active locals outside the block.
    pub nactvar: u32,
    /// Some local of this block is captured as an upvalue.
    pub has_upval: bool,
    pub is_loop: bool,
}

#[derive(Default)]
pub struct ScopeManager {
    /// Register level -> index into `Proto::local_vars`.
    pub actvar: Vec<u32>,
    /// Number of active locals.
    pub nactvar: u32,
    pub blocks: Vec<BlockScope>,
}

impl ScopeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_block(&mut self, is_loop: bool) {
        self.blocks.push(BlockScope {
            break_list: NO_JUMP,
            nactvar: self.nactvar,
            has_upval: false,
            is_loop,
        });
    }

    pub fn leave_block(&mut self) -> Option<BlockScope> {
        self.blocks.pop()
    }

    /// Flag the block that declared the local at `level` as having a captured local.
    pub fn mark_upval(&mut self, level: u32) {
        if let Some(block) = self.blocks.iter_mut().rev().find(|b| b.nactvar <= level) {
            block.has_upval = true;
        }
    }

    /// Local-variable index of a pending or active local at register `level`.
    pub fn set_pending(&mut self, level: u32, local_idx: u32) {
        let level = level as usize;
        if self.actvar.len() <= level {
            self.actvar.resize(level + 1, 0);
        }
        self.actvar[level] = local_idx;
    }

    pub fn local_at(&self, level: u32) -> u32 {
        self.actvar[level as usize]
    }

    /// Innermost loop block and whether any block between here and it has captured locals.
    pub fn innermost_loop(&self) -> Option<(usize, bool)> {
        let mut upval = false;
        for (i, block) in self.blocks.iter().enumerate().rev() {
            if block.is_loop {
                return Some((i, upval));
            }
            upval |= block.has_upval;
        }
        None
    }
}
