//! Stack indices and the pseudo-indices that name fixed slots.

use crate::{ENVIRONINDEX, GLOBALSINDEX, REGISTRYINDEX};

/// Where an API call looks for its operand.
///
/// Plain integers convert into this: positive counts from the bottom of the
/// running function's frame (1 is the first slot), negative from the top.
/// The special constants become the pseudo variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Index {
    Stack(i32),
    Registry,
    Environ,
    Globals,
    /// 1-based upvalue of the running native closure.
    Upvalue(u32),
}

impl Index {
    pub fn is_pseudo(self) -> bool {
        !matches!(self, Index::Stack(_))
    }
}

impl From<i32> for Index {
    fn from(idx: i32) -> Self {
        match idx {
            REGISTRYINDEX => Index::Registry,
            ENVIRONINDEX => Index::Environ,
            GLOBALSINDEX => Index::Globals,
            i if i < GLOBALSINDEX => Index::Upvalue((GLOBALSINDEX - i) as u32),
            i => Index::Stack(i),
        }
    }
}
