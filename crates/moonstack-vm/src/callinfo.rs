//! Call frame bookkeeping.

use moonstack_core::{Closure, GcIdx, ProtoId};

/// What a frame is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// The bottom frame of a thread: host code driving the stack directly.
    Base,
    Lua {
        closure: GcIdx<Closure>,
        proto: ProtoId,
    },
    Native {
        closure: GcIdx<Closure>,
    },
}

/// One activation on a thread's call chain.
#[derive(Clone, Debug)]
pub struct CallInfo {
    /// Stack slot holding the called function. Results land here.
    pub func: usize,
    /// First register (Lua) or first argument (native).
    pub base: usize,
    /// One past the last slot this frame may touch without growing the stack.
    pub top: usize,
    /// Next instruction to execute. Only meaningful for Lua frames.
    pub pc: usize,
    /// Results the caller wants, or `MULTRET`.
    pub nresults: i32,
    /// Tail calls that replaced this frame since it was pushed.
    pub tailcalls: u32,
    pub kind: FrameKind,
}

impl CallInfo {
    /// The frame every thread starts with.
    pub fn base(top: usize) -> Self {
        CallInfo {
            func: 0,
            base: 1,
            top,
            pc: 0,
            nresults: 0,
            tailcalls: 0,
            kind: FrameKind::Base,
        }
    }

    pub fn lua(
        func: usize,
        base: usize,
        top: usize,
        nresults: i32,
        closure: GcIdx<Closure>,
        proto: ProtoId,
    ) -> Self {
        CallInfo {
            func,
            base,
            top,
            pc: 0,
            nresults,
            tailcalls: 0,
            kind: FrameKind::Lua { closure, proto },
        }
    }

    pub fn native(func: usize, top: usize, nresults: i32, closure: GcIdx<Closure>) -> Self {
        CallInfo {
            func,
            base: func + 1,
            top,
            pc: 0,
            nresults,
            tailcalls: 0,
            kind: FrameKind::Native { closure },
        }
    }

    #[inline(always)]
    pub fn is_lua(&self) -> bool {
        matches!(self.kind, FrameKind::Lua { .. })
    }

    #[inline(always)]
    pub fn closure(&self) -> Option<GcIdx<Closure>> {
        match self.kind {
            FrameKind::Lua { closure, .. } | FrameKind::Native { closure } => Some(closure),
            FrameKind::Base => None,
        }
    }

    /// Index of the instruction being executed.
    #[inline]
    pub fn current_pc(&self) -> usize {
        self.pc.saturating_sub(1)
    }
}
