//! The interpreter instance and the execution state of its running thread.

use crate::callinfo::{CallInfo, FrameKind};
use crate::config::StateConfig;
use crate::error::{LuaError, LuaResult};
use crate::gc::GcState;
use crate::metamethod::TmNames;
use crate::thread::{ThreadSlot, ThreadStatus};
use crate::MINSTACK;
use moonstack_compiler::Proto;
use moonstack_core::{
    Arena, Closure, GcHeap, GcIdx, LuaType, NativeId, ProtoId, RegistryRef, StringId,
    StringInterner, Table, ThreadId, UpVal, Value,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A native function. It reads its arguments from the stack, pushes its
/// results and returns how many it pushed.
pub type NativeFn = fn(&mut State) -> LuaResult<usize>;

/// Called when a fault escapes every protected boundary. The error value is
/// on top of the stack.
pub type PanicFn = fn(&mut State);

/// Identity of one `State`, carried by thread handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StateId(u64);

impl StateId {
    fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        StateId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A loaded prototype. Nested prototypes are registered separately and
/// referenced from `children` in source order.
pub(crate) struct ProtoEntry {
    pub proto: Rc<Proto>,
    pub children: Vec<ProtoId>,
}

/// Everything private to one thread. The running thread's copy lives in
/// `State::cur`; the others are parked in their arena slots.
#[derive(Debug)]
pub(crate) struct ExecState {
    pub stack: Vec<Value>,
    /// One past the last live slot.
    pub top: usize,
    pub frames: Vec<CallInfo>,
    /// Open upvalues pointing into this stack, sorted by slot.
    pub open_upvals: Vec<(usize, GcIdx<UpVal>)>,
    pub globals: GcIdx<Table>,
    /// `n_ccalls` when this thread was last resumed. A yield is only
    /// possible while the count is back at this level.
    pub base_ccalls: usize,
}

impl ExecState {
    pub fn new(globals: GcIdx<Table>) -> Self {
        ExecState {
            stack: vec![Value::Nil; 2 * MINSTACK],
            top: 1,
            frames: vec![CallInfo::base(1 + MINSTACK)],
            open_upvals: Vec::new(),
            globals,
            base_ccalls: 0,
        }
    }
}

/// An interpreter instance.
///
/// Every embedding operation is a method on `State`. Values cross the
/// boundary through the stack of the running thread; see [`crate::Index`]
/// for how slots are addressed.
pub struct State {
    pub(crate) id: StateId,
    /// Execution state of the running thread.
    pub(crate) cur: ExecState,
    pub(crate) current: ThreadId,
    pub(crate) heap: GcHeap,
    pub(crate) strings: StringInterner,
    pub(crate) protos: Arena<ProtoEntry>,
    pub(crate) natives: Vec<NativeFn>,
    native_ids: HashMap<usize, NativeId>,
    pub(crate) threads: Arena<ThreadSlot>,
    next_serial: u32,
    pub(crate) registry: GcIdx<Table>,
    /// Metatables shared by every value of a non-table, non-userdata type.
    pub(crate) type_mts: [Option<GcIdx<Table>>; LuaType::COUNT],
    pub(crate) tm: TmNames,
    pub(crate) config: StateConfig,
    /// Native re-entries currently on the Rust stack, across all threads.
    pub(crate) n_ccalls: usize,
    /// Protected boundaries currently active.
    pub(crate) protect_depth: usize,
    /// Set after a stack overflow so the error handler gets room to run.
    pub(crate) overflow_headroom: bool,
    pub(crate) gc: GcState,
    pub(crate) panic_fn: Option<PanicFn>,
    pub(crate) aborted: bool,
    /// Registry slots whose owning handles were dropped, released at the
    /// next `ref_` or collection.
    pub(crate) dropped_refs: Rc<RefCell<Vec<RegistryRef>>>,
}

pub(crate) const MAIN_THREAD: ThreadId = ThreadId(0);

impl State {
    /// A state with the stock configuration and the base library.
    pub fn new() -> Self {
        Self::with_config(StateConfig::default())
    }

    pub fn with_config(config: StateConfig) -> Self {
        let mut heap = GcHeap::new();
        let mut strings = StringInterner::new();
        let tm = TmNames::init(&mut strings);
        let registry = heap.alloc_table(0, 4);
        let globals = heap.alloc_table(0, 32);
        let mut threads = Arena::new();
        let main = threads.alloc(ThreadSlot {
            data: None,
            status: ThreadStatus::Running,
            serial: 0,
        });
        debug_assert_eq!(main.index(), MAIN_THREAD.0);

        let open_base = config.open_base_library;
        let mut state = State {
            id: StateId::fresh(),
            cur: ExecState::new(globals),
            current: MAIN_THREAD,
            heap,
            strings,
            protos: Arena::new(),
            natives: Vec::new(),
            native_ids: HashMap::new(),
            threads,
            next_serial: 1,
            registry,
            type_mts: [None; LuaType::COUNT],
            tm,
            config,
            n_ccalls: 0,
            protect_depth: 0,
            overflow_headroom: false,
            gc: GcState::default(),
            panic_fn: None,
            aborted: false,
            dropped_refs: Rc::new(RefCell::new(Vec::new())),
        };
        if open_base {
            if let Err(e) = crate::baselib::open(&mut state) {
                tracing::error!(target: "moonstack::state", error = %e, "base library failed to open");
            }
        }
        state.gc_reset_threshold();
        tracing::debug!(
            target: "moonstack::state",
            id = state.id.0,
            base_library = open_base,
            "state opened"
        );
        state
    }

    /// Destroy the state. Pending finalizers run first.
    pub fn close(mut self) {
        if self.current != MAIN_THREAD {
            self.switch_to(MAIN_THREAD);
        }
        self.close_upvalues(0);
        self.cur.frames.truncate(1);
        self.n_ccalls = 0;
        self.protect_depth = 0;
        self.aborted = false;
        self.run_all_finalizers();
        tracing::debug!(target: "moonstack::state", id = self.id.0, "state closed");
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    /// Install the handler for faults that escape every boundary. Returns the
    /// previous one.
    pub fn atpanic(&mut self, f: PanicFn) -> Option<PanicFn> {
        self.panic_fn.replace(f)
    }

    /// Whether an unprotected fault has put this state out of service.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub(crate) fn ensure_usable(&self) -> LuaResult<()> {
        if self.aborted {
            Err(LuaError::contract(
                "state was aborted by an unprotected error",
            ))
        } else {
            Ok(())
        }
    }

    // ---- Frames ----

    #[inline]
    pub(crate) fn ci(&self) -> &CallInfo {
        // every thread keeps its base frame
        &self.cur.frames[self.cur.frames.len() - 1]
    }

    #[inline]
    pub(crate) fn ci_mut(&mut self) -> &mut CallInfo {
        let n = self.cur.frames.len() - 1;
        &mut self.cur.frames[n]
    }

    /// Environment new functions and userdata inherit: the running
    /// function's, or the thread's globals at host level.
    pub(crate) fn current_env(&self) -> GcIdx<Table> {
        match self.ci().closure() {
            Some(cl) => self.heap.get_closure(cl).env(),
            None => self.cur.globals,
        }
    }

    // ---- Prototypes and natives ----

    pub(crate) fn register_proto(&mut self, mut proto: Proto) -> ProtoId {
        let children = std::mem::take(&mut proto.protos)
            .into_iter()
            .map(|child| self.register_proto(child))
            .collect();
        let idx = self.protos.alloc(ProtoEntry {
            proto: Rc::new(proto),
            children,
        });
        ProtoId(idx.index())
    }

    pub(crate) fn proto_entry(&self, id: ProtoId) -> &ProtoEntry {
        match self.protos.get(GcIdx::new(id.0)) {
            Some(entry) => entry,
            None => panic!("prototype {} was collected while in use", id.0),
        }
    }

    #[inline]
    pub(crate) fn proto(&self, id: ProtoId) -> Rc<Proto> {
        Rc::clone(&self.proto_entry(id).proto)
    }

    /// Stable id for a native function pointer.
    pub(crate) fn native_id(&mut self, f: NativeFn) -> NativeId {
        let key = f as usize;
        if let Some(&id) = self.native_ids.get(&key) {
            return id;
        }
        let id = NativeId(self.natives.len() as u32);
        self.natives.push(f);
        self.native_ids.insert(key, id);
        id
    }

    // ---- Strings ----

    pub(crate) fn intern(&mut self, bytes: &[u8]) -> Value {
        Value::String(self.strings.intern(bytes))
    }

    pub(crate) fn string_bytes(&self, id: StringId) -> &[u8] {
        self.strings.get_bytes(id)
    }

    /// Lossy text of a string value, `None` for anything else.
    pub(crate) fn value_text(&self, v: Value) -> Option<String> {
        v.as_string_id()
            .map(|id| self.strings.get_lossy(id).into_owned())
    }

    // ---- Threads ----

    pub(crate) fn new_thread_id(&mut self) -> (ThreadId, u32) {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        let data = ExecState::new(self.cur.globals);
        let idx = self.threads.alloc(ThreadSlot {
            data: Some(data),
            status: ThreadStatus::Suspended,
            serial,
        });
        (ThreadId(idx.index()), serial)
    }

    pub(crate) fn thread_slot(&self, id: ThreadId) -> Option<&ThreadSlot> {
        self.threads.get(GcIdx::new(id.0))
    }

    pub(crate) fn thread_slot_mut(&mut self, id: ThreadId) -> Option<&mut ThreadSlot> {
        self.threads.get_mut(GcIdx::new(id.0))
    }

    /// Make `id` the running thread, parking the current one. Statuses are
    /// left to the caller.
    pub(crate) fn switch_to(&mut self, id: ThreadId) {
        if id == self.current {
            return;
        }
        let Some(incoming) = self.thread_slot_mut(id).and_then(|slot| slot.data.take()) else {
            panic!("thread {} has no parked execution state", id.0);
        };
        let outgoing = std::mem::replace(&mut self.cur, incoming);
        let prev = self.current;
        if let Some(slot) = self.thread_slot_mut(prev) {
            slot.data = Some(outgoing);
        }
        self.current = id;
    }

    // ---- Upvalues ----

    pub(crate) fn upval_get(&self, uv: GcIdx<UpVal>) -> Value {
        match *self.heap.get_upval(uv) {
            UpVal::Closed(v) => v,
            UpVal::Open { thread, slot } => {
                if thread == self.current {
                    self.cur.stack[slot]
                } else {
                    self.thread_slot(thread)
                        .and_then(|t| t.data.as_ref())
                        .and_then(|d| d.stack.get(slot).copied())
                        .unwrap_or_default()
                }
            }
        }
    }

    pub(crate) fn upval_set(&mut self, uv: GcIdx<UpVal>, v: Value) {
        match *self.heap.get_upval(uv) {
            UpVal::Closed(_) => *self.heap.get_upval_mut(uv) = UpVal::Closed(v),
            UpVal::Open { thread, slot } => {
                if thread == self.current {
                    self.cur.stack[slot] = v;
                } else if let Some(d) = self.thread_slot_mut(thread).and_then(|t| t.data.as_mut()) {
                    d.stack[slot] = v;
                }
            }
        }
    }

    /// The open upvalue for `slot` of the running thread, created on demand.
    pub(crate) fn find_upval(&mut self, slot: usize) -> GcIdx<UpVal> {
        let pos = match self.cur.open_upvals.binary_search_by_key(&slot, |&(s, _)| s) {
            Ok(i) => return self.cur.open_upvals[i].1,
            Err(i) => i,
        };
        let uv = self.heap.alloc_upval(UpVal::Open {
            thread: self.current,
            slot,
        });
        self.cur.open_upvals.insert(pos, (slot, uv));
        uv
    }

    /// Close every open upvalue at or above `level`.
    pub(crate) fn close_upvalues(&mut self, level: usize) {
        let keep = self.cur.open_upvals.partition_point(|&(s, _)| s < level);
        for (slot, uv) in self.cur.open_upvals.split_off(keep) {
            let v = self.cur.stack.get(slot).copied().unwrap_or_default();
            *self.heap.get_upval_mut(uv) = UpVal::Closed(v);
        }
    }

    // ---- Metatables ----

    pub(crate) fn metatable_of(&self, v: Value) -> Option<GcIdx<Table>> {
        match v {
            Value::Table(t) => self.heap.get_table(t).metatable,
            Value::Userdata(u) => self.heap.get_userdata(u).metatable,
            other => self.type_mts[other.type_of().code() as usize],
        }
    }

    pub(crate) fn closure_of(&self, v: Value) -> Option<&Closure> {
        v.as_function().map(|f| self.heap.get_closure(f))
    }

    pub(crate) fn frame_proto(&self, ci: &CallInfo) -> Option<Rc<Proto>> {
        match ci.kind {
            FrameKind::Lua { proto, .. } => Some(self.proto(proto)),
            _ => None,
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("id", &self.id)
            .field("thread", &self.current)
            .field("top", &self.cur.top)
            .field("frames", &self.cur.frames.len())
            .finish_non_exhaustive()
    }
}
