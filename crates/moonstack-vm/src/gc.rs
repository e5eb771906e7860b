//! Stop-the-world mark and sweep over the arena heap, weak tables and
//! finalizers.

use crate::state::{State, MAIN_THREAD};
use crate::thread::ThreadStatus;
use crate::Status;
use moonstack_core::{Closure, GcHeap, GcIdx, ProtoId, StringId, Table, ThreadId, UpVal, Value};
use std::collections::HashSet;

/// Heap size below which no automatic cycle starts.
const MIN_THRESHOLD: usize = 16 * 1024;

/// Operations accepted by [`State::gc`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcOp {
    Stop,
    Restart,
    Collect,
    /// Heap size in KiB.
    Count,
    /// Remainder of the heap size in bytes, below one KiB.
    CountB,
    Step,
    SetPause,
    SetStepMul,
}

#[derive(Debug, Default)]
pub(crate) struct GcState {
    /// Estimated heap size that triggers the next cycle.
    pub threshold: usize,
    pub stopped: bool,
    pub in_finalizer: bool,
    pub cycles: u64,
    /// Dead objects with a `__gc` handler, waiting for it to run.
    pub tobefnz: Vec<Value>,
    /// Objects already handed to their finalizer; they are not resurrected
    /// again.
    pub finalized_tables: HashSet<u32>,
    pub finalized_userdata: HashSet<u32>,
}

fn has_gc_tm(heap: &GcHeap, mt: Option<GcIdx<Table>>, gc: StringId) -> bool {
    mt.and_then(|mt| heap.tables.get(mt))
        .is_some_and(|mt| !mt.raw_get_str(gc).is_nil())
}

/// Weak mode of a table: (weak keys, weak values).
fn weak_mode(st: &State, table: &Table) -> (bool, bool) {
    let Some(mt) = table.metatable.and_then(|mt| st.heap.tables.get(mt)) else {
        return (false, false);
    };
    match mt.raw_get_str(st.tm.mode) {
        Value::String(s) => {
            let mode = st.strings.get_bytes(s);
            (mode.contains(&b'k'), mode.contains(&b'v'))
        }
        _ => (false, false),
    }
}

impl State {
    /// Estimated bytes held by the heap and the string table.
    pub(crate) fn total_bytes(&self) -> usize {
        self.heap.allocated() + self.strings.total_bytes()
    }

    /// Set the next trigger point relative to the current heap size.
    pub(crate) fn gc_reset_threshold(&mut self) {
        let estimate = self.total_bytes();
        self.gc.threshold = (estimate / 100)
            .saturating_mul(self.config.gc_pause)
            .max(MIN_THRESHOLD);
    }

    /// Run a cycle if the heap outgrew the threshold. Only called where
    /// every live value is reachable from a root.
    pub(crate) fn gc_check(&mut self) {
        if self.gc.stopped || self.gc.in_finalizer {
            return;
        }
        if self.total_bytes() >= self.gc.threshold {
            self.full_gc();
        }
    }

    fn mark_value(&mut self, v: Value, gray: &mut Vec<Value>) {
        let fresh = match v {
            Value::String(s) => {
                self.strings.mark(s);
                false
            }
            Value::Table(t) => self.heap.tables.mark(t),
            Value::Function(f) => self.heap.closures.mark(f),
            Value::Userdata(u) => self.heap.userdata.mark(u),
            Value::Thread(id) => self.threads.mark(GcIdx::new(id.0)),
            _ => false,
        };
        if fresh {
            gray.push(v);
        }
    }

    fn mark_proto(&mut self, id: ProtoId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let idx = GcIdx::new(id.0);
            if !self.protos.mark(idx) {
                continue;
            }
            let Some(entry) = self.protos.get(idx) else {
                continue;
            };
            let strings = &mut self.strings;
            entry.proto.for_each_string(&mut |s| strings.mark(s));
            pending.extend_from_slice(&entry.children);
        }
    }

    /// Values a thread keeps alive: its stack up to the top, its globals
    /// and its open upvalues. Dead slots above the top are cleared.
    fn thread_children(&mut self, id: ThreadId, out: &mut Vec<Value>, upvals: &mut Vec<GcIdx<UpVal>>) {
        let data = if id == self.current {
            Some(&mut self.cur)
        } else {
            self.threads
                .get_mut(GcIdx::new(id.0))
                .and_then(|slot| slot.data.as_mut())
        };
        let Some(d) = data else {
            return;
        };
        let top = d.top.min(d.stack.len());
        let reach = d
            .frames
            .iter()
            .map(|ci| ci.top)
            .max()
            .unwrap_or(0)
            .clamp(top, d.stack.len());
        d.stack[top..reach].fill(Value::Nil);
        out.extend_from_slice(&d.stack[..top]);
        out.push(Value::Table(d.globals));
        upvals.extend(d.open_upvals.iter().map(|&(_, uv)| uv));
    }

    fn propagate(&mut self, gray: &mut Vec<Value>, weak: &mut Vec<(GcIdx<Table>, bool, bool)>) {
        let mut children = Vec::new();
        let mut upvals = Vec::new();
        while let Some(v) = gray.pop() {
            match v {
                Value::Table(t) => {
                    let table = self.heap.get_table(t);
                    let (wk, wv) = weak_mode(self, table);
                    if wk || wv {
                        weak.push((t, wk, wv));
                    }
                    children.extend(table.metatable.map(Value::Table));
                    for &item in table.array_values() {
                        if !wv || item.as_string_id().is_some() {
                            children.push(item);
                        }
                    }
                    for (k, &item) in table.hash_entries() {
                        if item.is_nil() {
                            continue;
                        }
                        let key = k.to_value();
                        if !wk || key.as_string_id().is_some() {
                            children.push(key);
                        }
                        if !wv || item.as_string_id().is_some() {
                            children.push(item);
                        }
                    }
                }
                Value::Function(f) => {
                    let proto = match self.heap.get_closure(f) {
                        Closure::Lua(lc) => {
                            children.push(Value::Table(lc.env));
                            upvals.extend_from_slice(&lc.upvalues);
                            Some(lc.proto)
                        }
                        Closure::Native(nc) => {
                            children.push(Value::Table(nc.env));
                            children.extend_from_slice(&nc.upvalues);
                            None
                        }
                    };
                    if let Some(p) = proto {
                        self.mark_proto(p);
                    }
                }
                Value::Userdata(u) => {
                    let ud = self.heap.get_userdata(u);
                    children.extend(ud.metatable.map(Value::Table));
                    children.push(Value::Table(ud.env));
                }
                Value::Thread(id) => self.thread_children(id, &mut children, &mut upvals),
                _ => {}
            }
            for uv in upvals.drain(..) {
                if !self.heap.upvals.mark(uv) {
                    continue;
                }
                match *self.heap.get_upval(uv) {
                    UpVal::Closed(v) => children.push(v),
                    UpVal::Open { thread, .. } => children.push(Value::Thread(thread)),
                }
            }
            for child in children.drain(..) {
                self.mark_value(child, gray);
            }
        }
    }

    fn mark_roots(&mut self, gray: &mut Vec<Value>) {
        let mut roots = vec![
            Value::Table(self.registry),
            Value::Thread(self.current),
            Value::Thread(MAIN_THREAD),
        ];
        roots.extend(self.type_mts.iter().flatten().map(|&mt| Value::Table(mt)));
        roots.extend(
            self.threads
                .iter()
                .filter(|(_, slot)| slot.status == ThreadStatus::Normal)
                .map(|(idx, _)| Value::Thread(ThreadId(idx.index()))),
        );
        roots.extend_from_slice(&self.gc.tobefnz);
        for v in roots {
            self.mark_value(v, gray);
        }
    }

    /// Move unreachable objects with a pending `__gc` to the finalization
    /// queue and mark them, so they live until their handler has run.
    fn separate_finalizable(&mut self, gray: &mut Vec<Value>) -> usize {
        let gc = self.tm.gc;
        let mut found = Vec::new();
        for t in self.heap.tables.unmarked() {
            if self.gc.finalized_tables.contains(&t.index()) {
                continue;
            }
            if has_gc_tm(&self.heap, self.heap.get_table(t).metatable, gc) {
                self.gc.finalized_tables.insert(t.index());
                found.push(Value::Table(t));
            }
        }
        for u in self.heap.userdata.unmarked() {
            if self.gc.finalized_userdata.contains(&u.index()) {
                continue;
            }
            if has_gc_tm(&self.heap, self.heap.get_userdata(u).metatable, gc) {
                self.gc.finalized_userdata.insert(u.index());
                found.push(Value::Userdata(u));
            }
        }
        let n = found.len();
        for v in found {
            self.gc.tobefnz.push(v);
            self.mark_value(v, gray);
        }
        n
    }

    fn clear_weak_tables(&mut self, weak: &[(GcIdx<Table>, bool, bool)]) {
        let dead_tables: HashSet<u32> = self.heap.tables.unmarked().iter().map(|t| t.index()).collect();
        let closures = &self.heap.closures;
        let userdata = &self.heap.userdata;
        let threads = &self.threads;
        let tables = &mut self.heap.tables;
        let is_dead = |v: Value| match v {
            Value::Table(t) => dead_tables.contains(&t.index()),
            Value::Function(f) => !closures.is_marked(f),
            Value::Userdata(u) => !userdata.is_marked(u),
            Value::Thread(id) => !threads.is_marked(GcIdx::new(id.0)),
            _ => false,
        };
        for &(t, wk, wv) in weak {
            if dead_tables.contains(&t.index()) {
                continue;
            }
            if let Some(table) = tables.get_mut(t) {
                table.clear_weak_entries(wk, wv, &is_dead);
            }
        }
    }

    fn sweep(&mut self) -> usize {
        let mut freed = 0;

        let heap = &mut self.heap;
        freed += self.threads.sweep(|_, slot| {
            let Some(d) = slot.data else {
                return;
            };
            for (s, uv) in d.open_upvals {
                if let Some(u) = heap.upvals.get_mut(uv) {
                    *u = UpVal::Closed(d.stack.get(s).copied().unwrap_or_default());
                }
            }
        });
        freed += self.heap.closures.sweep(|_, _| {});
        freed += self.heap.upvals.sweep(|_, _| {});
        let fin = &mut self.gc;
        freed += self.heap.tables.sweep(|t, _| {
            fin.finalized_tables.remove(&t.index());
        });
        freed += self.heap.userdata.sweep(|u, _| {
            fin.finalized_userdata.remove(&u.index());
        });
        freed += self.protos.sweep(|_, _| {});
        freed += self.strings.sweep();
        freed
    }

    /// A complete collection cycle followed by any finalizers it found.
    pub(crate) fn full_gc(&mut self) {
        self.release_dropped_refs();
        let before = self.total_bytes();
        self.heap.clear_marks();
        self.strings.clear_marks();
        self.protos.clear_marks();
        self.threads.clear_marks();

        let mut gray = Vec::new();
        let mut weak = Vec::new();
        self.mark_roots(&mut gray);
        self.propagate(&mut gray, &mut weak);
        let finalizable = self.separate_finalizable(&mut gray);
        self.propagate(&mut gray, &mut weak);
        self.clear_weak_tables(&weak);
        let freed = self.sweep();

        self.heap.recount();
        self.gc.cycles += 1;
        self.gc_reset_threshold();
        tracing::debug!(
            target: "moonstack::gc",
            cycle = self.gc.cycles,
            before,
            after = self.total_bytes(),
            freed,
            finalizable,
            "collection finished"
        );
        self.run_pending_finalizers();
    }

    fn call_finalizer(&mut self, obj: Value) {
        let gc = self.tm.gc;
        let tm = match self.metatable_of(obj) {
            Some(mt) => self.heap.get_table(mt).raw_get_str(gc),
            None => return,
        };
        if tm.is_nil() {
            return;
        }
        let old_top = self.cur.top;
        if self.ensure_stack(old_top + 2).is_err() {
            return;
        }
        self.push(tm);
        self.push(obj);
        match self.protected_call(old_top, None, |s| s.do_call(old_top, 0)) {
            Ok(Status::Ok) => {}
            Ok(status) => {
                let msg = self.value_text(self.cur.stack[old_top]).unwrap_or_default();
                tracing::warn!(target: "moonstack::gc", status = ?status, error = %msg, "finalizer failed");
            }
            Err(e) => tracing::warn!(target: "moonstack::gc", error = %e, "finalizer failed"),
        }
        self.cur.top = old_top;
    }

    fn run_pending_finalizers(&mut self) {
        if self.gc.in_finalizer {
            return;
        }
        self.gc.in_finalizer = true;
        while let Some(obj) = self.gc.tobefnz.pop() {
            self.call_finalizer(obj);
        }
        self.gc.in_finalizer = false;
    }

    /// Finalize every object that still has a pending `__gc`, reachable or
    /// not. Used when the state closes.
    pub(crate) fn run_all_finalizers(&mut self) {
        let gc = self.tm.gc;
        let mut pending = std::mem::take(&mut self.gc.tobefnz);
        for (t, table) in self.heap.tables.iter() {
            if !self.gc.finalized_tables.contains(&t.index()) && has_gc_tm(&self.heap, table.metatable, gc) {
                pending.push(Value::Table(t));
            }
        }
        for (u, ud) in self.heap.userdata.iter() {
            if !self.gc.finalized_userdata.contains(&u.index()) && has_gc_tm(&self.heap, ud.metatable, gc) {
                pending.push(Value::Userdata(u));
            }
        }
        self.gc.in_finalizer = true;
        for obj in pending {
            match obj {
                Value::Table(t) => self.gc.finalized_tables.insert(t.index()),
                Value::Userdata(u) => self.gc.finalized_userdata.insert(u.index()),
                _ => false,
            };
            self.call_finalizer(obj);
        }
        self.gc.in_finalizer = false;
    }

    // ---- API ----

    /// Control the collector. Returns the value the operation reports:
    /// sizes for `Count`/`CountB`, the previous setting for
    /// `SetPause`/`SetStepMul`, 1 from `Step` when a cycle finished, else 0.
    pub fn gc(&mut self, op: GcOp, data: i32) -> i32 {
        match op {
            GcOp::Stop => {
                self.gc.stopped = true;
                0
            }
            GcOp::Restart => {
                self.gc.stopped = false;
                self.gc_reset_threshold();
                0
            }
            GcOp::Collect => {
                self.full_gc();
                0
            }
            GcOp::Count => (self.total_bytes() >> 10) as i32,
            GcOp::CountB => (self.total_bytes() & 0x3ff) as i32,
            GcOp::Step => {
                self.full_gc();
                1
            }
            GcOp::SetPause => {
                let old = self.config.gc_pause;
                self.config.gc_pause = data.max(0) as usize;
                old as i32
            }
            GcOp::SetStepMul => {
                let old = self.config.gc_stepmul;
                self.config.gc_stepmul = data.max(0) as usize;
                old as i32
            }
        }
    }
}
