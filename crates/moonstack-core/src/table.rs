//! Hybrid array+hash table.

use crate::gc::GcIdx;
use crate::object::{Closure, ThreadId, Userdata};
use crate::refs::RefBook;
use crate::string::StringId;
use crate::value::Value;
use indexmap::IndexMap;

/// A key in the hash part of a table.
///
/// Numbers with an integral value are always stored as `Integer`, so `t[1]`
/// and `t[1.0]` address the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableKey {
    Integer(i64),
    /// Non-integral float, stored as raw bits.
    Number(u64),
    Boolean(bool),
    String(StringId),
    Table(u32),
    Function(u32),
    Userdata(u32),
    Thread(u32),
    LightUserdata(usize),
}

impl TableKey {
    /// Nil and NaN have no key.
    pub fn from_value(v: Value) -> Option<TableKey> {
        Some(match v {
            Value::Nil => return None,
            Value::Number(n) => {
                if n.is_nan() {
                    return None;
                }
                match number_to_int_key(n) {
                    Some(i) => TableKey::Integer(i),
                    None => TableKey::Number(n.to_bits()),
                }
            }
            Value::Boolean(b) => TableKey::Boolean(b),
            Value::String(s) => TableKey::String(s),
            Value::Table(t) => TableKey::Table(t.index()),
            Value::Function(f) => TableKey::Function(f.index()),
            Value::Userdata(u) => TableKey::Userdata(u.index()),
            Value::Thread(t) => TableKey::Thread(t.0),
            Value::LightUserdata(p) => TableKey::LightUserdata(p as usize),
        })
    }

    pub fn to_value(self) -> Value {
        match self {
            TableKey::Integer(i) => Value::Number(i as f64),
            TableKey::Number(bits) => Value::Number(f64::from_bits(bits)),
            TableKey::Boolean(b) => Value::Boolean(b),
            TableKey::String(s) => Value::String(s),
            TableKey::Table(i) => Value::Table(GcIdx::<Table>::new(i)),
            TableKey::Function(i) => Value::Function(GcIdx::<Closure>::new(i)),
            TableKey::Userdata(i) => Value::Userdata(GcIdx::<Userdata>::new(i)),
            TableKey::Thread(i) => Value::Thread(ThreadId(i)),
            TableKey::LightUserdata(p) => Value::LightUserdata(p as *mut std::ffi::c_void),
        }
    }
}

/// Integral floats that fit in an `i64` become integer keys.
#[inline]
fn number_to_int_key(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n >= -9.2e18 && n <= 9.2e18 {
        Some(n as i64)
    } else {
        None
    }
}

/// Raw-set failures. The caller formats them into a runtime error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyError {
    Nil,
    NaN,
}

impl KeyError {
    pub fn message(self) -> &'static str {
        match self {
            KeyError::Nil => "table index is nil",
            KeyError::NaN => "table index is NaN",
        }
    }
}

/// `next` was handed a key that is not in the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidKey;

pub struct Table {
    /// array[0] holds key 1.
    array: Vec<Value>,
    /// Insertion-ordered. Deleted keys stay as nil tombstones so a traversal
    /// that clears fields can continue from them.
    hash: IndexMap<TableKey, Value>,
    tombstones: usize,
    pub metatable: Option<GcIdx<Table>>,
    /// Handle book for tables used with `ref`/`unref`.
    pub refs: Option<Box<RefBook>>,
}

impl Table {
    pub fn new(array_hint: usize, hash_hint: usize) -> Self {
        Table {
            array: Vec::with_capacity(array_hint),
            hash: IndexMap::with_capacity(hash_hint),
            tombstones: 0,
            metatable: None,
            refs: None,
        }
    }

    pub fn raw_get(&self, key: Value) -> Value {
        match TableKey::from_value(key) {
            Some(TableKey::Integer(i)) => self.raw_geti(i),
            Some(tk) => self.hash.get(&tk).copied().unwrap_or_default(),
            None => Value::Nil,
        }
    }

    pub fn raw_set(&mut self, key: Value, value: Value) -> Result<(), KeyError> {
        let tk = match key {
            Value::Nil => return Err(KeyError::Nil),
            Value::Number(n) if n.is_nan() => return Err(KeyError::NaN),
            _ => TableKey::from_value(key).ok_or(KeyError::Nil)?,
        };
        match tk {
            TableKey::Integer(i) => self.raw_seti(i, value),
            _ => self.hash_set(tk, value),
        }
        Ok(())
    }

    /// 1-based integer get.
    pub fn raw_geti(&self, key: i64) -> Value {
        if key >= 1 && (key as u64) <= self.array.len() as u64 {
            self.array[(key - 1) as usize]
        } else {
            self.hash
                .get(&TableKey::Integer(key))
                .copied()
                .unwrap_or_default()
        }
    }

    /// 1-based integer set.
    pub fn raw_seti(&mut self, key: i64, value: Value) {
        if key >= 1 {
            let idx = (key - 1) as usize;
            if idx < self.array.len() {
                self.array[idx] = value;
                return;
            }
            if idx == self.array.len() && !value.is_nil() {
                if let Some(old) = self.hash.get_mut(&TableKey::Integer(key)) {
                    // keep the traversal order of a key that already lives in the hash
                    if old.is_nil() {
                        self.tombstones -= 1;
                    }
                    *old = value;
                    return;
                }
                self.array.push(value);
                self.migrate_to_array();
                return;
            }
        }
        self.hash_set(TableKey::Integer(key), value);
    }

    pub fn raw_get_str(&self, key: StringId) -> Value {
        self.hash
            .get(&TableKey::String(key))
            .copied()
            .unwrap_or_default()
    }

    pub fn raw_set_str(&mut self, key: StringId, value: Value) {
        self.hash_set(TableKey::String(key), value);
    }

    fn hash_set(&mut self, tk: TableKey, value: Value) {
        match self.hash.get_mut(&tk) {
            Some(slot) => {
                match (slot.is_nil(), value.is_nil()) {
                    (false, true) => self.tombstones += 1,
                    (true, false) => self.tombstones -= 1,
                    _ => {}
                }
                *slot = value;
            }
            None if value.is_nil() => {}
            None => {
                // New keys are not allowed mid-traversal, so tombstones can go now.
                if self.tombstones > 8 && self.tombstones * 2 > self.hash.len() {
                    self.compact_hash();
                }
                self.hash.insert(tk, value);
            }
        }
    }

    /// Drop nil tombstones from the hash part.
    pub fn compact_hash(&mut self) {
        self.hash.retain(|_, v| !v.is_nil());
        self.tombstones = 0;
    }

    /// Pull `array.len()+1, +2, ...` out of the hash after the array grew.
    fn migrate_to_array(&mut self) {
        loop {
            let next = TableKey::Integer(self.array.len() as i64 + 1);
            match self.hash.get(&next) {
                Some(v) if !v.is_nil() => {
                    if let Some(v) = self.hash.shift_remove(&next) {
                        self.array.push(v);
                    }
                }
                _ => break,
            }
        }
    }

    /// A border: some `n` with `t[n] ~= nil` and `t[n+1] == nil`, or 0 when `t[1]` is nil.
    pub fn length(&self) -> usize {
        let len = self.array.len();
        if len > 0 && self.array[len - 1].is_nil() {
            // binary search for a border inside the array part
            let (mut lo, mut hi) = (0usize, len);
            while hi - lo > 1 {
                let mid = (lo + hi) / 2;
                if self.array[mid - 1].is_nil() {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            return lo;
        }
        let mut n = len as i64;
        while !self.raw_geti(n + 1).is_nil() {
            n += 1;
        }
        n as usize
    }

    /// The pair after `key`, `None` at the end. Nil starts the traversal.
    pub fn next(&self, key: Value) -> Result<Option<(Value, Value)>, InvalidKey> {
        let start_hash = match TableKey::from_value(key) {
            None if key.is_nil() => {
                if let Some(pair) = self.next_in_array(0) {
                    return Ok(Some(pair));
                }
                0
            }
            None => return Err(InvalidKey),
            Some(TableKey::Integer(i)) if i >= 1 && (i as u64) <= self.array.len() as u64 => {
                if let Some(pair) = self.next_in_array(i as usize) {
                    return Ok(Some(pair));
                }
                0
            }
            Some(tk) => match self.hash.get_index_of(&tk) {
                Some(pos) => pos + 1,
                None => return Err(InvalidKey),
            },
        };
        Ok(self
            .hash
            .iter()
            .skip(start_hash)
            .find(|(_, v)| !v.is_nil())
            .map(|(k, v)| (k.to_value(), *v)))
    }

    fn next_in_array(&self, from: usize) -> Option<(Value, Value)> {
        self.array[from..]
            .iter()
            .position(|v| !v.is_nil())
            .map(|off| {
                let i = from + off;
                (Value::Number((i + 1) as f64), self.array[i])
            })
    }

    /// Remove entries whose weak side is dead.
    pub fn clear_weak_entries<F>(&mut self, weak_keys: bool, weak_values: bool, is_dead: F)
    where
        F: Fn(Value) -> bool,
    {
        if weak_values {
            for v in self.array.iter_mut() {
                if is_dead(*v) {
                    *v = Value::Nil;
                }
            }
        }
        let mut cleared = 0;
        for (k, v) in self.hash.iter_mut() {
            if v.is_nil() {
                continue;
            }
            if (weak_keys && is_dead(k.to_value())) || (weak_values && is_dead(*v)) {
                // tombstone rather than remove, a traversal may be holding this key
                *v = Value::Nil;
                cleared += 1;
            }
        }
        self.tombstones += cleared;
    }

    pub fn array_values(&self) -> &[Value] {
        &self.array
    }

    /// Live hash entries, tombstones excluded.
    pub fn hash_entries(&self) -> impl Iterator<Item = (&TableKey, &Value)> {
        self.hash.iter().filter(|(_, v)| !v.is_nil())
    }

    /// Slots reserved by both parts.
    pub fn capacity(&self) -> usize {
        self.array.len() + self.hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.iter().all(Value::is_nil) && self.hash_entries().next().is_none()
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "table(array={}, hash={})",
            self.array.len(),
            self.hash.len() - self.tombstones
        )
    }
}
