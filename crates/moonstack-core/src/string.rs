//! Interned byte strings.
//!
//! Every string is interned, so two `StringId`s are equal exactly when their
//! bytes are equal. Short strings are stored inline. Dead strings are reclaimed by
//! the collector through `clear_marks` / `mark` / `sweep`, and ids go on a
//! free list for reuse.
use std::collections::HashMap;
use std::fmt;

/// Maximum bytes for inline (short) string storage.
const SSO_MAX: usize = 40;

/// Fixed per-string overhead used by the heap size estimate.
const STRING_OVERHEAD: usize = std::mem::size_of::<TString>() + 8;

/// An opaque handle to a string in the interner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StringId(pub u32);

#[derive(Clone)]
enum StringData {
    Short { buf: [u8; SSO_MAX], len: u8 },
    Long(Box<[u8]>),
}

/// A string with its precomputed hash.
#[derive(Clone)]
pub struct TString {
    data: StringData,
    hash: u32,
}

impl TString {
    fn new(bytes: &[u8], hash: u32) -> Self {
        if bytes.len() <= SSO_MAX {
            let mut buf = [0u8; SSO_MAX];
            buf[..bytes.len()].copy_from_slice(bytes);
            TString {
                data: StringData::Short {
                    buf,
                    len: bytes.len() as u8,
                },
                hash,
            }
        } else {
            TString {
                data: StringData::Long(bytes.into()),
                hash,
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            StringData::Short { buf, len } => &buf[..*len as usize],
            StringData::Long(v) => v,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the bytes are stored inline.
    pub fn is_short(&self) -> bool {
        matches!(&self.data, StringData::Short { .. })
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }
}

impl fmt::Debug for TString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(self.as_bytes()) {
            Ok(s) => write!(f, "{s:?}"),
            Err(_) => write!(f, "<binary string len={}>", self.len()),
        }
    }
}

/// String hash in the style of `luaS_newlstr`: long strings only sample every
/// `step`-th byte from the end.
pub fn lua_hash(bytes: &[u8]) -> u32 {
    let len = bytes.len();
    let mut h = len as u32;
    let step = (len >> 5) + 1;
    let mut i = len;
    while i >= step {
        h ^= (h << 5).wrapping_add(h >> 2).wrapping_add(bytes[i - 1] as u32);
        i -= step;
    }
    h
}

#[derive(Debug, Default)]
struct Slot {
    string: Option<TString>,
    marked: bool,
    fixed: bool,
}

/// Owns every string of a state.
#[derive(Debug, Default)]
pub struct StringInterner {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// hash -> ids with that hash
    lookup: HashMap<u32, Vec<u32>>,
    live: usize,
    bytes: usize,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `bytes`, returning the existing id if the string is already present.
    pub fn intern(&mut self, bytes: &[u8]) -> StringId {
        let hash = lua_hash(bytes);
        if let Some(ids) = self.lookup.get(&hash) {
            for &id in ids {
                if let Some(s) = &self.slots[id as usize].string {
                    if s.as_bytes() == bytes {
                        return StringId(id);
                    }
                }
            }
        }

        let string = TString::new(bytes, hash);
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id as usize] = Slot {
                    string: Some(string),
                    marked: false,
                    fixed: false,
                };
                id
            }
            None => {
                let id = self.slots.len() as u32;
                self.slots.push(Slot {
                    string: Some(string),
                    marked: false,
                    fixed: false,
                });
                id
            }
        };
        self.lookup.entry(hash).or_default().push(id);
        self.live += 1;
        self.bytes += bytes.len() + STRING_OVERHEAD;
        StringId(id)
    }

    /// Intern a `&str`.
    pub fn intern_str(&mut self, s: &str) -> StringId {
        self.intern(s.as_bytes())
    }

    /// Look up a string without creating it.
    pub fn find(&self, bytes: &[u8]) -> Option<StringId> {
        let ids = self.lookup.get(&lua_hash(bytes))?;
        ids.iter()
            .copied()
            .find(|&id| {
                self.slots[id as usize]
                    .string
                    .as_ref()
                    .is_some_and(|s| s.as_bytes() == bytes)
            })
            .map(StringId)
    }

    pub fn get(&self, id: StringId) -> &TString {
        self.slots[id.0 as usize]
            .string
            .as_ref()
            .expect("string was collected")
    }

    pub fn get_bytes(&self, id: StringId) -> &[u8] {
        self.get(id).as_bytes()
    }

    /// Lossy UTF-8 view, for messages.
    pub fn get_lossy(&self, id: StringId) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.get_bytes(id))
    }

    /// Number of live strings.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Estimated bytes held by live strings.
    pub fn total_bytes(&self) -> usize {
        self.bytes
    }

    /// Pin a string so the collector never frees it.
    pub fn fix(&mut self, id: StringId) {
        self.slots[id.0 as usize].fixed = true;
    }

    pub fn clear_marks(&mut self) {
        for slot in &mut self.slots {
            slot.marked = false;
        }
    }

    pub fn mark(&mut self, id: StringId) {
        if let Some(slot) = self.slots.get_mut(id.0 as usize) {
            slot.marked = true;
        }
    }

    pub fn is_marked(&self, id: StringId) -> bool {
        self.slots
            .get(id.0 as usize)
            .is_some_and(|s| s.marked || s.fixed)
    }

    /// Free every string that is neither marked nor fixed. Returns the number freed.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (id, slot) in self.slots.iter_mut().enumerate() {
            if slot.marked || slot.fixed {
                continue;
            }
            let Some(s) = slot.string.take() else {
                continue;
            };
            if let Some(bucket) = self.lookup.get_mut(&s.hash) {
                bucket.retain(|&other| other != id as u32);
                if bucket.is_empty() {
                    self.lookup.remove(&s.hash);
                }
            }
            self.bytes -= s.len() + STRING_OVERHEAD;
            self.free.push(id as u32);
            freed += 1;
        }
        self.live -= freed;
        freed
    }
}
