//! Open-addressed hash table keyed by interned strings.
//!
//! Keys are [`StrRef`] handles, so lookups compare by handle identity; the
//! single exception is [`Table::find_string`], the content probe the string
//! interner uses before a string has a canonical handle. Deleted entries
//! become tombstones so linear probe chains stay intact, and each entry
//! stores its key's hash so growth never needs to consult the heap.

use crate::object::StrRef;
use crate::value::Value;

const INITIAL_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Entry {
    pub key: Option<StrRef>,
    pub hash: u32,
    pub value: Value,
}

const EMPTY: Entry = Entry {
    key: None,
    hash: 0,
    value: Value::Nil,
};

impl Entry {
    /// A tombstone has no key but a `true` value, distinguishing it from a
    /// never-used slot whose value is `nil`.
    fn is_tombstone(&self) -> bool {
        self.key.is_none() && matches!(self.value, Value::Bool(true))
    }
}

/// Linear-probed hash table with power-of-two capacity and a 3/4 load
/// factor. Used for globals, class method tables, instance fields, and the
/// interned-string set.
#[derive(Debug, Default)]
pub struct Table {
    /// Live entries plus tombstones; kept below 3/4 of capacity.
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of live key/value pairs.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.key.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Probe for `key` starting at `hash mod capacity`. Returns the entry
    /// holding the key, or the slot an insertion should use: the first
    /// tombstone seen on the probe path if any, else the terminating empty
    /// slot. Capacity must be non-zero.
    fn find_slot(&self, key: StrRef, hash: u32) -> usize {
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    if entry.is_tombstone() {
                        if tombstone.is_none() {
                            tombstone = Some(index);
                        }
                    } else {
                        return tombstone.unwrap_or(index);
                    }
                }
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) & mask;
        }
    }

    pub fn get(&self, key: StrRef, hash: u32) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let entry = &self.entries[self.find_slot(key, hash)];
        entry.key.map(|_| entry.value)
    }

    /// Insert or overwrite. Returns `true` when the key was not present.
    pub fn set(&mut self, key: StrRef, hash: u32, value: Value) -> bool {
        if (self.count + 1) * 4 > self.entries.len() * 3 {
            self.grow();
        }
        let index = self.find_slot(key, hash);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();
        // A reused tombstone is already included in `count`.
        if is_new && !entry.is_tombstone() {
            self.count += 1;
        }
        *entry = Entry {
            key: Some(key),
            hash,
            value,
        };
        is_new
    }

    /// Remove a key, leaving a tombstone. Returns `false` if it was absent.
    pub fn delete(&mut self, key: StrRef, hash: u32) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = self.find_slot(key, hash);
        if self.entries[index].key.is_none() {
            return false;
        }
        self.entries[index] = Entry {
            key: None,
            hash: 0,
            value: Value::Bool(true),
        };
        true
    }

    /// Content-based probe used only by the string interner: finds the
    /// interned key whose stored hash matches and whose resolved text equals
    /// `text`. Tombstones are skipped; an untouched empty slot ends the scan.
    pub fn find_string<'h>(
        &self,
        text: &str,
        hash: u32,
        resolve: impl Fn(StrRef) -> &'h str,
    ) -> Option<StrRef> {
        if self.count == 0 {
            return None;
        }
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    if !entry.is_tombstone() {
                        return None;
                    }
                }
                Some(k) => {
                    if entry.hash == hash && resolve(k) == text {
                        return Some(k);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// Tombstone every key the predicate rejects. The collector uses this to
    /// drop interned strings that did not survive marking.
    pub fn retain(&mut self, mut keep: impl FnMut(StrRef) -> bool) {
        for entry in &mut self.entries {
            if let Some(k) = entry.key
                && !keep(k)
            {
                *entry = Entry {
                    key: None,
                    hash: 0,
                    value: Value::Bool(true),
                };
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (StrRef, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    /// Entry storage size, for the collector's allocation heuristic.
    pub fn byte_count(&self) -> usize {
        self.entries.len() * std::mem::size_of::<Entry>()
    }

    /// Double the capacity and reinsert live entries. Tombstones are not
    /// carried over, so `count` is rebuilt from live entries alone.
    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() {
            INITIAL_CAPACITY
        } else {
            self.entries.len() * 2
        };
        let old = std::mem::replace(&mut self.entries, vec![EMPTY; new_capacity]);
        self.count = 0;
        for entry in old {
            if let Some(key) = entry.key {
                let index = self.find_slot(key, entry.hash);
                self.entries[index] = entry;
                self.count += 1;
            }
        }
    }
}
