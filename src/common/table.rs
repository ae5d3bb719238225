//! An open-addressed, linear-probed hash table keyed by interned
//! strings. Used for the VM's globals map, every class's method table,
//! every instance's field map, and (with `V = ()`) the interner's own
//! weak string set.
//!
//! Because keys are always interned `LoxString` objects, two keys are
//! equal exactly when they are the same heap object, so probing can
//! compare by pointer instead of by byte content.

use crate::gc::Gc;

const MAX_LOAD_FACTOR: f64 = 0.75;
const INITIAL_CAPACITY: usize = 8;

#[derive(Clone)]
enum Entry<V> {
    Empty,
    Tombstone,
    Occupied(Gc, V),
}

/// A generic open-addressed map from interned-string keys to `V`.
pub struct Table<V> {
    entries: Vec<Entry<V>>,
    /// Occupied slots only; tombstones are tracked separately so they
    /// count toward the load factor without counting as live entries.
    count: usize,
    tombstones: usize,
}

impl<V: Clone> Default for Table<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Table<V> {
    pub fn new() -> Table<V> {
        Table {
            entries: Vec::new(),
            count: 0,
            tombstones: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn find_slot(entries: &[Entry<V>], key: Gc) -> usize {
        let cap = entries.len();
        let mut index = (key.hash() as usize) % cap;
        let mut tombstone: Option<usize> = None;
        loop {
            match &entries[index] {
                Entry::Empty => return tombstone.unwrap_or(index),
                Entry::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Entry::Occupied(k, _) => {
                    if *k == key {
                        return index;
                    }
                }
            }
            index = (index + 1) % cap;
        }
    }

    fn grow(&mut self) {
        let new_cap = (self.entries.len() * 2).max(INITIAL_CAPACITY);
        let mut new_entries = Vec::with_capacity(new_cap);
        new_entries.resize_with(new_cap, || Entry::Empty);

        let mut live = 0;
        for entry in self.entries.drain(..) {
            if let Entry::Occupied(k, v) = entry {
                let idx = Self::find_slot(&new_entries, k);
                new_entries[idx] = Entry::Occupied(k, v);
                live += 1;
            }
        }

        self.entries = new_entries;
        self.count = live;
        self.tombstones = 0;
    }

    /// Inserts `key -> value`, returning `true` if `key` was not
    /// already present.
    pub fn put(&mut self, key: Gc, value: V) -> bool {
        if self.entries.is_empty()
            || (self.count + self.tombstones + 1) as f64 / self.entries.len() as f64
                > MAX_LOAD_FACTOR
        {
            self.grow();
        }

        let idx = Self::find_slot(&self.entries, key);
        let is_new = !matches!(self.entries[idx], Entry::Occupied(..));
        if is_new {
            if matches!(self.entries[idx], Entry::Empty) {
                self.count += 1;
            } else {
                // replacing a tombstone
                self.count += 1;
                self.tombstones -= 1;
            }
        }
        self.entries[idx] = Entry::Occupied(key, value);
        is_new
    }

    pub fn get(&self, key: Gc) -> Option<&V> {
        if self.entries.is_empty() {
            return None;
        }
        match &self.entries[Self::find_slot(&self.entries, key)] {
            Entry::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: Gc) -> Option<&mut V> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = Self::find_slot(&self.entries, key);
        match &mut self.entries[idx] {
            Entry::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    /// Removes `key`, leaving a tombstone behind so that later probes
    /// searching past this slot for a different key still terminate
    /// correctly.
    pub fn delete(&mut self, key: Gc) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let idx = Self::find_slot(&self.entries, key);
        if matches!(self.entries[idx], Entry::Occupied(..)) {
            self.entries[idx] = Entry::Tombstone;
            self.count -= 1;
            self.tombstones += 1;
            true
        } else {
            false
        }
    }

    /// Copies every entry of `other` into `self`, overwriting
    /// duplicate keys. Used when a subclass inherits its superclass's
    /// methods (the `INHERIT` instruction).
    pub fn copy_all_from(&mut self, other: &Table<V>) {
        for (k, v) in other.iter() {
            self.put(k, v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Gc, &V)> {
        self.entries.iter().filter_map(|e| match e {
            Entry::Occupied(k, v) => Some((*k, v)),
            _ => None,
        })
    }

    /// Looks up an already-interned string by raw content and hash,
    /// without needing a `Gc` to compare against — used by the
    /// interner before it knows whether an allocation is necessary.
    pub fn find_string(&self, text: &str, hash: u32) -> Option<Gc> {
        if self.entries.is_empty() {
            return None;
        }
        let cap = self.entries.len();
        let mut index = (hash as usize) % cap;
        loop {
            match &self.entries[index] {
                Entry::Empty => return None,
                Entry::Occupied(k, _) => {
                    if k.as_str_hash() == hash && k.as_str() == text {
                        return Some(*k);
                    }
                }
                Entry::Tombstone => {}
            }
            index = (index + 1) % cap;
        }
    }
}
