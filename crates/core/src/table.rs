//! Open-addressing hash table with linear probing and tombstones, used for
//! global variables, instance fields, and class method tables. Keys are
//! always interned `ObjString` pointers, so key comparison is pointer
//! equality (§4.4).

use crate::object::ObjString;
use crate::value::Value;

const TABLE_MAX_LOAD: f64 = 0.75;

#[derive(Clone, Copy)]
struct Entry {
    key: *mut ObjString,
    value: Value,
}

impl Entry {
    fn empty() -> Entry {
        Entry { key: std::ptr::null_mut(), value: Value::NIL }
    }

    fn is_empty(&self) -> bool {
        self.key.is_null() && !self.is_tombstone()
    }

    /// A tombstone is a deleted slot: null key, `true` value, kept so
    /// probe sequences past it still reach live entries.
    fn is_tombstone(&self) -> bool {
        self.key.is_null() && self.value.is_bool() && self.value.as_bool()
    }
}

pub struct Table {
    entries: Vec<Entry>,
    count: usize,
}

impl Default for Table {
    fn default() -> Self {
        Table::new()
    }
}

impl Table {
    pub fn new() -> Table {
        Table { entries: Vec::new(), count: 0 }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Inserts or overwrites `key -> value`. Returns `true` if this added
    /// a brand-new key.
    pub fn set(&mut self, key: *mut ObjString, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * TABLE_MAX_LOAD {
            self.grow();
        }

        let idx = self.find_entry(key);
        let entry = &mut self.entries[idx];
        let is_new_key = entry.key.is_null();
        if is_new_key && entry.is_empty() {
            self.count += 1;
        }
        entry.key = key;
        entry.value = value;
        is_new_key
    }

    pub fn get(&self, key: *mut ObjString) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = self.find_entry(key);
        let entry = &self.entries[idx];
        if entry.key.is_null() {
            None
        } else {
            Some(entry.value)
        }
    }

    pub fn delete(&mut self, key: *mut ObjString) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let idx = self.find_entry(key);
        let entry = &mut self.entries[idx];
        if entry.key.is_null() {
            return false;
        }
        entry.key = std::ptr::null_mut();
        entry.value = Value::bool(true); // tombstone marker
        true
    }

    /// Copies every entry of `self` into `dst`, used by class inheritance
    /// to seed a subclass's method table from its superclass (§4.5 INHERIT).
    pub fn copy_all_into(&self, dst: &mut Table) {
        for entry in &self.entries {
            if !entry.key.is_null() {
                dst.set(entry.key, entry.value);
            }
        }
    }

    /// Looks up an already-interned string by content, used by the heap's
    /// intern pool to avoid allocating a duplicate `ObjString`.
    ///
    /// # Safety
    /// Every live key pointer in the table must still point at a valid
    /// `ObjString`.
    pub unsafe fn find_string(&self, text: &str, hash: u32) -> Option<*mut ObjString> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = (hash as usize) & (capacity - 1);
        loop {
            let entry = &self.entries[index];
            if entry.is_empty() {
                return None;
            }
            if !entry.key.is_null() {
                let s = unsafe { &*entry.key };
                if s.hash == hash && s.as_str() == text {
                    return Some(entry.key);
                }
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    /// Drops every key whose `Obj::marked` is false, used right before
    /// sweep to keep the intern pool from resurrecting dead strings
    /// (§4.6: "unmarked interned strings are removed from the pool before
    /// the general sweep").
    ///
    /// # Safety
    /// Every live key pointer in the table must still point at a valid
    /// `ObjString`.
    pub unsafe fn remove_white(&mut self) {
        for entry in &mut self.entries {
            if !entry.key.is_null() {
                let marked = unsafe { (*entry.key).obj.marked.get() };
                if !marked {
                    entry.key = std::ptr::null_mut();
                    entry.value = Value::bool(true);
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (*mut ObjString, Value)> + '_ {
        self.entries.iter().filter(|e| !e.key.is_null()).map(|e| (e.key, e.value))
    }

    fn find_entry(&self, key: *mut ObjString) -> usize {
        let capacity = self.entries.len();
        let hash = unsafe { (*key).hash };
        let mut index = (hash as usize) & (capacity - 1);
        let mut first_tombstone: Option<usize> = None;
        loop {
            let entry = &self.entries[index];
            if entry.key.is_null() {
                if entry.is_tombstone() {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                } else {
                    return first_tombstone.unwrap_or(index);
                }
            } else if entry.key == key {
                return index;
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() { 8 } else { self.entries.len() * 2 };
        let old_entries = std::mem::replace(&mut self.entries, vec![Entry::empty(); new_capacity]);
        self.count = 0;
        for entry in old_entries {
            if entry.key.is_null() {
                continue;
            }
            let idx = self.find_entry(entry.key);
            self.entries[idx] = entry;
            self.count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::fnv1a_hash;

    fn leak_string(text: &str) -> *mut ObjString {
        Box::into_raw(Box::new(ObjString::new(text.into(), fnv1a_hash(text.as_bytes()))))
    }

    #[test]
    fn set_get_delete_round_trip() {
        let mut table = Table::new();
        let key = leak_string("radius");
        assert!(table.set(key, Value::number(4.0)));
        assert_eq!(table.get(key).unwrap().as_number(), 4.0);
        assert!(table.delete(key));
        assert!(table.get(key).is_none());
        unsafe { drop(Box::from_raw(key)) };
    }

    #[test]
    fn overwrite_existing_key_returns_false() {
        let mut table = Table::new();
        let key = leak_string("x");
        assert!(table.set(key, Value::number(1.0)));
        assert!(!table.set(key, Value::number(2.0)));
        assert_eq!(table.get(key).unwrap().as_number(), 2.0);
        unsafe { drop(Box::from_raw(key)) };
    }

    #[test]
    fn grows_past_load_factor_without_losing_entries() {
        let mut table = Table::new();
        let mut keys = Vec::new();
        for i in 0..64 {
            let key = leak_string(&format!("k{i}"));
            table.set(key, Value::number(i as f64));
            keys.push(key);
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.get(*key).unwrap().as_number(), i as f64);
        }
        for key in keys {
            unsafe { drop(Box::from_raw(key)) };
        }
    }

    #[test]
    fn find_string_locates_by_content_and_hash() {
        let mut table = Table::new();
        let key = leak_string("hello");
        table.set(key, Value::NIL);
        let hash = fnv1a_hash(b"hello");
        let found = unsafe { table.find_string("hello", hash) };
        assert_eq!(found, Some(key));
        assert!(unsafe { table.find_string("nope", fnv1a_hash(b"nope")) }.is_none());
        unsafe { drop(Box::from_raw(key)) };
    }
}
