//! Process-local fallback store.
//!
//! Serves groups marked non-persistent and every group while the persistent
//! store is unavailable. Entries live until the process ends or the store is
//! flushed; TTLs are not tracked.

use std::collections::HashMap;

use strata_core::{apply_offset, CacheValue};

#[derive(Debug, Clone, Default)]
pub struct NonPersistentStore {
    entries: HashMap<String, CacheValue>,
}

impl NonPersistentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent copy of the stored value.
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        self.entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: CacheValue) {
        self.entries.insert(key.into(), value);
    }

    /// Insert only if absent. Returns whether the value was written.
    pub fn add(&mut self, key: &str, value: CacheValue) -> bool {
        if self.entries.contains_key(key) {
            return false;
        }
        self.entries.insert(key.to_string(), value);
        true
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn increment(&mut self, key: &str, offset: i64) -> Option<i64> {
        self.adjust(key, offset, true)
    }

    pub fn decrement(&mut self, key: &str, offset: i64) -> Option<i64> {
        self.adjust(key, offset, false)
    }

    fn adjust(&mut self, key: &str, offset: i64, increment: bool) -> Option<i64> {
        let value = self.entries.get_mut(key)?;
        let next = apply_offset(value, offset, increment);
        *value = CacheValue::from(next);
        Some(next)
    }

    /// Drop every entry whose key matches `pred`. Returns how many went.
    pub fn remove_matching<F: Fn(&str) -> bool>(&mut self, pred: F) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !pred(key));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
