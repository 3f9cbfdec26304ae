//! Process-local mirror of persistent entries.

use std::collections::{BTreeMap, HashMap};

use strata_core::{CacheEntry, CacheValue, KeyDeriver, Timestamp};

use super::value_size;

#[derive(Debug, Clone)]
struct MirrorEntry {
    value: CacheValue,
    expires_at: Option<Timestamp>,
}

impl MirrorEntry {
    fn is_live(&self, now: Timestamp) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// Read-through copy of persistent entries, keyed by physical key.
///
/// Entries carry the expiry of the persistent entry they copy, so a mirrored
/// value stops being served at the same moment the store stops serving it.
/// A disabled mirror stores nothing.
#[derive(Debug, Clone)]
pub struct LocalMirror {
    enabled: bool,
    entries: HashMap<String, MirrorEntry>,
}

impl LocalMirror {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Independent copy of a live mirrored value. Expired entries are dropped.
    pub fn get(&mut self, key: &str, now: Timestamp) -> Option<CacheValue> {
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn contains(&mut self, key: &str, now: Timestamp) -> bool {
        self.get(key, now).is_some()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: CacheValue, expires_at: Option<Timestamp>) {
        if !self.enabled {
            return;
        }
        self.entries.insert(key.into(), MirrorEntry { value, expires_at });
    }

    /// Mirror a persistent entry under its own key and expiry.
    pub fn insert_entry(&mut self, entry: CacheEntry) {
        let expires_at = entry.expires_at();
        self.insert(entry.physical_key, entry.value, expires_at);
    }

    /// Replace the value of an already mirrored key, keeping its expiry.
    pub fn update_value(&mut self, key: &str, value: CacheValue) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.value = value;
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
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

    /// Approximate serialized size of mirrored values per group.
    pub fn group_bytes(&self, deriver: &KeyDeriver) -> BTreeMap<String, u64> {
        let mut sizes = BTreeMap::new();
        for (key, entry) in &self.entries {
            if let Some(group) = deriver.group_of(key) {
                *sizes.entry(group.to_string()).or_insert(0) += value_size(&entry.value);
            }
        }
        sizes
    }
}
