//! Hit/miss accounting and the diagnostics report.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Running hit/miss counters owned by one cache instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsCounter {
    hits: u64,
    misses: u64,
}

impl StatsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one lookup.
    pub fn record(&mut self, found: bool) {
        if found {
            self.hits = self.hits.saturating_add(1);
        } else {
            self.misses = self.misses.saturating_add(1);
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Snapshot of cache usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of lookups that found a value.
    pub hits: u64,
    /// Number of lookups that found nothing.
    pub misses: u64,
    /// Entries currently held by the local mirror.
    pub mirror_entries: u64,
    /// Entries currently held by the non-persistent store.
    pub non_persistent_entries: u64,
    /// Approximate serialized size of mirrored entries, per group.
    pub group_bytes: BTreeMap<String, u64>,
    /// Whether the persistent tier is serving requests.
    pub persistent_available: bool,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Sum of the per-group sizes.
    pub fn total_bytes(&self) -> u64 {
        self.group_bytes.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_records() {
        let mut counter = StatsCounter::new();
        counter.record(true);
        counter.record(true);
        counter.record(false);
        assert_eq!(counter.hits(), 2);
        assert_eq!(counter.misses(), 1);

        counter.reset();
        assert_eq!(counter, StatsCounter::default());
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < 0.001);
        assert!((CacheStats::default().hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_total_bytes() {
        let mut stats = CacheStats::default();
        stats.group_bytes.insert("posts".to_string(), 100);
        stats.group_bytes.insert("terms".to_string(), 20);
        assert_eq!(stats.total_bytes(), 120);
    }
}
