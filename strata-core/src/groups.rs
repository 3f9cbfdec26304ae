//! Group classification: global and non-persistent groups.

use crate::key::{normalize_group, validate_group};
use crate::{TenantId, GLOBAL_TENANT};
use std::collections::BTreeSet;

/// The two group sets that change how a key is scoped and stored.
///
/// A global group ignores tenant scoping (its tenant prefix is always 0).
/// A non-persistent group is always served by the process-local store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSets {
    global: BTreeSet<String>,
    non_persistent: BTreeSet<String>,
}

impl GroupSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark groups as global. Names containing `:` cannot form a
    /// well-defined key and are returned instead of added.
    pub fn add_global<I, S>(&mut self, groups: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        insert_valid(&mut self.global, groups)
    }

    /// Mark groups as non-persistent. Rejected names are returned.
    pub fn add_non_persistent<I, S>(&mut self, groups: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        insert_valid(&mut self.non_persistent, groups)
    }

    pub fn is_global(&self, group: &str) -> bool {
        self.global.contains(normalize_group(group))
    }

    pub fn is_non_persistent(&self, group: &str) -> bool {
        self.non_persistent.contains(normalize_group(group))
    }

    /// Tenant prefix for `group` when `current` is the active tenant.
    pub fn tenant_prefix_for(&self, group: &str, current: TenantId) -> TenantId {
        if self.is_global(group) {
            GLOBAL_TENANT
        } else {
            current
        }
    }

    pub fn global(&self) -> impl Iterator<Item = &str> {
        self.global.iter().map(String::as_str)
    }

    pub fn non_persistent(&self) -> impl Iterator<Item = &str> {
        self.non_persistent.iter().map(String::as_str)
    }
}

fn insert_valid<I, S>(set: &mut BTreeSet<String>, groups: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut rejected = Vec::new();
    for group in groups {
        let group = group.as_ref();
        if validate_group(group).is_err() {
            rejected.push(group.to_string());
            continue;
        }
        set.insert(normalize_group(group).to_string());
    }
    rejected
}
