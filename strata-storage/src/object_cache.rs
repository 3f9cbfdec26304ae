//! The object cache facade.
//!
//! Every public operation resolves the caller's key to a versioned physical
//! key, picks a tier and reports a plain value or flag. Store failures are
//! logged and surface as the negative result; nothing here returns an error
//! after construction.
//!
//! # Tier Selection
//!
//! - Persistent store unavailable, or group marked non-persistent:
//!   [`NonPersistentStore`].
//! - Otherwise: the persistent store, read through the [`LocalMirror`].
//!
//! Version counters always live on the persistent store when there is one.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use strata_core::{
    clamp_offset, expiry_deadline, normalize_group, validate_group, CacheStats, CacheValue,
    GroupSets, KeyDeriver, LogicalKey, PhysicalKey, StatsCounter, StrataConfig, StrataResult,
    TenantId, GLOBAL_TENANT, SINGLE_TENANT,
};

use crate::store::{LmdbStore, LocalMirror, NonPersistentStore, PersistentStore};
use crate::versions::{VersionStore, VersionTier};

/// Tier chosen for one call.
enum Tier<S> {
    Persistent(Arc<S>),
    Local,
}

fn version_tier<'a, S: PersistentStore>(
    persistent: &'a Option<Arc<S>>,
    local: &'a mut NonPersistentStore,
) -> VersionTier<'a, S> {
    match persistent {
        Some(store) => VersionTier::Persistent(store.as_ref()),
        None => VersionTier::Local(local),
    }
}

/// Tiered, generationally invalidated object cache.
///
/// Mutating operations take `&mut self`: the mirror, the non-persistent store
/// and the version maps are owned by this value and callers serialize access
/// to it. Share one instance across tasks behind a mutex.
pub struct ObjectCache<S: PersistentStore> {
    config: StrataConfig,
    deriver: KeyDeriver,
    persistent: Option<Arc<S>>,
    mirror: LocalMirror,
    non_persistent: NonPersistentStore,
    versions: VersionStore,
    groups: GroupSets,
    tenant: TenantId,
    stats: StatsCounter,
}

impl ObjectCache<LmdbStore> {
    /// Open the LMDB store named by `config.lmdb_path`.
    ///
    /// A missing path or a store that fails to open leaves the cache running
    /// on the non-persistent tier for the rest of the process.
    pub fn open(config: StrataConfig) -> StrataResult<Self> {
        config.validate()?;

        let Some(path) = config.lmdb_path.clone() else {
            tracing::warn!("No LMDB path configured, persistent cache disabled");
            return Self::degraded(config);
        };

        match LmdbStore::new(&path, config.lmdb_map_size_mb) {
            Ok(store) => Self::new(config, Arc::new(store)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to open LMDB store, persistent cache disabled"
                );
                Self::degraded(config)
            }
        }
    }
}

impl<S: PersistentStore> ObjectCache<S> {
    /// Build a cache over `store`. An unavailable store is dropped and the
    /// cache degrades to the non-persistent tier.
    pub fn new(config: StrataConfig, store: Arc<S>) -> StrataResult<Self> {
        let persistent = if store.is_available() {
            Some(store)
        } else {
            tracing::warn!("Persistent store unavailable, using non-persistent cache");
            None
        };
        Self::build(config, persistent)
    }

    /// Build a cache with no persistent tier.
    pub fn degraded(config: StrataConfig) -> StrataResult<Self> {
        Self::build(config, None)
    }

    fn build(config: StrataConfig, persistent: Option<Arc<S>>) -> StrataResult<Self> {
        config.validate()?;

        let deriver = KeyDeriver::new(config.key_salt.clone(), config.installation_hash());
        let tenant = if config.multi_tenant {
            config.initial_tenant
        } else {
            SINGLE_TENANT
        };

        Ok(Self {
            mirror: LocalMirror::new(config.enable_local_mirror),
            non_persistent: NonPersistentStore::new(),
            versions: VersionStore::new(deriver.clone()),
            groups: GroupSets::new(),
            stats: StatsCounter::new(),
            deriver,
            persistent,
            tenant,
            config,
        })
    }

    // ========================================================================
    // KEY RESOLUTION
    // ========================================================================

    fn tier_for(&self, group: &str) -> Tier<S> {
        match &self.persistent {
            Some(store) if !self.groups.is_non_persistent(group) => {
                Tier::Persistent(Arc::clone(store))
            }
            _ => Tier::Local,
        }
    }

    /// Versioned physical key and serving tier; `None` for an invalid key.
    fn resolve(&mut self, key: &str, group: &str) -> Option<(PhysicalKey, Tier<S>)> {
        let group = normalize_group(group);
        let tenant = self.groups.tenant_prefix_for(group, self.tenant);

        let logical = match LogicalKey::new(key, group, tenant) {
            Ok(logical) => logical,
            Err(e) => {
                tracing::debug!(error = %e, group, "Rejected cache key");
                return None;
            }
        };

        let tier = version_tier(&self.persistent, &mut self.non_persistent);
        let tenant_version = self.versions.tenant_version(tenant, &tier);
        let group_version = self.versions.group_version(group, &tier);

        let physical = self.deriver.compose(&logical, tenant_version, group_version);
        Some((physical, self.tier_for(group)))
    }

    fn effective_ttl(&self, ttl: i64) -> u64 {
        if ttl <= 0 {
            self.config.default_ttl_secs
        } else {
            ttl as u64
        }
    }

    // ========================================================================
    // SINGLE-KEY OPERATIONS
    // ========================================================================

    /// Look up `key`. Mirror first, then the persistent store (populating
    /// the mirror). The returned value is the caller's own copy.
    pub fn get(&mut self, key: &str, group: &str) -> Option<CacheValue> {
        let (physical, tier) = self.resolve(key, group)?;

        let value = match tier {
            Tier::Local => self.non_persistent.get(physical.as_str()),
            Tier::Persistent(store) => {
                match self.mirror.get(physical.as_str(), Utc::now()) {
                    Some(value) => Some(value),
                    None => match store.fetch(physical.as_str()) {
                        Ok(Some(entry)) => {
                            let value = entry.value.clone();
                            self.mirror.insert_entry(entry);
                            Some(value)
                        }
                        Ok(None) => None,
                        Err(e) => {
                            tracing::warn!(error = %e, key = %physical, "Cache fetch failed");
                            None
                        }
                    },
                }
            }
        };

        self.stats.record(value.is_some());
        value
    }

    /// Unconditional upsert. `ttl <= 0` uses the configured default TTL.
    pub fn set(&mut self, key: &str, value: CacheValue, group: &str, ttl: i64) -> bool {
        let Some((physical, tier)) = self.resolve(key, group) else {
            return false;
        };
        let ttl = self.effective_ttl(ttl);
        self.write(physical, tier, value, ttl)
    }

    /// Store only if `key` is absent.
    pub fn add(&mut self, key: &str, value: CacheValue, group: &str, ttl: i64) -> bool {
        let Some((physical, tier)) = self.resolve(key, group) else {
            return false;
        };
        let ttl = self.effective_ttl(ttl);

        match tier {
            Tier::Local => self.non_persistent.add(physical.as_str(), value),
            Tier::Persistent(store) => match store.add(physical.as_str(), &value, ttl) {
                Ok(true) => {
                    self.mirror.insert(
                        physical.into_string(),
                        value,
                        expiry_deadline(Utc::now(), ttl),
                    );
                    true
                }
                Ok(false) => false,
                Err(e) => {
                    tracing::warn!(error = %e, key = %physical, "Cache add failed");
                    false
                }
            },
        }
    }

    /// Store only if `key` is present. The presence check and the write are
    /// separate steps; a concurrent delete between them is tolerated.
    pub fn replace(&mut self, key: &str, value: CacheValue, group: &str, ttl: i64) -> bool {
        let Some((physical, tier)) = self.resolve(key, group) else {
            return false;
        };
        let ttl = self.effective_ttl(ttl);

        let present = match &tier {
            Tier::Local => self.non_persistent.contains(physical.as_str()),
            Tier::Persistent(store) => {
                self.mirror.contains(physical.as_str(), Utc::now())
                    || match store.fetch(physical.as_str()) {
                        Ok(entry) => entry.is_some(),
                        Err(e) => {
                            tracing::warn!(error = %e, key = %physical, "Cache fetch failed");
                            false
                        }
                    }
            }
        };

        present && self.write(physical, tier, value, ttl)
    }

    fn write(&mut self, physical: PhysicalKey, tier: Tier<S>, value: CacheValue, ttl: u64) -> bool {
        match tier {
            Tier::Local => {
                self.non_persistent.set(physical.into_string(), value);
                true
            }
            Tier::Persistent(store) => match store.store(physical.as_str(), &value, ttl) {
                Ok(()) => {
                    self.mirror.insert(
                        physical.into_string(),
                        value,
                        expiry_deadline(Utc::now(), ttl),
                    );
                    true
                }
                Err(e) => {
                    tracing::warn!(error = %e, key = %physical, "Cache store failed");
                    self.mirror.remove(physical.as_str());
                    false
                }
            },
        }
    }

    /// Remove `key` from its tier and the mirror. False if it was absent.
    pub fn delete(&mut self, key: &str, group: &str) -> bool {
        let Some((physical, tier)) = self.resolve(key, group) else {
            return false;
        };

        match tier {
            Tier::Local => self.non_persistent.delete(physical.as_str()),
            Tier::Persistent(store) => {
                self.mirror.remove(physical.as_str());
                match store.delete(physical.as_str()) {
                    Ok(deleted) => deleted,
                    Err(e) => {
                        tracing::warn!(error = %e, key = %physical, "Cache delete failed");
                        false
                    }
                }
            }
        }
    }

    /// Add `offset` (floored at 0) to a stored counter. `None` if absent.
    pub fn incr(&mut self, key: &str, offset: i64, group: &str) -> Option<i64> {
        self.adjust(key, offset, group, true)
    }

    /// Subtract `offset` (floored at 0) from a stored counter. `None` if absent.
    pub fn decr(&mut self, key: &str, offset: i64, group: &str) -> Option<i64> {
        self.adjust(key, offset, group, false)
    }

    fn adjust(&mut self, key: &str, offset: i64, group: &str, increment: bool) -> Option<i64> {
        let (physical, tier) = self.resolve(key, group)?;
        let offset = clamp_offset(offset);

        match tier {
            Tier::Local => {
                if increment {
                    self.non_persistent.increment(physical.as_str(), offset)
                } else {
                    self.non_persistent.decrement(physical.as_str(), offset)
                }
            }
            Tier::Persistent(store) => {
                let result = if increment {
                    store.increment(physical.as_str(), offset)
                } else {
                    store.decrement(physical.as_str(), offset)
                };
                match result {
                    Ok(Some(value)) => {
                        self.mirror
                            .update_value(physical.as_str(), CacheValue::from(value));
                        Some(value)
                    }
                    Ok(None) => {
                        self.mirror.remove(physical.as_str());
                        None
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, key = %physical, "Cache counter update failed");
                        None
                    }
                }
            }
        }
    }

    /// Typed read over the JSON value contract.
    pub fn get_as<T: DeserializeOwned>(&mut self, key: &str, group: &str) -> Option<T> {
        let value = self.get(key, group)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                tracing::debug!(error = %e, key, group, "Cached value has unexpected shape");
                None
            }
        }
    }

    /// Typed write over the JSON value contract.
    pub fn set_as<T: Serialize>(&mut self, key: &str, value: &T, group: &str, ttl: i64) -> bool {
        match serde_json::to_value(value) {
            Ok(value) => self.set(key, value, group, ttl),
            Err(e) => {
                tracing::warn!(error = %e, key, group, "Failed to serialize cache value");
                false
            }
        }
    }

    // ========================================================================
    // BATCH OPERATIONS
    // ========================================================================
    //
    // Each key is an independent call; one failure never affects the others.

    pub fn get_multiple<I, K>(&mut self, keys: I, group: &str) -> BTreeMap<String, Option<CacheValue>>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        keys.into_iter()
            .map(|key| {
                let key = key.into();
                let value = self.get(&key, group);
                (key, value)
            })
            .collect()
    }

    pub fn set_multiple<I, K>(&mut self, items: I, group: &str, ttl: i64) -> BTreeMap<String, bool>
    where
        I: IntoIterator<Item = (K, CacheValue)>,
        K: Into<String>,
    {
        items
            .into_iter()
            .map(|(key, value)| {
                let key = key.into();
                let stored = self.set(&key, value, group, ttl);
                (key, stored)
            })
            .collect()
    }

    pub fn add_multiple<I, K>(&mut self, items: I, group: &str, ttl: i64) -> BTreeMap<String, bool>
    where
        I: IntoIterator<Item = (K, CacheValue)>,
        K: Into<String>,
    {
        items
            .into_iter()
            .map(|(key, value)| {
                let key = key.into();
                let added = self.add(&key, value, group, ttl);
                (key, added)
            })
            .collect()
    }

    pub fn delete_multiple<I, K>(&mut self, keys: I, group: &str) -> BTreeMap<String, bool>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        keys.into_iter()
            .map(|key| {
                let key = key.into();
                let deleted = self.delete(&key, group);
                (key, deleted)
            })
            .collect()
    }

    // ========================================================================
    // FLUSHING
    // ========================================================================

    /// Clear every tier, including a full clear of the persistent store.
    pub fn flush(&mut self) -> bool {
        self.non_persistent.clear();
        self.mirror.clear();
        self.versions.clear();

        match &self.persistent {
            Some(store) => match store.clear() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Persistent cache flush failed");
                    false
                }
            },
            None => true,
        }
    }

    /// Clear process-local state. Without a mirror there is nothing local in
    /// front of the persistent store, so it is cleared instead.
    pub fn flush_runtime(&mut self) -> bool {
        self.non_persistent.clear();
        self.mirror.clear();

        if self.mirror.is_enabled() {
            return true;
        }

        match &self.persistent {
            Some(store) => {
                self.versions.clear();
                match store.clear() {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(error = %e, "Persistent cache flush failed");
                        false
                    }
                }
            }
            None => true,
        }
    }

    /// Invalidate every key of each group by bumping its version.
    /// Returns false when no valid group is given.
    pub fn flush_groups<I, G>(&mut self, groups: I) -> bool
    where
        I: IntoIterator<Item = G>,
        G: AsRef<str>,
    {
        let groups: BTreeSet<String> = groups
            .into_iter()
            .filter(|group| match validate_group(group.as_ref()) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipped group flush");
                    false
                }
            })
            .map(|group| normalize_group(group.as_ref()).to_string())
            .collect();
        if groups.is_empty() {
            return false;
        }

        for group in &groups {
            let tenant_prefix = self.groups.tenant_prefix_for(group, self.tenant);
            let mut tier = version_tier(&self.persistent, &mut self.non_persistent);
            let version = self.versions.bump_group(group, tenant_prefix, &mut tier);

            // Old-version entries are unreachable now; a wrapped counter
            // would make them reachable again.
            let deriver = &self.deriver;
            let in_group = |key: &str| deriver.group_of(key) == Some(group.as_str());
            self.mirror.remove_matching(in_group);
            self.non_persistent.remove_matching(in_group);

            tracing::debug!(group = %group, version, "Flushed cache group");
        }
        true
    }

    pub fn flush_group(&mut self, group: &str) -> bool {
        self.flush_groups([group])
    }

    /// Invalidate every key of each tenant by bumping its version. With no
    /// tenants the current one is flushed. Tenant 0 (global groups) is
    /// always included.
    pub fn flush_sites<I>(&mut self, tenants: I) -> bool
    where
        I: IntoIterator<Item = TenantId>,
    {
        let mut tenants: BTreeSet<TenantId> = tenants.into_iter().collect();
        if tenants.is_empty() {
            tenants.insert(self.tenant);
        }
        tenants.insert(GLOBAL_TENANT);

        for tenant in tenants {
            let mut tier = version_tier(&self.persistent, &mut self.non_persistent);
            let version = self.versions.bump_tenant(tenant, &mut tier);

            let prefix = self.deriver.tenant_prefix(tenant);
            self.mirror.remove_matching(|key| key.starts_with(&prefix));
            self.non_persistent
                .remove_matching(|key| key.starts_with(&prefix));

            tracing::debug!(tenant, version, "Flushed cache tenant");
        }
        true
    }

    // ========================================================================
    // GROUPS AND TENANTS
    // ========================================================================

    pub fn add_global_groups<I, G>(&mut self, groups: I)
    where
        I: IntoIterator<Item = G>,
        G: AsRef<str>,
    {
        for group in self.groups.add_global(groups) {
            tracing::warn!(group = %group, "Rejected global group name");
        }
    }

    pub fn add_non_persistent_groups<I, G>(&mut self, groups: I)
    where
        I: IntoIterator<Item = G>,
        G: AsRef<str>,
    {
        for group in self.groups.add_non_persistent(groups) {
            tracing::warn!(group = %group, "Rejected non-persistent group name");
        }
    }

    /// Scope subsequent calls to `tenant`. Ignored unless multi-tenant.
    pub fn switch_tenant(&mut self, tenant: TenantId) {
        if !self.config.multi_tenant {
            tracing::debug!(tenant, "Tenant switch ignored, cache is single-tenant");
            return;
        }
        self.tenant = tenant;
    }

    // ========================================================================
    // DIAGNOSTICS AND ACCESSORS
    // ========================================================================

    pub fn supports(&self, feature: &str) -> bool {
        strata_core::supports(feature)
    }

    /// Always true; there is no connection to release.
    pub fn close(&mut self) -> bool {
        true
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            mirror_entries: self.mirror.len() as u64,
            non_persistent_entries: self.non_persistent.len() as u64,
            group_bytes: self.mirror.group_bytes(&self.deriver),
            persistent_available: self.persistent.is_some(),
        }
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn key_deriver(&self) -> &KeyDeriver {
        &self.deriver
    }

    pub fn installation_hash(&self) -> &str {
        self.deriver.installation_hash()
    }

    pub fn is_persistent_available(&self) -> bool {
        self.persistent.is_some()
    }

    pub fn persistent_store(&self) -> Option<&Arc<S>> {
        self.persistent.as_ref()
    }

    pub fn current_tenant(&self) -> TenantId {
        self.tenant
    }

    pub fn global_groups(&self) -> Vec<String> {
        self.groups.global().map(str::to_string).collect()
    }

    pub fn non_persistent_groups(&self) -> Vec<String> {
        self.groups.non_persistent().map(str::to_string).collect()
    }

    /// Current version of `group`, loading it if needed.
    pub fn group_version(&mut self, group: &str) -> u64 {
        let tier = version_tier(&self.persistent, &mut self.non_persistent);
        self.versions.group_version(group, &tier)
    }

    /// Current version of `tenant`, loading it if needed.
    pub fn tenant_version(&mut self, tenant: TenantId) -> u64 {
        let tier = version_tier(&self.persistent, &mut self.non_persistent);
        self.versions.tenant_version(tenant, &tier)
    }

    pub fn cached_group_version(&self, group: &str) -> Option<u64> {
        self.versions.cached_group_version(group)
    }

    pub fn cached_tenant_version(&self, tenant: TenantId) -> Option<u64> {
        self.versions.cached_tenant_version(tenant)
    }
}
