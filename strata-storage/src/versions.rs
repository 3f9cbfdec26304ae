//! Group and tenant version counters.
//!
//! Versions are loaded lazily from whichever tier holds them and cached in
//! process-local maps owned by the cache. A counter that was never written
//! reads as 0, so the first bump yields 1. Raising a counter past
//! [`MAX_VERSION`] resets it to 1; on the persistent tier the entries under
//! the scope's key prefix are then purged, since the restarted counter would
//! otherwise make pre-reset keys reachable again.

use std::collections::HashMap;

use strata_core::{
    coerce_numeric, normalize_group, CacheValue, KeyDeriver, TenantId, VersionScope, MAX_VERSION,
};

use crate::store::{NonPersistentStore, PersistentStore};

/// The tier version counters are read from and written to.
pub enum VersionTier<'a, S: PersistentStore + ?Sized> {
    Persistent(&'a S),
    Local(&'a mut NonPersistentStore),
}

impl<S: PersistentStore + ?Sized> VersionTier<'_, S> {
    fn load(&self, key: &str) -> u64 {
        let value = match self {
            VersionTier::Persistent(store) => match store.fetch(key) {
                Ok(entry) => entry.map(|entry| entry.value),
                Err(e) => {
                    tracing::warn!(error = %e, key, "Failed to load version counter");
                    None
                }
            },
            VersionTier::Local(store) => store.get(key),
        };
        value.map(|v| to_version(coerce_numeric(&v))).unwrap_or(0)
    }

    /// Raise the counter at `key` by one. Returns the raw new value.
    fn raise(&mut self, key: &str, cached: Option<u64>) -> i64 {
        match self {
            VersionTier::Persistent(store) => raise_persistent(*store, key).unwrap_or_else(|| {
                let fallback = cached.unwrap_or(0) as i64 + 1;
                tracing::warn!(key, fallback, "Version counter not persisted");
                fallback
            }),
            VersionTier::Local(store) => store.increment(key, 1).unwrap_or_else(|| {
                store.set(key, CacheValue::from(1));
                1
            }),
        }
    }

    fn reset(&mut self, key: &str) {
        match self {
            VersionTier::Persistent(store) => {
                if let Err(e) = store.store(key, &CacheValue::from(1), 0) {
                    tracing::warn!(error = %e, key, "Failed to reset version counter");
                }
            }
            VersionTier::Local(store) => store.set(key, CacheValue::from(1)),
        }
    }

    /// Delete every entry under `prefix`. Only the persistent tier is purged.
    fn purge(&self, prefix: &str) -> u64 {
        let VersionTier::Persistent(store) = self else {
            return 0;
        };

        let keys = match store.keys_with_prefix(prefix) {
            Ok(keys) => keys,
            Err(e) => {
                tracing::debug!(error = %e, prefix, "Failed to enumerate entries for purge");
                return 0;
            }
        };

        let mut purged = 0u64;
        for key in keys {
            match store.delete(&key) {
                Ok(true) => purged += 1,
                Ok(false) => {}
                Err(e) => tracing::debug!(error = %e, key, "Failed to purge entry"),
            }
        }
        purged
    }
}

/// Atomic add-or-create of a counter on a shared store.
fn raise_persistent<S: PersistentStore + ?Sized>(store: &S, key: &str) -> Option<i64> {
    match store.increment(key, 1) {
        Ok(Some(next)) => Some(next),
        Ok(None) => match store.add(key, &CacheValue::from(1), 0) {
            Ok(true) => Some(1),
            // Another writer created it between the two calls.
            Ok(false) => store.increment(key, 1).ok().flatten(),
            Err(e) => {
                tracing::warn!(error = %e, key, "Failed to create version counter");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, key, "Failed to raise version counter");
            None
        }
    }
}

fn to_version(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}

/// Process-local cache of group and tenant versions.
#[derive(Debug, Clone)]
pub struct VersionStore {
    deriver: KeyDeriver,
    groups: HashMap<String, u64>,
    tenants: HashMap<TenantId, u64>,
}

impl VersionStore {
    pub fn new(deriver: KeyDeriver) -> Self {
        Self {
            deriver,
            groups: HashMap::new(),
            tenants: HashMap::new(),
        }
    }

    /// Current version of `group`; shared by every tenant.
    pub fn group_version<S>(&mut self, group: &str, tier: &VersionTier<'_, S>) -> u64
    where
        S: PersistentStore + ?Sized,
    {
        let group = normalize_group(group);
        if let Some(version) = self.groups.get(group) {
            return *version;
        }
        let key = self
            .deriver
            .version_key(&VersionScope::Group(group.to_string()));
        let version = tier.load(key.as_str());
        self.groups.insert(group.to_string(), version);
        version
    }

    /// Current version of `tenant`.
    pub fn tenant_version<S>(&mut self, tenant: TenantId, tier: &VersionTier<'_, S>) -> u64
    where
        S: PersistentStore + ?Sized,
    {
        if let Some(version) = self.tenants.get(&tenant) {
            return *version;
        }
        let key = self.deriver.version_key(&VersionScope::Tenant(tenant));
        let version = tier.load(key.as_str());
        self.tenants.insert(tenant, version);
        version
    }

    /// Bump `group`. On wraparound, entries under `tenant_prefix:group:` are
    /// purged from the persistent tier.
    ///
    /// The counter is shared by every tenant but only the flushing tenant's
    /// entries are purged. Another tenant's entries written at the recycled
    /// version become readable again until they expire or the maintenance
    /// sweep reclaims them as stale.
    pub fn bump_group<S>(
        &mut self,
        group: &str,
        tenant_prefix: TenantId,
        tier: &mut VersionTier<'_, S>,
    ) -> u64
    where
        S: PersistentStore + ?Sized,
    {
        let group = normalize_group(group).to_string();
        let key = self.deriver.version_key(&VersionScope::Group(group.clone()));
        let purge_prefix = self.deriver.group_prefix(tenant_prefix, &group);
        let cached = self.groups.get(&group).copied();

        let version = bump(tier, key.as_str(), &purge_prefix, cached);
        self.groups.insert(group, version);
        version
    }

    /// Bump `tenant`. On wraparound, every entry of the tenant is purged from
    /// the persistent tier.
    pub fn bump_tenant<S>(&mut self, tenant: TenantId, tier: &mut VersionTier<'_, S>) -> u64
    where
        S: PersistentStore + ?Sized,
    {
        let key = self.deriver.version_key(&VersionScope::Tenant(tenant));
        let purge_prefix = self.deriver.tenant_prefix(tenant);
        let cached = self.tenants.get(&tenant).copied();

        let version = bump(tier, key.as_str(), &purge_prefix, cached);
        self.tenants.insert(tenant, version);
        version
    }

    pub fn cached_group_version(&self, group: &str) -> Option<u64> {
        self.groups.get(normalize_group(group)).copied()
    }

    pub fn cached_tenant_version(&self, tenant: TenantId) -> Option<u64> {
        self.tenants.get(&tenant).copied()
    }

    /// Forget every cached version; the next read reloads from the tier.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.tenants.clear();
    }
}

fn bump<S>(tier: &mut VersionTier<'_, S>, key: &str, purge_prefix: &str, cached: Option<u64>) -> u64
where
    S: PersistentStore + ?Sized,
{
    let raised = tier.raise(key, cached);
    if (1..=MAX_VERSION as i64).contains(&raised) {
        return raised as u64;
    }

    tier.reset(key);
    if raised > MAX_VERSION as i64 {
        let purged = tier.purge(purge_prefix);
        tracing::info!(key, purged, "Version counter wrapped");
    }
    1
}
