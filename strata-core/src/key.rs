//! Versioned cache key derivation.
//!
//! A physical key has the layout
//!
//! ```text
//! salt:installationHash:tenantPrefix:group:rawKey:v<tenantVersion>.<groupVersion>
//! ```
//!
//! Every field that scopes an entry sits in front of the raw key, so the
//! entries of one group (or one tenant) share a string prefix. Bumping either
//! version changes the suffix and orphans every key derived under the old one.

use crate::error::ValidationError;
use crate::{StrataResult, TenantId, DEFAULT_GROUP};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Largest version a counter may hold before it wraps back to 1.
pub const MAX_VERSION: u64 = 100;

/// Number of hex characters of the installation digest kept in keys.
const INSTALLATION_HASH_LEN: usize = 32;

const SEPARATOR: char = ':';
const GROUP_VERSION_TAG: &str = "GroupVersion";
const TENANT_VERSION_TAG: &str = "SiteVersion";

/// Hex digest identifying an installation, truncated for key compactness.
pub fn installation_hash(installation_path: &str) -> String {
    let digest = Sha256::digest(installation_path.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(INSTALLATION_HASH_LEN);
    hex
}

/// A key as the caller sees it: raw key, group and resolved tenant scope.
///
/// Construction rejects empty raw keys, so a `LogicalKey` always derives a
/// valid physical key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalKey {
    raw: String,
    group: String,
    tenant: TenantId,
}

impl LogicalKey {
    /// Build a logical key. An empty group falls back to `"default"`.
    pub fn new(raw: impl Into<String>, group: &str, tenant: TenantId) -> StrataResult<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ValidationError::EmptyKey.into());
        }
        validate_group(group)?;
        Ok(Self {
            raw,
            group: normalize_group(group).to_string(),
            tenant,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Tenant prefix the key is scoped to (0 for global groups).
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }
}

/// Reject group names containing the field separator.
///
/// The raw key may contain `:` and the version suffix is always the last
/// field, so keeping the separator out of the group is what makes a physical
/// key map back to exactly one logical key.
pub fn validate_group(group: &str) -> StrataResult<()> {
    if group.contains(SEPARATOR) {
        return Err(ValidationError::InvalidGroup {
            group: group.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Replace an empty group name with the default group.
pub fn normalize_group(group: &str) -> &str {
    if group.is_empty() {
        DEFAULT_GROUP
    } else {
        group
    }
}

/// Fully derived key as handed to a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysicalKey(String);

impl PhysicalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PhysicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PhysicalKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What a version counter scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionScope {
    Group(String),
    Tenant(TenantId),
}

impl fmt::Display for VersionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionScope::Group(group) => write!(f, "group:{}", group),
            VersionScope::Tenant(tenant) => write!(f, "tenant:{}", tenant),
        }
    }
}

/// Builds physical keys, purge prefixes and version-counter keys for one
/// installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDeriver {
    salt: String,
    installation_hash: String,
}

impl KeyDeriver {
    pub fn new(salt: impl Into<String>, installation_hash: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            installation_hash: installation_hash.into(),
        }
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub fn installation_hash(&self) -> &str {
        &self.installation_hash
    }

    /// Compose the physical key for `key` under the given versions.
    pub fn compose(&self, key: &LogicalKey, tenant_version: u64, group_version: u64) -> PhysicalKey {
        PhysicalKey(format!(
            "{}{}{sep}v{}.{}",
            self.group_prefix(key.tenant, &key.group),
            key.raw,
            tenant_version,
            group_version,
            sep = SEPARATOR,
        ))
    }

    /// Validate and compose in one step.
    pub fn derive(
        &self,
        raw: &str,
        group: &str,
        tenant: TenantId,
        tenant_version: u64,
        group_version: u64,
    ) -> StrataResult<PhysicalKey> {
        let key = LogicalKey::new(raw, group, tenant)?;
        Ok(self.compose(&key, tenant_version, group_version))
    }

    /// `salt:installationHash:`; shared by every key of this installation.
    pub fn namespace_prefix(&self) -> String {
        format!("{}{sep}{}{sep}", self.salt, self.installation_hash, sep = SEPARATOR)
    }

    /// `salt:installationHash:tenantPrefix:group:`; shared by every entry of
    /// one group under one tenant prefix, whatever its versions.
    pub fn group_prefix(&self, tenant: TenantId, group: &str) -> String {
        format!(
            "{}{}{sep}{}{sep}",
            self.namespace_prefix(),
            tenant,
            normalize_group(group),
            sep = SEPARATOR
        )
    }

    /// `salt:installationHash:tenantId:`; shared by every entry of a tenant.
    pub fn tenant_prefix(&self, tenant: TenantId) -> String {
        format!("{}{}{sep}", self.namespace_prefix(), tenant, sep = SEPARATOR)
    }

    /// Key under which the counter for `scope` is persisted.
    pub fn version_key(&self, scope: &VersionScope) -> PhysicalKey {
        let key = match scope {
            VersionScope::Group(group) => format!(
                "{}{}{sep}{}",
                self.namespace_prefix(),
                GROUP_VERSION_TAG,
                normalize_group(group),
                sep = SEPARATOR
            ),
            VersionScope::Tenant(tenant) => format!(
                "{}{}{sep}{}",
                self.namespace_prefix(),
                TENANT_VERSION_TAG,
                tenant,
                sep = SEPARATOR
            ),
        };
        PhysicalKey(key)
    }

    /// Whether `key` is one of this installation's version-counter entries.
    pub fn is_version_key(&self, key: &str) -> bool {
        let Some(rest) = key.strip_prefix(&self.namespace_prefix()) else {
            return false;
        };
        match rest.split_once(SEPARATOR) {
            Some((tag, _)) => tag == GROUP_VERSION_TAG || tag == TENANT_VERSION_TAG,
            None => false,
        }
    }

    /// Group field of a data key; `None` for foreign or version keys.
    pub fn group_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        if self.is_version_key(key) {
            return None;
        }
        let rest = key.strip_prefix(&self.namespace_prefix())?;
        let mut fields = rest.splitn(3, SEPARATOR);
        let _tenant = fields.next()?;
        let group = fields.next()?;
        fields.next()?;
        Some(group)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StrataError;

    fn deriver() -> KeyDeriver {
        KeyDeriver::new("wp", "abc123")
    }

    #[test]
    fn test_compose_layout() {
        let key = LogicalKey::new("post-42", "posts", 3).unwrap();
        let physical = deriver().compose(&key, 2, 7);
        assert_eq!(physical.as_str(), "wp:abc123:3:posts:post-42:v2.7");
    }

    #[test]
    fn test_empty_raw_key_rejected() {
        let err = LogicalKey::new("", "posts", 1).unwrap_err();
        assert!(matches!(err, StrataError::Validation(ValidationError::EmptyKey)));
    }

    #[test]
    fn test_group_with_separator_rejected() {
        let err = LogicalKey::new("c", "a:b", 1).unwrap_err();
        assert!(matches!(
            err,
            StrataError::Validation(ValidationError::InvalidGroup { .. })
        ));
        assert!(deriver().derive("c", "a:b", 1, 0, 0).is_err());
        // Colons stay legal in the raw key.
        assert_eq!(
            deriver().derive("b:c", "a", 1, 0, 0).unwrap().as_str(),
            "wp:abc123:1:a:b:c:v0.0"
        );
    }

    #[test]
    fn test_empty_group_defaults() {
        let key = LogicalKey::new("k", "", 1).unwrap();
        assert_eq!(key.group(), "default");
        assert_eq!(
            deriver().derive("k", "", 1, 0, 0).unwrap().as_str(),
            "wp:abc123:1:default:k:v0.0"
        );
    }

    #[test]
    fn test_version_bump_changes_key() {
        let d = deriver();
        let a = d.derive("k", "g", 1, 1, 1).unwrap();
        let b = d.derive("k", "g", 1, 1, 2).unwrap();
        let c = d.derive("k", "g", 1, 2, 1).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_prefixes() {
        let d = deriver();
        let key = d.derive("k", "posts", 4, 1, 1).unwrap();
        assert!(key.as_str().starts_with(&d.group_prefix(4, "posts")));
        assert!(key.as_str().starts_with(&d.tenant_prefix(4)));
        assert!(!key.as_str().starts_with(&d.tenant_prefix(40)));
        assert_eq!(d.tenant_prefix(4), "wp:abc123:4:");
    }

    #[test]
    fn test_version_keys() {
        let d = deriver();
        let group = d.version_key(&VersionScope::Group("posts".to_string()));
        let tenant = d.version_key(&VersionScope::Tenant(9));
        assert_eq!(group.as_str(), "wp:abc123:GroupVersion:posts");
        assert_eq!(tenant.as_str(), "wp:abc123:SiteVersion:9");
        assert!(d.is_version_key(group.as_str()));
        assert!(d.is_version_key(tenant.as_str()));
        assert!(!d.is_version_key("wp:abc123:1:posts:k:v1.1"));
        assert!(!d.is_version_key("other:abc123:GroupVersion:posts"));
    }

    #[test]
    fn test_group_of() {
        let d = deriver();
        assert_eq!(d.group_of("wp:abc123:1:posts:k:v1.1"), Some("posts"));
        assert_eq!(d.group_of("wp:abc123:GroupVersion:posts"), None);
        assert_eq!(d.group_of("elsewhere"), None);
    }

    #[test]
    fn test_installation_hash() {
        let hash = installation_hash("/var/www/site");
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, installation_hash("/var/www/site"));
        assert_ne!(hash, installation_hash("/var/www/other"));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn raw_key() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_\\-]{1,24}"
    }

    fn group_name() -> impl Strategy<Value = String> {
        "[a-z_]{1,12}"
    }

    proptest! {
        #[test]
        fn prop_derivation_is_deterministic(
            raw in raw_key(),
            group in group_name(),
            tenant in 0u64..1000,
            tv in 0u64..=MAX_VERSION,
            gv in 0u64..=MAX_VERSION,
        ) {
            let d = KeyDeriver::new("wp", installation_hash("/srv"));
            let a = d.derive(&raw, &group, tenant, tv, gv).unwrap();
            let b = d.derive(&raw, &group, tenant, tv, gv).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_tenants_never_collide(
            raw in raw_key(),
            group in group_name(),
            t1 in 0u64..1000,
            t2 in 0u64..1000,
        ) {
            prop_assume!(t1 != t2);
            let d = KeyDeriver::new("wp", "hash");
            let a = d.derive(&raw, &group, t1, 1, 1).unwrap();
            let b = d.derive(&raw, &group, t2, 1, 1).unwrap();
            prop_assert_ne!(a, b);
        }

        #[test]
        fn prop_distinct_logical_keys_never_collide(
            raw1 in "[a-z:]{1,8}",
            raw2 in "[a-z:]{1,8}",
            group1 in group_name(),
            group2 in group_name(),
        ) {
            prop_assume!((&raw1, &group1) != (&raw2, &group2));
            let d = KeyDeriver::new("wp", "hash");
            let a = d.derive(&raw1, &group1, 1, 1, 1).unwrap();
            let b = d.derive(&raw2, &group2, 1, 1, 1).unwrap();
            prop_assert_ne!(a, b);
        }

        #[test]
        fn prop_data_keys_are_not_version_keys(
            raw in raw_key(),
            group in group_name(),
            tenant in 0u64..1000,
        ) {
            let d = KeyDeriver::new("wp", "hash");
            let key = d.derive(&raw, &group, tenant, 1, 1).unwrap();
            prop_assert!(!d.is_version_key(key.as_str()));
            prop_assert_eq!(d.group_of(key.as_str()), Some(group.as_str()));
        }
    }
}
