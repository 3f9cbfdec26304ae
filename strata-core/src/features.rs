//! Capability query for optional cache operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Optional operations a caller may probe for before relying on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    AddMultiple,
    SetMultiple,
    GetMultiple,
    DeleteMultiple,
    FlushRuntime,
    FlushGroup,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::AddMultiple,
        Feature::SetMultiple,
        Feature::GetMultiple,
        Feature::DeleteMultiple,
        Feature::FlushRuntime,
        Feature::FlushGroup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::AddMultiple => "add_multiple",
            Feature::SetMultiple => "set_multiple",
            Feature::GetMultiple => "get_multiple",
            Feature::DeleteMultiple => "delete_multiple",
            Feature::FlushRuntime => "flush_runtime",
            Feature::FlushGroup => "flush_group",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .into_iter()
            .find(|feature| feature.as_str() == s)
            .ok_or_else(|| format!("Unknown cache feature: {}", s))
    }
}

/// Whether the cache supports the named feature.
pub fn supports(feature: &str) -> bool {
    feature.parse::<Feature>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_features() {
        for name in [
            "add_multiple",
            "set_multiple",
            "get_multiple",
            "delete_multiple",
            "flush_runtime",
            "flush_group",
        ] {
            assert!(supports(name), "{} should be supported", name);
        }
    }

    #[test]
    fn test_unknown_feature() {
        assert!(!supports("transactions"));
        assert!(!supports(""));
        assert!(!supports("ADD_MULTIPLE"));
    }

    #[test]
    fn test_feature_round_trip_names() {
        for feature in Feature::ALL {
            assert_eq!(feature.to_string().parse::<Feature>(), Ok(feature));
        }
    }
}
