//! Permissions define *what* a public-endpoint token may do.
//!
//! ## String format
//!
//! A single permission is one of the lowercase words `status`, `query`,
//! `analyze`, `debug`, `admin`. A set serializes as a list of those words
//! (YAML/JSON) or as a comma-separated string (`"status,query"`).
//!
//! `admin` covers every other permission.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt::Display, str::FromStr};

/// A single permission a token may carry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Read colony and agent status.
    Status,
    /// Run focused and unified telemetry queries.
    Query,
    /// Run analysis helpers (percentiles, activity summaries).
    Analyze,
    /// Run guarded raw SQL and other debugging reads.
    Debug,
    /// Everything, including token and PSK administration.
    Admin,
}

impl Permission {
    const ALL: [Permission; 5] = [
        Permission::Status,
        Permission::Query,
        Permission::Analyze,
        Permission::Debug,
        Permission::Admin,
    ];
}

impl Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Permission::Status => "status",
            Permission::Query => "query",
            Permission::Analyze => "analyze",
            Permission::Debug => "debug",
            Permission::Admin => "admin",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Permission {
    type Err = InvalidPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "status" => Ok(Permission::Status),
            "query" => Ok(Permission::Query),
            "analyze" => Ok(Permission::Analyze),
            "debug" => Ok(Permission::Debug),
            "admin" => Ok(Permission::Admin),
            other => Err(InvalidPermission(other.to_string())),
        }
    }
}

/// Error parsing a [Permission].
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown permission {0:?}")]
pub struct InvalidPermission(pub String);

/// A de-duplicated set of [Permission]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    /// The set containing only `admin`.
    pub fn admin() -> Self {
        PermissionSet([Permission::Admin].into_iter().collect())
    }

    /// Build from any iterator of permissions.
    pub fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        PermissionSet(iter.into_iter().collect())
    }

    /// Returns true if the set grants `permission`.
    ///
    /// `admin` grants everything.
    pub fn allows(&self, permission: Permission) -> bool {
        self.0.contains(&Permission::Admin) || self.0.contains(&permission)
    }

    /// Returns true if no permission is present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate the contained permissions in stable order.
    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }
}

impl FromStr for PermissionSet {
    type Err = InvalidPermission;

    /// Parse a comma-separated list, e.g. `"status,query"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = BTreeSet::new();
        for part in s.split(',') {
            if part.trim().is_empty() {
                continue;
            }
            set.insert(part.parse()?);
        }
        Ok(PermissionSet(set))
    }
}

impl Display for PermissionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{joined}")
    }
}

impl From<Vec<Permission>> for PermissionSet {
    fn from(value: Vec<Permission>) -> Self {
        PermissionSet(value.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_allows_everything() {
        let set = PermissionSet::admin();
        for p in Permission::ALL {
            assert!(set.allows(p), "admin should allow {p}");
        }
    }

    #[test]
    fn non_admin_is_scoped() {
        let set: PermissionSet = "status,query".parse().unwrap();
        assert!(set.allows(Permission::Status));
        assert!(set.allows(Permission::Query));
        assert!(!set.allows(Permission::Debug));
        assert!(!set.allows(Permission::Admin));
    }

    #[test]
    fn parse_rejects_unknown_words() {
        let err = "status,root".parse::<PermissionSet>().unwrap_err();
        assert_eq!(err, InvalidPermission("root".to_string()));
    }

    #[test]
    fn display_is_stable_and_deduplicated() {
        let set: PermissionSet = "query,status,query".parse().unwrap();
        assert_eq!(set.to_string(), "status,query");
    }

    #[test]
    fn serde_as_word_list() {
        let set: PermissionSet = "status,admin".parse().unwrap();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["status","admin"]"#);
        let back: PermissionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
