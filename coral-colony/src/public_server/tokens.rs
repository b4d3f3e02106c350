//! Public-endpoint token records.
//!
//! Token values exist in memory only at creation and during comparison;
//! `tokens.yaml` stores salted blake3 hashes. The file is 0600 and every
//! update goes through write-temp-and-rename.

use crate::error::{Error, ErrorKind, Result};
use coral_common::{
    crypto,
    permissions::PermissionSet,
    timestamp::Timestamp,
};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    fmt::Display,
    path::PathBuf,
    str::FromStr,
    sync::RwLock,
};

/// Per-token request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimit {
    PerMinute(u32),
    PerHour(u32),
}

impl Display for RateLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimit::PerMinute(n) => write!(f, "{n}/minute"),
            RateLimit::PerHour(n) => write!(f, "{n}/hour"),
        }
    }
}

impl FromStr for RateLimit {
    type Err = Error;

    /// Parse `"N/minute"` or `"N/hour"`.
    fn from_str(s: &str) -> Result<Self> {
        let (count, unit) = s
            .split_once('/')
            .ok_or_else(|| Error::malformed(format!("rate limit must be N/minute or N/hour, got {s:?}")))?;
        let count: u32 = count
            .trim()
            .parse()
            .map_err(|_| Error::malformed(format!("invalid rate limit count in {s:?}")))?;
        if count == 0 {
            return Err(Error::malformed("rate limit count must be positive"));
        }
        match unit.trim() {
            "minute" => Ok(RateLimit::PerMinute(count)),
            "hour" => Ok(RateLimit::PerHour(count)),
            other => Err(Error::malformed(format!(
                "rate limit unit must be minute or hour, got {other:?}"
            ))),
        }
    }
}

impl Serialize for RateLimit {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RateLimit {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One stored token. Never carries the token value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token_id: String,
    /// Hex blake3 of `salt || value`.
    pub hash: String,
    pub salt: String,
    pub permissions: PermissionSet,
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub last_used_at: Option<Timestamp>,
    #[serde(default)]
    pub revoked: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokensFile {
    tokens: Vec<TokenRecord>,
}

/// The persisted token set.
pub struct TokenStore {
    path: PathBuf,
    inner: RwLock<Vec<TokenRecord>>,
}

impl TokenStore {
    /// Load `tokens.yaml`, or start empty if it does not exist yet.
    pub fn load_or_create(path: PathBuf) -> anyhow::Result<Self> {
        let tokens = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let file: TokensFile = serde_yaml::from_str(&contents)?;
            file.tokens
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            inner: RwLock::new(tokens),
        })
    }

    /// Mint a token. Returns the record and the value; the value is never
    /// recoverable afterwards.
    pub fn create(
        &self,
        permissions: PermissionSet,
        rate_limit: Option<RateLimit>,
    ) -> Result<(TokenRecord, String)> {
        let value = format!("coral_{}", crypto::base32_encode(&crypto::random_bytes::<24>()));
        let salt = hex::encode(crypto::random_bytes::<16>());
        let record = TokenRecord {
            token_id: uuid::Uuid::new_v4().to_string(),
            hash: hash_token(&salt, &value),
            salt,
            permissions,
            rate_limit,
            created_at: Timestamp::now(),
            last_used_at: None,
            revoked: false,
        };

        {
            let mut inner = self.inner.write().expect("token store poisoned");
            inner.push(record.clone());
        }
        self.persist()?;

        Ok((record, value))
    }

    /// Resolve a presented value to its record. Constant-time hash
    /// comparison; revoked tokens never match.
    pub fn authenticate(&self, value: &str) -> Option<TokenRecord> {
        let matched = {
            let inner = self.inner.read().expect("token store poisoned");
            inner
                .iter()
                .filter(|record| !record.revoked)
                .find(|record| {
                    crypto::constant_time_eq(
                        hash_token(&record.salt, value).as_bytes(),
                        record.hash.as_bytes(),
                    )
                })
                .cloned()
        }?;

        {
            let mut inner = self.inner.write().expect("token store poisoned");
            if let Some(record) = inner.iter_mut().find(|r| r.token_id == matched.token_id) {
                record.last_used_at = Some(Timestamp::now());
            }
        }
        if let Err(error) = self.persist() {
            tracing::warn!(%error, "failed to persist token last_used_at");
        }

        Some(matched)
    }

    /// Every record. Values are not stored, so nothing can leak.
    pub fn list(&self) -> Vec<TokenRecord> {
        self.inner.read().expect("token store poisoned").clone()
    }

    /// Revoke by id. Unknown ids are `NotFound`.
    pub fn revoke(&self, token_id: &str) -> Result<()> {
        {
            let mut inner = self.inner.write().expect("token store poisoned");
            let record = inner
                .iter_mut()
                .find(|record| record.token_id == token_id)
                .ok_or_else(|| Error::not_found(format!("unknown token: {token_id}")))?;
            record.revoked = true;
        }
        self.persist()
    }

    /// Write-temp-and-rename, 0600.
    fn persist(&self) -> Result<()> {
        let file = TokensFile {
            tokens: self.inner.read().expect("token store poisoned").clone(),
        };
        let yaml = serde_yaml::to_string(&file)
            .map_err(|e| Error::internal(format!("serialize tokens: {e}")))?;

        let temp_path = self.path.with_extension("yaml.tmp");
        let io_err =
            |e: std::io::Error| Error::with_cause(ErrorKind::StorageUnavailable, e);

        std::fs::write(&temp_path, yaml).map_err(io_err)?;
        #[cfg(unix)]
        {
            std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }
        std::fs::rename(&temp_path, &self.path).map_err(io_err)?;
        Ok(())
    }
}

fn hash_token(salt_hex: &str, value: &str) -> String {
    let mut hasher = crypto::Hasher::new();
    hasher.update(salt_hex.as_bytes());
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coral_common::permissions::Permission;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> TokenStore {
        TokenStore::load_or_create(dir.path().join("tokens.yaml")).unwrap()
    }

    #[test]
    fn create_and_authenticate_roundtrip() {
        let dir = TempDir::new().unwrap();
        let tokens = store(&dir);

        let (record, value) = tokens
            .create("status,query".parse().unwrap(), None)
            .unwrap();
        assert!(value.starts_with("coral_"));

        let authenticated = tokens.authenticate(&value).unwrap();
        assert_eq!(authenticated.token_id, record.token_id);
        assert!(authenticated.permissions.allows(Permission::Query));

        assert!(tokens.authenticate("coral_WRONG").is_none());
    }

    #[test]
    fn listing_never_reveals_values() {
        let dir = TempDir::new().unwrap();
        let tokens = store(&dir);
        let (_record, value) = tokens.create(PermissionSet::admin(), None).unwrap();

        let listed = tokens.list();
        assert_eq!(listed.len(), 1);
        let yaml = serde_yaml::to_string(&listed).unwrap();
        assert!(!yaml.contains(&value));

        let on_disk = std::fs::read_to_string(dir.path().join("tokens.yaml")).unwrap();
        assert!(!on_disk.contains(&value));
    }

    #[test]
    fn revoked_token_no_longer_authenticates() {
        let dir = TempDir::new().unwrap();
        let tokens = store(&dir);
        let (record, value) = tokens.create(PermissionSet::admin(), None).unwrap();

        tokens.revoke(&record.token_id).unwrap();
        assert!(tokens.authenticate(&value).is_none());

        let err = tokens.revoke("no-such-id").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn store_reloads_from_disk() {
        let dir = TempDir::new().unwrap();
        let value = {
            let tokens = store(&dir);
            let (_record, value) = tokens
                .create(
                    "query".parse().unwrap(),
                    Some(RateLimit::PerHour(100)),
                )
                .unwrap();
            value
        };

        let reloaded = store(&dir);
        let authenticated = reloaded.authenticate(&value).unwrap();
        assert_eq!(authenticated.rate_limit, Some(RateLimit::PerHour(100)));
    }

    #[test]
    fn rate_limit_parse_and_display() {
        assert_eq!(
            "100/hour".parse::<RateLimit>().unwrap(),
            RateLimit::PerHour(100)
        );
        assert_eq!(
            "5/minute".parse::<RateLimit>().unwrap(),
            RateLimit::PerMinute(5)
        );
        assert_eq!(RateLimit::PerHour(100).to_string(), "100/hour");

        assert!("0/hour".parse::<RateLimit>().is_err());
        assert!("100/day".parse::<RateLimit>().is_err());
        assert!("lots".parse::<RateLimit>().is_err());
    }

    #[test]
    fn tokens_file_mode_is_restricted() {
        let dir = TempDir::new().unwrap();
        let tokens = store(&dir);
        tokens.create(PermissionSet::admin(), None).unwrap();

        #[cfg(unix)]
        {
            let mode = std::fs::metadata(dir.path().join("tokens.yaml"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
