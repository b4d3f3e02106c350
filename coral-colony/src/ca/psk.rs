//! Bootstrap PSK lifecycle.
//!
//! At most one active and one grace PSK exist at any time. Values are
//! 32 random bytes in base32 display form (52 characters), encrypted at
//! rest with a key wrapped by the root CA private key. Acceptance compares
//! in constant time and honors the grace deadline at admission time, not at
//! rotation time.

use crate::error::{Error, ErrorKind, Result};
use crate::store::{psks::PskRecord, ColonyDb};
use coral_common::{crypto, timestamp::Timestamp};
use std::time::Duration;

/// Manages the colony's bootstrap PSK.
#[derive(Clone)]
pub struct PskManager {
    db: ColonyDb,
    wrapping_key: [u8; 32],
}

impl std::fmt::Debug for PskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the wrapping key.
        write!(f, "PskManager")
    }
}

impl PskManager {
    pub fn new(db: ColonyDb, wrapping_key: [u8; 32]) -> Self {
        Self { db, wrapping_key }
    }

    /// Startup reconciliation: generate the first active PSK if none exists
    /// and expire a grace PSK whose deadline has passed.
    pub async fn ensure_psk(&self) -> Result<()> {
        self.db.expire_due_grace_psk(Timestamp::now()).await?;

        if self.db.active_psk().await?.is_none() {
            let value = generate_psk_value();
            let sealed = crypto::seal_secret(value.as_bytes(), &self.wrapping_key);
            self.db.insert_initial_psk(&sealed).await?;
            tracing::info!("generated initial bootstrap PSK");
        }
        Ok(())
    }

    /// Rotate: the new value becomes active, the previous active moves to
    /// grace until `now + grace`, any prior grace expires. A zero grace
    /// expires the previous active immediately.
    pub async fn rotate(&self, grace: Duration) -> Result<String> {
        if self.db.active_psk().await?.is_none() {
            return Err(Error::new(ErrorKind::NotInitialized));
        }

        let value = generate_psk_value();
        let sealed = crypto::seal_secret(value.as_bytes(), &self.wrapping_key);
        let deadline = if grace.is_zero() {
            None
        } else {
            Some(Timestamp::now() + grace)
        };

        self.db.rotate_psks(&sealed, deadline).await?;
        tracing::info!(grace_secs = grace.as_secs(), "rotated bootstrap PSK");
        Ok(value)
    }

    /// The decrypted active PSK. `NotInitialized` when none exists.
    ///
    /// Callers must hold colony-admin authority; the value is never logged.
    pub async fn get_active_psk(&self) -> Result<String> {
        let record = self
            .db
            .active_psk()
            .await?
            .ok_or(Error::new(ErrorKind::NotInitialized))?;

        self.decrypt(&record)
    }

    /// True iff `candidate` equals the active PSK, or equals the grace PSK
    /// and its deadline has not passed. Constant-time comparisons.
    pub async fn accept_psk(&self, candidate: &str) -> Result<bool> {
        let active = self
            .db
            .active_psk()
            .await?
            .ok_or(Error::new(ErrorKind::NotInitialized))?;

        let active_value = self.decrypt(&active)?;
        if crypto::constant_time_eq(candidate.as_bytes(), active_value.as_bytes()) {
            return Ok(true);
        }

        if let Some(grace) = self.db.grace_psk().await? {
            let within_deadline = grace
                .grace_expires_at
                .map(|deadline| Timestamp::now() < deadline)
                .unwrap_or(false);
            if within_deadline {
                let grace_value = self.decrypt(&grace)?;
                if crypto::constant_time_eq(candidate.as_bytes(), grace_value.as_bytes()) {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    fn decrypt(&self, record: &PskRecord) -> Result<String> {
        let plaintext = crypto::open_secret(&record.value_enc, &self.wrapping_key)
            .map_err(|e| Error::internal(format!("psk unsealing failed: {e}")))?;
        String::from_utf8(plaintext)
            .map_err(|_| Error::internal("psk plaintext is not valid utf-8"))
    }
}

/// 32 CSPRNG bytes in uppercase base32: a 52-character display string.
fn generate_psk_value() -> String {
    crypto::base32_encode(&crypto::random_bytes::<32>())
}
