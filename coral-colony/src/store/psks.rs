//! Bootstrap PSK rows.
//!
//! PSK values are stored encrypted (see `ca::psk`); this module only moves
//! opaque ciphertexts and lifecycle state. The state machine invariant
//! (at most one active, at most one grace) is enforced by the transactional
//! `rotate_psks` write.

use super::ColonyDb;
use crate::error::Result;
use coral_common::timestamp::Timestamp;
use sqlx::Row;

/// Lifecycle state of a bootstrap PSK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PskStatus {
    Active,
    Grace,
    Expired,
}

impl PskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PskStatus::Active => "active",
            PskStatus::Grace => "grace",
            PskStatus::Expired => "expired",
        }
    }
}

/// One stored PSK row. `value_enc` is ciphertext.
#[derive(Debug, Clone, PartialEq)]
pub struct PskRecord {
    pub id: i64,
    pub value_enc: Vec<u8>,
    pub status: PskStatus,
    pub created_at: Timestamp,
    pub grace_expires_at: Option<Timestamp>,
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<PskRecord> {
    let status: String = row.try_get("status")?;
    let status = match status.as_str() {
        "active" => PskStatus::Active,
        "grace" => PskStatus::Grace,
        _ => PskStatus::Expired,
    };
    Ok(PskRecord {
        id: row.try_get("id")?,
        value_enc: row.try_get("value_enc")?,
        status,
        created_at: Timestamp::from_micros(row.try_get::<i64, _>("created_at")? as u64),
        grace_expires_at: row
            .try_get::<Option<i64>, _>("grace_expires_at")?
            .map(|v| Timestamp::from_micros(v as u64)),
    })
}

impl ColonyDb {
    /// The current active PSK row, if any.
    pub async fn active_psk(&self) -> Result<Option<PskRecord>> {
        let row = sqlx::query(
            "SELECT id, value_enc, status, created_at, grace_expires_at
             FROM psks WHERE status = 'active'",
        )
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// The current grace PSK row, if any.
    pub async fn grace_psk(&self) -> Result<Option<PskRecord>> {
        let row = sqlx::query(
            "SELECT id, value_enc, status, created_at, grace_expires_at
             FROM psks WHERE status = 'grace'",
        )
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// Insert the colony's first active PSK.
    pub async fn insert_initial_psk(&self, value_enc: &[u8]) -> Result<()> {
        sqlx::query("INSERT INTO psks (value_enc, status, created_at) VALUES (?1, 'active', ?2)")
            .bind(value_enc)
            .bind(Timestamp::now().as_u64() as i64)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Rotate in a single transaction:
    /// prior grace becomes expired, the active PSK becomes grace (or expired
    /// when `grace_expires_at` is `None`), and the new value becomes active.
    pub async fn rotate_psks(
        &self,
        new_value_enc: &[u8],
        grace_expires_at: Option<Timestamp>,
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("UPDATE psks SET status = 'expired', grace_expires_at = NULL WHERE status = 'grace'")
            .execute(&mut *tx)
            .await?;

        match grace_expires_at {
            Some(deadline) => {
                sqlx::query(
                    "UPDATE psks SET status = 'grace', grace_expires_at = ?1
                     WHERE status = 'active'",
                )
                .bind(deadline.as_u64() as i64)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query("UPDATE psks SET status = 'expired' WHERE status = 'active'")
                    .execute(&mut *tx)
                    .await?;
            }
        }

        sqlx::query("INSERT INTO psks (value_enc, status, created_at) VALUES (?1, 'active', ?2)")
            .bind(new_value_enc)
            .bind(Timestamp::now().as_u64() as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Expire the grace PSK if its deadline has passed. Idempotent.
    pub async fn expire_due_grace_psk(&self, now: Timestamp) -> Result<()> {
        sqlx::query(
            "UPDATE psks SET status = 'expired'
             WHERE status = 'grace' AND grace_expires_at <= ?1",
        )
        .bind(now.as_u64() as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
