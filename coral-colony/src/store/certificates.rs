//! Issued-certificate records.
//!
//! A serial is unique within the colony for all time, revoked or not. The
//! `supersede_and_insert` path keeps re-enrollment atomic: the prior active
//! certificate flips to revoked (`superseded`) and the new row lands in the
//! same transaction.

use super::ColonyDb;
use crate::error::{Error, ErrorKind, Result};
use coral_common::timestamp::Timestamp;
use sqlx::Row;

/// Lifecycle state of an issued certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertStatus {
    Active,
    Revoked,
}

impl CertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertStatus::Active => "active",
            CertStatus::Revoked => "revoked",
        }
    }

    fn from_str(s: &str) -> CertStatus {
        match s {
            "revoked" => CertStatus::Revoked,
            _ => CertStatus::Active,
        }
    }
}

/// One issued certificate.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateRecord {
    /// 128-bit random serial, lowercase hex.
    pub serial: String,
    pub agent_id: String,
    pub spiffe_id: String,
    pub issued_at: Timestamp,
    pub not_before: Timestamp,
    pub not_after: Timestamp,
    pub status: CertStatus,
    pub revoked_at: Option<Timestamp>,
    pub revocation_reason: Option<String>,
    pub revoked_by: Option<String>,
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CertificateRecord> {
    let status: String = row.try_get("status")?;
    Ok(CertificateRecord {
        serial: row.try_get("serial")?,
        agent_id: row.try_get("agent_id")?,
        spiffe_id: row.try_get("spiffe_id")?,
        issued_at: Timestamp::from_micros(row.try_get::<i64, _>("issued_at")? as u64),
        not_before: Timestamp::from_micros(row.try_get::<i64, _>("not_before")? as u64),
        not_after: Timestamp::from_micros(row.try_get::<i64, _>("not_after")? as u64),
        status: CertStatus::from_str(&status),
        revoked_at: row
            .try_get::<Option<i64>, _>("revoked_at")?
            .map(|v| Timestamp::from_micros(v as u64)),
        revocation_reason: row.try_get("revocation_reason")?,
        revoked_by: row.try_get("revoked_by")?,
    })
}

const SELECT_COLUMNS: &str = "serial, agent_id, spiffe_id, issued_at, not_before, not_after,
                              status, revoked_at, revocation_reason, revoked_by";

impl ColonyDb {
    /// Insert a freshly issued certificate. A duplicate serial is a
    /// `Conflict`.
    pub async fn insert_certificate(&self, record: &CertificateRecord) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO certificates
               (serial, agent_id, spiffe_id, issued_at, not_before, not_after, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&record.serial)
        .bind(&record.agent_id)
        .bind(&record.spiffe_id)
        .bind(record.issued_at.as_u64() as i64)
        .bind(record.not_before.as_u64() as i64)
        .bind(record.not_after.as_u64() as i64)
        .bind(record.status.as_str())
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(Error::with_cause(
                ErrorKind::Conflict,
                format!("certificate serial already exists: {}", record.serial),
            )),
            Err(other) => Err(other.into()),
        }
    }

    /// True if a certificate with this serial was ever issued.
    pub async fn serial_exists(&self, serial: &str) -> Result<bool> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM certificates WHERE serial = ?1")
                .bind(serial)
                .fetch_one(self.pool())
                .await?;
        Ok(count.0 > 0)
    }

    /// Fetch one certificate by serial.
    pub async fn get_certificate(&self, serial: &str) -> Result<Option<CertificateRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM certificates WHERE serial = ?1"
        ))
        .bind(serial)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// All certificates for one agent, newest first.
    pub async fn certificates_for_agent(&self, agent_id: &str) -> Result<Vec<CertificateRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM certificates
             WHERE agent_id = ?1 ORDER BY issued_at DESC"
        ))
        .bind(agent_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Serials of every revoked certificate. The mTLS verifier caches this
    /// set, keyed by the CA's revocation generation.
    pub async fn revoked_serials(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT serial FROM certificates WHERE status = 'revoked'")
            .fetch_all(self.pool())
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("serial").map_err(Into::into))
            .collect()
    }

    /// Mark one certificate revoked. Unknown serial is `NotFound`; revoking
    /// twice keeps the first revocation's metadata.
    pub async fn revoke_certificate(
        &self,
        serial: &str,
        reason: &str,
        actor: &str,
    ) -> Result<()> {
        let now = Timestamp::now().as_u64() as i64;
        let result = sqlx::query(
            "UPDATE certificates
             SET status = 'revoked', revoked_at = ?2, revocation_reason = ?3, revoked_by = ?4
             WHERE serial = ?1 AND status != 'revoked'",
        )
        .bind(serial)
        .bind(now)
        .bind(reason)
        .bind(actor)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            // Either unknown or already revoked; distinguish for the caller.
            if self.serial_exists(serial).await? {
                return Ok(());
            }
            return Err(Error::not_found(format!("unknown serial: {serial}")));
        }
        Ok(())
    }

    /// Revoke the agent's active certificates with reason `superseded` and
    /// insert the replacement, atomically.
    pub async fn supersede_and_insert(&self, record: &CertificateRecord) -> Result<Vec<String>> {
        let mut tx = self.pool().begin().await?;
        let now = Timestamp::now().as_u64() as i64;

        let superseded = sqlx::query(
            "SELECT serial FROM certificates WHERE agent_id = ?1 AND status = 'active'",
        )
        .bind(&record.agent_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE certificates
             SET status = 'revoked', revoked_at = ?2, revocation_reason = 'superseded',
                 revoked_by = 'colony'
             WHERE agent_id = ?1 AND status = 'active'",
        )
        .bind(&record.agent_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let insert = sqlx::query(
            "INSERT INTO certificates
               (serial, agent_id, spiffe_id, issued_at, not_before, not_after, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&record.serial)
        .bind(&record.agent_id)
        .bind(&record.spiffe_id)
        .bind(record.issued_at.as_u64() as i64)
        .bind(record.not_before.as_u64() as i64)
        .bind(record.not_after.as_u64() as i64)
        .bind(record.status.as_str())
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(Error::with_cause(
                    ErrorKind::Conflict,
                    format!("certificate serial already exists: {}", record.serial),
                ))
            }
            Err(other) => return Err(other.into()),
        }

        tx.commit().await?;

        superseded
            .iter()
            .map(|row| row.try_get::<String, _>("serial").map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn sample_certificate(serial: &str, agent_id: &str) -> CertificateRecord {
    use std::time::Duration;

    let now = Timestamp::now();
    CertificateRecord {
        serial: serial.to_string(),
        agent_id: agent_id.to_string(),
        spiffe_id: format!("spiffe://test-colony/agent/{agent_id}"),
        issued_at: now,
        not_before: now,
        not_after: now + Duration::from_secs(86400),
        status: CertStatus::Active,
        revoked_at: None,
        revocation_reason: None,
        revoked_by: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_serial_is_conflict() {
        let db = ColonyDb::test().await;
        let record = sample_certificate("aa11", "agent-1");

        db.insert_certificate(&record).await.unwrap();
        let err = db.insert_certificate(&record).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn revoke_unknown_serial_is_not_found() {
        let db = ColonyDb::test().await;
        let err = db
            .revoke_certificate("feed", "compromised", "operator")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn revoke_is_terminal_and_idempotent() {
        let db = ColonyDb::test().await;
        db.insert_certificate(&sample_certificate("aa22", "agent-1"))
            .await
            .unwrap();

        db.revoke_certificate("aa22", "compromised", "operator")
            .await
            .unwrap();
        // A second revocation succeeds without rewriting metadata.
        db.revoke_certificate("aa22", "other reason", "someone-else")
            .await
            .unwrap();

        let record = db.get_certificate("aa22").await.unwrap().unwrap();
        assert_eq!(record.status, CertStatus::Revoked);
        assert_eq!(record.revocation_reason.as_deref(), Some("compromised"));
        assert_eq!(record.revoked_by.as_deref(), Some("operator"));

        assert_eq!(db.revoked_serials().await.unwrap(), vec!["aa22"]);
    }

    #[tokio::test]
    async fn supersede_revokes_prior_active_only() {
        let db = ColonyDb::test().await;
        db.insert_certificate(&sample_certificate("aa33", "agent-1"))
            .await
            .unwrap();
        db.insert_certificate(&sample_certificate("bb44", "agent-2"))
            .await
            .unwrap();

        let superseded = db
            .supersede_and_insert(&sample_certificate("cc55", "agent-1"))
            .await
            .unwrap();
        assert_eq!(superseded, vec!["aa33"]);

        let old = db.get_certificate("aa33").await.unwrap().unwrap();
        assert_eq!(old.status, CertStatus::Revoked);
        assert_eq!(old.revocation_reason.as_deref(), Some("superseded"));

        // The other agent's certificate is untouched.
        let other = db.get_certificate("bb44").await.unwrap().unwrap();
        assert_eq!(other.status, CertStatus::Active);

        let new = db.get_certificate("cc55").await.unwrap().unwrap();
        assert_eq!(new.status, CertStatus::Active);
    }
}
