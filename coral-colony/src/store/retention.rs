//! Retention sweeps for the telemetry tables.
//!
//! Each table carries a configured `days` value; a sweep deletes rows whose
//! bucket is older than the cutoff. Sweeps are idempotent and re-run daily
//! by the retention poller.

use super::ColonyDb;
use crate::colony_dir::ColonyConfig;
use crate::error::Result;
use coral_common::timestamp::Timestamp;
use std::time::Duration;

/// One table's retention setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub table: &'static str,
    pub days: u32,
}

/// The sweep plan derived from the colony configuration.
pub fn policies_from_config(config: &ColonyConfig) -> Vec<RetentionPolicy> {
    vec![
        RetentionPolicy {
            table: "http_metrics",
            days: config.beyla.retention.http_days,
        },
        RetentionPolicy {
            table: "grpc_metrics",
            days: config.beyla.retention.grpc_days,
        },
        RetentionPolicy {
            table: "sql_metrics",
            days: config.beyla.retention.sql_days,
        },
        RetentionPolicy {
            table: "trace_spans",
            days: config.beyla.retention.traces_days,
        },
        RetentionPolicy {
            table: "system_metrics",
            days: config.system_metrics.retention_days,
        },
        RetentionPolicy {
            table: "cpu_profiles",
            days: config.continuous_profiling.retention_days,
        },
    ]
}

impl ColonyDb {
    /// Delete rows of `policy.table` older than the retention window.
    /// Returns the number of deleted rows.
    pub async fn sweep_table(&self, policy: RetentionPolicy) -> Result<u64> {
        let cutoff = Timestamp::now() - Duration::from_secs(policy.days as u64 * 86400);
        // Table names come from the static policy list, never from callers.
        let sql = format!("DELETE FROM {} WHERE bucket_time < ?1", policy.table);

        let result = sqlx::query(&sql)
            .bind(cutoff.as_u64() as i64)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }
}
