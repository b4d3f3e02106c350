//! Daily retention sweeper.
//!
//! One tick per day deletes telemetry rows older than each table's
//! configured retention. A failed sweep logs and retries the next day.

use super::{start_poller, PollerHandle};
use crate::store::{retention::RetentionPolicy, ColonyDb};
use std::time::Duration;

const SWEEP_PERIOD: Duration = Duration::from_secs(86400);

pub fn start_retention_sweeper(db: ColonyDb, policies: Vec<RetentionPolicy>) -> PollerHandle {
    start_poller("retention-sweep", SWEEP_PERIOD, move || {
        let db = db.clone();
        let policies = policies.clone();
        async move { sweep_all(&db, &policies).await }
    })
}

pub(crate) async fn sweep_all(db: &ColonyDb, policies: &[RetentionPolicy]) {
    for policy in policies {
        match db.sweep_table(*policy).await {
            Ok(deleted) => {
                tracing::info!(
                    target: "coral::pollers",
                    table = policy.table,
                    days = policy.days,
                    deleted,
                    "retention sweep"
                );
            }
            Err(error) => {
                // Retry happens on the next daily tick.
                tracing::warn!(table = policy.table, %error, "retention sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::telemetry::sample_http_row;
    use coral_common::timestamp::Timestamp;

    #[tokio::test]
    async fn sweep_all_applies_every_policy() {
        let db = ColonyDb::test().await;
        let mut old = sample_http_row("checkout", 200, 1);
        old.timestamp = Timestamp::now() - Duration::from_secs(30 * 86400);
        db.upsert_http_batch("agent-1", &[old]).await.unwrap();

        let policies = vec![RetentionPolicy {
            table: "http_metrics",
            days: 7,
        }];
        sweep_all(&db, &policies).await;

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM http_metrics")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }
}
