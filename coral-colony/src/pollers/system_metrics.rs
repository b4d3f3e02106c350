//! Host-level system metrics poller.

use super::{eligible_agents, start_poller, PollerContext, PollerHandle, PER_AGENT_TIMEOUT};
use crate::store::telemetry::SystemMetricRecord;
use crate::wire::v1;
use coral_common::timestamp::Timestamp;
use std::time::Duration;
use tokio::task::JoinSet;

pub fn start_system_metrics_poller(context: PollerContext, period: Duration) -> PollerHandle {
    start_poller("system-metrics", period, move || {
        let context = context.clone();
        async move { tick(&context).await }
    })
}

async fn tick(context: &PollerContext) {
    let mut tasks = JoinSet::new();
    for agent in eligible_agents(&context.registry) {
        let client = context.client.clone();
        tasks.spawn(async move {
            let pulled =
                tokio::time::timeout(PER_AGENT_TIMEOUT, client.pull_system_metrics(&agent)).await;
            (agent.agent_id, pulled)
        });
    }

    let mut pulled = 0usize;
    let mut failed = 0usize;

    while let Some(joined) = tasks.join_next().await {
        let Ok((agent_id, outcome)) = joined else {
            failed += 1;
            continue;
        };

        let rows: Vec<SystemMetricRecord> = match outcome {
            Ok(Ok(response)) => response.rows.into_iter().map(record).collect(),
            Ok(Err(error)) => {
                failed += 1;
                tracing::debug!(agent_id, %error, "system metrics pull failed");
                continue;
            }
            Err(_) => {
                failed += 1;
                continue;
            }
        };

        match context.db.upsert_system_metric_batch(&agent_id, &rows).await {
            Ok(()) => pulled += 1,
            Err(error) => {
                failed += 1;
                tracing::warn!(agent_id, %error, "dropping system metrics batch");
            }
        }
    }

    tracing::info!(
        target: "coral::pollers",
        poller = "system-metrics",
        pulled,
        failed,
        "tick complete"
    );
}

fn record(row: v1::SystemMetricRow) -> SystemMetricRecord {
    SystemMetricRecord {
        timestamp: Timestamp::from_micros(row.timestamp_us),
        metric_name: row.metric_name,
        value: row.value,
        unit: row.unit,
    }
}
