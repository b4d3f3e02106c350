//! Continuous CPU-profile poller.

use super::{eligible_agents, start_poller, PollerContext, PollerHandle, PER_AGENT_TIMEOUT};
use crate::store::telemetry::CpuProfileRecord;
use crate::wire::v1;
use coral_common::timestamp::Timestamp;
use std::time::Duration;
use tokio::task::JoinSet;

pub fn start_profile_poller(context: PollerContext, period: Duration) -> PollerHandle {
    start_poller("continuous-profiling", period, move || {
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
                tokio::time::timeout(PER_AGENT_TIMEOUT, client.pull_profiles(&agent)).await;
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

        let rows: Vec<CpuProfileRecord> = match outcome {
            Ok(Ok(response)) => response.rows.into_iter().map(record).collect(),
            Ok(Err(error)) => {
                failed += 1;
                tracing::debug!(agent_id, %error, "profile pull failed");
                continue;
            }
            Err(_) => {
                failed += 1;
                continue;
            }
        };

        match context.db.upsert_profile_batch(&agent_id, &rows).await {
            Ok(()) => pulled += 1,
            Err(error) => {
                failed += 1;
                tracing::warn!(agent_id, %error, "dropping profile batch");
            }
        }
    }

    tracing::info!(
        target: "coral::pollers",
        poller = "continuous-profiling",
        pulled,
        failed,
        "tick complete"
    );
}

fn record(row: v1::CpuProfileRow) -> CpuProfileRecord {
    CpuProfileRecord {
        timestamp: Timestamp::from_micros(row.timestamp_us),
        service_name: row.service_name,
        function_name: row.function_name,
        module_path: row.module_path,
        self_samples: row.self_samples,
        total_samples: row.total_samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pollers::test_support::test_context;
    use crate::registry::test_agent;

    #[tokio::test]
    async fn tick_stores_hotspots() {
        let (context, client) = test_context().await;
        context.registry.register(test_agent("agent-1")).await.unwrap();
        client.profiles.lock().unwrap().rows = vec![v1::CpuProfileRow {
            timestamp_us: Timestamp::now().as_u64(),
            service_name: "checkout".to_string(),
            function_name: "serialize_cart".to_string(),
            module_path: "checkout::cart".to_string(),
            self_samples: 120,
            total_samples: 150,
        }];

        tick(&context).await;

        let hotspots = context
            .db
            .top_hotspots(None, Duration::from_secs(3600), 10)
            .await
            .unwrap();
        assert_eq!(hotspots.len(), 1);
        assert_eq!(hotspots[0].function_name, "serialize_cart");
    }
}
