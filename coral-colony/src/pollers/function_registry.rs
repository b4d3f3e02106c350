//! Function-registry poller: keeps the symbol map used to enrich profile
//! hotspots fresh.

use super::{eligible_agents, start_poller, PollerContext, PollerHandle, PER_AGENT_TIMEOUT};
use crate::store::telemetry::FunctionRecord;
use crate::wire::v1;
use std::time::Duration;
use tokio::task::JoinSet;

pub fn start_function_registry_poller(context: PollerContext, period: Duration) -> PollerHandle {
    start_poller("function-registry", period, move || {
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
                tokio::time::timeout(PER_AGENT_TIMEOUT, client.pull_functions(&agent)).await;
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

        let functions: Vec<FunctionRecord> = match outcome {
            Ok(Ok(response)) => response.functions.into_iter().map(record).collect(),
            Ok(Err(error)) => {
                failed += 1;
                tracing::debug!(agent_id, %error, "function registry pull failed");
                continue;
            }
            Err(_) => {
                failed += 1;
                continue;
            }
        };

        match context
            .db
            .upsert_function_registry(&agent_id, &functions)
            .await
        {
            Ok(()) => pulled += 1,
            Err(error) => {
                failed += 1;
                tracing::warn!(agent_id, %error, "dropping function registry batch");
            }
        }
    }

    tracing::info!(
        target: "coral::pollers",
        poller = "function-registry",
        pulled,
        failed,
        "tick complete"
    );
}

fn record(function: v1::FunctionInfo) -> FunctionRecord {
    FunctionRecord {
        service_name: function.service_name,
        function_name: function.function_name,
        module_path: function.module_path,
    }
}
