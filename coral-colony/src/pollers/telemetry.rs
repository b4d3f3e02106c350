//! The combined eBPF telemetry poller: HTTP, gRPC, SQL and trace spans in
//! one pull per agent.

use super::{eligible_agents, start_poller, PollerContext, PollerHandle, PER_AGENT_TIMEOUT};
use crate::error::ErrorKind;
use crate::store::telemetry::{
    GrpcMetricRecord, Histogram, HistogramCell, HttpMetricRecord, SqlMetricRecord,
    TraceSpanRecord,
};
use crate::wire::v1::{self, TelemetryPullResponse};
use coral_common::timestamp::Timestamp;
use std::time::Duration;
use tokio::task::JoinSet;

/// Start the telemetry poller with the configured period.
pub fn start_telemetry_poller(context: PollerContext, period: Duration) -> PollerHandle {
    start_poller("beyla-telemetry", period, move || {
        let context = context.clone();
        async move { tick(&context).await }
    })
}

async fn tick(context: &PollerContext) {
    let agents = eligible_agents(&context.registry);
    let mut tasks = JoinSet::new();

    for agent in agents {
        let client = context.client.clone();
        tasks.spawn(async move {
            let pulled =
                tokio::time::timeout(PER_AGENT_TIMEOUT, client.pull_telemetry(&agent)).await;
            (agent.agent_id, pulled)
        });
    }

    let mut pulled = 0usize;
    let mut failed = 0usize;
    let mut rows = 0usize;

    while let Some(joined) = tasks.join_next().await {
        let Ok((agent_id, outcome)) = joined else {
            failed += 1;
            continue;
        };

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                failed += 1;
                tracing::debug!(agent_id, %error, "telemetry pull failed");
                continue;
            }
            Err(_) => {
                failed += 1;
                tracing::debug!(agent_id, "telemetry pull timed out");
                continue;
            }
        };

        match store_batch(context, &agent_id, response).await {
            Ok(inserted) => {
                pulled += 1;
                rows += inserted;
            }
            Err(error) if error.kind() == ErrorKind::StorageUnavailable => {
                // Drop the batch; the next cycle pulls fresh data.
                failed += 1;
                tracing::warn!(agent_id, %error, "store unavailable, dropping batch");
            }
            Err(error) => {
                failed += 1;
                tracing::warn!(agent_id, %error, "telemetry batch insert failed");
            }
        }
    }

    tracing::info!(
        target: "coral::pollers",
        poller = "beyla-telemetry",
        pulled,
        failed,
        rows,
        "tick complete"
    );
}

async fn store_batch(
    context: &PollerContext,
    agent_id: &str,
    response: TelemetryPullResponse,
) -> crate::error::Result<usize> {
    let http: Vec<HttpMetricRecord> = response.http.into_iter().map(http_record).collect();
    let grpc: Vec<GrpcMetricRecord> = response.grpc.into_iter().map(grpc_record).collect();
    let sql: Vec<SqlMetricRecord> = response.sql.into_iter().map(sql_record).collect();
    let spans: Vec<TraceSpanRecord> = response.spans.into_iter().map(span_record).collect();
    let count = http.len() + grpc.len() + sql.len() + spans.len();

    context.db.upsert_http_batch(agent_id, &http).await?;
    context.db.upsert_grpc_batch(agent_id, &grpc).await?;
    context.db.upsert_sql_batch(agent_id, &sql).await?;
    context.db.upsert_span_batch(agent_id, &spans).await?;

    Ok(count)
}

fn histogram(cells: Vec<v1::HistogramBucket>) -> Histogram {
    cells
        .into_iter()
        .map(|cell| HistogramCell {
            upper_bound_ns: cell.upper_bound_ns,
            count: cell.count,
        })
        .collect()
}

fn http_record(row: v1::HttpMetricRow) -> HttpMetricRecord {
    HttpMetricRecord {
        timestamp: Timestamp::from_micros(row.timestamp_us),
        service_name: row.service_name,
        method: row.method,
        path: row.path,
        status_code: row.status_code,
        count: row.count,
        duration_sum_ns: row.duration_sum_ns,
        histogram: histogram(row.histogram),
    }
}

fn grpc_record(row: v1::GrpcMetricRow) -> GrpcMetricRecord {
    GrpcMetricRecord {
        timestamp: Timestamp::from_micros(row.timestamp_us),
        service_name: row.service_name,
        rpc_method: row.rpc_method,
        status_code: row.status_code,
        count: row.count,
        duration_sum_ns: row.duration_sum_ns,
        histogram: histogram(row.histogram),
    }
}

fn sql_record(row: v1::SqlMetricRow) -> SqlMetricRecord {
    SqlMetricRecord {
        timestamp: Timestamp::from_micros(row.timestamp_us),
        service_name: row.service_name,
        operation: row.operation,
        table_name: row.table_name,
        count: row.count,
        duration_sum_ns: row.duration_sum_ns,
        histogram: histogram(row.histogram),
    }
}

fn span_record(row: v1::TraceSpanRow) -> TraceSpanRecord {
    TraceSpanRecord {
        timestamp: Timestamp::from_micros(row.timestamp_us),
        service_name: row.service_name,
        trace_id: row.trace_id,
        span_id: row.span_id,
        parent_span_id: row.parent_span_id,
        name: row.name,
        kind: row.kind,
        duration_ns: row.duration_ns,
        status: row.status,
        attributes_json: row.attributes_json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pollers::test_support::test_context;
    use crate::registry::test_agent;
    use std::time::Duration;

    fn wire_http_row(service: &str, count: u64) -> v1::HttpMetricRow {
        v1::HttpMetricRow {
            timestamp_us: Timestamp::now().as_u64(),
            service_name: service.to_string(),
            method: "GET".to_string(),
            path: "/".to_string(),
            status_code: 200,
            count,
            duration_sum_ns: 1_000_000.0,
            histogram: vec![v1::HistogramBucket {
                upper_bound_ns: 1_000_000.0,
                count,
            }],
        }
    }

    #[tokio::test]
    async fn tick_pulls_eligible_agents_and_stores_rows() {
        let (context, client) = test_context().await;
        context.registry.register(test_agent("agent-1")).await.unwrap();
        client.telemetry.lock().unwrap().http = vec![wire_http_row("checkout", 6)];

        tick(&context).await;

        let activity = context
            .db
            .service_activity(Some("checkout"), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].request_count, 6);
    }

    #[tokio::test]
    async fn repeated_tick_in_same_bucket_is_idempotent() {
        let (context, client) = test_context().await;
        context.registry.register(test_agent("agent-1")).await.unwrap();
        client.telemetry.lock().unwrap().http = vec![wire_http_row("checkout", 6)];

        tick(&context).await;
        tick(&context).await;

        let activity = context
            .db
            .service_activity(Some("checkout"), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(activity[0].request_count, 6);
    }

    #[tokio::test]
    async fn one_failing_agent_does_not_block_the_rest() {
        let (context, client) = test_context().await;
        context.registry.register(test_agent("agent-1")).await.unwrap();
        context.registry.register(test_agent("agent-2")).await.unwrap();
        client.telemetry.lock().unwrap().http = vec![wire_http_row("checkout", 2)];
        client.fail_agents.lock().unwrap().push("agent-1".to_string());

        tick(&context).await;

        // agent-2's batch still landed.
        let activity = context
            .db
            .service_activity(Some("checkout"), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(activity.len(), 1);
    }
}
