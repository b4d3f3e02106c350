//! Query RPCs over the mesh listener.

use crate::discovery::{ServiceFilter, Source};
use crate::mesh_server::app_state::MeshState;
use crate::mesh_server::tls::PeerIdentity;
use crate::query::{with_deadline, UnifiedRequest, DEFAULT_QUERY_DEADLINE};
use crate::shared::HttpResult;
use crate::wire::{
    v1::{
        ListServicesRequest, ListServicesResponse, PercentileRequest, PercentileResponse,
        RawSqlRequest, RawSqlResponse, RawSqlRow, ServiceActivity, ServiceActivityList,
        ServiceActivityRequest, ServiceInfo, UnifiedQueryRequest, UnifiedQueryResponse,
    },
    Proto,
};
use axum::{extract::State, Extension};
use std::time::Duration;

fn service_filter(request: &ListServicesRequest) -> ServiceFilter {
    ServiceFilter {
        time_range: (request.time_range_ms > 0)
            .then(|| Duration::from_millis(request.time_range_ms)),
        source: Source::parse(&request.source_filter),
        name: (!request.name_filter.is_empty()).then(|| request.name_filter.clone()),
    }
}

pub async fn list_services(
    State(state): State<MeshState>,
    identity: Option<Extension<PeerIdentity>>,
    Proto(request): Proto<ListServicesRequest>,
) -> HttpResult<Proto<ListServicesResponse>> {
    state.authenticate_agent(identity.as_deref()).await?;

    let services = with_deadline(
        DEFAULT_QUERY_DEADLINE,
        state.context.query.list_services(&service_filter(&request)),
    )
    .await?;

    Ok(Proto(ListServicesResponse {
        services: services
            .into_iter()
            .map(|service| ServiceInfo {
                name: service.name,
                source: service.source.as_str().to_string(),
                status: service.status,
                instance_count: service.instance_count,
                last_seen_us: service.last_seen.map(|t| t.as_u64()).unwrap_or(0),
                agent_ids: service.agent_ids,
            })
            .collect(),
    }))
}

pub async fn metric_percentile(
    State(state): State<MeshState>,
    identity: Option<Extension<PeerIdentity>>,
    Proto(request): Proto<PercentileRequest>,
) -> HttpResult<Proto<PercentileResponse>> {
    state.authenticate_agent(identity.as_deref()).await?;

    let value_ns = with_deadline(
        DEFAULT_QUERY_DEADLINE,
        state.context.query.get_metric_percentile(
            &request.service,
            &request.metric,
            request.percentile,
            request.time_range_ms,
        ),
    )
    .await?;

    Ok(Proto(PercentileResponse { value_ns }))
}

fn activity_message(record: crate::store::telemetry::ActivityRecord) -> ServiceActivity {
    let avg = if record.request_count == 0 {
        0.0
    } else {
        record.duration_sum_ns / record.request_count as f64
    };
    ServiceActivity {
        service: record.service_name,
        request_count: record.request_count,
        error_count: record.error_count,
        avg_duration_ns: avg,
        last_seen_us: record.last_seen.as_u64(),
    }
}

pub async fn service_activity(
    State(state): State<MeshState>,
    identity: Option<Extension<PeerIdentity>>,
    Proto(request): Proto<ServiceActivityRequest>,
) -> HttpResult<Proto<ServiceActivity>> {
    state.authenticate_agent(identity.as_deref()).await?;

    let record = with_deadline(
        DEFAULT_QUERY_DEADLINE,
        state
            .context
            .query
            .get_service_activity(&request.service, request.time_range_ms),
    )
    .await?;

    Ok(Proto(activity_message(record)))
}

pub async fn list_service_activity(
    State(state): State<MeshState>,
    identity: Option<Extension<PeerIdentity>>,
    Proto(request): Proto<ServiceActivityRequest>,
) -> HttpResult<Proto<ServiceActivityList>> {
    state.authenticate_agent(identity.as_deref()).await?;

    let records = with_deadline(
        DEFAULT_QUERY_DEADLINE,
        state
            .context
            .query
            .list_service_activity(request.time_range_ms),
    )
    .await?;

    Ok(Proto(ServiceActivityList {
        services: records.into_iter().map(activity_message).collect(),
    }))
}

fn unified_request(request: UnifiedQueryRequest) -> UnifiedRequest {
    UnifiedRequest {
        time_range_ms: request.time_range_ms,
        service: (!request.service.is_empty()).then_some(request.service),
        limit: request.limit,
    }
}

macro_rules! unified_route {
    ($name:ident, $method:ident) => {
        pub async fn $name(
            State(state): State<MeshState>,
            identity: Option<Extension<PeerIdentity>>,
            Proto(request): Proto<UnifiedQueryRequest>,
        ) -> HttpResult<Proto<UnifiedQueryResponse>> {
            state.authenticate_agent(identity.as_deref()).await?;

            let output = with_deadline(
                DEFAULT_QUERY_DEADLINE,
                state.context.query.$method(&unified_request(request)),
            )
            .await?;

            Ok(Proto(UnifiedQueryResponse {
                text: output.text,
                structured_json: output.structured_json,
            }))
        }
    };
}

unified_route!(unified_summary, query_unified_summary);
unified_route!(unified_traces, query_unified_traces);
unified_route!(unified_metrics, query_unified_metrics);
unified_route!(unified_logs, query_unified_logs);

pub async fn raw_sql(
    State(state): State<MeshState>,
    identity: Option<Extension<PeerIdentity>>,
    Proto(request): Proto<RawSqlRequest>,
) -> HttpResult<Proto<RawSqlResponse>> {
    state.authenticate_agent(identity.as_deref()).await?;

    let result = with_deadline(DEFAULT_QUERY_DEADLINE, async {
        state
            .context
            .query
            .caps()
            .raw_query(
                &request.sql,
                request.max_rows,
                state.context.query.max_raw_rows(),
            )
            .await
    })
    .await?;

    Ok(Proto(RawSqlResponse {
        columns: result.columns,
        rows: result
            .rows
            .into_iter()
            .map(|values| RawSqlRow { values })
            .collect(),
        truncated: result.truncated,
    }))
}
