//! Public-endpoint routes: operator/AI-facing JSON over TLS.

use super::app_state::{AuthenticatedToken, PublicState};
use crate::discovery::{ServiceFilter, Source};
use crate::query::{with_deadline, UnifiedRequest, DEFAULT_QUERY_DEADLINE};
use crate::shared::{HttpError, HttpResult};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use coral_common::permissions::{Permission, PermissionSet};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

// === status ===

/// Colony status. Overall status is `running` independent of agent
/// health; agent health counts ride alongside.
pub async fn status(
    State(state): State<PublicState>,
    Extension(token): Extension<AuthenticatedToken>,
) -> HttpResult<Json<Value>> {
    token.require(Permission::Status)?;

    let (active, degraded) = state.context.registry.count_by_status();
    Ok(Json(json!({
        "colony_id": state.context.config.id,
        "application": state.context.config.application,
        "environment": state.context.config.environment,
        "status": "running",
        "agents": { "active": active, "degraded": degraded },
    })))
}

// === queries ===

#[derive(Debug, Deserialize)]
pub struct ServicesParams {
    #[serde(default)]
    time_range_ms: Option<u64>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

pub async fn list_services(
    State(state): State<PublicState>,
    Extension(token): Extension<AuthenticatedToken>,
    Query(params): Query<ServicesParams>,
) -> HttpResult<Json<Value>> {
    token.require(Permission::Query)?;

    let filter = ServiceFilter {
        time_range: params.time_range_ms.map(Duration::from_millis),
        source: params.source.as_deref().and_then(Source::parse),
        name: params.name,
    };
    let services = with_deadline(
        DEFAULT_QUERY_DEADLINE,
        state.context.query.list_services(&filter),
    )
    .await?;

    Ok(Json(json!({
        "services": services.iter().map(|s| json!({
            "name": s.name,
            "source": s.source.as_str(),
            "status": s.status,
            "instance_count": s.instance_count,
            "last_seen_us": s.last_seen.map(|t| t.as_u64()),
            "agent_ids": s.agent_ids,
        })).collect::<Vec<_>>(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct PercentileParams {
    service: String,
    metric: String,
    percentile: f64,
    #[serde(default = "default_time_range_ms")]
    time_range_ms: u64,
}

fn default_time_range_ms() -> u64 {
    3_600_000
}

pub async fn metric_percentile(
    State(state): State<PublicState>,
    Extension(token): Extension<AuthenticatedToken>,
    Query(params): Query<PercentileParams>,
) -> HttpResult<Json<Value>> {
    token.require(Permission::Analyze)?;

    let value_ns = with_deadline(
        DEFAULT_QUERY_DEADLINE,
        state.context.query.get_metric_percentile(
            &params.service,
            &params.metric,
            params.percentile,
            params.time_range_ms,
        ),
    )
    .await?;

    Ok(Json(json!({
        "service": params.service,
        "metric": params.metric,
        "percentile": params.percentile,
        "value_ns": value_ns,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ActivityParams {
    #[serde(default)]
    service: Option<String>,
    #[serde(default = "default_time_range_ms")]
    time_range_ms: u64,
}

pub async fn service_activity(
    State(state): State<PublicState>,
    Extension(token): Extension<AuthenticatedToken>,
    Query(params): Query<ActivityParams>,
) -> HttpResult<Json<Value>> {
    token.require(Permission::Analyze)?;

    let records = match &params.service {
        Some(service) => vec![
            with_deadline(
                DEFAULT_QUERY_DEADLINE,
                state
                    .context
                    .query
                    .get_service_activity(service, params.time_range_ms),
            )
            .await?,
        ],
        None => {
            with_deadline(
                DEFAULT_QUERY_DEADLINE,
                state.context.query.list_service_activity(params.time_range_ms),
            )
            .await?
        }
    };

    Ok(Json(json!({
        "services": records.iter().map(|r| json!({
            "service": r.service_name,
            "request_count": r.request_count,
            "error_count": r.error_count,
            "last_seen_us": r.last_seen.as_u64(),
        })).collect::<Vec<_>>(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct UnifiedParams {
    #[serde(default)]
    time_range_ms: Option<u64>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
}

pub async fn unified(
    State(state): State<PublicState>,
    Extension(token): Extension<AuthenticatedToken>,
    Path(kind): Path<String>,
    Query(params): Query<UnifiedParams>,
) -> HttpResult<Json<Value>> {
    token.require(Permission::Query)?;

    let request = UnifiedRequest {
        time_range_ms: params.time_range_ms.unwrap_or(0),
        service: params.service,
        limit: params.limit.unwrap_or(0),
    };

    let output = with_deadline(DEFAULT_QUERY_DEADLINE, async {
        match kind.as_str() {
            "summary" => state.context.query.query_unified_summary(&request).await,
            "traces" => state.context.query.query_unified_traces(&request).await,
            "metrics" => state.context.query.query_unified_metrics(&request).await,
            "logs" => state.context.query.query_unified_logs(&request).await,
            other => Err(crate::error::Error::not_found(format!(
                "unknown unified query: {other}"
            ))),
        }
    })
    .await?;

    let structured: Value =
        serde_json::from_str(&output.structured_json).unwrap_or(Value::Null);
    Ok(Json(json!({ "text": output.text, "structured": structured })))
}

#[derive(Debug, Deserialize)]
pub struct SqlBody {
    sql: String,
    #[serde(default)]
    max_rows: u32,
}

pub async fn raw_sql(
    State(state): State<PublicState>,
    Extension(token): Extension<AuthenticatedToken>,
    Json(body): Json<SqlBody>,
) -> HttpResult<Json<Value>> {
    token.require(Permission::Debug)?;

    let result = with_deadline(DEFAULT_QUERY_DEADLINE, async {
        state
            .context
            .query
            .caps()
            .raw_query(&body.sql, body.max_rows, state.context.query.max_raw_rows())
            .await
    })
    .await?;

    Ok(Json(json!({
        "columns": result.columns,
        "rows": result.rows,
        "truncated": result.truncated,
    })))
}

pub async fn invoke_tool(
    State(state): State<PublicState>,
    Extension(token): Extension<AuthenticatedToken>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> HttpResult<Json<Value>> {
    // Raw SQL through the tool surface needs the same authority as the
    // direct route.
    if name == "execute_query" {
        token.require(Permission::Debug)?;
    } else {
        token.require(Permission::Query)?;
    }

    let args = body.to_string();
    let text = with_deadline(
        DEFAULT_QUERY_DEADLINE,
        state.context.tools.invoke(&name, &args),
    )
    .await?;

    Ok(Json(json!({ "text": text })))
}

// === admin ===

pub async fn show_psk(
    State(state): State<PublicState>,
    Extension(token): Extension<AuthenticatedToken>,
) -> HttpResult<Json<Value>> {
    token.require(Permission::Admin)?;

    let psk = state.context.psk.get_active_psk().await?;
    Ok(Json(json!({ "psk": psk })))
}

#[derive(Debug, Deserialize)]
pub struct RotateBody {
    #[serde(default)]
    grace_secs: u64,
}

pub async fn rotate_psk(
    State(state): State<PublicState>,
    Extension(token): Extension<AuthenticatedToken>,
    Json(body): Json<RotateBody>,
) -> HttpResult<Json<Value>> {
    token.require(Permission::Admin)?;

    let psk = state
        .context
        .psk
        .rotate(Duration::from_secs(body.grace_secs))
        .await?;
    Ok(Json(json!({ "psk": psk, "grace_secs": body.grace_secs })))
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenBody {
    permissions: Vec<Permission>,
    #[serde(default)]
    rate_limit: Option<String>,
}

pub async fn create_token(
    State(state): State<PublicState>,
    Extension(token): Extension<AuthenticatedToken>,
    Json(body): Json<CreateTokenBody>,
) -> HttpResult<Json<Value>> {
    token.require(Permission::Admin)?;

    if body.permissions.is_empty() {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            Some("at least one permission is required"),
        ));
    }
    let rate_limit = body
        .rate_limit
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(HttpError::from)?;

    let (record, value) = state
        .tokens
        .create(PermissionSet::from(body.permissions), rate_limit)?;

    // The only response that ever carries the value.
    Ok(Json(json!({
        "token_id": record.token_id,
        "token": value,
        "permissions": record.permissions,
        "rate_limit": record.rate_limit.map(|l| l.to_string()),
    })))
}

pub async fn list_tokens(
    State(state): State<PublicState>,
    Extension(token): Extension<AuthenticatedToken>,
) -> HttpResult<Json<Value>> {
    token.require(Permission::Admin)?;

    Ok(Json(json!({
        "tokens": state.tokens.list().iter().map(|record| json!({
            "token_id": record.token_id,
            "permissions": record.permissions,
            "rate_limit": record.rate_limit.map(|l| l.to_string()),
            "created_at": record.created_at,
            "last_used_at": record.last_used_at,
            "revoked": record.revoked,
        })).collect::<Vec<_>>(),
    })))
}

pub async fn revoke_token(
    State(state): State<PublicState>,
    Extension(token): Extension<AuthenticatedToken>,
    Path(token_id): Path<String>,
) -> HttpResult<Json<Value>> {
    token.require(Permission::Admin)?;

    state.tokens.revoke(&token_id)?;
    state.rate.forget(&token_id);
    Ok(Json(json!({ "revoked": token_id })))
}

pub async fn list_agent_certificates(
    State(state): State<PublicState>,
    Extension(token): Extension<AuthenticatedToken>,
    Path(agent_id): Path<String>,
) -> HttpResult<Json<Value>> {
    token.require(Permission::Admin)?;

    let records = state.context.db.certificates_for_agent(&agent_id).await?;
    Ok(Json(json!({
        "certificates": records.iter().map(|record| json!({
            "serial": record.serial,
            "spiffe_id": record.spiffe_id,
            "status": record.status.as_str(),
            "not_after_secs": record.not_after.as_secs(),
            "revocation_reason": record.revocation_reason,
            "revoked_by": record.revoked_by,
        })).collect::<Vec<_>>(),
    })))
}

pub async fn list_ip_allocations(
    State(state): State<PublicState>,
    Extension(token): Extension<AuthenticatedToken>,
) -> HttpResult<Json<Value>> {
    token.require(Permission::Admin)?;

    let allocations = state.context.db.list_ip_allocations().await?;
    Ok(Json(json!({
        "allocations": allocations.iter().map(|a| json!({
            "mesh_ipv4": a.mesh_ipv4,
            "agent_id": a.agent_id,
            "allocated_at": a.allocated_at,
        })).collect::<Vec<_>>(),
    })))
}
