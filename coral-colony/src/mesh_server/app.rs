//! Router of the mesh listener.

use super::{app_state::MeshState, routes};
use axum::{routing::post, Router};
use tower_http::trace::TraceLayer;

/// All mesh RPCs. Enrollment is the only route reachable without a client
/// certificate; every other handler authenticates the peer first.
pub fn create_app(state: MeshState) -> Router {
    Router::new()
        .route("/v1/enroll", post(routes::enroll::enroll))
        .route(
            "/v1/certificates/request",
            post(routes::certificates::request_certificate),
        )
        .route(
            "/v1/certificates/revoke",
            post(routes::certificates::revoke_certificate),
        )
        .route(
            "/v1/certificates/list",
            post(routes::certificates::list_certificates),
        )
        .route("/v1/heartbeat", post(routes::registry::heartbeat))
        .route("/v1/services", post(routes::registry::upload_services))
        .route("/v1/agents", post(routes::registry::list_agents))
        .route("/v1/query/services", post(routes::query::list_services))
        .route(
            "/v1/query/percentile",
            post(routes::query::metric_percentile),
        )
        .route("/v1/query/activity", post(routes::query::service_activity))
        .route(
            "/v1/query/activity/list",
            post(routes::query::list_service_activity),
        )
        .route(
            "/v1/query/unified/summary",
            post(routes::query::unified_summary),
        )
        .route(
            "/v1/query/unified/traces",
            post(routes::query::unified_traces),
        )
        .route(
            "/v1/query/unified/metrics",
            post(routes::query::unified_metrics),
        )
        .route("/v1/query/unified/logs", post(routes::query::unified_logs))
        .route("/v1/query/sql", post(routes::query::raw_sql))
        .route("/v1/tools/invoke", post(routes::tools::invoke_tool))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
