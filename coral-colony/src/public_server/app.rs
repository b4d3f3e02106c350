//! Router of the public endpoint.

use super::{app_state::{token_auth, PublicState}, routes};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// All public routes. Every route sits behind bearer-token auth; per-route
/// permission checks happen in the handlers.
pub fn create_app(state: PublicState) -> Router {
    Router::new()
        .route("/status", get(routes::status))
        .route("/services", get(routes::list_services))
        .route("/percentile", get(routes::metric_percentile))
        .route("/activity", get(routes::service_activity))
        .route("/unified/{kind}", get(routes::unified))
        .route("/sql", post(routes::raw_sql))
        .route("/tools/{name}", post(routes::invoke_tool))
        .route("/admin/psk", get(routes::show_psk))
        .route("/admin/psk/rotate", post(routes::rotate_psk))
        .route(
            "/admin/tokens",
            get(routes::list_tokens).post(routes::create_token),
        )
        .route("/admin/tokens/{token_id}/revoke", post(routes::revoke_token))
        .route(
            "/admin/certificates/{agent_id}",
            get(routes::list_agent_certificates),
        )
        .route("/admin/ip-allocations", get(routes::list_ip_allocations))
        .layer(middleware::from_fn_with_state(state.clone(), token_auth))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
