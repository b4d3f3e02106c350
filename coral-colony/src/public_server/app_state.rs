//! Shared state and token authentication for the public endpoint.

use super::{rate_limit::RateLimiterRegistry, tokens::TokenStore};
use crate::app_context::AppContext;
use crate::shared::{HttpError, HttpResult};
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};
use coral_common::permissions::Permission;
use std::sync::Arc;

#[derive(Clone)]
pub struct PublicState {
    pub context: AppContext,
    pub tokens: Arc<TokenStore>,
    pub rate: Arc<RateLimiterRegistry>,
}

/// The token a request authenticated with.
#[derive(Debug, Clone)]
pub struct AuthenticatedToken(pub super::tokens::TokenRecord);

impl AuthenticatedToken {
    /// `Unauthorized` unless the token grants `permission`.
    pub fn require(&self, permission: Permission) -> HttpResult<()> {
        if self.0.permissions.allows(permission) {
            return Ok(());
        }
        Err(HttpError::new(
            StatusCode::UNAUTHORIZED,
            Some(format!("token lacks the {permission} permission")),
        ))
    }
}

/// Bearer-token authentication and rate limiting for every public route.
pub async fn token_auth(
    State(state): State<PublicState>,
    mut request: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let value = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .ok_or_else(|| {
            HttpError::new(StatusCode::UNAUTHORIZED, Some("bearer token required"))
        })?;

    let record = state.tokens.authenticate(value).ok_or_else(|| {
        HttpError::new(StatusCode::UNAUTHORIZED, Some("invalid token"))
    })?;

    if let Some(limit) = record.rate_limit {
        if let Err(retry_after) = state.rate.check(&record.token_id, limit) {
            return Err(HttpError::rate_limited(retry_after));
        }
    }

    request
        .extensions_mut()
        .insert(AuthenticatedToken(record));
    Ok(next.run(request).await)
}
