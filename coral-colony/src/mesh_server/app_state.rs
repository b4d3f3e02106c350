//! Shared state of the mesh listener.

use super::tls::{PeerIdentity, RevocationCache};
use crate::app_context::AppContext;
use crate::shared::{HttpError, HttpResult};
use axum::http::StatusCode;

#[derive(Clone)]
pub struct MeshState {
    pub context: AppContext,
    pub revocation: RevocationCache,
}

impl MeshState {
    pub fn new(context: AppContext) -> Self {
        let revocation = RevocationCache::new(
            context.db.clone(),
            context.issuer.generation_handle(),
        );
        Self {
            context,
            revocation,
        }
    }

    /// Resolve the connection's verified, non-revoked agent identity.
    /// Routes other than enrollment call this first.
    pub async fn authenticate_agent(
        &self,
        identity: Option<&PeerIdentity>,
    ) -> HttpResult<String> {
        let identity = identity.ok_or_else(|| {
            HttpError::new(
                StatusCode::UNAUTHORIZED,
                Some("client certificate required"),
            )
        })?;

        let serial = identity.serial.as_deref().ok_or_else(|| {
            HttpError::new(
                StatusCode::UNAUTHORIZED,
                Some("client certificate required"),
            )
        })?;

        self.revocation.check(serial).await?;

        identity.agent_id.clone().ok_or_else(|| {
            HttpError::new(
                StatusCode::UNAUTHORIZED,
                Some("client certificate carries no agent identity"),
            )
        })
    }
}
