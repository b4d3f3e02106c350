//! Certificate lifecycle RPCs for admitted agents.
//!
//! Every operation here is scoped to the calling agent, the same way
//! heartbeats and service uploads are: a valid client certificate for
//! agent A grants no authority over agent B's certificates. Operators act
//! through the public endpoint's admin surface instead.

use crate::mesh_server::app_state::MeshState;
use crate::mesh_server::tls::PeerIdentity;
use crate::shared::{HttpError, HttpResult};
use crate::wire::{
    v1::{
        Ack, CertificateChain, CertificateInfo, CertificateList, CertificateListRequest,
        CertificateRequest, EnrollResponse, RevokeRequest,
    },
    Proto,
};
use axum::{extract::State, http::StatusCode, Extension};

/// Re-issue a certificate for the calling agent. Requires a fresh referral
/// ticket bound to the same agent; the prior active certificate is
/// superseded.
pub async fn request_certificate(
    State(state): State<MeshState>,
    identity: Option<Extension<PeerIdentity>>,
    Proto(request): Proto<CertificateRequest>,
) -> HttpResult<Proto<EnrollResponse>> {
    let agent_id = state.authenticate_agent(identity.as_deref()).await?;

    if agent_id != request.agent_id {
        return Err(HttpError::new(
            StatusCode::UNAUTHORIZED,
            Some("certificate request agent_id does not match client certificate"),
        ));
    }

    let chain = state
        .context
        .issuer
        .reissue_for_agent(&agent_id, &request.csr_pem, &request.ticket)
        .await?;

    Ok(Proto(EnrollResponse {
        agent_id,
        chain: Some(CertificateChain {
            leaf_pem: chain.leaf_pem,
            chain_pem: chain.chain_pems,
            expires_at: chain.expires_at,
        }),
    }))
}

/// Revoke one of the calling agent's own certificates by serial. Unknown
/// serials are 404; another agent's serial is rejected.
pub async fn revoke_certificate(
    State(state): State<MeshState>,
    identity: Option<Extension<PeerIdentity>>,
    Proto(request): Proto<RevokeRequest>,
) -> HttpResult<Proto<Ack>> {
    let agent_id = state.authenticate_agent(identity.as_deref()).await?;

    let record = state
        .context
        .db
        .get_certificate(&request.serial)
        .await?
        .ok_or_else(|| {
            HttpError::new(
                StatusCode::NOT_FOUND,
                Some(format!("unknown serial: {}", request.serial)),
            )
        })?;

    if record.agent_id != agent_id {
        return Err(HttpError::new(
            StatusCode::UNAUTHORIZED,
            Some("serial does not belong to the calling agent"),
        ));
    }

    state
        .context
        .issuer
        .revoke(&request.serial, &request.reason, &agent_id)
        .await?;

    Ok(Proto(Ack {}))
}

/// List the calling agent's own certificate history.
pub async fn list_certificates(
    State(state): State<MeshState>,
    identity: Option<Extension<PeerIdentity>>,
    Proto(request): Proto<CertificateListRequest>,
) -> HttpResult<Proto<CertificateList>> {
    let agent_id = state.authenticate_agent(identity.as_deref()).await?;

    if agent_id != request.agent_id {
        return Err(HttpError::new(
            StatusCode::UNAUTHORIZED,
            Some("certificate listing is scoped to the calling agent"),
        ));
    }

    let records = state
        .context
        .db
        .certificates_for_agent(&agent_id)
        .await?;

    Ok(Proto(CertificateList {
        certificates: records
            .into_iter()
            .map(|record| CertificateInfo {
                serial: record.serial,
                agent_id: record.agent_id,
                spiffe_id: record.spiffe_id,
                status: record.status.as_str().to_string(),
                not_after_secs: record.not_after.as_secs(),
                revocation_reason: record.revocation_reason.unwrap_or_default(),
            })
            .collect(),
    }))
}
