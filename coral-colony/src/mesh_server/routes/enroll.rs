//! Agent enrollment.
//!
//! Admission order is fixed: structural checks, bootstrap PSK, then the
//! CA's ticket/CSR validation. Failures past the PSK gate carry a
//! distinguishing sub-kind (`psk` / `ticket` / `csr`) without revealing
//! whether a presented PSK was ever valid. The PSK is long-lived and never
//! consumed by a successful enrollment.

use crate::error::{Error, ErrorKind};
use crate::mesh_server::app_state::MeshState;
use crate::registry::{NewAgent, ServiceSpec};
use crate::shared::{HttpError, HttpResult};
use crate::wire::{
    v1::{CertificateChain, EnrollRequest, EnrollResponse},
    Proto,
};
use axum::{extract::State, http::StatusCode};

pub async fn enroll(
    State(state): State<MeshState>,
    Proto(request): Proto<EnrollRequest>,
) -> HttpResult<Proto<EnrollResponse>> {
    if request.psk_candidate.is_empty() || request.csr_pem.is_empty() || request.ticket.is_empty()
    {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            Some("enrollment failed (request): psk_candidate, csr and ticket are required"),
        ));
    }
    let registration = request.registration.clone().ok_or_else(|| {
        HttpError::new(
            StatusCode::BAD_REQUEST,
            Some("enrollment failed (request): registration is required"),
        )
    })?;

    // Step 3: bootstrap-PSK admission. Deliberately silent about why a
    // candidate is not accepted.
    let accepted = state
        .context
        .psk
        .accept_psk(&request.psk_candidate)
        .await
        .map_err(enrollment_error)?;
    if !accepted {
        return Err(HttpError::new(
            StatusCode::UNAUTHORIZED,
            Some("enrollment failed (psk): bootstrap psk rejected"),
        ));
    }

    // Step 4: ticket + CSR validation and signing.
    let (claims, chain) = state
        .context
        .issuer
        .issue_for_enrollment(&request.csr_pem, &request.ticket)
        .await
        .map_err(enrollment_error)?;

    if registration.agent_id != claims.agent_id {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            Some("enrollment failed (request): registration does not match ticket agent_id"),
        ));
    }

    // Reserve the agent_id → public key binding atomically with admission.
    state
        .context
        .registry
        .register(NewAgent {
            agent_id: claims.agent_id.clone(),
            component_name: registration.component_name,
            mesh_ipv4: registration.mesh_ipv4.clone(),
            mesh_ipv6: registration.mesh_ipv6,
            public_key: registration.public_key,
            services: registration
                .services
                .into_iter()
                .map(|record| ServiceSpec {
                    id: record.id,
                    name: record.name,
                    app_id: record.app_id,
                    version: record.version,
                })
                .collect(),
            runtime_context: registration.runtime_context,
            labels: registration.labels,
        })
        .await
        .map_err(enrollment_error)?;

    // Keep the agent's mesh address stable across colony restarts.
    if !registration.mesh_ipv4.is_empty() {
        record_ip_allocation(&state, &claims.agent_id, &registration.mesh_ipv4)
            .await
            .map_err(enrollment_error)?;
    }

    tracing::info!(agent_id = %claims.agent_id, serial = %chain.serial, "agent enrolled");

    Ok(Proto(EnrollResponse {
        agent_id: claims.agent_id,
        chain: Some(CertificateChain {
            leaf_pem: chain.leaf_pem,
            chain_pem: chain.chain_pems,
            expires_at: chain.expires_at,
        }),
    }))
}

async fn record_ip_allocation(
    state: &MeshState,
    agent_id: &str,
    mesh_ipv4: &str,
) -> Result<(), Error> {
    let db = &state.context.db;
    if let Some(existing) = db.ip_for_agent(agent_id).await? {
        if existing.mesh_ipv4 == mesh_ipv4 {
            return Ok(());
        }
        // The agent moved address; release the stale allocation first.
        db.release_ip(agent_id).await?;
    }
    db.allocate_ip(mesh_ipv4, agent_id).await
}

/// Attach the distinguishing sub-kind to an enrollment failure.
fn enrollment_error(error: Error) -> HttpError {
    let sub_kind = match error.kind() {
        ErrorKind::Unauthorized => "psk",
        ErrorKind::InvalidReferral | ErrorKind::MalformedRequest
            if error.cause().unwrap_or_default().starts_with("csr:") =>
        {
            "csr"
        }
        ErrorKind::InvalidReferral => "ticket",
        ErrorKind::MalformedRequest => "request",
        _ => "internal",
    };

    let base: HttpError = error.into();
    base.with_detail_prefix(&format!("enrollment failed ({sub_kind}): "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::spki_thumbprint;
    use crate::ca::ticket_test_support::valid_claims;
    use crate::mesh_server::test_support::{mesh_test_server, TestMesh};
    use crate::wire::v1::AgentRegistration;
    use prost::Message;

    fn enroll_body(psk: &str, csr: &str, ticket: &str, agent_id: &str) -> Vec<u8> {
        EnrollRequest {
            psk_candidate: psk.to_string(),
            csr_pem: csr.to_string(),
            ticket: ticket.to_string(),
            registration: Some(AgentRegistration {
                agent_id: agent_id.to_string(),
                component_name: "checkout".to_string(),
                mesh_ipv4: "10.82.0.2".to_string(),
                public_key: "pk-1".to_string(),
                ..Default::default()
            }),
        }
        .encode_to_vec()
    }

    async fn valid_enrollment(mesh: &TestMesh, agent_id: &str) -> (String, Vec<u8>) {
        let (_key, csr) = crate::ca::test_support::agent_csr();
        let thumbprint = spki_thumbprint(&mesh.csr_spki(&csr));
        let ticket = mesh
            .signer
            .sign(&valid_claims(&mesh.colony_id, agent_id, &thumbprint));
        let psk = mesh.context.psk.get_active_psk().await.unwrap();
        (csr.clone(), enroll_body(&psk, &csr, &ticket, agent_id))
    }

    #[tokio::test]
    async fn happy_path_returns_three_pem_chain_and_registers() {
        let mesh = mesh_test_server().await;
        let (_csr, body) = valid_enrollment(&mesh, "agent-1").await;

        let response = mesh.server.post("/v1/enroll").bytes(body.into()).await;
        response.assert_status_ok();

        let enrolled = EnrollResponse::decode(response.as_bytes().as_ref()).unwrap();
        assert_eq!(enrolled.agent_id, "agent-1");
        let chain = enrolled.chain.unwrap();
        assert!(chain.leaf_pem.contains("BEGIN CERTIFICATE"));
        assert_eq!(chain.chain_pem.len(), 2);
        assert!(chain.expires_at > 0);

        // Registry row exists and the IP allocation is recorded.
        assert!(mesh.context.registry.get("agent-1").is_some());
        let allocation = mesh
            .context
            .db
            .ip_for_agent("agent-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(allocation.mesh_ipv4, "10.82.0.2");
    }

    #[tokio::test]
    async fn wrong_psk_is_unauthorized_with_psk_sub_kind() {
        let mesh = mesh_test_server().await;
        let (_key, csr) = crate::ca::test_support::agent_csr();
        let thumbprint = spki_thumbprint(&mesh.csr_spki(&csr));
        let ticket = mesh
            .signer
            .sign(&valid_claims(&mesh.colony_id, "agent-1", &thumbprint));

        let body = enroll_body(
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
            &csr,
            &ticket,
            "agent-1",
        );
        let response = mesh.server.post("/v1/enroll").bytes(body.into()).await;
        response.assert_status_unauthorized();
        assert!(response.text().contains("(psk)"));
        // No hint about prior validity.
        assert!(!response.text().contains("grace"));
    }

    #[tokio::test]
    async fn bad_ticket_and_bad_csr_carry_sub_kinds() {
        let mesh = mesh_test_server().await;
        let psk = mesh.context.psk.get_active_psk().await.unwrap();
        let (_key, csr) = crate::ca::test_support::agent_csr();

        // Ticket signed for another colony.
        let thumbprint = spki_thumbprint(&mesh.csr_spki(&csr));
        let foreign = mesh
            .signer
            .sign(&valid_claims("other-colony", "agent-1", &thumbprint));
        let response = mesh
            .server
            .post("/v1/enroll")
            .bytes(enroll_body(&psk, &csr, &foreign, "agent-1").into())
            .await;
        response.assert_status(axum::http::StatusCode::FORBIDDEN);
        assert!(response.text().contains("(ticket)"));

        // Valid ticket, mismatched CSR key.
        let ticket = mesh
            .signer
            .sign(&valid_claims(&mesh.colony_id, "agent-1", "00ff00ff"));
        let response = mesh
            .server
            .post("/v1/enroll")
            .bytes(enroll_body(&psk, &csr, &ticket, "agent-1").into())
            .await;
        response.assert_status(axum::http::StatusCode::FORBIDDEN);
        assert!(response.text().contains("(csr)"));
    }

    #[tokio::test]
    async fn missing_fields_are_malformed() {
        let mesh = mesh_test_server().await;
        let body = EnrollRequest::default().encode_to_vec();

        let response = mesh.server.post("/v1/enroll").bytes(body.into()).await;
        response.assert_status_bad_request();
        assert!(response.text().contains("(request)"));
    }

    #[tokio::test]
    async fn reenrollment_with_new_key_revokes_prior_serial() {
        let mesh = mesh_test_server().await;

        let (_csr1, body1) = valid_enrollment(&mesh, "agent-1").await;
        let first = mesh.server.post("/v1/enroll").bytes(body1.into()).await;
        first.assert_status_ok();
        let first_chain = EnrollResponse::decode(first.as_bytes().as_ref()).unwrap().chain.unwrap();

        let (_csr2, body2) = valid_enrollment(&mesh, "agent-1").await;
        let second = mesh.server.post("/v1/enroll").bytes(body2.into()).await;
        second.assert_status_ok();

        // Exactly one active certificate remains for the agent.
        let certificates = mesh
            .context
            .db
            .certificates_for_agent("agent-1")
            .await
            .unwrap();
        assert_eq!(certificates.len(), 2);
        let active: Vec<_> = certificates
            .iter()
            .filter(|c| c.status == crate::store::certificates::CertStatus::Active)
            .collect();
        assert_eq!(active.len(), 1);
        drop(first_chain);
    }

    #[tokio::test]
    async fn psk_survives_successful_enrollment() {
        let mesh = mesh_test_server().await;
        let (_csr, body) = valid_enrollment(&mesh, "agent-1").await;
        mesh.server
            .post("/v1/enroll")
            .bytes(body.into())
            .await
            .assert_status_ok();

        // Long-lived, not single-use: a second agent enrolls with the same
        // PSK.
        let (_csr2, body2) = valid_enrollment(&mesh, "agent-2").await;
        mesh.server
            .post("/v1/enroll")
            .bytes(body2.into())
            .await
            .assert_status_ok();
    }
}
