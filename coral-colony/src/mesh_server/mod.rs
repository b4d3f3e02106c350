//!
//! The mesh listener: mTLS-terminated RPC for agents on the overlay.
//!
//! Enrollment is PSK-gated and needs no client certificate; everything
//! else requires a leaf issued by the agent intermediate whose serial has
//! not been revoked.
//!

mod app;
mod app_state;
pub(crate) mod routes;
pub mod tls;

pub use app::create_app;
pub use app_state::MeshState;

use crate::app_context::AppContext;
use anyhow::Result;
use axum_server::Handle;
use futures_util::TryFutureExt;
use std::net::{SocketAddr, TcpListener};
use tls::{mesh_server_config, MeshAcceptor};

/// A running mesh listener.
#[derive(Debug)]
pub struct MeshServer {
    handle: Handle,
    address: SocketAddr,
}

impl MeshServer {
    /// Bind and serve the mesh RPC surface.
    pub async fn run(context: &AppContext) -> Result<Self> {
        let server_cert = context
            .issuer
            .server_certificate(&[context.config.wireguard.mesh_ipv4.clone()])?;
        let tls_config = mesh_server_config(
            &server_cert,
            context.identity.agent_intermediate_pem(),
            context.identity.root_cert_pem(),
        )?;

        let state = MeshState::new(context.clone());
        let router = create_app(state);

        let listener = TcpListener::bind(SocketAddr::from((
            [0, 0, 0, 0],
            context.config.services.connect_port,
        )))?;
        let address = listener.local_addr()?;

        let handle = Handle::new();
        tokio::spawn(
            axum_server::from_tcp(listener)
                .acceptor(MeshAcceptor::new(tls_config))
                .handle(handle.clone())
                .serve(router.into_make_service())
                .map_err(|error| tracing::error!(?error, "mesh server error")),
        );

        tracing::info!(%address, "mesh listener up");
        Ok(Self { handle, address })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Shutdown the listener.
    pub fn shutdown(&self) {
        self.handle.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::ca::ticket_test_support::TicketSigner;
    use crate::mesh_server::tls::PeerIdentity;
    use axum::Extension;
    use axum_test::TestServer;

    /// An in-process mesh app with a trusted ticket signer. Routes that
    /// need a client certificate get `identity` injected as if the
    /// acceptor had verified it.
    pub struct TestMesh {
        pub server: TestServer,
        pub context: AppContext,
        pub signer: TicketSigner,
        pub colony_id: String,
    }

    impl TestMesh {
        pub fn csr_spki(&self, csr_pem: &str) -> Vec<u8> {
            crate::ca::csr_spki_der(csr_pem).unwrap()
        }
    }

    /// Mesh app with no connection identity (enrollment-style client).
    pub async fn mesh_test_server() -> TestMesh {
        let signer = TicketSigner::generate();
        let context = AppContext::test_with_jwks(signer.provider()).await;
        let colony_id = context.config.id.clone();

        let router = create_app(MeshState::new(context.clone()));
        let server = TestServer::new(router).unwrap();

        TestMesh {
            server,
            context,
            signer,
            colony_id,
        }
    }

    /// Mesh app whose connection presents `identity`.
    pub async fn mesh_test_server_as(identity: PeerIdentity) -> TestMesh {
        let signer = TicketSigner::generate();
        let context = AppContext::test_with_jwks(signer.provider()).await;
        let colony_id = context.config.id.clone();

        let router = create_app(MeshState::new(context.clone())).layer(Extension(identity));
        let server = TestServer::new(router).unwrap();

        TestMesh {
            server,
            context,
            signer,
            colony_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::tls::PeerIdentity;
    use crate::ca::test_support::agent_csr;
    use crate::registry::test_agent;
    use crate::store::certificates::CertStatus;
    use crate::wire::v1::{
        Ack, AgentList, AgentListRequest, CertificateList, CertificateListRequest,
        HeartbeatRequest, RevokeRequest,
    };
    use prost::Message;

    fn agent_identity(agent_id: &str) -> PeerIdentity {
        PeerIdentity {
            agent_id: Some(agent_id.to_string()),
            serial: Some("ab12".to_string()),
            spiffe_id: None,
        }
    }

    #[tokio::test]
    async fn authenticated_routes_reject_anonymous_peers() {
        let mesh = mesh_test_server().await;

        let body = HeartbeatRequest {
            agent_id: "agent-1".to_string(),
        }
        .encode_to_vec();

        let response = mesh.server.post("/v1/heartbeat").bytes(body.into()).await;
        response.assert_status_unauthorized();
    }

    #[tokio::test]
    async fn heartbeat_with_identity_updates_registry() {
        let identity = PeerIdentity {
            agent_id: Some("agent-1".to_string()),
            serial: Some("ab12".to_string()),
            spiffe_id: Some("spiffe://test-colony-0000/agent/agent-1".to_string()),
        };
        let mesh = mesh_test_server_as(identity).await;
        mesh.context
            .registry
            .register(test_agent("agent-1"))
            .await
            .unwrap();

        let body = HeartbeatRequest {
            agent_id: "agent-1".to_string(),
        }
        .encode_to_vec();

        let response = mesh.server.post("/v1/heartbeat").bytes(body.into()).await;
        response.assert_status_ok();
        Ack::decode(response.as_bytes().as_ref()).unwrap();
    }

    #[tokio::test]
    async fn heartbeat_for_another_agent_is_rejected() {
        let identity = PeerIdentity {
            agent_id: Some("agent-1".to_string()),
            serial: Some("ab12".to_string()),
            spiffe_id: None,
        };
        let mesh = mesh_test_server_as(identity).await;
        mesh.context
            .registry
            .register(test_agent("agent-2"))
            .await
            .unwrap();

        let body = HeartbeatRequest {
            agent_id: "agent-2".to_string(),
        }
        .encode_to_vec();

        let response = mesh.server.post("/v1/heartbeat").bytes(body.into()).await;
        response.assert_status_unauthorized();
    }

    #[tokio::test]
    async fn revoked_peer_is_locked_out() {
        let mesh_identity = PeerIdentity {
            agent_id: Some("agent-1".to_string()),
            serial: None, // filled below
            spiffe_id: None,
        };

        // Issue a real certificate so the serial exists in the store.
        let signer = crate::ca::ticket_test_support::TicketSigner::generate();
        let context = crate::app_context::AppContext::test_with_jwks(signer.provider()).await;
        let (_key, csr) = agent_csr();
        let chain = context.issuer.sign_csr("agent-1", &csr).await.unwrap();
        context.issuer.revoke(&chain.serial, "compromised", "op").await.unwrap();

        let identity = PeerIdentity {
            serial: Some(chain.serial.clone()),
            ..mesh_identity
        };
        let router = super::create_app(super::MeshState::new(context.clone()))
            .layer(axum::Extension(identity));
        let server = axum_test::TestServer::new(router).unwrap();

        let body = HeartbeatRequest {
            agent_id: "agent-1".to_string(),
        }
        .encode_to_vec();
        let response = server.post("/v1/heartbeat").bytes(body.into()).await;
        response.assert_status_unauthorized();
    }

    #[tokio::test]
    async fn revoke_unknown_serial_is_404() {
        let identity = PeerIdentity {
            agent_id: Some("agent-1".to_string()),
            serial: Some("ab12".to_string()),
            spiffe_id: None,
        };
        let mesh = mesh_test_server_as(identity).await;

        let body = RevokeRequest {
            serial: "feedface".to_string(),
            reason: "compromised".to_string(),
        }
        .encode_to_vec();

        let response = mesh
            .server
            .post("/v1/certificates/revoke")
            .bytes(body.into())
            .await;
        response.assert_status_not_found();
    }

    #[tokio::test]
    async fn revoking_another_agents_certificate_is_rejected() {
        let mesh = mesh_test_server_as(agent_identity("agent-1")).await;

        let (_key, csr) = agent_csr();
        let foreign = mesh.context.issuer.sign_csr("agent-2", &csr).await.unwrap();

        let body = RevokeRequest {
            serial: foreign.serial.clone(),
            reason: "takeover".to_string(),
        }
        .encode_to_vec();
        let response = mesh
            .server
            .post("/v1/certificates/revoke")
            .bytes(body.into())
            .await;
        response.assert_status_unauthorized();

        // agent-2's certificate is untouched.
        let record = mesh
            .context
            .db
            .get_certificate(&foreign.serial)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, CertStatus::Active);
    }

    #[tokio::test]
    async fn agent_revokes_its_own_certificate() {
        let mesh = mesh_test_server_as(agent_identity("agent-1")).await;

        let (_key, csr) = agent_csr();
        let own = mesh.context.issuer.sign_csr("agent-1", &csr).await.unwrap();

        let body = RevokeRequest {
            serial: own.serial.clone(),
            reason: "key rolled".to_string(),
        }
        .encode_to_vec();
        let response = mesh
            .server
            .post("/v1/certificates/revoke")
            .bytes(body.into())
            .await;
        response.assert_status_ok();

        let record = mesh
            .context
            .db
            .get_certificate(&own.serial)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, CertStatus::Revoked);
    }

    #[tokio::test]
    async fn listing_another_agents_certificates_is_rejected() {
        let mesh = mesh_test_server_as(agent_identity("agent-1")).await;

        let (_key, csr) = agent_csr();
        mesh.context.issuer.sign_csr("agent-1", &csr).await.unwrap();

        let body = CertificateListRequest {
            agent_id: "agent-2".to_string(),
        }
        .encode_to_vec();
        let response = mesh
            .server
            .post("/v1/certificates/list")
            .bytes(body.into())
            .await;
        response.assert_status_unauthorized();

        // The agent's own history stays reachable.
        let body = CertificateListRequest {
            agent_id: "agent-1".to_string(),
        }
        .encode_to_vec();
        let response = mesh
            .server
            .post("/v1/certificates/list")
            .bytes(body.into())
            .await;
        response.assert_status_ok();

        let list = CertificateList::decode(response.as_bytes().as_ref()).unwrap();
        assert_eq!(list.certificates.len(), 1);
        assert_eq!(list.certificates[0].agent_id, "agent-1");
    }

    #[tokio::test]
    async fn agent_list_reports_derived_health() {
        let identity = PeerIdentity {
            agent_id: Some("agent-1".to_string()),
            serial: Some("ab12".to_string()),
            spiffe_id: None,
        };
        let mesh = mesh_test_server_as(identity).await;
        mesh.context
            .registry
            .register(test_agent("agent-1"))
            .await
            .unwrap();

        let body = AgentListRequest { enrich: false }.encode_to_vec();
        let response = mesh.server.post("/v1/agents").bytes(body.into()).await;
        response.assert_status_ok();

        let list = AgentList::decode(response.as_bytes().as_ref()).unwrap();
        assert_eq!(list.agents.len(), 1);
        assert_eq!(list.agents[0].health, "active");
        assert_eq!(list.agents[0].services.len(), 1);
    }
}
