//!
//! The optional public endpoint: TLS + bearer tokens for operators and AI
//! clients. Off by default; enabled through `public_endpoint` in
//! `config.yaml`.
//!

mod app;
mod app_state;
pub mod rate_limit;
mod routes;
pub mod tokens;

pub use app::create_app;
pub use app_state::{AuthenticatedToken, PublicState};

use crate::app_context::AppContext;
use crate::colony_dir::paths;
use crate::mesh_server::tls::install_crypto_provider;
use anyhow::Result;
use axum_server::{tls_rustls::RustlsConfig, Handle};
use futures_util::TryFutureExt;
use rate_limit::RateLimiterRegistry;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tokens::TokenStore;

/// A running public endpoint.
#[derive(Debug)]
pub struct PublicServer {
    handle: Handle,
    address: SocketAddr,
}

impl PublicServer {
    /// Bind and serve, using configured TLS material or a certificate
    /// issued by the colony's own CA.
    pub async fn run(context: &AppContext) -> Result<Self> {
        install_crypto_provider();
        let config = &context.config.public_endpoint;

        let tokens_path = match &config.auth.tokens_file {
            Some(path) => path.clone(),
            None => context.colony_dir.path().join(paths::TOKENS_FILE),
        };
        let state = PublicState {
            context: context.clone(),
            tokens: Arc::new(TokenStore::load_or_create(tokens_path)?),
            rate: Arc::new(RateLimiterRegistry::new()),
        };

        let tls_config = match (&config.tls.cert_file, &config.tls.key_file) {
            (Some(cert_file), Some(key_file)) => {
                RustlsConfig::from_pem_file(cert_file, key_file).await?
            }
            _ => {
                let server = context
                    .issuer
                    .server_certificate(&[config.host.clone()])?;
                RustlsConfig::from_pem(
                    server.chain_pems.join("").into_bytes(),
                    server.key_pem.into_bytes(),
                )
                .await?
            }
        };

        let router = create_app(state);
        let listener = TcpListener::bind((config.host.as_str(), config.port))?;
        let address = listener.local_addr()?;

        let handle = Handle::new();
        tokio::spawn(
            axum_server::from_tcp_rustls(listener, tls_config)
                .handle(handle.clone())
                .serve(router.into_make_service())
                .map_err(|error| tracing::error!(?error, "public endpoint error")),
        );

        tracing::info!(%address, "public endpoint up");
        Ok(Self { handle, address })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn shutdown(&self) {
        self.handle.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::tokens::RateLimit;
    use super::*;
    use axum_test::TestServer;
    use coral_common::permissions::PermissionSet;
    use serde_json::{json, Value};

    struct TestPublic {
        server: TestServer,
        state: PublicState,
        admin_token: String,
    }

    async fn public_test_server() -> TestPublic {
        let context = AppContext::test().await;
        let tokens_path = context.colony_dir.path().join("tokens.yaml");
        let state = PublicState {
            context,
            tokens: Arc::new(TokenStore::load_or_create(tokens_path).unwrap()),
            rate: Arc::new(RateLimiterRegistry::new()),
        };
        let (_record, admin_token) = state
            .tokens
            .create(PermissionSet::admin(), None)
            .unwrap();

        let server = TestServer::new(create_app(state.clone())).unwrap();
        TestPublic {
            server,
            state,
            admin_token,
        }
    }

    #[tokio::test]
    async fn missing_or_bad_token_is_unauthorized() {
        let public = public_test_server().await;

        public
            .server
            .get("/status")
            .await
            .assert_status_unauthorized();

        public
            .server
            .get("/status")
            .authorization_bearer("coral_NOTATOKEN")
            .await
            .assert_status_unauthorized();
    }

    #[tokio::test]
    async fn status_reports_running_regardless_of_agents() {
        let public = public_test_server().await;

        let response = public
            .server
            .get("/status")
            .authorization_bearer(&public.admin_token)
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["status"], "running");
        assert_eq!(body["agents"]["active"], 0);
    }

    #[tokio::test]
    async fn permissions_gate_routes() {
        let public = public_test_server().await;
        let (_record, status_only) = public
            .state
            .tokens
            .create("status".parse().unwrap(), None)
            .unwrap();

        public
            .server
            .get("/status")
            .authorization_bearer(&status_only)
            .await
            .assert_status_ok();

        // Query routes are out of reach for a status-only token.
        public
            .server
            .get("/services")
            .authorization_bearer(&status_only)
            .await
            .assert_status_unauthorized();

        // Raw SQL needs debug even via the tool surface.
        public
            .server
            .post("/tools/execute_query")
            .authorization_bearer(&status_only)
            .json(&json!({"sql": "SELECT 1"}))
            .await
            .assert_status_unauthorized();
    }

    #[tokio::test]
    async fn rate_limited_token_gets_retry_after() {
        let public = public_test_server().await;
        let (_record, limited) = public
            .state
            .tokens
            .create(
                "status".parse().unwrap(),
                Some(RateLimit::PerHour(1)),
            )
            .unwrap();

        public
            .server
            .get("/status")
            .authorization_bearer(&limited)
            .await
            .assert_status_ok();

        let response = public
            .server
            .get("/status")
            .authorization_bearer(&limited)
            .await;
        response.assert_status_unauthorized();
        assert!(response.headers().get("retry-after").is_some());
    }

    #[tokio::test]
    async fn token_admin_lifecycle() {
        let public = public_test_server().await;

        // Create a scoped token.
        let created = public
            .server
            .post("/admin/tokens")
            .authorization_bearer(&public.admin_token)
            .json(&json!({"permissions": ["query"], "rate_limit": "100/hour"}))
            .await;
        created.assert_status_ok();
        let created: Value = created.json();
        let value = created["token"].as_str().unwrap().to_string();
        let token_id = created["token_id"].as_str().unwrap().to_string();

        // Listing shows metadata, never the value.
        let listed = public
            .server
            .get("/admin/tokens")
            .authorization_bearer(&public.admin_token)
            .await;
        let listed_body = listed.text();
        assert!(listed_body.contains(&token_id));
        assert!(!listed_body.contains(&value));

        // Revoke, then the value stops working.
        public
            .server
            .post(&format!("/admin/tokens/{token_id}/revoke"))
            .authorization_bearer(&public.admin_token)
            .await
            .assert_status_ok();
        public
            .server
            .get("/services")
            .authorization_bearer(&value)
            .await
            .assert_status_unauthorized();
    }

    #[tokio::test]
    async fn psk_admin_requires_admin_and_rotates() {
        let public = public_test_server().await;
        let (_record, status_only) = public
            .state
            .tokens
            .create("status".parse().unwrap(), None)
            .unwrap();

        public
            .server
            .get("/admin/psk")
            .authorization_bearer(&status_only)
            .await
            .assert_status_unauthorized();

        let shown = public
            .server
            .get("/admin/psk")
            .authorization_bearer(&public.admin_token)
            .await;
        shown.assert_status_ok();
        let first: Value = shown.json();
        assert_eq!(first["psk"].as_str().unwrap().len(), 52);

        let rotated = public
            .server
            .post("/admin/psk/rotate")
            .authorization_bearer(&public.admin_token)
            .json(&json!({"grace_secs": 3600}))
            .await;
        rotated.assert_status_ok();
        let rotated: Value = rotated.json();
        assert_ne!(rotated["psk"], first["psk"]);
        assert_eq!(rotated["psk"].as_str().unwrap().len(), 52);
    }

    #[tokio::test]
    async fn sql_route_is_read_only() {
        let public = public_test_server().await;

        let ok = public
            .server
            .post("/sql")
            .authorization_bearer(&public.admin_token)
            .json(&json!({"sql": "SELECT COUNT(*) AS n FROM agents"}))
            .await;
        ok.assert_status_ok();

        let rejected = public
            .server
            .post("/sql")
            .authorization_bearer(&public.admin_token)
            .json(&json!({"sql": "DROP TABLE agents"}))
            .await;
        rejected.assert_status_bad_request();
    }
}
