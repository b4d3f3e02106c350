//! The colony's pull client.
//!
//! Pollers and service enrichment talk to agents over mTLS: the colony
//! presents a server-intermediate-issued certificate and trusts the colony
//! root, agents present their enrollment leaves. Responses are `wire::v1`
//! protobuf bodies.

use crate::ca::CertificateIssuer;
use crate::error::{Error, ErrorKind, Result};
use crate::registry::{AgentEntry, ServiceSource, ServiceSpec};
use crate::wire::v1::{
    FunctionRegistryPullResponse, ProfilePullResponse, ServiceListPullResponse,
    SystemMetricsPullResponse, TelemetryPullResponse,
};
use async_trait::async_trait;
use prost::Message;
use std::time::Duration;

/// Port agents serve their pull endpoints on.
pub const AGENT_PULL_PORT: u16 = 7141;

/// Per-request timeout; pollers keep their own per-agent budget on top.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Typed pull access to agents. The HTTP implementation lives in
/// [AgentClient]; pollers depend on the trait so ticks are testable.
#[async_trait]
pub trait AgentPull: Send + Sync + 'static {
    async fn pull_telemetry(&self, agent: &AgentEntry) -> Result<TelemetryPullResponse>;
    async fn pull_system_metrics(&self, agent: &AgentEntry) -> Result<SystemMetricsPullResponse>;
    async fn pull_profiles(&self, agent: &AgentEntry) -> Result<ProfilePullResponse>;
    async fn pull_functions(&self, agent: &AgentEntry) -> Result<FunctionRegistryPullResponse>;
}

/// HTTP/2 + protobuf pull client.
pub struct AgentClient {
    client: reqwest::Client,
}

impl AgentClient {
    /// Build a client trusting the colony root and presenting a colony
    /// client identity issued by the server intermediate.
    pub fn new(issuer: &CertificateIssuer, root_ca_pem: &str) -> anyhow::Result<Self> {
        let server = issuer.server_certificate(&[])?;

        let mut identity_pem = server.key_pem.clone();
        for pem in &server.chain_pems {
            identity_pem.push_str(pem);
        }

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .add_root_certificate(reqwest::Certificate::from_pem(root_ca_pem.as_bytes())?)
            .identity(reqwest::Identity::from_pem(identity_pem.as_bytes())?)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { client })
    }

    fn pull_url(&self, agent: &AgentEntry, path: &str) -> String {
        format!("https://{}:{AGENT_PULL_PORT}/v1/{path}", agent.mesh_ipv4)
    }

    async fn pull<T: Message + Default>(&self, agent: &AgentEntry, path: &str) -> Result<T> {
        let url = self.pull_url(agent, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::with_cause(ErrorKind::StorageUnavailable, format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::with_cause(
                ErrorKind::StorageUnavailable,
                format!("{url}: status {}", response.status()),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::with_cause(ErrorKind::StorageUnavailable, format!("{url}: {e}")))?;

        T::decode(bytes).map_err(|e| {
            Error::with_cause(ErrorKind::MalformedRequest, format!("{url}: decode: {e}"))
        })
    }
}

#[async_trait]
impl AgentPull for AgentClient {
    async fn pull_telemetry(&self, agent: &AgentEntry) -> Result<TelemetryPullResponse> {
        self.pull(agent, "telemetry").await
    }

    async fn pull_system_metrics(&self, agent: &AgentEntry) -> Result<SystemMetricsPullResponse> {
        self.pull(agent, "system-metrics").await
    }

    async fn pull_profiles(&self, agent: &AgentEntry) -> Result<ProfilePullResponse> {
        self.pull(agent, "profiles").await
    }

    async fn pull_functions(&self, agent: &AgentEntry) -> Result<FunctionRegistryPullResponse> {
        self.pull(agent, "functions").await
    }
}

#[async_trait]
impl ServiceSource for AgentClient {
    async fn fetch_services(&self, agent: &AgentEntry) -> Result<Vec<ServiceSpec>> {
        let response: ServiceListPullResponse = self.pull(agent, "services").await?;
        Ok(response
            .services
            .into_iter()
            .map(|record| ServiceSpec {
                id: record.id,
                name: record.name,
                app_id: record.app_id,
                version: record.version,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::test_support::test_ca;

    #[tokio::test]
    async fn client_builds_from_colony_identity() {
        let ca = test_ca("client-colony").await;
        let client = AgentClient::new(&ca.issuer, ca.identity.root_cert_pem());
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn pull_url_targets_the_mesh_address() {
        let ca = test_ca("client-colony").await;
        let client = AgentClient::new(&ca.issuer, ca.identity.root_cert_pem()).unwrap();

        let mut agent = AgentEntry {
            agent_id: "agent-1".to_string(),
            component_name: String::new(),
            mesh_ipv4: "10.82.0.9".to_string(),
            mesh_ipv6: String::new(),
            public_key: String::new(),
            last_seen: coral_common::timestamp::Timestamp::now(),
            services: Vec::new(),
            runtime_context: String::new(),
            labels: Default::default(),
        };
        assert_eq!(
            client.pull_url(&agent, "telemetry"),
            "https://10.82.0.9:7141/v1/telemetry"
        );

        agent.mesh_ipv4 = "10.82.0.10".to_string();
        assert_eq!(
            client.pull_url(&agent, "services"),
            "https://10.82.0.10:7141/v1/services"
        );
    }
}
