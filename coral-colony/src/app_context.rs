//!
//! The application context shared between all components.
//! Think of it as a simple Dependency Injection container.
//!
//! Create with a `ColonyDir` instance: `AppContext::read_from(dir)`.
//!

use crate::agent_client::AgentClient;
use crate::ca::{
    CertificateIssuer, ColonyIdentity, DisabledJwksProvider, HttpJwksProvider, JwksProvider,
    PskManager, TicketVerifier,
};
use crate::colony_dir::{paths, ColonyConfig, ColonyDir};
#[cfg(test)]
use crate::colony_dir::MockColonyDir;
use crate::discovery::DiscoveryEngine;
use crate::query::{QuerySurface, ToolRegistry};
use crate::registry::AgentRegistry;
use crate::store::ColonyDb;
use std::sync::Arc;

/// Hard cap for guarded raw-SQL results.
const MAX_RAW_ROWS: u32 = 10_000;

/// Errors that can occur when building an `AppContext` from a colony dir.
#[derive(Debug, thiserror::Error)]
pub enum AppContextError {
    /// Failed to ensure the colony directory exists and is writable.
    #[error("Failed to ensure colony directory exists and is writable: {0}")]
    ColonyDir(anyhow::Error),
    /// Failed to read or create the config file.
    #[error("Failed to read or create config file: {0}")]
    Config(anyhow::Error),
    /// Failed to initialize or load the CA hierarchy.
    #[error("Failed to initialize colony identity: {0}")]
    Identity(anyhow::Error),
    /// Failed to open the analytical store.
    #[error("Failed to open analytical store: {0}")]
    Store(crate::error::Error),
    /// Discovery is enabled but its JWKS endpoint is not configured.
    #[error("discovery.jwks_url is required when discovery is enabled")]
    MissingJwksUrl,
    /// Failed to build the pull client.
    #[error("Failed to build agent pull client: {0}")]
    AgentClient(anyhow::Error),
    /// Failed to reconcile PSK state or reload the registry.
    #[error("Failed to restore colony state: {0}")]
    State(crate::error::Error),
}

/// The application context shared between all components.
#[derive(Clone)]
pub struct AppContext {
    pub config: ColonyConfig,
    /// Keep the directory alive; the mock variant cleans up on drop.
    pub colony_dir: Arc<dyn ColonyDir>,
    pub db: ColonyDb,
    pub identity: Arc<ColonyIdentity>,
    pub psk: PskManager,
    pub issuer: Arc<CertificateIssuer>,
    pub registry: AgentRegistry,
    pub query: QuerySurface,
    pub tools: ToolRegistry,
    pub agent_client: Arc<AgentClient>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Build the full context from a colony directory.
    pub async fn read_from<D: ColonyDir + 'static>(dir: D) -> Result<Self, AppContextError> {
        dir.ensure_dir_exists_and_is_writable()
            .map_err(AppContextError::ColonyDir)?;
        let config = dir
            .read_or_create_config()
            .map_err(AppContextError::Config)?;

        let identity = Arc::new(
            ColonyIdentity::init_or_load(&dir.path().join(paths::CA_DIR), &config.id)
                .map_err(AppContextError::Identity)?,
        );

        let db = ColonyDb::open(&dir.path().join(paths::DB_FILE))
            .await
            .map_err(AppContextError::Store)?;

        let jwks: Arc<dyn JwksProvider> = if config.discovery.enabled {
            let url = config
                .discovery
                .jwks_url
                .clone()
                .ok_or(AppContextError::MissingJwksUrl)?;
            Arc::new(HttpJwksProvider::new(url))
        } else {
            Arc::new(DisabledJwksProvider)
        };

        Self::assemble(config, Arc::new(dir), db, identity, jwks).await
    }

    async fn assemble(
        config: ColonyConfig,
        colony_dir: Arc<dyn ColonyDir>,
        db: ColonyDb,
        identity: Arc<ColonyIdentity>,
        jwks: Arc<dyn JwksProvider>,
    ) -> Result<Self, AppContextError> {
        let verifier = TicketVerifier::new(jwks, &config.id);
        let issuer = Arc::new(CertificateIssuer::new(
            identity.clone(),
            db.clone(),
            verifier,
        ));

        let psk = PskManager::new(db.clone(), identity.psk_wrapping_key());
        psk.ensure_psk().await.map_err(AppContextError::State)?;

        let registry = AgentRegistry::load(db.clone())
            .await
            .map_err(AppContextError::State)?;

        let discovery = DiscoveryEngine::new(db.clone(), registry.clone());
        let query = QuerySurface::new(
            Arc::new(db.clone()),
            discovery,
            registry.clone(),
            MAX_RAW_ROWS,
        );
        let tools = ToolRegistry::new(query.clone(), &config.mcp.enabled_tools);

        let agent_client = Arc::new(
            AgentClient::new(&issuer, identity.root_cert_pem())
                .map_err(AppContextError::AgentClient)?,
        );

        Ok(Self {
            config,
            colony_dir,
            db,
            identity,
            psk,
            issuer,
            registry,
            query,
            tools,
            agent_client,
        })
    }
}

#[cfg(test)]
impl AppContext {
    /// A context on a temp directory with discovery disabled.
    pub async fn test() -> Self {
        Self::read_from(MockColonyDir::test())
            .await
            .expect("failed to build AppContext from MockColonyDir")
    }

    /// A context whose ticket verifier trusts the given JWKS provider.
    pub(crate) async fn test_with_jwks(jwks: Arc<dyn JwksProvider>) -> Self {
        let dir = MockColonyDir::test();
        dir.ensure_dir_exists_and_is_writable().unwrap();
        let config = dir.read_or_create_config().unwrap();
        let identity = Arc::new(
            ColonyIdentity::init_or_load(
                &dir.path().join(paths::CA_DIR),
                &config.id,
            )
            .unwrap(),
        );
        let db = ColonyDb::test().await;

        Self::assemble(config, Arc::new(dir), db, identity, jwks)
            .await
            .expect("failed to assemble test AppContext")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_builds_on_fresh_directory() {
        let context = AppContext::test().await;
        assert_eq!(context.config.id, "test-colony-0000");

        // PSK is reconciled at startup.
        let psk_value = context.psk.get_active_psk().await.unwrap();
        assert_eq!(psk_value.len(), 52);
    }

    #[tokio::test]
    async fn enabled_discovery_without_jwks_fails_startup() {
        let mut dir = MockColonyDir::test();
        dir.config_mut().discovery.enabled = true;

        let err = AppContext::read_from(dir).await.unwrap_err();
        assert!(matches!(err, AppContextError::MissingJwksUrl));
    }
}
