//! The running colony: context, listeners and pollers under one handle.

use crate::agent_client::AgentPull;
use crate::app_context::AppContext;
use crate::colony_dir::ColonyDir;
use crate::mesh_server::MeshServer;
use crate::pollers::{
    start_function_registry_poller, start_profile_poller, start_retention_sweeper,
    start_system_metrics_poller, start_telemetry_poller, PollerContext, PollerHandle,
};
use crate::public_server::PublicServer;
use crate::store::retention::policies_from_config;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// A started colony. Dropping it does not stop anything; call
/// [Colony::shutdown].
pub struct Colony {
    context: AppContext,
    mesh: MeshServer,
    public: Option<PublicServer>,
    pollers: Vec<PollerHandle>,
}

impl Colony {
    /// Build the context from a colony directory and bring everything up.
    pub async fn start<D: ColonyDir + 'static>(dir: D) -> Result<Self> {
        let context = AppContext::read_from(dir).await?;
        Self::start_with_context(context).await
    }

    /// Bring up listeners and pollers over an existing context.
    pub async fn start_with_context(context: AppContext) -> Result<Self> {
        let mesh = MeshServer::run(&context).await?;

        let public = if context.config.public_endpoint.enabled {
            Some(PublicServer::run(&context).await?)
        } else {
            None
        };

        // Pollers start sequentially; each owns its periodic task.
        let client: Arc<dyn AgentPull> = context.agent_client.clone();
        let poller_context = PollerContext {
            registry: context.registry.clone(),
            db: context.db.clone(),
            client,
        };
        let config = &context.config;

        let mut pollers = vec![
            start_telemetry_poller(
                poller_context.clone(),
                Duration::from_secs(config.beyla.poll_interval),
            ),
            start_system_metrics_poller(
                poller_context.clone(),
                Duration::from_secs(config.system_metrics.poll_interval),
            ),
            start_profile_poller(
                poller_context.clone(),
                Duration::from_secs(config.continuous_profiling.poll_interval),
            ),
        ];
        if !config.function_registry.disabled {
            pollers.push(start_function_registry_poller(
                poller_context,
                Duration::from_secs(config.function_registry.poll_interval),
            ));
        }
        pollers.push(start_retention_sweeper(
            context.db.clone(),
            policies_from_config(config),
        ));

        tracing::info!(
            colony_id = %context.config.id,
            pollers = pollers.len(),
            "colony up"
        );

        Ok(Self {
            context,
            mesh,
            public,
            pollers,
        })
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    /// Address of the mesh RPC listener.
    pub fn mesh_address(&self) -> SocketAddr {
        self.mesh.address()
    }

    /// Address of the public endpoint, when enabled.
    pub fn public_address(&self) -> Option<SocketAddr> {
        self.public.as_ref().map(|server| server.address())
    }

    /// Block until shutdown is requested (SIGINT).
    pub async fn run_until_done(self) -> Result<()> {
        tokio::signal::ctrl_c().await?;
        tracing::info!("shutdown requested");
        self.shutdown().await;
        Ok(())
    }

    /// Stop listeners, then pollers (each with its stop grace).
    pub async fn shutdown(self) {
        self.mesh.shutdown();
        if let Some(public) = &self.public {
            public.shutdown();
        }
        for poller in self.pollers {
            poller.stop().await;
        }
        tracing::info!("colony stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colony_dir::MockColonyDir;

    #[tokio::test]
    async fn colony_starts_and_stops_on_a_fresh_dir() {
        let mut dir = MockColonyDir::new("lifecycle-colony");
        // Bind ephemeral ports so tests never collide.
        dir.config_mut().services.connect_port = 0;

        let colony = Colony::start(dir).await.unwrap();
        assert_ne!(colony.mesh_address().port(), 0);
        assert!(colony.public_address().is_none());

        colony.shutdown().await;
    }

    #[tokio::test]
    async fn public_endpoint_comes_up_when_enabled() {
        let mut dir = MockColonyDir::new("public-colony");
        dir.config_mut().services.connect_port = 0;
        dir.config_mut().public_endpoint.enabled = true;
        dir.config_mut().public_endpoint.port = 0;

        let colony = Colony::start(dir).await.unwrap();
        assert!(colony.public_address().is_some());

        colony.shutdown().await;
    }
}
