//! Real-time service enrichment.
//!
//! Listing agents can ask each live agent for its current service set
//! instead of trusting the last upload. The fan-out is bounded: one task
//! per agent, a 500 ms per-agent budget, and cancellation of the outer
//! request cancels every pending task. An agent that misses its budget
//! keeps its last persisted service set.

use super::{AgentEntry, AgentRegistry, ServiceSpec};
use crate::error::Result;
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Per-agent budget for a live service query.
pub const ENRICHMENT_BUDGET: Duration = Duration::from_millis(500);

/// Live source of an agent's service list, implemented by the agent client.
#[async_trait]
pub trait ServiceSource: Send + Sync + 'static {
    async fn fetch_services(&self, agent: &AgentEntry) -> Result<Vec<ServiceSpec>>;
}

/// Refresh the service catalogs of `agents` concurrently.
///
/// Returns the number of agents that answered within budget. Failures and
/// timeouts are recorded and swallowed; the registry keeps the persisted
/// catalog for those agents.
pub async fn enrich_services(
    registry: &AgentRegistry,
    source: Arc<dyn ServiceSource>,
    agents: Vec<AgentEntry>,
    cancel: &CancellationToken,
) -> usize {
    let mut tasks = JoinSet::new();
    for agent in agents {
        let source = source.clone();
        tasks.spawn(async move {
            let services =
                tokio::time::timeout(ENRICHMENT_BUDGET, source.fetch_services(&agent)).await;
            (agent.agent_id, services)
        });
    }

    let mut refreshed = 0;
    loop {
        let joined = tokio::select! {
            joined = tasks.join_next() => joined,
            _ = cancel.cancelled() => {
                tasks.abort_all();
                tracing::debug!("service enrichment cancelled with outer request");
                return refreshed;
            }
        };

        let Some(joined) = joined else { break };
        let Ok((agent_id, outcome)) = joined else { continue };

        match outcome {
            Ok(Ok(services)) => {
                if registry.upload_services(&agent_id, services).await.is_ok() {
                    refreshed += 1;
                }
            }
            Ok(Err(error)) => {
                tracing::debug!(agent_id, %error, "service enrichment failed, keeping persisted set");
            }
            Err(_) => {
                tracing::debug!(agent_id, "service enrichment timed out, keeping persisted set");
            }
        }
    }

    refreshed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::registry::test_agent;
    use crate::store::ColonyDb;

    struct FixedSource {
        services: Vec<ServiceSpec>,
        delay: Duration,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl ServiceSource for FixedSource {
        async fn fetch_services(&self, agent: &AgentEntry) -> Result<Vec<ServiceSpec>> {
            tokio::time::sleep(self.delay).await;
            if self.fail_for.as_deref() == Some(agent.agent_id.as_str()) {
                return Err(Error::internal("agent unreachable"));
            }
            Ok(self.services.clone())
        }
    }

    fn live_service(name: &str) -> ServiceSpec {
        ServiceSpec {
            id: format!("live-{name}"),
            name: name.to_string(),
            app_id: "shop".to_string(),
            version: "2.0.0".to_string(),
        }
    }

    #[tokio::test]
    async fn fast_agents_get_refreshed() {
        let registry = AgentRegistry::load(ColonyDb::test().await).await.unwrap();
        registry.register(test_agent("agent-1")).await.unwrap();

        let source = Arc::new(FixedSource {
            services: vec![live_service("cart"), live_service("checkout")],
            delay: Duration::ZERO,
            fail_for: None,
        });

        let refreshed = enrich_services(
            &registry,
            source,
            registry.list_all(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(refreshed, 1);
        assert_eq!(registry.get("agent-1").unwrap().services.len(), 2);
    }

    #[tokio::test]
    async fn failing_agent_keeps_persisted_set() {
        let registry = AgentRegistry::load(ColonyDb::test().await).await.unwrap();
        registry.register(test_agent("agent-1")).await.unwrap();

        let source = Arc::new(FixedSource {
            services: vec![live_service("cart")],
            delay: Duration::ZERO,
            fail_for: Some("agent-1".to_string()),
        });

        let refreshed = enrich_services(
            &registry,
            source,
            registry.list_all(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(refreshed, 0);
        // The registered catalog survives.
        let services = registry.get("agent-1").unwrap().services;
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "checkout");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_agent_misses_the_budget() {
        let registry = AgentRegistry::load(ColonyDb::test().await).await.unwrap();
        registry.register(test_agent("agent-1")).await.unwrap();

        let source = Arc::new(FixedSource {
            services: vec![live_service("cart")],
            delay: ENRICHMENT_BUDGET * 4,
            fail_for: None,
        });

        let refreshed = enrich_services(
            &registry,
            source,
            registry.list_all(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(refreshed, 0);
    }

    #[tokio::test]
    async fn cancellation_aborts_pending_tasks() {
        let registry = AgentRegistry::load(ColonyDb::test().await).await.unwrap();
        registry.register(test_agent("agent-1")).await.unwrap();

        let source = Arc::new(FixedSource {
            services: vec![live_service("cart")],
            delay: Duration::from_millis(200),
            fail_for: None,
        });

        let cancel = CancellationToken::new();
        cancel.cancel();

        let refreshed =
            enrich_services(&registry, source, registry.list_all(), &cancel).await;
        assert_eq!(refreshed, 0);
    }
}
