//!
//! Periodic pull pollers.
//!
//! Every poller follows the same contract: on a fixed interval, snapshot
//! the registry, query each active or degraded agent in parallel under a
//! per-agent timeout, convert and batch-upsert into the store, and emit
//! structured counters. A failing or slow agent never blocks the tick for
//! the others, and a failed store write drops the batch instead of queueing.
//!
//! `stop()` waits for the in-flight tick up to a grace period, then
//! abandons it.
//!

mod function_registry;
mod profiles;
mod retention;
mod system_metrics;
mod telemetry;

pub use function_registry::start_function_registry_poller;
pub use profiles::start_profile_poller;
pub use retention::start_retention_sweeper;
pub use system_metrics::start_system_metrics_poller;
pub use telemetry::start_telemetry_poller;

use crate::agent_client::AgentPull;
use crate::registry::{AgentEntry, AgentHealth, AgentRegistry};
use crate::store::ColonyDb;
use coral_common::timestamp::Timestamp;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Per-agent budget inside one tick.
pub(crate) const PER_AGENT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `stop()` waits for an in-flight tick.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Shared dependencies of the pull pollers.
#[derive(Clone)]
pub struct PollerContext {
    pub registry: AgentRegistry,
    pub db: ColonyDb,
    pub client: Arc<dyn AgentPull>,
}

/// Handle to one running poller.
pub struct PollerHandle {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the poller: no new ticks start; the in-flight tick gets
    /// [STOP_GRACE] to finish, then is abandoned.
    pub async fn stop(self) {
        self.cancel.cancel();
        match tokio::time::timeout(STOP_GRACE, self.handle).await {
            Ok(_) => tracing::debug!(poller = self.name, "poller stopped"),
            Err(_) => {
                tracing::warn!(poller = self.name, "poller abandoned after stop grace");
            }
        }
    }
}

/// Run `tick` every `period`. The first tick fires after one period.
pub(crate) fn start_poller<F, Fut>(
    name: &'static str,
    period: Duration,
    mut tick: F,
) -> PollerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let cancel = CancellationToken::new();
    let child = cancel.clone();

    tracing::info!(poller = name, period_secs = period.as_secs(), "starting poller");

    let handle = tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.tick().await; // the first tick completes immediately

        loop {
            tokio::select! {
                _ = child.cancelled() => break,
                _ = timer.tick() => {}
            }
            tick().await;
        }
    });

    PollerHandle {
        name,
        cancel,
        handle,
    }
}

/// Agents worth pulling from this tick: active or degraded.
pub(crate) fn eligible_agents(registry: &AgentRegistry) -> Vec<AgentEntry> {
    let now = Timestamp::now();
    registry
        .list_all()
        .into_iter()
        .filter(|agent| {
            matches!(
                agent.health(now),
                AgentHealth::Active | AgentHealth::Degraded
            )
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::error::{Error, Result};
    use crate::wire::v1::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// An in-memory agent returning canned pull responses.
    #[derive(Default)]
    pub struct FakeAgentPull {
        pub telemetry: std::sync::Mutex<TelemetryPullResponse>,
        pub system_metrics: std::sync::Mutex<SystemMetricsPullResponse>,
        pub profiles: std::sync::Mutex<ProfilePullResponse>,
        pub functions: std::sync::Mutex<FunctionRegistryPullResponse>,
        pub fail_agents: std::sync::Mutex<Vec<String>>,
        pub pulls: AtomicUsize,
    }

    impl FakeAgentPull {
        pub fn pull_count(&self) -> usize {
            self.pulls.load(Ordering::SeqCst)
        }

        fn check(&self, agent: &AgentEntry) -> Result<()> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            let failing = self.fail_agents.lock().unwrap();
            if failing.contains(&agent.agent_id) {
                return Err(Error::internal("agent unreachable"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AgentPull for FakeAgentPull {
        async fn pull_telemetry(&self, agent: &AgentEntry) -> Result<TelemetryPullResponse> {
            self.check(agent)?;
            Ok(self.telemetry.lock().unwrap().clone())
        }

        async fn pull_system_metrics(
            &self,
            agent: &AgentEntry,
        ) -> Result<SystemMetricsPullResponse> {
            self.check(agent)?;
            Ok(self.system_metrics.lock().unwrap().clone())
        }

        async fn pull_profiles(&self, agent: &AgentEntry) -> Result<ProfilePullResponse> {
            self.check(agent)?;
            Ok(self.profiles.lock().unwrap().clone())
        }

        async fn pull_functions(
            &self,
            agent: &AgentEntry,
        ) -> Result<FunctionRegistryPullResponse> {
            self.check(agent)?;
            Ok(self.functions.lock().unwrap().clone())
        }
    }

    pub async fn test_context() -> (PollerContext, Arc<FakeAgentPull>) {
        let db = ColonyDb::test().await;
        let registry = AgentRegistry::load(db.clone()).await.unwrap();
        let client = Arc::new(FakeAgentPull::default());
        (
            PollerContext {
                registry,
                db,
                client: client.clone(),
            },
            client,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn poller_ticks_on_interval_and_stops() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        let poller = start_poller("test", Duration::from_secs(60), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert!(ticks.load(Ordering::SeqCst) >= 1);

        poller.stop().await;
        let after_stop = ticks.load(Ordering::SeqCst);

        tokio::time::advance(Duration::from_secs(300)).await;
        tokio::task::yield_now().await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn eligible_agents_excludes_unhealthy() {
        let (context, _client) = test_support::test_context().await;
        context
            .registry
            .register(crate::registry::test_agent("agent-1"))
            .await
            .unwrap();

        assert_eq!(eligible_agents(&context.registry).len(), 1);
    }
}
