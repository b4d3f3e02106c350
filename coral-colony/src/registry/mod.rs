//!
//! The agent registry: every admitted agent, its health derived from
//! heartbeats, and its registered service catalog.
//!
//! The in-memory map is the runtime source of truth; rows are mirrored to
//! the store so a restart reloads known agents. All `last_seen` mutation
//! goes through the registry API; snapshots handed to callers are owned
//! copies.
//!

mod enrichment;

pub use enrichment::{enrich_services, ServiceSource};

use crate::error::{Error, Result};
use crate::store::{
    agents::AgentRow,
    services::{ServiceRow, ServiceStatus},
    ColonyDb,
};
use coral_common::timestamp::Timestamp;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

/// Derived agent health. Single source of truth for the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentHealth {
    /// Heard from within 30 seconds.
    Active,
    /// Heard from within 2 minutes.
    Degraded,
    /// Silent for longer.
    Unhealthy,
}

const ACTIVE_WINDOW: Duration = Duration::from_secs(30);
const DEGRADED_WINDOW: Duration = Duration::from_secs(120);

impl AgentHealth {
    /// Derive health from `last_seen` at read time.
    pub fn derive(last_seen: Timestamp, now: Timestamp) -> AgentHealth {
        let silence = now.duration_since(last_seen);
        if silence < ACTIVE_WINDOW {
            AgentHealth::Active
        } else if silence < DEGRADED_WINDOW {
            AgentHealth::Degraded
        } else {
            AgentHealth::Unhealthy
        }
    }
}

/// One registered agent, as snapshotted out of the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentEntry {
    pub agent_id: String,
    pub component_name: String,
    pub mesh_ipv4: String,
    pub mesh_ipv6: String,
    pub public_key: String,
    pub last_seen: Timestamp,
    pub services: Vec<ServiceRow>,
    pub runtime_context: String,
    pub labels: HashMap<String, String>,
}

impl AgentEntry {
    /// Health at `now`.
    pub fn health(&self, now: Timestamp) -> AgentHealth {
        AgentHealth::derive(self.last_seen, now)
    }
}

/// Registration input for [AgentRegistry::register].
#[derive(Debug, Clone, Default)]
pub struct NewAgent {
    pub agent_id: String,
    pub component_name: String,
    pub mesh_ipv4: String,
    pub mesh_ipv6: String,
    pub public_key: String,
    pub services: Vec<ServiceSpec>,
    pub runtime_context: String,
    pub labels: HashMap<String, String>,
}

/// A service as uploaded by an agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceSpec {
    pub id: String,
    pub name: String,
    pub app_id: String,
    pub version: String,
}

/// The colony's agent registry.
#[derive(Clone)]
pub struct AgentRegistry {
    inner: Arc<RwLock<HashMap<String, AgentEntry>>>,
    db: ColonyDb,
}

impl AgentRegistry {
    /// Reload known agents and their service catalogs from the store.
    pub async fn load(db: ColonyDb) -> Result<Self> {
        let mut map = HashMap::new();
        for row in db.load_agents().await? {
            let services = db.services_for_agent(&row.agent_id).await?;
            map.insert(row.agent_id.clone(), entry_from_row(row, services));
        }

        tracing::info!(agents = map.len(), "loaded agent registry");
        Ok(Self {
            inner: Arc::new(RwLock::new(map)),
            db,
        })
    }

    /// Upsert an agent. Sets `last_seen := now` and replaces the service
    /// catalog. Re-registration with a new public key replaces the row
    /// atomically; certificate consequences are the CA's business and
    /// happen before this call.
    pub async fn register(&self, new_agent: NewAgent) -> Result<AgentEntry> {
        let now = Timestamp::now();
        let services: Vec<ServiceRow> = new_agent
            .services
            .iter()
            .map(|spec| service_row(spec, &new_agent.agent_id, now))
            .collect();

        let entry = AgentEntry {
            agent_id: new_agent.agent_id.clone(),
            component_name: new_agent.component_name,
            mesh_ipv4: new_agent.mesh_ipv4,
            mesh_ipv6: new_agent.mesh_ipv6,
            public_key: new_agent.public_key,
            last_seen: now,
            services: services.clone(),
            runtime_context: new_agent.runtime_context,
            labels: new_agent.labels,
        };

        {
            let mut inner = self.inner.write().expect("registry lock poisoned");
            inner.insert(entry.agent_id.clone(), entry.clone());
        }

        self.db.upsert_agent(&row_from_entry(&entry)).await?;
        self.db
            .replace_agent_services(&entry.agent_id, &services)
            .await?;

        tracing::info!(agent_id = %entry.agent_id, services = services.len(), "registered agent");
        Ok(entry)
    }

    /// Record a heartbeat. Unknown agents are `NotFound`.
    pub async fn heartbeat(&self, agent_id: &str) -> Result<Timestamp> {
        let now = Timestamp::now();
        {
            let mut inner = self.inner.write().expect("registry lock poisoned");
            let entry = inner
                .get_mut(agent_id)
                .ok_or_else(|| Error::not_found(format!("unknown agent: {agent_id}")))?;
            entry.last_seen = now;
            for service in &mut entry.services {
                service.last_seen_heartbeat = Some(now);
                service.status = ServiceStatus::Active;
            }
        }

        self.db.persist_agent_last_seen(agent_id, now).await?;
        self.db.touch_service_heartbeats(agent_id, now).await?;
        Ok(now)
    }

    /// Replace one agent's service catalog.
    pub async fn upload_services(
        &self,
        agent_id: &str,
        services: Vec<ServiceSpec>,
    ) -> Result<()> {
        let now = Timestamp::now();
        let rows: Vec<ServiceRow> = services
            .iter()
            .map(|spec| service_row(spec, agent_id, now))
            .collect();

        {
            let mut inner = self.inner.write().expect("registry lock poisoned");
            let entry = inner
                .get_mut(agent_id)
                .ok_or_else(|| Error::not_found(format!("unknown agent: {agent_id}")))?;
            entry.services = rows.clone();
        }

        self.db.replace_agent_services(agent_id, &rows).await?;
        Ok(())
    }

    /// Owned snapshot of every agent. Order is not meaningful.
    pub fn list_all(&self) -> Vec<AgentEntry> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.values().cloned().collect()
    }

    /// One agent by id.
    pub fn get(&self, agent_id: &str) -> Option<AgentEntry> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.get(agent_id).cloned()
    }

    /// (active, degraded) counts derived at read time.
    pub fn count_by_status(&self) -> (usize, usize) {
        let now = Timestamp::now();
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut active = 0;
        let mut degraded = 0;
        for entry in inner.values() {
            match entry.health(now) {
                AgentHealth::Active => active += 1,
                AgentHealth::Degraded => degraded += 1,
                AgentHealth::Unhealthy => {}
            }
        }
        (active, degraded)
    }

    /// Explicitly remove an agent and its services.
    pub async fn remove(&self, agent_id: &str) -> Result<()> {
        {
            let mut inner = self.inner.write().expect("registry lock poisoned");
            if inner.remove(agent_id).is_none() {
                return Err(Error::not_found(format!("unknown agent: {agent_id}")));
            }
        }
        self.db.delete_agent(agent_id).await?;
        tracing::info!(agent_id, "removed agent");
        Ok(())
    }
}

fn service_row(spec: &ServiceSpec, agent_id: &str, now: Timestamp) -> ServiceRow {
    ServiceRow {
        id: spec.id.clone(),
        name: spec.name.clone(),
        app_id: spec.app_id.clone(),
        version: spec.version.clone(),
        agent_id: agent_id.to_string(),
        registered_at: now,
        status: ServiceStatus::Active,
        last_seen_heartbeat: None,
    }
}

fn entry_from_row(row: AgentRow, services: Vec<ServiceRow>) -> AgentEntry {
    AgentEntry {
        agent_id: row.agent_id,
        component_name: row.component_name,
        mesh_ipv4: row.mesh_ipv4,
        mesh_ipv6: row.mesh_ipv6,
        public_key: row.public_key,
        last_seen: row.last_seen,
        services,
        runtime_context: row.runtime_context,
        labels: row.labels,
    }
}

fn row_from_entry(entry: &AgentEntry) -> AgentRow {
    AgentRow {
        agent_id: entry.agent_id.clone(),
        component_name: entry.component_name.clone(),
        mesh_ipv4: entry.mesh_ipv4.clone(),
        mesh_ipv6: entry.mesh_ipv6.clone(),
        public_key: entry.public_key.clone(),
        last_seen: entry.last_seen,
        runtime_context: entry.runtime_context.clone(),
        labels: entry.labels.clone(),
    }
}

#[cfg(test)]
pub(crate) fn test_agent(agent_id: &str) -> NewAgent {
    NewAgent {
        agent_id: agent_id.to_string(),
        component_name: "checkout".to_string(),
        mesh_ipv4: "10.82.0.2".to_string(),
        public_key: format!("pk-{agent_id}"),
        services: vec![ServiceSpec {
            id: "svc-1".to_string(),
            name: "checkout".to_string(),
            app_id: "shop".to_string(),
            version: "1.0.0".to_string(),
        }],
        runtime_context: "docker".to_string(),
        ..Default::default()
    }
}
