//!
//! Dual-source service discovery.
//!
//! Two independent views of "what services exist" get reconciled in one
//! pass: services explicitly registered through enrollment (the registry)
//! and service names observed in HTTP telemetry within a lookback window.
//! Each reported service carries a source attribution so operators can see
//! whether the mesh's picture of a service is corroborated.
//!

use crate::error::Result;
use crate::registry::AgentRegistry;
use crate::store::{services::ServiceStatus, ColonyDb};
use coral_common::timestamp::Timestamp;
use std::{
    collections::{BTreeMap, HashSet},
    time::Duration,
};

/// Default lookback for telemetry-observed services.
pub const DEFAULT_OBSERVED_LOOKBACK: Duration = Duration::from_secs(3600);

/// Where knowledge of a service comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Only explicitly registered.
    Registered,
    /// Only seen in telemetry.
    Observed,
    /// Registered and corroborated by telemetry.
    Verified,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Registered => "REGISTERED",
            Source::Observed => "OBSERVED",
            Source::Verified => "VERIFIED",
        }
    }

    /// Case-insensitive parse of a source filter value.
    pub fn parse(s: &str) -> Option<Source> {
        match s.to_ascii_lowercase().as_str() {
            "registered" => Some(Source::Registered),
            "observed" => Some(Source::Observed),
            "verified" => Some(Source::Verified),
            _ => None,
        }
    }
}

/// One reconciled service.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredService {
    pub name: String,
    pub source: Source,
    /// `active` / `unhealthy` from the registry, `observed-only` otherwise.
    pub status: String,
    /// Distinct registered agents. Observed-only services have none.
    pub instance_count: u32,
    pub last_seen: Option<Timestamp>,
    pub agent_ids: Vec<String>,
}

/// Filters applied to a discovery listing.
#[derive(Debug, Clone, Default)]
pub struct ServiceFilter {
    /// Observed lookback; defaults to [DEFAULT_OBSERVED_LOOKBACK].
    pub time_range: Option<Duration>,
    /// Applied after the join.
    pub source: Option<Source>,
    /// Case-insensitive substring match.
    pub name: Option<String>,
}

/// Reconciles the registry with telemetry-observed services.
#[derive(Clone)]
pub struct DiscoveryEngine {
    db: ColonyDb,
    registry: AgentRegistry,
}

/// Registered-side aggregate per service name.
struct RegisteredAggregate {
    display_name: String,
    agent_ids: HashSet<String>,
    any_active: bool,
    latest_heartbeat: Option<Timestamp>,
    latest_registration: Timestamp,
}

impl DiscoveryEngine {
    pub fn new(db: ColonyDb, registry: AgentRegistry) -> Self {
        Self { db, registry }
    }

    /// The reconciled service list.
    pub async fn list_services(&self, filter: &ServiceFilter) -> Result<Vec<DiscoveredService>> {
        let lookback = filter.time_range.unwrap_or(DEFAULT_OBSERVED_LOOKBACK);

        // REGISTERED: aggregate the registry's catalogs by lowercased name.
        let mut registered: BTreeMap<String, RegisteredAggregate> = BTreeMap::new();
        for agent in self.registry.list_all() {
            for service in &agent.services {
                let key = service.name.to_lowercase();
                let aggregate =
                    registered
                        .entry(key)
                        .or_insert_with(|| RegisteredAggregate {
                            display_name: service.name.clone(),
                            agent_ids: HashSet::new(),
                            any_active: false,
                            latest_heartbeat: None,
                            latest_registration: service.registered_at,
                        });
                aggregate.agent_ids.insert(service.agent_id.clone());
                aggregate.any_active |= service.status == ServiceStatus::Active;
                aggregate.latest_heartbeat =
                    aggregate.latest_heartbeat.max(service.last_seen_heartbeat);
                aggregate.latest_registration =
                    aggregate.latest_registration.max(service.registered_at);
            }
        }

        // OBSERVED: distinct names in HTTP telemetry within the lookback.
        let observed = self.db.observed_services(lookback).await?;
        let mut observed_by_key: BTreeMap<String, Timestamp> = BTreeMap::new();
        let mut observed_names: BTreeMap<String, String> = BTreeMap::new();
        for service in observed {
            let key = service.service_name.to_lowercase();
            observed_by_key.insert(key.clone(), service.last_seen);
            observed_names.insert(key, service.service_name);
        }

        // Single pass over the union.
        let mut out = Vec::new();
        for (key, aggregate) in &registered {
            let telemetry_seen = observed_by_key.get(key).copied();
            let source = if telemetry_seen.is_some() {
                Source::Verified
            } else {
                Source::Registered
            };

            // last_seen preference: heartbeat > registration > telemetry.
            let last_seen = aggregate
                .latest_heartbeat
                .or(Some(aggregate.latest_registration))
                .or(telemetry_seen);

            let mut agent_ids: Vec<String> = aggregate.agent_ids.iter().cloned().collect();
            agent_ids.sort();

            out.push(DiscoveredService {
                name: aggregate.display_name.clone(),
                source,
                status: if aggregate.any_active {
                    "active".to_string()
                } else {
                    "unhealthy".to_string()
                },
                instance_count: aggregate.agent_ids.len() as u32,
                last_seen,
                agent_ids,
            });
        }

        for (key, last_seen) in &observed_by_key {
            if registered.contains_key(key) {
                continue;
            }
            out.push(DiscoveredService {
                name: observed_names[key].clone(),
                source: Source::Observed,
                status: "observed-only".to_string(),
                instance_count: 0,
                last_seen: Some(*last_seen),
                agent_ids: Vec::new(),
            });
        }

        // Filters: source post-join, name case-insensitive.
        if let Some(source) = filter.source {
            out.retain(|s| s.source == source);
        }
        if let Some(name) = &filter.name {
            let needle = name.to_lowercase();
            out.retain(|s| s.name.to_lowercase().contains(&needle));
        }

        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{test_agent, AgentRegistry};
    use crate::store::telemetry::sample_http_row;

    async fn engine_with_agent() -> (DiscoveryEngine, AgentRegistry, ColonyDb) {
        let db = ColonyDb::test().await;
        let registry = AgentRegistry::load(db.clone()).await.unwrap();
        registry.register(test_agent("agent-1")).await.unwrap();
        (DiscoveryEngine::new(db.clone(), registry.clone()), registry, db)
    }

    #[tokio::test]
    async fn registered_with_telemetry_is_verified() {
        let (engine, _registry, db) = engine_with_agent().await;
        db.upsert_http_batch("agent-1", &[sample_http_row("checkout", 200, 3)])
            .await
            .unwrap();

        let services = engine.list_services(&ServiceFilter::default()).await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "checkout");
        assert_eq!(services[0].source, Source::Verified);
        assert_eq!(services[0].status, "active");
        assert_eq!(services[0].instance_count, 1);
        assert_eq!(services[0].agent_ids, vec!["agent-1"]);
    }

    #[tokio::test]
    async fn registered_without_telemetry_stays_registered() {
        let (engine, _registry, _db) = engine_with_agent().await;

        let services = engine.list_services(&ServiceFilter::default()).await.unwrap();
        assert_eq!(services[0].source, Source::Registered);
    }

    #[tokio::test]
    async fn telemetry_only_service_is_observed_without_agents() {
        let db = ColonyDb::test().await;
        let registry = AgentRegistry::load(db.clone()).await.unwrap();
        let engine = DiscoveryEngine::new(db.clone(), registry);

        db.upsert_http_batch("agent-9", &[sample_http_row("legacy-batch", 200, 1)])
            .await
            .unwrap();

        let services = engine.list_services(&ServiceFilter::default()).await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].source, Source::Observed);
        assert_eq!(services[0].status, "observed-only");
        assert_eq!(services[0].instance_count, 0);
        assert!(services[0].agent_ids.is_empty());
        assert!(services[0].last_seen.is_some());
    }

    #[tokio::test]
    async fn unregistering_agent_demotes_verified_to_observed() {
        let (engine, registry, db) = engine_with_agent().await;
        db.upsert_http_batch("agent-1", &[sample_http_row("checkout", 200, 3)])
            .await
            .unwrap();

        registry.remove("agent-1").await.unwrap();

        let services = engine.list_services(&ServiceFilter::default()).await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].source, Source::Observed);
        assert!(services[0].agent_ids.is_empty());
    }

    #[tokio::test]
    async fn filters_are_case_insensitive_and_post_join() {
        let (engine, _registry, db) = engine_with_agent().await;
        db.upsert_http_batch("agent-9", &[sample_http_row("legacy-batch", 200, 1)])
            .await
            .unwrap();

        let by_name = engine
            .list_services(&ServiceFilter {
                name: Some("CHECK".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].name, "checkout");

        let by_source = engine
            .list_services(&ServiceFilter {
                source: Source::parse("ObSeRvEd"),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_source.len(), 1);
        assert_eq!(by_source[0].name, "legacy-batch");
    }

    #[tokio::test]
    async fn heartbeat_wins_last_seen_preference() {
        let (engine, registry, _db) = engine_with_agent().await;

        let before = engine.list_services(&ServiceFilter::default()).await.unwrap();
        let registered_seen = before[0].last_seen.unwrap();

        registry.heartbeat("agent-1").await.unwrap();

        let after = engine.list_services(&ServiceFilter::default()).await.unwrap();
        assert!(after[0].last_seen.unwrap() >= registered_seen);
    }
}
