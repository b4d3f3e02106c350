//!
//! The query surface: focused queries, unified renderings and guarded raw
//! SQL, all polymorphic over an explicit capability bundle instead of a
//! concrete store type.
//!
//! Handlers get a [QuerySurface] at construction; every public operation
//! honors a caller deadline via [with_deadline].
//!

mod focused;
mod tools;
mod unified;

pub use tools::{ToolRegistry, TOOL_NAMES};
pub use unified::{UnifiedOutput, UnifiedRequest};

use crate::discovery::DiscoveryEngine;
use crate::error::Result;
use crate::registry::AgentRegistry;
use crate::store::{
    sql_guard::RawQueryResult,
    telemetry::{
        ActivityRecord, CpuProfileRecord, Histogram, MetricTable, TraceSpanRecord,
    },
    ColonyDb,
};
use async_trait::async_trait;
use std::{future::Future, sync::Arc, time::Duration};

/// Default deadline applied when a caller does not provide one.
pub const DEFAULT_QUERY_DEADLINE: Duration = Duration::from_secs(30);

/// Read access to raw telemetry (spans, system metrics, profiles, raw SQL).
#[async_trait]
pub trait TelemetryRead: Send + Sync {
    async fn recent_spans(
        &self,
        service: Option<&str>,
        kind: Option<&str>,
        range: Duration,
        limit: u32,
    ) -> Result<Vec<TraceSpanRecord>>;

    async fn system_metric_summary(&self, range: Duration)
        -> Result<Vec<(String, f64, f64, String)>>;

    async fn top_hotspots(
        &self,
        service: Option<&str>,
        range: Duration,
        k: u32,
    ) -> Result<Vec<CpuProfileRecord>>;

    async fn raw_query(&self, sql: &str, max_rows: u32, limit: u32) -> Result<RawQueryResult>;
}

/// Read access to aggregated request activity.
#[async_trait]
pub trait ServiceActivityRead: Send + Sync {
    async fn service_activity(
        &self,
        service: Option<&str>,
        range: Duration,
    ) -> Result<Vec<ActivityRecord>>;
}

/// Read access to duration histograms for quantile queries.
#[async_trait]
pub trait PercentileRead: Send + Sync {
    async fn duration_histograms(
        &self,
        table: MetricTable,
        service: &str,
        range: Duration,
    ) -> Result<Vec<Histogram>>;
}

/// The full capability bundle the query surface is constructed over.
pub trait QueryCapabilities: TelemetryRead + ServiceActivityRead + PercentileRead {}

impl<T: TelemetryRead + ServiceActivityRead + PercentileRead> QueryCapabilities for T {}

#[async_trait]
impl TelemetryRead for ColonyDb {
    async fn recent_spans(
        &self,
        service: Option<&str>,
        kind: Option<&str>,
        range: Duration,
        limit: u32,
    ) -> Result<Vec<TraceSpanRecord>> {
        ColonyDb::recent_spans(self, service, kind, range, limit).await
    }

    async fn system_metric_summary(
        &self,
        range: Duration,
    ) -> Result<Vec<(String, f64, f64, String)>> {
        ColonyDb::system_metric_summary(self, range).await
    }

    async fn top_hotspots(
        &self,
        service: Option<&str>,
        range: Duration,
        k: u32,
    ) -> Result<Vec<CpuProfileRecord>> {
        ColonyDb::top_hotspots(self, service, range, k).await
    }

    async fn raw_query(&self, sql: &str, max_rows: u32, limit: u32) -> Result<RawQueryResult> {
        ColonyDb::execute_query(self, sql, max_rows, limit).await
    }
}

#[async_trait]
impl ServiceActivityRead for ColonyDb {
    async fn service_activity(
        &self,
        service: Option<&str>,
        range: Duration,
    ) -> Result<Vec<ActivityRecord>> {
        ColonyDb::service_activity(self, service, range).await
    }
}

#[async_trait]
impl PercentileRead for ColonyDb {
    async fn duration_histograms(
        &self,
        table: MetricTable,
        service: &str,
        range: Duration,
    ) -> Result<Vec<Histogram>> {
        ColonyDb::duration_histograms(self, table, service, range).await
    }
}

/// Wrap an operation with a caller deadline; expiry aborts at the next
/// suspension point and surfaces `Cancelled`.
pub async fn with_deadline<T, F>(deadline: Duration, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(deadline, operation).await?
}

/// The colony's query engine.
#[derive(Clone)]
pub struct QuerySurface {
    caps: Arc<dyn QueryCapabilities>,
    discovery: DiscoveryEngine,
    registry: AgentRegistry,
    /// Hard cap on raw-SQL row counts.
    max_raw_rows: u32,
}

impl QuerySurface {
    pub fn new(
        caps: Arc<dyn QueryCapabilities>,
        discovery: DiscoveryEngine,
        registry: AgentRegistry,
        max_raw_rows: u32,
    ) -> Self {
        Self {
            caps,
            discovery,
            registry,
            max_raw_rows,
        }
    }

    pub(crate) fn caps(&self) -> &Arc<dyn QueryCapabilities> {
        &self.caps
    }

    pub(crate) fn discovery(&self) -> &DiscoveryEngine {
        &self.discovery
    }

    pub(crate) fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub(crate) fn max_raw_rows(&self) -> u32 {
        self.max_raw_rows
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A query surface over a fresh in-memory store.
    pub async fn test_surface() -> (QuerySurface, ColonyDb, AgentRegistry) {
        let db = ColonyDb::test().await;
        let registry = AgentRegistry::load(db.clone()).await.unwrap();
        let discovery = DiscoveryEngine::new(db.clone(), registry.clone());
        let surface = QuerySurface::new(
            Arc::new(db.clone()),
            discovery,
            registry.clone(),
            10_000,
        );
        (surface, db, registry)
    }
}
