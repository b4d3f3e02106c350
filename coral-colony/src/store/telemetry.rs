//! Typed telemetry tables and their batch-upsert write path.
//!
//! Every table is keyed by `(bucket_time, agent_id, service_name,
//! dimensions...)` where `bucket_time` is the minute floor of the
//! observation. Re-upserting the same batch inside the bucket window
//! overwrites rows in place, which makes poller ticks idempotent. Ordering
//! within a batch is irrelevant; one agent's batch commits atomically.

use super::ColonyDb;
use crate::error::Result;
use coral_common::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::time::Duration;

/// One cell of a cumulative duration histogram, nanoseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramCell {
    pub upper_bound_ns: f64,
    pub count: u64,
}

/// A duration histogram as stored in the `histogram` column (JSON).
pub type Histogram = Vec<HistogramCell>;

fn histogram_to_json(histogram: &Histogram) -> String {
    serde_json::to_string(histogram).unwrap_or_else(|_| "[]".to_string())
}

fn histogram_from_json(json: &str) -> Histogram {
    serde_json::from_str(json).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpMetricRecord {
    pub timestamp: Timestamp,
    pub service_name: String,
    pub method: String,
    pub path: String,
    pub status_code: u32,
    pub count: u64,
    pub duration_sum_ns: f64,
    pub histogram: Histogram,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrpcMetricRecord {
    pub timestamp: Timestamp,
    pub service_name: String,
    pub rpc_method: String,
    pub status_code: u32,
    pub count: u64,
    pub duration_sum_ns: f64,
    pub histogram: Histogram,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlMetricRecord {
    pub timestamp: Timestamp,
    pub service_name: String,
    pub operation: String,
    pub table_name: String,
    pub count: u64,
    pub duration_sum_ns: f64,
    pub histogram: Histogram,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceSpanRecord {
    pub timestamp: Timestamp,
    pub service_name: String,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub name: String,
    pub kind: String,
    pub duration_ns: u64,
    pub status: String,
    pub attributes_json: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpuProfileRecord {
    pub timestamp: Timestamp,
    pub service_name: String,
    pub function_name: String,
    pub module_path: String,
    pub self_samples: u64,
    pub total_samples: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemMetricRecord {
    pub timestamp: Timestamp,
    pub metric_name: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRecord {
    pub service_name: String,
    pub function_name: String,
    pub module_path: String,
}

/// A service seen in HTTP telemetry within a lookback window.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedService {
    pub service_name: String,
    pub last_seen: Timestamp,
    pub agent_ids: Vec<String>,
}

/// Aggregated request activity for one service.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub service_name: String,
    pub request_count: u64,
    pub error_count: u64,
    pub duration_sum_ns: f64,
    pub last_seen: Timestamp,
}

/// Which duration-histogram table a percentile query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricTable {
    Http,
    Grpc,
    Sql,
}

impl MetricTable {
    fn table_name(&self) -> &'static str {
        match self {
            MetricTable::Http => "http_metrics",
            MetricTable::Grpc => "grpc_metrics",
            MetricTable::Sql => "sql_metrics",
        }
    }
}

impl ColonyDb {
    // === batch upserts ===

    /// Upsert one agent's HTTP metric batch atomically.
    pub async fn upsert_http_batch(
        &self,
        agent_id: &str,
        rows: &[HttpMetricRecord],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO http_metrics
                   (bucket_time, agent_id, service_name, method, path, status_code,
                    count, duration_sum_ns, histogram)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (bucket_time, agent_id, service_name, method, path, status_code)
                 DO UPDATE SET
                   count = excluded.count,
                   duration_sum_ns = excluded.duration_sum_ns,
                   histogram = excluded.histogram",
            )
            .bind(row.timestamp.bucket_minute().as_u64() as i64)
            .bind(agent_id)
            .bind(&row.service_name)
            .bind(&row.method)
            .bind(&row.path)
            .bind(row.status_code as i64)
            .bind(row.count as i64)
            .bind(row.duration_sum_ns)
            .bind(histogram_to_json(&row.histogram))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Upsert one agent's gRPC metric batch atomically.
    pub async fn upsert_grpc_batch(
        &self,
        agent_id: &str,
        rows: &[GrpcMetricRecord],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO grpc_metrics
                   (bucket_time, agent_id, service_name, rpc_method, status_code,
                    count, duration_sum_ns, histogram)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (bucket_time, agent_id, service_name, rpc_method, status_code)
                 DO UPDATE SET
                   count = excluded.count,
                   duration_sum_ns = excluded.duration_sum_ns,
                   histogram = excluded.histogram",
            )
            .bind(row.timestamp.bucket_minute().as_u64() as i64)
            .bind(agent_id)
            .bind(&row.service_name)
            .bind(&row.rpc_method)
            .bind(row.status_code as i64)
            .bind(row.count as i64)
            .bind(row.duration_sum_ns)
            .bind(histogram_to_json(&row.histogram))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Upsert one agent's SQL metric batch atomically.
    pub async fn upsert_sql_batch(&self, agent_id: &str, rows: &[SqlMetricRecord]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO sql_metrics
                   (bucket_time, agent_id, service_name, operation, table_name,
                    count, duration_sum_ns, histogram)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (bucket_time, agent_id, service_name, operation, table_name)
                 DO UPDATE SET
                   count = excluded.count,
                   duration_sum_ns = excluded.duration_sum_ns,
                   histogram = excluded.histogram",
            )
            .bind(row.timestamp.bucket_minute().as_u64() as i64)
            .bind(agent_id)
            .bind(&row.service_name)
            .bind(&row.operation)
            .bind(&row.table_name)
            .bind(row.count as i64)
            .bind(row.duration_sum_ns)
            .bind(histogram_to_json(&row.histogram))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Upsert one agent's trace span batch atomically.
    pub async fn upsert_span_batch(&self, agent_id: &str, rows: &[TraceSpanRecord]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO trace_spans
                   (bucket_time, agent_id, service_name, trace_id, span_id, parent_span_id,
                    name, kind, timestamp_us, duration_ns, status, attributes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT (bucket_time, agent_id, service_name, trace_id, span_id)
                 DO UPDATE SET
                   parent_span_id = excluded.parent_span_id,
                   name = excluded.name,
                   kind = excluded.kind,
                   timestamp_us = excluded.timestamp_us,
                   duration_ns = excluded.duration_ns,
                   status = excluded.status,
                   attributes = excluded.attributes",
            )
            .bind(row.timestamp.bucket_minute().as_u64() as i64)
            .bind(agent_id)
            .bind(&row.service_name)
            .bind(&row.trace_id)
            .bind(&row.span_id)
            .bind(&row.parent_span_id)
            .bind(&row.name)
            .bind(&row.kind)
            .bind(row.timestamp.as_u64() as i64)
            .bind(row.duration_ns as i64)
            .bind(&row.status)
            .bind(&row.attributes_json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Upsert one agent's CPU profile batch atomically.
    pub async fn upsert_profile_batch(
        &self,
        agent_id: &str,
        rows: &[CpuProfileRecord],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO cpu_profiles
                   (bucket_time, agent_id, service_name, function_name, module_path,
                    self_samples, total_samples)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (bucket_time, agent_id, service_name, function_name)
                 DO UPDATE SET
                   module_path = excluded.module_path,
                   self_samples = excluded.self_samples,
                   total_samples = excluded.total_samples",
            )
            .bind(row.timestamp.bucket_minute().as_u64() as i64)
            .bind(agent_id)
            .bind(&row.service_name)
            .bind(&row.function_name)
            .bind(&row.module_path)
            .bind(row.self_samples as i64)
            .bind(row.total_samples as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Upsert one agent's system metric batch atomically.
    pub async fn upsert_system_metric_batch(
        &self,
        agent_id: &str,
        rows: &[SystemMetricRecord],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO system_metrics
                   (bucket_time, agent_id, metric_name, value, unit)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (bucket_time, agent_id, metric_name)
                 DO UPDATE SET value = excluded.value, unit = excluded.unit",
            )
            .bind(row.timestamp.bucket_minute().as_u64() as i64)
            .bind(agent_id)
            .bind(&row.metric_name)
            .bind(row.value)
            .bind(&row.unit)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Replace one agent's known-function set.
    pub async fn upsert_function_registry(
        &self,
        agent_id: &str,
        functions: &[FunctionRecord],
    ) -> Result<()> {
        let now = Timestamp::now().as_u64() as i64;
        let mut tx = self.pool().begin().await?;
        for function in functions {
            sqlx::query(
                "INSERT INTO function_registry
                   (agent_id, service_name, function_name, module_path, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (agent_id, service_name, function_name)
                 DO UPDATE SET module_path = excluded.module_path, updated_at = excluded.updated_at",
            )
            .bind(agent_id)
            .bind(&function.service_name)
            .bind(&function.function_name)
            .bind(&function.module_path)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // === scans ===

    /// Distinct services seen in HTTP telemetry within `lookback`, with the
    /// latest observation time and the agents that reported them.
    pub async fn observed_services(&self, lookback: Duration) -> Result<Vec<ObservedService>> {
        let cutoff = (Timestamp::now() - lookback).as_u64() as i64;

        let rows = sqlx::query(
            "SELECT service_name, MAX(bucket_time) AS last_seen,
                    GROUP_CONCAT(DISTINCT agent_id) AS agent_ids
             FROM http_metrics
             WHERE bucket_time >= ?1
             GROUP BY service_name",
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;

        let mut observed = Vec::with_capacity(rows.len());
        for row in rows {
            let agent_ids: String = row.try_get("agent_ids")?;
            observed.push(ObservedService {
                service_name: row.try_get("service_name")?,
                last_seen: Timestamp::from_micros(row.try_get::<i64, _>("last_seen")? as u64),
                agent_ids: agent_ids
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            });
        }
        Ok(observed)
    }

    /// Aggregated HTTP request activity per service within `range`,
    /// optionally narrowed to one service.
    pub async fn service_activity(
        &self,
        service: Option<&str>,
        range: Duration,
    ) -> Result<Vec<ActivityRecord>> {
        let cutoff = (Timestamp::now() - range).as_u64() as i64;

        let sql = "SELECT service_name,
                          SUM(count) AS request_count,
                          SUM(CASE WHEN status_code >= 500 THEN count ELSE 0 END) AS error_count,
                          SUM(duration_sum_ns) AS duration_sum_ns,
                          MAX(bucket_time) AS last_seen
                   FROM http_metrics
                   WHERE bucket_time >= ?1
                     AND (?2 IS NULL OR service_name = ?2)
                   GROUP BY service_name
                   ORDER BY request_count DESC";

        let rows = sqlx::query(sql)
            .bind(cutoff)
            .bind(service)
            .fetch_all(self.pool())
            .await?;

        let mut activity = Vec::with_capacity(rows.len());
        for row in rows {
            activity.push(ActivityRecord {
                service_name: row.try_get("service_name")?,
                request_count: row.try_get::<i64, _>("request_count")? as u64,
                error_count: row.try_get::<i64, _>("error_count")? as u64,
                duration_sum_ns: row.try_get("duration_sum_ns")?,
                last_seen: Timestamp::from_micros(row.try_get::<i64, _>("last_seen")? as u64),
            });
        }
        Ok(activity)
    }

    /// All duration histograms for `service` in `table` within `range`.
    pub async fn duration_histograms(
        &self,
        table: MetricTable,
        service: &str,
        range: Duration,
    ) -> Result<Vec<Histogram>> {
        let cutoff = (Timestamp::now() - range).as_u64() as i64;
        let sql = format!(
            "SELECT histogram FROM {} WHERE service_name = ?1 AND bucket_time >= ?2",
            table.table_name()
        );

        let rows = sqlx::query(&sql)
            .bind(service)
            .bind(cutoff)
            .fetch_all(self.pool())
            .await?;

        let mut histograms = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row.try_get("histogram")?;
            histograms.push(histogram_from_json(&json));
        }
        Ok(histograms)
    }

    /// Recent trace spans, newest first, optionally narrowed to a service
    /// and a span kind.
    pub async fn recent_spans(
        &self,
        service: Option<&str>,
        kind: Option<&str>,
        range: Duration,
        limit: u32,
    ) -> Result<Vec<TraceSpanRecord>> {
        let cutoff = (Timestamp::now() - range).as_u64() as i64;

        let rows = sqlx::query(
            "SELECT service_name, trace_id, span_id, parent_span_id, name, kind,
                    timestamp_us, duration_ns, status, attributes
             FROM trace_spans
             WHERE bucket_time >= ?1
               AND (?2 IS NULL OR service_name = ?2)
               AND (?3 IS NULL OR kind = ?3)
             ORDER BY timestamp_us DESC
             LIMIT ?4",
        )
        .bind(cutoff)
        .bind(service)
        .bind(kind)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        let mut spans = Vec::with_capacity(rows.len());
        for row in rows {
            spans.push(TraceSpanRecord {
                timestamp: Timestamp::from_micros(row.try_get::<i64, _>("timestamp_us")? as u64),
                service_name: row.try_get("service_name")?,
                trace_id: row.try_get("trace_id")?,
                span_id: row.try_get("span_id")?,
                parent_span_id: row.try_get("parent_span_id")?,
                name: row.try_get("name")?,
                kind: row.try_get("kind")?,
                duration_ns: row.try_get::<i64, _>("duration_ns")? as u64,
                status: row.try_get("status")?,
                attributes_json: row.try_get("attributes")?,
            });
        }
        Ok(spans)
    }

    /// Latest value per system metric within `range`, grouped across agents.
    pub async fn system_metric_summary(
        &self,
        range: Duration,
    ) -> Result<Vec<(String, f64, f64, String)>> {
        let cutoff = (Timestamp::now() - range).as_u64() as i64;

        let rows = sqlx::query(
            "SELECT metric_name, AVG(value) AS avg_value, MAX(value) AS max_value, MAX(unit) AS unit
             FROM system_metrics
             WHERE bucket_time >= ?1
             GROUP BY metric_name
             ORDER BY metric_name",
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;

        let mut summary = Vec::with_capacity(rows.len());
        for row in rows {
            summary.push((
                row.try_get("metric_name")?,
                row.try_get("avg_value")?,
                row.try_get("max_value")?,
                row.try_get("unit")?,
            ));
        }
        Ok(summary)
    }

    /// The hottest functions by self samples within `range`.
    pub async fn top_hotspots(
        &self,
        service: Option<&str>,
        range: Duration,
        k: u32,
    ) -> Result<Vec<CpuProfileRecord>> {
        let cutoff = (Timestamp::now() - range).as_u64() as i64;

        let rows = sqlx::query(
            "SELECT service_name, function_name, MAX(module_path) AS module_path,
                    SUM(self_samples) AS self_samples, SUM(total_samples) AS total_samples,
                    MAX(bucket_time) AS last_bucket
             FROM cpu_profiles
             WHERE bucket_time >= ?1
               AND (?2 IS NULL OR service_name = ?2)
             GROUP BY service_name, function_name
             ORDER BY self_samples DESC
             LIMIT ?3",
        )
        .bind(cutoff)
        .bind(service)
        .bind(k as i64)
        .fetch_all(self.pool())
        .await?;

        let mut hotspots = Vec::with_capacity(rows.len());
        for row in rows {
            hotspots.push(CpuProfileRecord {
                timestamp: Timestamp::from_micros(row.try_get::<i64, _>("last_bucket")? as u64),
                service_name: row.try_get("service_name")?,
                function_name: row.try_get("function_name")?,
                module_path: row.try_get("module_path")?,
                self_samples: row.try_get::<i64, _>("self_samples")? as u64,
                total_samples: row.try_get::<i64, _>("total_samples")? as u64,
            });
        }
        Ok(hotspots)
    }
}

#[cfg(test)]
pub(crate) fn sample_http_row(service: &str, status_code: u32, count: u64) -> HttpMetricRecord {
    HttpMetricRecord {
        timestamp: Timestamp::now(),
        service_name: service.to_string(),
        method: "GET".to_string(),
        path: "/".to_string(),
        status_code,
        count,
        duration_sum_ns: count as f64 * 1_000_000.0,
        histogram: vec![
            HistogramCell {
                upper_bound_ns: 1_000_000.0,
                count,
            },
            HistogramCell {
                upper_bound_ns: f64::INFINITY,
                count,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ColonyDb;

    async fn http_row_count(db: &ColonyDb) -> i64 {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM http_metrics")
            .fetch_one(db.pool())
            .await
            .unwrap();
        count.0
    }

    #[tokio::test]
    async fn http_batch_upsert_is_idempotent() {
        let db = ColonyDb::test().await;
        let rows = vec![
            sample_http_row("checkout", 200, 10),
            sample_http_row("checkout", 500, 2),
        ];

        db.upsert_http_batch("agent-1", &rows).await.unwrap();
        db.upsert_http_batch("agent-1", &rows).await.unwrap();

        assert_eq!(http_row_count(&db).await, 2);

        let activity = db
            .service_activity(Some("checkout"), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].request_count, 12);
        assert_eq!(activity[0].error_count, 2);
    }

    #[tokio::test]
    async fn duplicate_rows_overwrite_not_accumulate() {
        let db = ColonyDb::test().await;
        let mut row = sample_http_row("api", 200, 5);
        db.upsert_http_batch("agent-1", &[row.clone()]).await.unwrap();

        row.count = 9;
        db.upsert_http_batch("agent-1", &[row]).await.unwrap();

        let activity = db
            .service_activity(Some("api"), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(activity[0].request_count, 9);
    }

    #[tokio::test]
    async fn same_service_from_two_agents_keeps_both_rows() {
        let db = ColonyDb::test().await;
        let row = sample_http_row("checkout", 200, 1);

        db.upsert_http_batch("agent-1", &[row.clone()]).await.unwrap();
        db.upsert_http_batch("agent-2", &[row]).await.unwrap();

        assert_eq!(http_row_count(&db).await, 2);

        let observed = db
            .observed_services(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].agent_ids.len(), 2);
    }

    #[tokio::test]
    async fn observed_services_honors_lookback() {
        let db = ColonyDb::test().await;
        let mut old = sample_http_row("stale-svc", 200, 1);
        old.timestamp = Timestamp::now() - Duration::from_secs(7200);

        db.upsert_http_batch("agent-1", &[old]).await.unwrap();
        db.upsert_http_batch("agent-1", &[sample_http_row("fresh-svc", 200, 1)])
            .await
            .unwrap();

        let observed = db
            .observed_services(Duration::from_secs(3600))
            .await
            .unwrap();
        let names: Vec<_> = observed.iter().map(|o| o.service_name.as_str()).collect();
        assert_eq!(names, vec!["fresh-svc"]);
    }

    #[tokio::test]
    async fn span_upsert_and_scan() {
        let db = ColonyDb::test().await;
        let span = TraceSpanRecord {
            timestamp: Timestamp::now(),
            service_name: "checkout".to_string(),
            trace_id: "t1".to_string(),
            span_id: "s1".to_string(),
            parent_span_id: String::new(),
            name: "GET /cart".to_string(),
            kind: "server".to_string(),
            duration_ns: 1_500_000,
            status: "ok".to_string(),
            attributes_json: "{}".to_string(),
        };

        db.upsert_span_batch("agent-1", &[span.clone()]).await.unwrap();
        db.upsert_span_batch("agent-1", &[span]).await.unwrap();

        let spans = db
            .recent_spans(Some("checkout"), None, Duration::from_secs(3600), 10)
            .await
            .unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "GET /cart");

        // The span-kind predicate narrows the scan.
        let client_spans = db
            .recent_spans(Some("checkout"), Some("client"), Duration::from_secs(3600), 10)
            .await
            .unwrap();
        assert!(client_spans.is_empty());
    }

    #[tokio::test]
    async fn hotspots_aggregate_across_buckets() {
        let db = ColonyDb::test().await;
        let mut a = CpuProfileRecord {
            timestamp: Timestamp::now() - Duration::from_secs(120),
            service_name: "checkout".to_string(),
            function_name: "serialize_cart".to_string(),
            module_path: "checkout::cart".to_string(),
            self_samples: 70,
            total_samples: 90,
        };
        db.upsert_profile_batch("agent-1", &[a.clone()]).await.unwrap();
        a.timestamp = Timestamp::now();
        a.self_samples = 30;
        db.upsert_profile_batch("agent-1", &[a]).await.unwrap();

        let hotspots = db
            .top_hotspots(None, Duration::from_secs(3600), 5)
            .await
            .unwrap();
        assert_eq!(hotspots.len(), 1);
        assert_eq!(hotspots[0].self_samples, 100);
    }
}
