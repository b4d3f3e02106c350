//! Unified queries: cross-signal renderings for AI tool clients.
//!
//! Each query returns a text rendering plus a structured JSON payload.
//! The text is the primary product; the JSON mirrors whatever structured
//! fields the rendering was built from.

use super::QuerySurface;
use crate::discovery::ServiceFilter;
use crate::error::Result;
use serde_json::json;
use std::fmt::Write as _;
use std::time::Duration;

const DEFAULT_RANGE_MS: u64 = 3_600_000;
const DEFAULT_LIMIT: u32 = 20;

/// Common input of the unified queries.
#[derive(Debug, Clone, Default)]
pub struct UnifiedRequest {
    /// 0 uses one hour.
    pub time_range_ms: u64,
    pub service: Option<String>,
    /// 0 uses the per-query default.
    pub limit: u32,
}

impl UnifiedRequest {
    fn range_ms(&self) -> u64 {
        if self.time_range_ms == 0 {
            DEFAULT_RANGE_MS
        } else {
            self.time_range_ms
        }
    }

    fn range(&self) -> Duration {
        Duration::from_millis(self.range_ms())
    }

    fn limit(&self) -> u32 {
        if self.limit == 0 {
            DEFAULT_LIMIT
        } else {
            self.limit
        }
    }

    fn service(&self) -> Option<&str> {
        self.service.as_deref().filter(|s| !s.is_empty())
    }
}

/// Text plus structured payload of one unified query.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedOutput {
    pub text: String,
    pub structured_json: String,
}

impl QuerySurface {
    /// Cross-signal summary: services, agent health, request activity and
    /// CPU hotspots in one rendering.
    pub async fn query_unified_summary(&self, request: &UnifiedRequest) -> Result<UnifiedOutput> {
        let services = self
            .list_services(&ServiceFilter {
                time_range: Some(request.range()),
                ..Default::default()
            })
            .await?;
        let (active, degraded) = self.registry().count_by_status();
        let activity = self
            .caps()
            .service_activity(request.service(), request.range())
            .await?;
        let hotspots = self
            .caps()
            .top_hotspots(request.service(), request.range(), 5)
            .await?;

        let mut text = String::new();
        writeln!(
            text,
            "=== Summary (last {}m) ===",
            request.range_ms() / 60_000
        )
        .ok();
        writeln!(text, "Agents: {active} active, {degraded} degraded").ok();
        writeln!(text, "Services ({}):", services.len()).ok();
        for service in &services {
            writeln!(
                text,
                "  {} [{}] status={} instances={}",
                service.name,
                service.source.as_str(),
                service.status,
                service.instance_count
            )
            .ok();
        }
        if !activity.is_empty() {
            writeln!(text, "Request activity:").ok();
            for record in activity.iter().take(request.limit() as usize) {
                writeln!(
                    text,
                    "  {}: {} requests, {} errors, avg {:.2}ms",
                    record.service_name,
                    record.request_count,
                    record.error_count,
                    avg_ms(record.duration_sum_ns, record.request_count)
                )
                .ok();
            }
        }
        if !hotspots.is_empty() {
            writeln!(text, "CPU hotspots:").ok();
            for hotspot in &hotspots {
                writeln!(
                    text,
                    "  {}::{} self={} total={}",
                    hotspot.service_name,
                    hotspot.function_name,
                    hotspot.self_samples,
                    hotspot.total_samples
                )
                .ok();
            }
        }

        let structured = json!({
            "agents": { "active": active, "degraded": degraded },
            "services": services.iter().map(|s| json!({
                "name": s.name,
                "source": s.source.as_str(),
                "status": s.status,
                "instance_count": s.instance_count,
            })).collect::<Vec<_>>(),
            "activity": activity.iter().map(|a| json!({
                "service": a.service_name,
                "requests": a.request_count,
                "errors": a.error_count,
            })).collect::<Vec<_>>(),
        });

        Ok(UnifiedOutput {
            text,
            structured_json: structured.to_string(),
        })
    }

    /// Recent spans, newest first.
    pub async fn query_unified_traces(&self, request: &UnifiedRequest) -> Result<UnifiedOutput> {
        let spans = self
            .caps()
            .recent_spans(request.service(), None, request.range(), request.limit())
            .await?;

        let mut text = String::new();
        writeln!(text, "=== Traces ({} spans) ===", spans.len()).ok();
        for span in &spans {
            writeln!(
                text,
                "  [{}] {} {} kind={} {:.2}ms status={}",
                span.trace_id,
                span.service_name,
                span.name,
                span.kind,
                span.duration_ns as f64 / 1_000_000.0,
                span.status
            )
            .ok();
        }

        let structured = json!({
            "spans": spans.iter().map(|s| json!({
                "trace_id": s.trace_id,
                "span_id": s.span_id,
                "service": s.service_name,
                "name": s.name,
                "kind": s.kind,
                "duration_ns": s.duration_ns,
                "status": s.status,
            })).collect::<Vec<_>>(),
        });

        Ok(UnifiedOutput {
            text,
            structured_json: structured.to_string(),
        })
    }

    /// System metrics plus per-service request rates.
    pub async fn query_unified_metrics(&self, request: &UnifiedRequest) -> Result<UnifiedOutput> {
        let system = self.caps().system_metric_summary(request.range()).await?;
        let activity = self
            .caps()
            .service_activity(request.service(), request.range())
            .await?;

        let mut text = String::new();
        writeln!(text, "=== Metrics ===").ok();
        if !system.is_empty() {
            writeln!(text, "System:").ok();
            for (name, avg, max, unit) in &system {
                writeln!(text, "  {name}: avg {avg:.2}{unit}, max {max:.2}{unit}").ok();
            }
        }
        if !activity.is_empty() {
            writeln!(text, "Requests:").ok();
            for record in activity.iter().take(request.limit() as usize) {
                writeln!(
                    text,
                    "  {}: {} requests ({} errors), avg {:.2}ms",
                    record.service_name,
                    record.request_count,
                    record.error_count,
                    avg_ms(record.duration_sum_ns, record.request_count)
                )
                .ok();
            }
        }

        let structured = json!({
            "system": system.iter().map(|(name, avg, max, unit)| json!({
                "metric": name, "avg": avg, "max": max, "unit": unit,
            })).collect::<Vec<_>>(),
            "requests": activity.iter().map(|a| json!({
                "service": a.service_name,
                "requests": a.request_count,
                "errors": a.error_count,
            })).collect::<Vec<_>>(),
        });

        Ok(UnifiedOutput {
            text,
            structured_json: structured.to_string(),
        })
    }

    /// Error-signal view. The store keeps no raw log lines; this renders
    /// error spans as the closest unified stand-in.
    pub async fn query_unified_logs(&self, request: &UnifiedRequest) -> Result<UnifiedOutput> {
        let spans = self
            .caps()
            .recent_spans(
                request.service(),
                None,
                request.range(),
                request.limit().saturating_mul(4),
            )
            .await?;
        let errors: Vec<_> = spans
            .into_iter()
            .filter(|span| span.status != "ok" && !span.status.is_empty())
            .take(request.limit() as usize)
            .collect();

        let mut text = String::new();
        writeln!(text, "=== Error events ({}) ===", errors.len()).ok();
        for span in &errors {
            writeln!(
                text,
                "  {} {} {} status={} attributes={}",
                span.timestamp,
                span.service_name,
                span.name,
                span.status,
                span.attributes_json
            )
            .ok();
        }
        if errors.is_empty() {
            writeln!(text, "  (no error events in range)").ok();
        }

        let structured = json!({
            "errors": errors.iter().map(|s| json!({
                "timestamp_us": s.timestamp.as_u64(),
                "service": s.service_name,
                "name": s.name,
                "status": s.status,
            })).collect::<Vec<_>>(),
        });

        Ok(UnifiedOutput {
            text,
            structured_json: structured.to_string(),
        })
    }
}

fn avg_ms(duration_sum_ns: f64, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    duration_sum_ns / count as f64 / 1_000_000.0
}
