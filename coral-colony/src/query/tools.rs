//! Tool invocation over the query surface.
//!
//! AI clients call tools by name with a JSON argument object. The registry
//! dispatches onto the query surface and renders text, so the external MCP
//! adapter stays a thin translator.

use super::{unified::UnifiedRequest, QuerySurface};
use crate::discovery::{ServiceFilter, Source};
use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::time::Duration;

/// Every tool the colony can expose.
pub const TOOL_NAMES: &[&str] = &[
    "list_services",
    "get_metric_percentile",
    "get_service_activity",
    "list_service_activity",
    "query_unified_summary",
    "query_unified_traces",
    "query_unified_metrics",
    "query_unified_logs",
    "execute_query",
];

/// Dispatches named tool calls onto the query surface.
#[derive(Clone)]
pub struct ToolRegistry {
    surface: QuerySurface,
    /// `None` means every tool is enabled.
    enabled: Option<HashSet<String>>,
}

impl ToolRegistry {
    /// An empty `enabled_tools` list enables everything.
    pub fn new(surface: QuerySurface, enabled_tools: &[String]) -> Self {
        let enabled = if enabled_tools.is_empty() {
            None
        } else {
            Some(enabled_tools.iter().cloned().collect())
        };
        Self { surface, enabled }
    }

    /// Names of the currently enabled tools.
    pub fn list_tools(&self) -> Vec<&'static str> {
        TOOL_NAMES
            .iter()
            .copied()
            .filter(|name| self.is_enabled(name))
            .collect()
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.enabled
            .as_ref()
            .map(|set| set.contains(name))
            .unwrap_or(true)
    }

    /// Invoke one tool. Unknown and disabled tools are `NotFound`.
    pub async fn invoke(&self, name: &str, args_json: &str) -> Result<String> {
        if !TOOL_NAMES.contains(&name) {
            return Err(Error::not_found(format!("unknown tool: {name}")));
        }
        if !self.is_enabled(name) {
            return Err(Error::not_found(format!("tool not enabled: {name}")));
        }

        let args: Value = if args_json.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(args_json)
                .map_err(|e| Error::malformed(format!("tool arguments: {e}")))?
        };

        match name {
            "list_services" => self.list_services(&args).await,
            "get_metric_percentile" => self.get_metric_percentile(&args).await,
            "get_service_activity" => self.get_service_activity(&args).await,
            "list_service_activity" => self.list_service_activity(&args).await,
            "query_unified_summary" => Ok(self
                .surface
                .query_unified_summary(&unified_request(&args))
                .await?
                .text),
            "query_unified_traces" => Ok(self
                .surface
                .query_unified_traces(&unified_request(&args))
                .await?
                .text),
            "query_unified_metrics" => Ok(self
                .surface
                .query_unified_metrics(&unified_request(&args))
                .await?
                .text),
            "query_unified_logs" => Ok(self
                .surface
                .query_unified_logs(&unified_request(&args))
                .await?
                .text),
            "execute_query" => self.execute_query(&args).await,
            _ => unreachable!("gated by TOOL_NAMES"),
        }
    }

    async fn list_services(&self, args: &Value) -> Result<String> {
        let filter = ServiceFilter {
            time_range: opt_u64(args, "time_range_ms").map(Duration::from_millis),
            source: opt_str(args, "source").and_then(|s| Source::parse(&s)),
            name: opt_str(args, "name"),
        };
        let services = self.surface.list_services(&filter).await?;

        let mut text = String::new();
        writeln!(text, "{} services", services.len()).ok();
        for service in services {
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
        Ok(text)
    }

    async fn get_metric_percentile(&self, args: &Value) -> Result<String> {
        let service = require_str(args, "service")?;
        let metric = require_str(args, "metric")?;
        let percentile = args
            .get("percentile")
            .and_then(Value::as_f64)
            .ok_or_else(|| Error::malformed("missing numeric argument: percentile"))?;
        let time_range_ms = opt_u64(args, "time_range_ms").unwrap_or(3_600_000);

        let value_ns = self
            .surface
            .get_metric_percentile(&service, &metric, percentile, time_range_ms)
            .await?;
        Ok(format!(
            "p{:.0} {metric} for {service}: {:.3}ms ({value_ns:.0}ns)",
            percentile * 100.0,
            value_ns / 1_000_000.0
        ))
    }

    async fn get_service_activity(&self, args: &Value) -> Result<String> {
        let service = require_str(args, "service")?;
        let time_range_ms = opt_u64(args, "time_range_ms").unwrap_or(3_600_000);

        let activity = self
            .surface
            .get_service_activity(&service, time_range_ms)
            .await?;
        Ok(format!(
            "{}: {} requests, {} errors, last seen {}",
            activity.service_name,
            activity.request_count,
            activity.error_count,
            activity.last_seen
        ))
    }

    async fn list_service_activity(&self, args: &Value) -> Result<String> {
        let time_range_ms = opt_u64(args, "time_range_ms").unwrap_or(3_600_000);
        let records = self.surface.list_service_activity(time_range_ms).await?;

        let mut text = String::new();
        writeln!(text, "{} active services", records.len()).ok();
        for record in records {
            writeln!(
                text,
                "  {}: {} requests, {} errors",
                record.service_name, record.request_count, record.error_count
            )
            .ok();
        }
        Ok(text)
    }

    async fn execute_query(&self, args: &Value) -> Result<String> {
        let sql = require_str(args, "sql")?;
        let max_rows = opt_u64(args, "max_rows").unwrap_or(0) as u32;

        let result = self
            .surface
            .caps()
            .raw_query(&sql, max_rows, self.surface.max_raw_rows())
            .await?;

        let mut text = String::new();
        writeln!(text, "{}", result.columns.join(" | ")).ok();
        for row in &result.rows {
            writeln!(text, "{}", row.join(" | ")).ok();
        }
        if result.truncated {
            writeln!(text, "(truncated)").ok();
        }
        Ok(text)
    }
}

fn unified_request(args: &Value) -> UnifiedRequest {
    UnifiedRequest {
        time_range_ms: opt_u64(args, "time_range_ms").unwrap_or(0),
        service: opt_str(args, "service"),
        limit: opt_u64(args, "limit").unwrap_or(0) as u32,
    }
}

fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn opt_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

fn require_str(args: &Value, key: &str) -> Result<String> {
    opt_str(args, key).ok_or_else(|| Error::malformed(format!("missing argument: {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::query::test_support::test_surface;
    use crate::store::telemetry::sample_http_row;

    async fn registry_with_data() -> ToolRegistry {
        let (surface, db, _registry) = test_surface().await;
        db.upsert_http_batch("agent-1", &[sample_http_row("checkout", 200, 4)])
            .await
            .unwrap();
        ToolRegistry::new(surface, &[])
    }

    #[tokio::test]
    async fn invoke_list_services() {
        let tools = registry_with_data().await;
        let text = tools.invoke("list_services", "{}").await.unwrap();
        assert!(text.contains("checkout"));
        assert!(text.contains("OBSERVED"));
    }

    #[tokio::test]
    async fn invoke_execute_query_is_guarded() {
        let tools = registry_with_data().await;

        let text = tools
            .invoke(
                "execute_query",
                r#"{"sql": "SELECT service_name FROM http_metrics"}"#,
            )
            .await
            .unwrap();
        assert!(text.contains("checkout"));

        let err = tools
            .invoke("execute_query", r#"{"sql": "DELETE FROM http_metrics"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRequest);
    }

    #[tokio::test]
    async fn unknown_and_disabled_tools_are_not_found() {
        let tools = registry_with_data().await;
        let err = tools.invoke("drop_all_tables", "{}").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let (surface, _db, _registry) = test_surface().await;
        let restricted = ToolRegistry::new(surface, &["list_services".to_string()]);
        assert_eq!(restricted.list_tools(), vec!["list_services"]);

        let err = restricted
            .invoke("execute_query", r#"{"sql": "SELECT 1"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn missing_arguments_are_malformed() {
        let tools = registry_with_data().await;
        let err = tools
            .invoke("get_metric_percentile", r#"{"service": "checkout"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRequest);
    }
}
