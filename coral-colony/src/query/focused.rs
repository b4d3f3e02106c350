//! Focused queries: service listings, percentiles, activity.

use super::QuerySurface;
use crate::discovery::{DiscoveredService, ServiceFilter};
use crate::error::{Error, ErrorKind, Result};
use crate::store::telemetry::{ActivityRecord, Histogram, MetricTable};
use std::time::Duration;

impl QuerySurface {
    /// The reconciled service list (see the discovery engine for the
    /// source-attribution rules).
    pub async fn list_services(&self, filter: &ServiceFilter) -> Result<Vec<DiscoveredService>> {
        self.discovery().list_services(filter).await
    }

    /// Continuous quantile of a duration metric, in nanoseconds.
    ///
    /// `percentile` is a fraction in `[0, 1]`. An empty range is `NotFound`,
    /// never zero.
    pub async fn get_metric_percentile(
        &self,
        service: &str,
        metric: &str,
        percentile: f64,
        time_range_ms: u64,
    ) -> Result<f64> {
        if !(0.0..=1.0).contains(&percentile) {
            return Err(Error::malformed(format!(
                "percentile must be a fraction in [0, 1], got {percentile}"
            )));
        }

        let table = metric_table(metric)?;
        let range = Duration::from_millis(time_range_ms);
        let histograms = self.caps().duration_histograms(table, service, range).await?;

        merged_quantile(&histograms, percentile).ok_or_else(|| {
            Error::not_found(format!(
                "no {metric} data for service {service} in the last {time_range_ms}ms"
            ))
        })
    }

    /// Aggregated request activity for one service. `NotFound` when the
    /// service has no rows in range.
    pub async fn get_service_activity(
        &self,
        service: &str,
        time_range_ms: u64,
    ) -> Result<ActivityRecord> {
        let range = Duration::from_millis(time_range_ms);
        let mut records = self.caps().service_activity(Some(service), range).await?;

        records.pop().ok_or_else(|| {
            Error::not_found(format!(
                "no activity for service {service} in the last {time_range_ms}ms"
            ))
        })
    }

    /// Activity of every service seen in range, busiest first.
    pub async fn list_service_activity(&self, time_range_ms: u64) -> Result<Vec<ActivityRecord>> {
        let range = Duration::from_millis(time_range_ms);
        self.caps().service_activity(None, range).await
    }
}

/// Map a metric name onto its histogram table.
fn metric_table(metric: &str) -> Result<MetricTable> {
    match metric {
        "http.server.duration" => Ok(MetricTable::Http),
        "grpc.server.duration" | "rpc.server.duration" => Ok(MetricTable::Grpc),
        "sql.client.duration" | "db.client.operation.duration" => Ok(MetricTable::Sql),
        other => Err(Error::with_cause(
            ErrorKind::MalformedRequest,
            format!("unknown duration metric: {other}"),
        )),
    }
}

/// Continuous quantile over merged per-bucket histograms.
///
/// Buckets carry non-cumulative counts. The quantile interpolates linearly
/// inside the bucket containing the target rank; the overflow bucket
/// reports its lower edge (there is nothing to interpolate against).
fn merged_quantile(histograms: &[Histogram], fraction: f64) -> Option<f64> {
    let mut buckets: Vec<(f64, u64)> = Vec::new();
    for histogram in histograms {
        for cell in histogram {
            match buckets
                .iter_mut()
                .find(|(bound, _)| *bound == cell.upper_bound_ns)
            {
                Some((_, count)) => *count += cell.count,
                None => buckets.push((cell.upper_bound_ns, cell.count)),
            }
        }
    }
    buckets.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let total: u64 = buckets.iter().map(|(_, count)| count).sum();
    if total == 0 {
        return None;
    }

    let target = fraction * total as f64;
    let mut previous_bound = 0.0_f64;
    let mut cumulative = 0_u64;

    for (bound, count) in &buckets {
        let next_cumulative = cumulative + count;
        if next_cumulative as f64 >= target {
            if bound.is_infinite() {
                return Some(previous_bound);
            }
            let within = if *count == 0 {
                1.0
            } else {
                ((target - cumulative as f64) / *count as f64).clamp(0.0, 1.0)
            };
            return Some(previous_bound + (bound - previous_bound) * within);
        }
        cumulative = next_cumulative;
        if bound.is_finite() {
            previous_bound = *bound;
        }
    }

    Some(previous_bound)
}
