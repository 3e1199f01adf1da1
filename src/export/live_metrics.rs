//! Rolling-window request metrics
//!
//! The window covers the last `WINDOW_SECONDS` before the latest observed
//! timestamp. Throughput divides by the span actually covered by calls in
//! the window (at least one second), so short runs are not diluted by an
//! empty minute.

use super::{to_json, Artifact, ExportContext, Renderer};
use crate::error::Result;
use serde::Serialize;

pub const WINDOW_SECONDS: f64 = 60.0;

#[derive(Debug, Default, Serialize)]
struct Metrics {
    requests_per_sec: f64,
    avg_latency_ms: f64,
    error_rate_percent: f64,
    /// Calls still open at export time
    active_calls: usize,
    /// Visits across the whole session
    total_calls: u64,
}

#[derive(Debug, Serialize)]
struct LiveMetrics<'a> {
    session_id: &'a str,
    window_seconds: f64,
    metrics: Metrics,
}

#[derive(Debug, Clone, Copy)]
pub struct LiveMetricsRenderer;

impl Renderer for LiveMetricsRenderer {
    fn artifact(&self) -> Artifact {
        Artifact::LiveMetrics
    }

    fn render(&self, ctx: &ExportContext<'_>) -> Result<String> {
        let records = ctx.records;
        let latest = records
            .iter()
            .map(|r| r.end_time.unwrap_or(r.start_time))
            .fold(f64::NEG_INFINITY, f64::max);

        let mut metrics = Metrics {
            active_calls: records.iter().filter(|r| !r.is_closed()).count(),
            total_calls: ctx.total_visits(),
            ..Metrics::default()
        };

        if latest.is_finite() {
            let window_start = latest - WINDOW_SECONDS;
            let in_window: Vec<_> = records
                .iter()
                .filter(|r| r.start_time >= window_start)
                .collect();

            let visits: u64 = in_window.iter().map(|r| r.total_visits()).sum();
            let earliest = in_window
                .iter()
                .map(|r| r.start_time)
                .fold(latest, f64::min);
            let span = (latest - earliest).clamp(1.0, WINDOW_SECONDS);

            let completed: Vec<_> = in_window.iter().filter(|r| r.is_closed()).collect();
            let completed_visits: u64 = completed.iter().map(|r| r.total_visits()).sum();
            let latency: f64 = completed.iter().map(|r| r.total_duration_ms()).sum();
            let failures: u64 = in_window.iter().map(|r| r.failures()).sum();

            metrics.requests_per_sec = visits as f64 / span;
            if completed_visits > 0 {
                metrics.avg_latency_ms = latency / completed_visits as f64;
            }
            if visits > 0 {
                metrics.error_rate_percent = failures as f64 * 100.0 / visits as f64;
            }
        }

        let live = LiveMetrics {
            session_id: &ctx.session.session_id,
            window_seconds: WINDOW_SECONDS,
            metrics,
        };
        to_json(self.artifact(), &live)
    }
}
