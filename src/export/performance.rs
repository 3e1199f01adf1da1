//! Per-function timing aggregate

use super::{to_json, Artifact, ExportContext, Renderer};
use crate::error::Result;
use crate::record::CallRecord;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

/// Aggregate timing of one function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionMetric {
    pub function: String,
    pub module: String,
    pub file: String,
    /// Visits, including coalesced repeats
    pub call_count: u64,
    pub total_time_ms: f64,
    pub avg_time_ms: f64,
    pub min_time_ms: f64,
    pub max_time_ms: f64,
    pub error_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PerformanceReport {
    session_id: String,
    total_calls: u64,
    function_metrics: Vec<FunctionMetric>,
}

/// Group records by (module, function, file), slowest total first
pub fn function_metrics(records: &[CallRecord]) -> Vec<FunctionMetric> {
    let mut index: FnvHashMap<(&str, &str, &str), usize> = FnvHashMap::default();
    let mut metrics: Vec<FunctionMetric> = Vec::new();

    for record in records {
        let key = (
            record.module.as_str(),
            record.function_name.as_str(),
            record.file_path.as_str(),
        );
        let slot = *index.entry(key).or_insert_with(|| {
            metrics.push(FunctionMetric {
                function: record.function_name.clone(),
                module: record.module.clone(),
                file: record.file_path.clone(),
                call_count: 0,
                total_time_ms: 0.0,
                avg_time_ms: 0.0,
                min_time_ms: f64::INFINITY,
                max_time_ms: 0.0,
                error_count: 0,
            });
            metrics.len() - 1
        });

        let metric = &mut metrics[slot];
        metric.call_count += record.total_visits();
        metric.total_time_ms += record.total_duration_ms();
        metric.error_count += record.failures();
        if let Some(duration) = record.duration_ms {
            metric.min_time_ms = metric.min_time_ms.min(duration);
            metric.max_time_ms = metric.max_time_ms.max(duration);
        }
    }

    for metric in &mut metrics {
        if !metric.min_time_ms.is_finite() {
            metric.min_time_ms = 0.0;
        }
        if metric.call_count > 0 {
            metric.avg_time_ms = metric.total_time_ms / metric.call_count as f64;
        }
    }

    metrics.sort_by(|a, b| {
        b.total_time_ms
            .total_cmp(&a.total_time_ms)
            .then_with(|| a.function.cmp(&b.function))
    });
    metrics
}

#[derive(Debug, Clone, Copy)]
pub struct PerformanceRenderer;

impl Renderer for PerformanceRenderer {
    fn artifact(&self) -> Artifact {
        Artifact::Performance
    }

    fn render(&self, ctx: &ExportContext<'_>) -> Result<String> {
        let report = PerformanceReport {
            session_id: ctx.session.session_id.clone(),
            total_calls: ctx.total_visits(),
            function_metrics: function_metrics(ctx.records),
        };
        to_json(self.artifact(), &report)
    }
}
