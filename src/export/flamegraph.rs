//! Hierarchical frame export for flame graph viewers

use super::{to_json, Artifact, ExportContext, Renderer};
use crate::error::Result;
use crate::record::CallId;
use fnv::FnvHashMap;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Frame<'a> {
    call_id: CallId,
    parent_id: Option<CallId>,
    name: &'a str,
    module: &'a str,
    depth: usize,
    start_time: f64,
    duration_ms: Option<f64>,
    /// Duration minus the duration of direct children, never negative
    self_time_ms: f64,
    visits: u64,
}

#[derive(Debug, Default, Serialize)]
struct Statistics {
    total_calls: usize,
    /// Sum over root frames
    total_duration_ms: f64,
    max_depth: usize,
}

#[derive(Debug, Serialize)]
struct Flamegraph<'a> {
    session_id: &'a str,
    frames: Vec<Frame<'a>>,
    statistics: Statistics,
}

#[derive(Debug, Clone, Copy)]
pub struct FlamegraphRenderer;

impl Renderer for FlamegraphRenderer {
    fn artifact(&self) -> Artifact {
        Artifact::Flamegraph
    }

    fn render(&self, ctx: &ExportContext<'_>) -> Result<String> {
        let mut child_time: FnvHashMap<CallId, f64> = FnvHashMap::default();
        for record in ctx.records {
            if let (Some(parent), Some(duration)) = (record.parent_id, record.duration_ms) {
                *child_time.entry(parent).or_default() += duration;
            }
        }

        let mut statistics = Statistics {
            total_calls: ctx.records.len(),
            ..Statistics::default()
        };

        let frames = ctx
            .records
            .iter()
            .map(|record| {
                let duration = record.duration_ms.unwrap_or(0.0);
                if record.parent_id.is_none() {
                    statistics.total_duration_ms += duration;
                }
                statistics.max_depth = statistics.max_depth.max(record.depth);
                let children = child_time.get(&record.call_id).copied().unwrap_or(0.0);

                Frame {
                    call_id: record.call_id,
                    parent_id: record.parent_id,
                    name: &record.function_name,
                    module: &record.module,
                    depth: record.depth,
                    start_time: record.start_time,
                    duration_ms: record.duration_ms,
                    self_time_ms: (duration - children).max(0.0),
                    visits: record.total_visits(),
                }
            })
            .collect();

        let graph = Flamegraph {
            session_id: &ctx.session.session_id,
            frames,
            statistics,
        };
        to_json(self.artifact(), &graph)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{records, session};
    use super::*;
    use crate::record::CallRecord;
    use serde_json::Value;

    fn render(records: &[CallRecord]) -> Value {
        let session = session();
        let ctx = ExportContext::new(&session, records);
        serde_json::from_str(&FlamegraphRenderer.render(&ctx).unwrap()).unwrap()
    }

    #[test]
    fn test_frames_and_statistics() {
        let data = render(&records());
        let frames = data["frames"].as_array().unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().any(|f| f["parent_id"].is_null()));
        assert!(frames.iter().any(|f| f["parent_id"] == "call_1"));

        let stats = &data["statistics"];
        assert_eq!(stats["total_calls"], 3);
        assert_eq!(stats["max_depth"], 1);
        assert!((stats["total_duration_ms"].as_f64().unwrap() - 500.0).abs() < 1e-6);
    }

    #[test]
    fn test_self_time_subtracts_children() {
        let data = render(&records());
        let root = &data["frames"][0];
        // 500 ms minus 200 ms and 100 ms spent in children
        assert!((root["self_time_ms"].as_f64().unwrap() - 200.0).abs() < 1e-3);
    }

    #[test]
    fn test_empty() {
        let data = render(&[]);
        assert!(data["frames"].as_array().unwrap().is_empty());
        assert_eq!(data["statistics"]["total_calls"], 0);
        assert_eq!(data["statistics"]["max_depth"], 0);
    }
}
