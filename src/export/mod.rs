//! Export pipeline: eleven renderers over one finalized call list
//!
//! Every renderer reads the same `ExportContext` (session, records and a
//! pre-built `ArchitectureMap`) and produces one artifact as a `String`.
//! The pipeline isolates failures per renderer: an `Err` or a panic in one
//! renderer is logged and reported, and the remaining renderers still run.

mod ascii;
mod d2;
mod distributed;
mod flamegraph;
mod live_metrics;
mod llm_summary;
mod markdown;
mod mermaid;
mod performance;
mod plantuml;
mod sql;

pub use ascii::AsciiRenderer;
pub use d2::D2Renderer;
pub use distributed::DistributedRenderer;
pub use flamegraph::FlamegraphRenderer;
pub use live_metrics::{LiveMetricsRenderer, WINDOW_SECONDS};
pub use llm_summary::LlmSummaryRenderer;
pub use markdown::MarkdownRenderer;
pub use mermaid::MermaidRenderer;
pub use performance::{function_metrics, FunctionMetric, PerformanceRenderer};
pub use plantuml::{escape_puml, PlantUmlRenderer};
pub use sql::SqlRenderer;

use crate::error::{CallmapError, Result};
use crate::record::{CallId, CallRecord, ProtocolKind};
use crate::session::Session;
use fnv::{FnvHashMap, FnvHashSet};
use regex::Regex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// The eleven artifacts written per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Artifact {
    Performance,
    Flamegraph,
    SqlAnalysis,
    LiveMetrics,
    Distributed,
    PlantUml,
    Markdown,
    LlmSummary,
    Mermaid,
    D2,
    Ascii,
}

impl Artifact {
    pub const ALL: [Artifact; 11] = [
        Artifact::Performance,
        Artifact::Flamegraph,
        Artifact::SqlAnalysis,
        Artifact::LiveMetrics,
        Artifact::Distributed,
        Artifact::PlantUml,
        Artifact::Markdown,
        Artifact::LlmSummary,
        Artifact::Mermaid,
        Artifact::D2,
        Artifact::Ascii,
    ];

    /// File name suffix appended to `{session_id}_`
    pub fn suffix(self) -> &'static str {
        match self {
            Artifact::Performance => "performance.json",
            Artifact::Flamegraph => "flamegraph.json",
            Artifact::SqlAnalysis => "sql_analysis.json",
            Artifact::LiveMetrics => "live_metrics.json",
            Artifact::Distributed => "distributed_analysis.json",
            Artifact::PlantUml => "sequence.puml",
            Artifact::Markdown => "summary.md",
            Artifact::LlmSummary => "llm_summary.txt",
            Artifact::Mermaid => "architecture.mmd",
            Artifact::D2 => "architecture.d2",
            Artifact::Ascii => "ascii.txt",
        }
    }

    pub fn is_json(self) -> bool {
        self.suffix().ends_with(".json")
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Read-only input shared by all renderers
#[derive(Debug)]
pub struct ExportContext<'a> {
    pub session: &'a Session,
    pub records: &'a [CallRecord],
    pub map: ArchitectureMap,
}

impl<'a> ExportContext<'a> {
    pub fn new(session: &'a Session, records: &'a [CallRecord]) -> Self {
        Self {
            session,
            records,
            map: ArchitectureMap::build(records),
        }
    }

    /// Frameworks seen on any record, first-seen order
    pub fn frameworks(&self) -> Vec<&'a str> {
        let mut seen = Vec::new();
        for record in self.records {
            if let Some(framework) = record.framework.as_deref() {
                if !seen.contains(&framework) {
                    seen.push(framework);
                }
            }
        }
        seen
    }

    /// Evidence count per detected protocol, in `ProtocolKind::ALL` order
    pub fn protocol_counts(&self) -> Vec<(ProtocolKind, usize)> {
        ProtocolKind::ALL
            .iter()
            .map(|&p| {
                let count = self.records.iter().map(|r| r.evidence_for(p).count()).sum();
                (p, count)
            })
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// Visits including coalesced repeats
    pub fn total_visits(&self) -> u64 {
        self.records.iter().map(CallRecord::total_visits).sum()
    }
}

/// One output representation of the call list
pub trait Renderer: Send + Sync {
    fn artifact(&self) -> Artifact;
    fn render(&self, ctx: &ExportContext<'_>) -> Result<String>;
}

/// Module-to-module call edge
#[derive(Debug, Clone, PartialEq)]
pub struct CallEdge {
    pub from: String,
    pub to: String,
    /// Function of the first call seen on this edge
    pub function: String,
    pub count: u64,
}

/// Module-to-protocol edge inferred from evidence
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolEdge {
    pub module: String,
    pub protocol: ProtocolKind,
    pub count: u64,
}

/// Module graph derived once per export
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchitectureMap {
    /// Modules in first-seen order, with visit counts
    pub modules: Vec<(String, u64)>,
    pub call_edges: Vec<CallEdge>,
    pub protocol_edges: Vec<ProtocolEdge>,
    /// Diagram node id per module, unique across modules and protocol nodes
    pub module_ids: FnvHashMap<String, String>,
}

impl ArchitectureMap {
    pub fn build(records: &[CallRecord]) -> Self {
        let mut map = ArchitectureMap::default();
        let mut module_index: FnvHashMap<&str, usize> = FnvHashMap::default();
        let mut call_index: FnvHashMap<(&str, &str), usize> = FnvHashMap::default();
        let mut protocol_index: FnvHashMap<(&str, ProtocolKind), usize> = FnvHashMap::default();
        let by_id: FnvHashMap<CallId, &CallRecord> =
            records.iter().map(|r| (r.call_id, r)).collect();

        for record in records {
            let module = record.module.as_str();
            match module_index.get(module) {
                Some(&i) => map.modules[i].1 += record.total_visits(),
                None => {
                    module_index.insert(module, map.modules.len());
                    map.modules.push((module.to_string(), record.total_visits()));
                }
            }

            if let Some(parent) = record.parent_id.and_then(|id| by_id.get(&id)) {
                let from = parent.module.as_str();
                if from != module {
                    match call_index.get(&(from, module)) {
                        Some(&i) => map.call_edges[i].count += record.total_visits(),
                        None => {
                            call_index.insert((from, module), map.call_edges.len());
                            map.call_edges.push(CallEdge {
                                from: from.to_string(),
                                to: module.to_string(),
                                function: record.function_name.clone(),
                                count: record.total_visits(),
                            });
                        }
                    }
                }
            }

            for evidence in &record.evidence {
                match protocol_index.get(&(module, evidence.protocol)) {
                    Some(&i) => map.protocol_edges[i].count += 1,
                    None => {
                        protocol_index.insert((module, evidence.protocol), map.protocol_edges.len());
                        map.protocol_edges.push(ProtocolEdge {
                            module: module.to_string(),
                            protocol: evidence.protocol,
                            count: 1,
                        });
                    }
                }
            }
        }

        map.assign_module_ids();
        map
    }

    /// Sanitised ids collide (`billing.api` and `billing-api`), so later
    /// modules get a numeric suffix
    fn assign_module_ids(&mut self) {
        let mut taken: FnvHashSet<String> = ProtocolKind::ALL
            .iter()
            .map(|p| p.node_id().to_string())
            .collect();
        // reserved in Mermaid flowcharts
        taken.insert("end".to_string());

        for (module, _) in &self.modules {
            let base = node_id(module);
            let mut id = base.clone();
            let mut n = 2;
            while taken.contains(&id.to_ascii_lowercase()) {
                id = format!("{base}_{n}");
                n += 1;
            }
            taken.insert(id.to_ascii_lowercase());
            self.module_ids.insert(module.clone(), id);
        }
    }

    /// Node id of `module` in every diagram
    pub fn module_id(&self, module: &str) -> String {
        self.module_ids
            .get(module)
            .cloned()
            .unwrap_or_else(|| node_id(module))
    }

    /// Distinct protocols on any edge, in `ProtocolKind::ALL` order
    pub fn protocols(&self) -> Vec<ProtocolKind> {
        ProtocolKind::ALL
            .iter()
            .copied()
            .filter(|p| self.protocol_edges.iter().any(|e| e.protocol == *p))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

static NON_IDENT: OnceLock<Option<Regex>> = OnceLock::new();

/// Diagram-safe identifier: `myapp::database` -> `myapp__database`
pub fn node_id(name: &str) -> String {
    let re = NON_IDENT.get_or_init(|| Regex::new(r"[^A-Za-z0-9_]").ok());
    let mut id = match re {
        Some(re) => re.replace_all(name, "_").into_owned(),
        None => name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect(),
    };
    if id.is_empty() || id.starts_with(|c: char| c.is_ascii_digit()) {
        id.insert_str(0, "m_");
    }
    id
}

/// Failure of one artifact during `write_all`
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFailure {
    pub artifact: Artifact,
    pub reason: String,
}

/// Outcome of writing the artifact set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportReport {
    pub written: Vec<PathBuf>,
    pub failures: Vec<ExportFailure>,
}

impl ExportReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct ExportPipeline {
    renderers: Vec<Box<dyn Renderer>>,
}

impl fmt::Debug for ExportPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.renderers.iter().map(|r| r.artifact()))
            .finish()
    }
}

impl Default for ExportPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl ExportPipeline {
    /// All eleven renderers
    pub fn standard() -> Self {
        Self::with_renderers(vec![
            Box::new(PerformanceRenderer),
            Box::new(FlamegraphRenderer),
            Box::new(SqlRenderer),
            Box::new(LiveMetricsRenderer),
            Box::new(DistributedRenderer),
            Box::new(PlantUmlRenderer),
            Box::new(MarkdownRenderer),
            Box::new(LlmSummaryRenderer),
            Box::new(MermaidRenderer),
            Box::new(D2Renderer),
            Box::new(AsciiRenderer),
        ])
    }

    pub fn with_renderers(renderers: Vec<Box<dyn Renderer>>) -> Self {
        Self { renderers }
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.renderers.iter().map(|r| r.artifact()).collect()
    }

    /// Render a single artifact without touching the filesystem
    pub fn render(&self, artifact: Artifact, session: &Session, records: &[CallRecord]) -> Result<String> {
        let renderer = self
            .renderers
            .iter()
            .find(|r| r.artifact() == artifact)
            .ok_or_else(|| CallmapError::render(artifact.suffix(), "no renderer registered"))?;
        let ctx = ExportContext::new(session, records);
        run_isolated(renderer.as_ref(), &ctx)
    }

    /// Render every artifact into `dir`, continuing past failures
    pub fn write_all(&self, session: &Session, records: &[CallRecord], dir: &Path) -> ExportReport {
        let ctx = ExportContext::new(session, records);
        let mut report = ExportReport::default();

        for renderer in &self.renderers {
            let artifact = renderer.artifact();
            let path = dir.join(session.artifact_file_name(artifact.suffix()));
            let outcome = run_isolated(renderer.as_ref(), &ctx)
                .and_then(|content| std::fs::write(&path, content).map_err(CallmapError::from));

            match outcome {
                Ok(()) => {
                    tracing::debug!("wrote {}", path.display());
                    report.written.push(path);
                }
                Err(err) => {
                    tracing::warn!("export of {} failed: {}", artifact, err);
                    report.failures.push(ExportFailure {
                        artifact,
                        reason: err.to_string(),
                    });
                }
            }
        }

        report
    }
}

fn run_isolated(renderer: &dyn Renderer, ctx: &ExportContext<'_>) -> Result<String> {
    match panic::catch_unwind(AssertUnwindSafe(|| renderer.render(ctx))) {
        Ok(result) => result,
        Err(_) => Err(CallmapError::render(renderer.artifact().suffix(), "renderer panicked")),
    }
}

/// Serialize a renderer's JSON document
pub(crate) fn to_json<T: serde::Serialize>(artifact: Artifact, value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| CallmapError::render(artifact.suffix(), e))
}


#[cfg(test)]
mod tests {
    use super::fixtures::{records, session};
    use super::*;

    struct Broken;

    impl Renderer for Broken {
        fn artifact(&self) -> Artifact {
            Artifact::Performance
        }
        fn render(&self, _: &ExportContext<'_>) -> Result<String> {
            Err(CallmapError::render("performance.json", "boom"))
        }
    }

    struct Panics;

    impl Renderer for Panics {
        fn artifact(&self) -> Artifact {
            Artifact::Flamegraph
        }
        fn render(&self, _: &ExportContext<'_>) -> Result<String> {
            panic!("renderer bug")
        }
    }

    #[test]
    fn test_artifact_suffixes_are_unique() {
        let mut suffixes: Vec<_> = Artifact::ALL.iter().map(|a| a.suffix()).collect();
        suffixes.sort_unstable();
        suffixes.dedup();
        assert_eq!(suffixes.len(), 11);
        assert_eq!(ExportPipeline::standard().artifacts(), Artifact::ALL.to_vec());
    }

    #[test]
    fn test_write_all_with_zero_records() {
        let dir = tempfile::tempdir().unwrap();
        let report = ExportPipeline::standard().write_all(&session(), &[], dir.path());
        assert!(report.is_complete(), "{:?}", report.failures);
        assert_eq!(report.written.len(), 11);
        for path in &report.written {
            assert!(path.exists());
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("session_test_"));
            if name.ends_with(".json") {
                let text = std::fs::read_to_string(path).unwrap();
                serde_json::from_str::<serde_json::Value>(&text).unwrap();
            }
        }
    }

    #[test]
    fn test_failures_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ExportPipeline::with_renderers(vec![
            Box::new(Broken),
            Box::new(Panics),
            Box::new(SqlRenderer),
        ]);
        let report = pipeline.write_all(&session(), &records(), dir.path());
        assert_eq!(report.written.len(), 1);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[1].artifact, Artifact::Flamegraph);
        assert!(report.failures[1].reason.contains("panicked"));
    }

    #[test]
    fn test_unwritable_dir_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does/not/exist");
        let report = ExportPipeline::standard().write_all(&session(), &[], &missing);
        assert!(report.written.is_empty());
        assert_eq!(report.failures.len(), 11);
    }

    #[test]
    fn test_architecture_map_edges() {
        let map = ArchitectureMap::build(&records());
        assert_eq!(map.modules.len(), 3);
        assert_eq!(map.call_edges.len(), 2);
        assert_eq!(map.call_edges[0].from, "myapp::database");
        assert_eq!(map.call_edges[0].to, "myapp::websocket");
        assert_eq!(map.call_edges[0].function, "send_message");
        assert_eq!(
            map.protocols(),
            vec![ProtocolKind::Sql, ProtocolKind::WebSocket, ProtocolKind::Kafka]
        );
    }

    #[test]
    fn test_architecture_map_counts_coalesced_visits() {
        let mut records = records();
        records[1].coalesced_visits = 4;
        let map = ArchitectureMap::build(&records);
        assert_eq!(map.call_edges[0].count, 5);
        assert_eq!(map.modules[1], ("myapp::websocket".to_string(), 5));
    }

    #[test]
    fn test_module_ids_are_unique() {
        let mut records = records();
        records[0].module = "billing.api".to_string();
        records[1].module = "billing-api".to_string();
        records[2].module = "proto_kafka".to_string();
        let map = ArchitectureMap::build(&records);

        assert_eq!(map.module_id("billing.api"), "billing_api");
        assert_eq!(map.module_id("billing-api"), "billing_api_2");
        assert_eq!(map.module_id("proto_kafka"), "proto_kafka_2");
        let ids: FnvHashSet<String> = map.module_ids.values().cloned().collect();
        assert_eq!(ids.len(), 3);
        let edge = &map.call_edges[0];
        assert_ne!(map.module_id(&edge.from), map.module_id(&edge.to));
    }

    #[test]
    fn test_node_id_sanitizes() {
        assert_eq!(node_id("myapp.database"), "myapp_database");
        assert_eq!(node_id("myapp::api"), "myapp__api");
        assert_eq!(node_id("9lives"), "m_9lives");
        assert_eq!(node_id(""), "m_");
        assert_eq!(node_id("\";@enduml;@startuml"), "___enduml__startuml");
    }

    #[test]
    fn test_render_single_artifact() {
        let content = ExportPipeline::standard()
            .render(Artifact::Mermaid, &session(), &records())
            .unwrap();
        assert!(content.starts_with("graph TD"));
    }
}
