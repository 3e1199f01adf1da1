//! Callmap - in-process call-tree capture with protocol detection
//!
//! Instrumented functions report entry, return and failure to a
//! [`TraceEngine`]. Each recorded call carries the protocol evidence found in
//! its local bindings (SQL, Kafka, gRPC, WebSocket and fifteen more). On
//! finalize the [`Orchestrator`] renders eleven artifacts from the captured
//! call list: performance and flame graph JSON, SQL and distributed analyses,
//! live metrics, PlantUML, Mermaid, D2 and ASCII diagrams, and two
//! plain-language summaries.
//!
//! ```no_run
//! use callmap::{call_site, locals, Orchestrator, TracerConfig};
//!
//! let orchestrator = Orchestrator::new(TracerConfig::default());
//! orchestrator.start();
//!
//! let engine = orchestrator.engine();
//! let query = "SELECT * FROM users";
//! engine.trace(&call_site!("fetch_users"), locals![query], || {
//!     // ...
//! });
//!
//! let report = orchestrator.finalize();
//! println!("{} artifacts in {}", report.written.len(), report.output_dir.display());
//! ```

pub mod cli;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod export;
pub mod governor;
pub mod hub;
pub mod orchestrator;
pub mod patterns;
pub mod record;
pub mod session;
pub mod trace_json;

pub use config::{SiteFilter, TracerConfig};
pub use detector::{Local, ProtocolDetector};
pub use engine::{CallGuard, EngineStats, TraceEngine};
pub use error::{CallmapError, Result};
pub use export::{Artifact, ExportPipeline, ExportReport, Renderer};
pub use governor::{GovernorConfig, MemoryGovernor};
pub use hub::Hub;
pub use orchestrator::{auto_start, FinalizeReport, Orchestrator, OrchestratorState};
pub use record::{CallId, CallRecord, CallSite, Evidence, InvocationType, ProtocolKind};
pub use session::Session;
pub use trace_json::{TraceDocument, TraceEvent};
