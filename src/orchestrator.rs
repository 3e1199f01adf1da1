//! Capture lifecycle: `Created -> Capturing -> Finalized`
//!
//! The orchestrator owns the session, the engine and the export pipeline.
//! `finalize` is one-shot and infallible: it stops the hooks, snapshots the
//! call list and writes every artifact it can.

use crate::config::TracerConfig;
use crate::engine::TraceEngine;
use crate::export::{ExportFailure, ExportPipeline};
use crate::hub::Hub;
use crate::session::Session;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Created,
    Capturing,
    Finalized,
}

/// What `finalize` produced
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeReport {
    pub session_id: String,
    pub output_dir: PathBuf,
    pub calls: usize,
    pub written: Vec<PathBuf>,
    pub failures: Vec<ExportFailure>,
}

impl FinalizeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Orchestrator {
    config: TracerConfig,
    session: Session,
    output_dir: PathBuf,
    engine: Arc<TraceEngine>,
    pipeline: ExportPipeline,
    state: Mutex<OrchestratorState>,
    report: Mutex<Option<FinalizeReport>>,
}

impl Orchestrator {
    /// Resolve the output directory and allocate the session
    pub fn new(config: TracerConfig) -> Self {
        let output_dir = resolve_output_dir(&config.output_dir);
        let session = Session::new();
        let engine = Arc::new(TraceEngine::new(config.governor()).with_filter(config.site_filter()));
        info!(
            "callmap session {} created, artifacts go to {}",
            session.session_id,
            output_dir.display()
        );

        Self {
            config,
            session,
            output_dir,
            engine,
            pipeline: ExportPipeline::standard(),
            state: Mutex::new(OrchestratorState::Created),
            report: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn engine(&self) -> &Arc<TraceEngine> {
        &self.engine
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether new call sites are still being admitted
    pub fn enabled(&self) -> bool {
        self.state() == OrchestratorState::Capturing && self.engine.is_enabled()
    }

    /// Activate the hooks; no-op unless `Created`
    pub fn start(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == OrchestratorState::Created {
            self.engine.start();
            *state = OrchestratorState::Capturing;
            info!("callmap capture started");
        }
    }

    /// Hub view over this session's live call list
    pub fn hub(&self) -> Hub {
        Hub::new(
            Arc::clone(&self.engine),
            self.session.clone(),
            self.config.correlation_id.clone(),
        )
    }

    /// Stop capture and write all artifacts
    ///
    /// Later calls return the first report without exporting again.
    pub fn finalize(&self) -> FinalizeReport {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cached = self.report.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(report) = cached.as_ref() {
            return report.clone();
        }

        self.engine.stop();
        *state = OrchestratorState::Finalized;

        let records = self.engine.snapshot();
        if let Err(e) = fs::create_dir_all(&self.output_dir) {
            warn!("cannot create {}: {}", self.output_dir.display(), e);
        }
        let export = self.pipeline.write_all(&self.session, &records, &self.output_dir);

        let stats = self.engine.stats();
        info!(
            "callmap finalized: {} calls ({} coalesced, {} rejected), {} artifacts written, {} failed",
            records.len(),
            stats.coalesced,
            stats.rejected,
            export.written.len(),
            export.failures.len()
        );

        let report = FinalizeReport {
            session_id: self.session.session_id.clone(),
            output_dir: self.output_dir.clone(),
            calls: records.len(),
            written: export.written,
            failures: export.failures,
        };
        *cached = Some(report.clone());
        report
    }
}

/// Directory used when the configured one is unusable
pub fn fallback_output_dir() -> PathBuf {
    std::env::temp_dir().join("callmap")
}

/// Use `configured` if it can be created and written, else the temp fallback
fn resolve_output_dir(configured: &Path) -> PathBuf {
    match probe_writable(configured) {
        Ok(()) => configured.to_path_buf(),
        Err(e) => {
            let fallback = fallback_output_dir();
            warn!(
                "output directory {} is unusable ({}), falling back to {}",
                configured.display(),
                e,
                fallback.display()
            );
            if let Err(e) = fs::create_dir_all(&fallback) {
                warn!("cannot create fallback {}: {}", fallback.display(), e);
            }
            fallback
        }
    }
}

fn probe_writable(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let probe = dir.join(format!(".callmap_probe_{}", std::process::id()));
    fs::write(&probe, b"")?;
    fs::remove_file(&probe)
}

static GLOBAL: OnceLock<Option<Orchestrator>> = OnceLock::new();

/// Start the process-wide orchestrator if `CALLMAP_TRACE_ENABLED` is set
///
/// Only the first call reads the environment.
pub fn auto_start() -> Option<&'static Orchestrator> {
    GLOBAL
        .get_or_init(|| {
            let config = TracerConfig::from_env();
            if !config.enabled {
                return None;
            }
            let orchestrator = Orchestrator::new(config);
            orchestrator.start();
            Some(orchestrator)
        })
        .as_ref()
}

/// The process-wide orchestrator, if `auto_start` created one
pub fn global() -> Option<&'static Orchestrator> {
    GLOBAL.get().and_then(Option::as_ref)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::Artifact;
    use crate::record::CallSite;
    use tempfile::TempDir;

    fn config(dir: &Path) -> TracerConfig {
        TracerConfig {
            output_dir: dir.to_path_buf(),
            ..TracerConfig::default()
        }
    }

    #[test]
    fn test_lifecycle() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(config(dir.path()));
        assert_eq!(orchestrator.state(), OrchestratorState::Created);
        assert!(!orchestrator.enabled());

        orchestrator.start();
        assert_eq!(orchestrator.state(), OrchestratorState::Capturing);
        assert!(orchestrator.enabled());

        let engine = orchestrator.engine();
        engine.trace(&CallSite::new("run", "app", "/app.rs", 1), &[], || ());

        let report = orchestrator.finalize();
        assert_eq!(orchestrator.state(), OrchestratorState::Finalized);
        assert_eq!(report.calls, 1);
        assert_eq!(report.written.len(), Artifact::ALL.len());
        assert!(report.is_complete());
        assert!(!engine.is_capturing());

        // start after finalize stays finalized
        orchestrator.start();
        assert_eq!(orchestrator.state(), OrchestratorState::Finalized);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(config(dir.path()));
        orchestrator.start();
        let first = orchestrator.finalize();
        let second = orchestrator.finalize();
        assert_eq!(first, second);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 11);
    }

    #[test]
    fn test_finalize_without_start() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(config(dir.path()));
        let report = orchestrator.finalize();
        assert_eq!(report.calls, 0);
        assert_eq!(report.written.len(), 11);
    }

    #[test]
    fn test_events_after_finalize_are_ignored() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(config(dir.path()));
        orchestrator.start();
        orchestrator.finalize();
        orchestrator
            .engine()
            .trace(&CallSite::new("late", "app", "/app.rs", 9), &[], || ());
        assert!(orchestrator.engine().is_empty());
    }

    #[test]
    fn test_unwritable_output_dir_falls_back() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "not a directory").unwrap();

        let orchestrator = Orchestrator::new(config(&blocker.join("traces")));
        assert_eq!(orchestrator.output_dir(), fallback_output_dir());
    }

    #[test]
    fn test_files_are_prefixed_by_session() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(config(dir.path()));
        let report = orchestrator.finalize();
        let prefix = format!("{}_", orchestrator.session().session_id);
        for path in &report.written {
            let name = path.file_name().unwrap().to_string_lossy();
            assert!(name.starts_with(&prefix), "{name}");
        }
    }

    #[test]
    fn test_hub_sees_live_calls() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(TracerConfig {
            correlation_id: Some("corr".to_string()),
            ..config(dir.path())
        });
        orchestrator.start();
        orchestrator
            .engine()
            .trace(&CallSite::new("serve", "app", "/app.rs", 3), &[], || ());
        let doc = orchestrator.hub().trace_data();
        assert_eq!(doc.correlation_id, "corr");
        assert_eq!(doc.calls.len(), 2);
    }
}
