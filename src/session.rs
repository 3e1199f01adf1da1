//! Process-wide session metadata
//!
//! A session is created once per orchestrator and never changes afterwards.
//! Its id prefixes every exported artifact.

use crate::record::unix_time;
use nix::unistd::getppid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub process_id: u32,
    pub parent_process_id: u32,
    /// Unix time in seconds
    pub created_at: f64,
}

impl Session {
    /// Allocate a session for the current process
    pub fn new() -> Self {
        let created_at = unix_time();
        let session_id = format!(
            "session_{}_{:08x}",
            created_at as u64,
            rand::random::<u32>()
        );
        Self::with_id(session_id, created_at)
    }

    /// Session with a caller-chosen id (trace replay)
    pub fn with_id(session_id: impl Into<String>, created_at: f64) -> Self {
        Self {
            session_id: session_id.into(),
            process_id: std::process::id(),
            parent_process_id: getppid().as_raw() as u32,
            created_at,
        }
    }

    /// File name for an artifact: `{session_id}_{suffix}`
    pub fn artifact_file_name(&self, suffix: &str) -> String {
        format!("{}_{}", self.session_id, suffix)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
