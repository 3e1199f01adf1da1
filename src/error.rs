//! Error types for the callmap library
//!
//! Capture hooks never return these: failures inside `on_enter`/`on_return`
//! are swallowed and logged. Errors only surface from configuration loading,
//! trace replay, hub commands and individual renderers.

use thiserror::Error;

/// Errors produced by callmap library operations
#[derive(Error, Debug)]
pub enum CallmapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Renderer {artifact} failed: {reason}")]
    Render { artifact: String, reason: String },

    #[error("Unknown hub command: {0}")]
    UnknownCommand(String),

    #[error("Unsupported diagram format: {0} (expected plantuml or mermaid)")]
    UnsupportedFormat(String),
}

/// Result type for callmap operations
pub type Result<T> = std::result::Result<T, CallmapError>;

impl CallmapError {
    /// Build a renderer failure for the named artifact
    pub fn render(artifact: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        CallmapError::Render {
            artifact: artifact.into(),
            reason: reason.to_string(),
        }
    }
}
