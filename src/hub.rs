//! Command surface for the multi-client coordination hub
//!
//! The hub relays JSON requests from editor clients. Each request names a
//! command; every response is a JSON object, and failures come back as
//! `{"error": "..."}` instead of tearing down the connection.

use crate::engine::TraceEngine;
use crate::error::{CallmapError, Result};
use crate::export::{Artifact, ExportPipeline};
use crate::session::Session;
use crate::trace_json::TraceDocument;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct Request {
    command: String,
    #[serde(default)]
    args: Value,
}

/// Answers hub commands against a live engine
pub struct Hub {
    engine: Arc<TraceEngine>,
    session: Session,
    correlation_id: Option<String>,
    pipeline: ExportPipeline,
}

impl Hub {
    pub fn new(engine: Arc<TraceEngine>, session: Session, correlation_id: Option<String>) -> Self {
        Self {
            engine,
            session,
            correlation_id,
            pipeline: ExportPipeline::standard(),
        }
    }

    /// Current call list as a trace document
    pub fn trace_data(&self) -> TraceDocument {
        let records = self.engine.snapshot();
        TraceDocument::from_records(&self.session, &records, self.correlation_id.as_deref())
    }

    /// Render one diagram from the current call list
    pub fn export_diagram(&self, format: &str) -> Result<String> {
        let artifact = match format.to_ascii_lowercase().as_str() {
            "plantuml" | "puml" => Artifact::PlantUml,
            "mermaid" | "mmd" => Artifact::Mermaid,
            _ => return Err(CallmapError::UnsupportedFormat(format.to_string())),
        };
        let records = self.engine.snapshot();
        self.pipeline.render(artifact, &self.session, &records)
    }

    /// Handle one raw request and produce the raw response
    pub fn handle(&self, request: &str) -> String {
        let response = match self.dispatch(request) {
            Ok(value) => value,
            Err(e) => {
                debug!("hub request failed: {}", e);
                json!({ "error": e.to_string() })
            }
        };
        response.to_string()
    }

    fn dispatch(&self, request: &str) -> Result<Value> {
        let request: Request = serde_json::from_str(request)?;
        match request.command.as_str() {
            "get_trace_data" => Ok(serde_json::to_value(self.trace_data())?),
            "export_diagram" => {
                let format = request
                    .args
                    .get("format")
                    .and_then(Value::as_str)
                    .unwrap_or("plantuml");
                let content = self.export_diagram(format)?;
                Ok(json!({ "format": format, "content": content }))
            }
            other => Err(CallmapError::UnknownCommand(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::GovernorConfig;
    use crate::locals;
    use crate::record::CallSite;

    fn hub() -> Hub {
        let engine = Arc::new(TraceEngine::new(GovernorConfig::default()));
        engine.start();
        let sql = "SELECT id FROM orders";
        engine.trace(&CallSite::new("list_orders", "shop::orders", "/shop/orders.rs", 12), locals![sql], || {
            engine.trace(&CallSite::new("load", "shop::db", "/shop/db.rs", 40), &[], || ());
        });
        Hub::new(engine, Session::with_id("session_hub", 1.0), Some("corr-9".to_string()))
    }

    fn call(hub: &Hub, request: &str) -> Value {
        serde_json::from_str(&hub.handle(request)).unwrap()
    }

    #[test]
    fn test_get_trace_data() {
        let response = call(&hub(), r#"{"command": "get_trace_data"}"#);
        assert_eq!(response["correlation_id"], "corr-9");
        assert_eq!(response["session_id"], "session_hub");
        let calls = response["calls"].as_array().unwrap();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0]["type"], "call");
        assert_eq!(calls[0]["function"], "list_orders");
    }

    #[test]
    fn test_export_diagram_matches_renderer() {
        let hub = hub();
        let response = call(&hub, r#"{"command": "export_diagram", "args": {"format": "mermaid"}}"#);
        assert_eq!(response["format"], "mermaid");
        assert_eq!(response["content"].as_str().unwrap(), hub.export_diagram("mermaid").unwrap());
        assert!(response["content"].as_str().unwrap().starts_with("graph TD"));

        let response = call(&hub, r#"{"command": "export_diagram", "args": {"format": "plantuml"}}"#);
        let content = response["content"].as_str().unwrap();
        assert!(content.starts_with("@startuml"));
        assert!(content.contains("proto_sql"));
    }

    #[test]
    fn test_errors_are_reported_in_band() {
        let hub = hub();
        let response = call(&hub, r#"{"command": "shutdown"}"#);
        assert!(response["error"].as_str().unwrap().contains("shutdown"));

        let response = call(&hub, r#"{"command": "export_diagram", "args": {"format": "svg"}}"#);
        assert!(response["error"].as_str().unwrap().contains("svg"));

        let response = call(&hub, "not json");
        assert!(response.get("error").is_some());
    }
}
