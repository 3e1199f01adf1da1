//! Trace document consumed by the animation renderer and the hub
//!
//! A document is a flat, timestamp-ordered list of `call`, `return` and
//! `error` events. Reading is lenient: events with missing or mistyped fields
//! are kept with placeholder values, events of unknown type are skipped, and
//! a `return` that matches no open call is ignored.

use crate::error::{CallmapError, Result};
use crate::record::{unix_time, CallId, CallRecord, CallSite, Evidence, InvocationType};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Placeholder for a missing module or function name
pub const UNKNOWN: &str = "<unknown>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Call,
    Return,
    Error,
}

impl EventType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "call" => Some(EventType::Call),
            "return" => Some(EventType::Return),
            "error" | "exception" => Some(EventType::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub call_id: String,
    pub parent_id: Option<String>,
    pub module: String,
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub depth: usize,
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_type: Option<InvocationType>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_ai_agent: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub coalesced_visits: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl TraceEvent {
    fn base(event_type: EventType, record: &CallRecord, timestamp: f64) -> Self {
        Self {
            event_type,
            call_id: record.call_id.to_string(),
            parent_id: record.parent_id.map(|p| p.to_string()),
            module: record.module.clone(),
            function: record.function_name.clone(),
            file: None,
            line: None,
            depth: record.depth,
            timestamp,
            thread_id: None,
            duration_ms: None,
            error: None,
            framework: None,
            invocation_type: None,
            is_ai_agent: false,
            coalesced_visits: 0,
            evidence: Vec::new(),
        }
    }

    fn call(record: &CallRecord) -> Self {
        Self {
            file: Some(record.file_path.clone()),
            line: Some(record.line_number),
            thread_id: Some(record.thread_id.clone()).filter(|t| !t.is_empty()),
            framework: record.framework.clone(),
            invocation_type: Some(record.invocation_type),
            is_ai_agent: record.is_ai_agent,
            coalesced_visits: record.coalesced_visits,
            evidence: record.evidence.clone(),
            ..Self::base(EventType::Call, record, record.start_time)
        }
    }

    fn end(record: &CallRecord, end_time: f64) -> Self {
        match &record.exception {
            Some(error) => Self {
                error: Some(error.clone()),
                ..Self::base(EventType::Error, record, end_time)
            },
            None => Self {
                duration_ms: record.duration_ms,
                ..Self::base(EventType::Return, record, end_time)
            },
        }
    }

    /// Best-effort extraction from an untyped JSON object
    fn from_value(value: &Value) -> Option<Self> {
        let event_type = EventType::parse(value.get("type")?.as_str()?)?;
        let call_id = match value.get("call_id")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(String::from);

        Some(Self {
            event_type,
            call_id,
            parent_id: match value.get("parent_id") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            },
            module: text("module").unwrap_or_else(|| UNKNOWN.to_string()),
            function: text("function").unwrap_or_else(|| UNKNOWN.to_string()),
            file: text("file"),
            line: value
                .get("line")
                .and_then(Value::as_u64)
                .and_then(|l| u32::try_from(l).ok()),
            depth: value
                .get("depth")
                .and_then(Value::as_u64)
                .and_then(|d| usize::try_from(d).ok())
                .unwrap_or(0),
            timestamp: value.get("timestamp").and_then(Value::as_f64).unwrap_or(0.0),
            thread_id: text("thread_id"),
            duration_ms: value.get("duration_ms").and_then(Value::as_f64),
            error: text("error"),
            framework: text("framework"),
            invocation_type: match value.get("invocation_type").and_then(Value::as_str) {
                Some("async") => Some(InvocationType::Async),
                Some("sync") => Some(InvocationType::Sync),
                _ => None,
            },
            is_ai_agent: value.get("is_ai_agent").and_then(Value::as_bool).unwrap_or(false),
            coalesced_visits: value.get("coalesced_visits").and_then(Value::as_u64).unwrap_or(0),
            evidence: value
                .get("evidence")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceDocument {
    pub correlation_id: String,
    pub session_id: String,
    pub timestamp: f64,
    pub calls: Vec<TraceEvent>,
    /// Error messages in the order they were raised
    pub errors: Vec<String>,
}

impl TraceDocument {
    /// Build the event stream for `records`
    ///
    /// `correlation_id` defaults to the session id.
    pub fn from_records(session: &Session, records: &[CallRecord], correlation_id: Option<&str>) -> Self {
        let mut calls = Vec::with_capacity(records.len() * 2);
        for record in records {
            calls.push(TraceEvent::call(record));
            if let Some(end_time) = record.end_time {
                calls.push(TraceEvent::end(record, end_time));
            }
        }

        // Calls before ends on ties; parents open first and close last
        calls.sort_by(|a, b| {
            a.timestamp.total_cmp(&b.timestamp).then_with(|| {
                let rank = |e: &TraceEvent| match e.event_type {
                    EventType::Call => (0, e.depth as i64),
                    _ => (1, -(e.depth as i64)),
                };
                rank(a).cmp(&rank(b))
            })
        });

        let errors = calls.iter().filter_map(|e| e.error.clone()).collect();

        Self {
            correlation_id: correlation_id.unwrap_or(&session.session_id).to_string(),
            session_id: session.session_id.clone(),
            timestamp: unix_time(),
            calls,
            errors,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a document, tolerating missing or malformed fields
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(obj) = &value else {
            return Err(CallmapError::InvalidConfig(
                "trace document must be a JSON object".to_string(),
            ));
        };

        let field = |key: &str| obj.get(key).and_then(Value::as_str).map(String::from);
        let session_id = field("session_id").unwrap_or_else(|| "session_replay".to_string());
        let calls: Vec<TraceEvent> = obj
            .get("calls")
            .and_then(Value::as_array)
            .map(|events| events.iter().filter_map(TraceEvent::from_value).collect())
            .unwrap_or_default();
        let errors = obj
            .get("errors")
            .and_then(Value::as_array)
            .map(|errs| {
                errs.iter()
                    .map(|e| match e {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            correlation_id: field("correlation_id").unwrap_or_else(|| session_id.clone()),
            session_id,
            timestamp: obj.get("timestamp").and_then(Value::as_f64).unwrap_or(0.0),
            calls,
            errors,
        })
    }

    /// Session metadata for re-rendering this document
    pub fn session(&self) -> Session {
        Session::with_id(self.session_id.clone(), self.timestamp)
    }

    /// Replay the events into records
    ///
    /// Call ids are renumbered in order of their `call` events; duplicate
    /// calls and unmatched or repeated ends are ignored.
    pub fn to_records(&self) -> Vec<CallRecord> {
        let mut records: Vec<CallRecord> = Vec::new();
        let mut ids: HashMap<&str, usize> = HashMap::new();

        for event in &self.calls {
            match event.event_type {
                EventType::Call => {
                    if ids.contains_key(event.call_id.as_str()) {
                        continue;
                    }
                    let index = records.len();
                    let call_id = CallId(index as u64 + 1);
                    let parent_id = event
                        .parent_id
                        .as_deref()
                        .and_then(|p| ids.get(p))
                        .map(|&i| records[i].call_id);

                    let site = CallSite {
                        function_name: &event.function,
                        module: &event.module,
                        file_path: event.file.as_deref().unwrap_or_default(),
                        line_number: event.line.unwrap_or(0),
                        invocation_type: event.invocation_type.unwrap_or_default(),
                    };
                    let mut record =
                        CallRecord::new(call_id, &site, event.timestamp).with_parent(parent_id, event.depth);
                    record.thread_id = event.thread_id.clone().unwrap_or_default();
                    record.framework = event.framework.clone();
                    record.is_ai_agent = event.is_ai_agent;
                    record.coalesced_visits = event.coalesced_visits;
                    record.evidence = event.evidence.clone();

                    ids.insert(&event.call_id, index);
                    records.push(record);
                }
                EventType::Return | EventType::Error => {
                    let Some(record) = ids.get(event.call_id.as_str()).map(|&i| &mut records[i]) else {
                        continue;
                    };
                    if record.is_closed() {
                        continue;
                    }
                    if event.event_type == EventType::Error {
                        record.exception = Some(event.error.clone().unwrap_or_else(|| "error".to_string()));
                    }
                    // Error events often carry no timestamp
                    let end_time = if event.timestamp > 0.0 {
                        event.timestamp
                    } else {
                        record.start_time + event.duration_ms.unwrap_or(0.0) / 1000.0
                    };
                    record.close(end_time);
                }
            }
        }

        records
    }
}
