//! Call record model shared by the trace engine, detector and exporters
//!
//! One `CallRecord` is allocated per logical function invocation. Protocol
//! evidence is stored as a single ordered list of tagged `Evidence` entries;
//! the per-protocol list names used by the exported JSON (`sql_queries`,
//! `websocket_events`, ...) are derived from `ProtocolKind::list_name`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Session-unique call identifier, rendered as `call_<n>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call_{}", self.0)
    }
}

impl CallId {
    /// Parse the `call_<n>` form back into an id
    pub fn parse(s: &str) -> Option<Self> {
        s.strip_prefix("call_")
            .and_then(|n| n.parse().ok())
            .map(CallId)
    }
}

impl Serialize for CallId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CallId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CallId::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid call id: {s}")))
    }
}

/// Wire protocols and client families the detector knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    Sql,
    #[serde(rename = "websocket")]
    WebSocket,
    Grpc,
    #[serde(rename = "graphql")]
    GraphQl,
    Kafka,
    Redis,
    Memcached,
    Elasticsearch,
    Sse,
    Http2,
    Thrift,
    #[serde(rename = "zeromq")]
    ZeroMq,
    Nats,
    Mqtt,
    Amqp,
    #[serde(rename = "webrtc")]
    WebRtc,
    Mcp,
    AgentCommunication,
    ProcessSpawn,
}

impl ProtocolKind {
    /// Every protocol, in export order
    pub const ALL: [ProtocolKind; 19] = [
        ProtocolKind::Sql,
        ProtocolKind::WebSocket,
        ProtocolKind::Grpc,
        ProtocolKind::GraphQl,
        ProtocolKind::Kafka,
        ProtocolKind::Redis,
        ProtocolKind::Memcached,
        ProtocolKind::Elasticsearch,
        ProtocolKind::Sse,
        ProtocolKind::Http2,
        ProtocolKind::Thrift,
        ProtocolKind::ZeroMq,
        ProtocolKind::Nats,
        ProtocolKind::Mqtt,
        ProtocolKind::Amqp,
        ProtocolKind::WebRtc,
        ProtocolKind::Mcp,
        ProtocolKind::AgentCommunication,
        ProtocolKind::ProcessSpawn,
    ];

    /// Name of the evidence list in exported JSON
    pub fn list_name(self) -> &'static str {
        match self {
            ProtocolKind::Sql => "sql_queries",
            ProtocolKind::WebSocket => "websocket_events",
            ProtocolKind::Grpc => "grpc_calls",
            ProtocolKind::GraphQl => "graphql_queries",
            ProtocolKind::Kafka => "kafka_events",
            ProtocolKind::Redis => "redis_commands",
            ProtocolKind::Memcached => "memcached_ops",
            ProtocolKind::Elasticsearch => "elasticsearch_queries",
            ProtocolKind::Sse => "sse_events",
            ProtocolKind::Http2 => "http2_frames",
            ProtocolKind::Thrift => "thrift_calls",
            ProtocolKind::ZeroMq => "zeromq_messages",
            ProtocolKind::Nats => "nats_messages",
            ProtocolKind::Mqtt => "mqtt_messages",
            ProtocolKind::Amqp => "amqp_messages",
            ProtocolKind::WebRtc => "webrtc_events",
            ProtocolKind::Mcp => "mcp_calls",
            ProtocolKind::AgentCommunication => "agent_communications",
            ProtocolKind::ProcessSpawn => "process_spawns",
        }
    }

    /// Human-readable protocol name used in prose and diagram labels
    pub fn display_name(self) -> &'static str {
        match self {
            ProtocolKind::Sql => "SQL",
            ProtocolKind::WebSocket => "WebSocket",
            ProtocolKind::Grpc => "gRPC",
            ProtocolKind::GraphQl => "GraphQL",
            ProtocolKind::Kafka => "Kafka",
            ProtocolKind::Redis => "Redis",
            ProtocolKind::Memcached => "Memcached",
            ProtocolKind::Elasticsearch => "Elasticsearch",
            ProtocolKind::Sse => "Server-Sent Events",
            ProtocolKind::Http2 => "HTTP/2",
            ProtocolKind::Thrift => "Thrift",
            ProtocolKind::ZeroMq => "ZeroMQ",
            ProtocolKind::Nats => "NATS",
            ProtocolKind::Mqtt => "MQTT",
            ProtocolKind::Amqp => "AMQP",
            ProtocolKind::WebRtc => "WebRTC",
            ProtocolKind::Mcp => "MCP",
            ProtocolKind::AgentCommunication => "AI Agents",
            ProtocolKind::ProcessSpawn => "Subprocesses",
        }
    }

    /// Label for the external system node in architecture diagrams
    pub fn node_label(self) -> &'static str {
        match self {
            ProtocolKind::Sql => "Database",
            ProtocolKind::WebSocket => "WebSocket Server",
            ProtocolKind::Grpc => "gRPC Service",
            ProtocolKind::GraphQl => "GraphQL API",
            ProtocolKind::Kafka => "Kafka Broker",
            ProtocolKind::Redis => "Redis Cache",
            ProtocolKind::Memcached => "Memcached",
            ProtocolKind::Elasticsearch => "Elasticsearch",
            ProtocolKind::Sse => "SSE Stream",
            ProtocolKind::Http2 => "HTTP/2 Endpoint",
            ProtocolKind::Thrift => "Thrift Service",
            ProtocolKind::ZeroMq => "ZeroMQ Socket",
            ProtocolKind::Nats => "NATS Server",
            ProtocolKind::Mqtt => "MQTT Broker",
            ProtocolKind::Amqp => "AMQP Broker",
            ProtocolKind::WebRtc => "WebRTC Peer",
            ProtocolKind::Mcp => "MCP Server",
            ProtocolKind::AgentCommunication => "AI Agent",
            ProtocolKind::ProcessSpawn => "Child Process",
        }
    }

    /// Short identifier usable as a diagram node id
    pub fn node_id(self) -> &'static str {
        match self {
            ProtocolKind::Sql => "proto_sql",
            ProtocolKind::WebSocket => "proto_websocket",
            ProtocolKind::Grpc => "proto_grpc",
            ProtocolKind::GraphQl => "proto_graphql",
            ProtocolKind::Kafka => "proto_kafka",
            ProtocolKind::Redis => "proto_redis",
            ProtocolKind::Memcached => "proto_memcached",
            ProtocolKind::Elasticsearch => "proto_elasticsearch",
            ProtocolKind::Sse => "proto_sse",
            ProtocolKind::Http2 => "proto_http2",
            ProtocolKind::Thrift => "proto_thrift",
            ProtocolKind::ZeroMq => "proto_zeromq",
            ProtocolKind::Nats => "proto_nats",
            ProtocolKind::Mqtt => "proto_mqtt",
            ProtocolKind::Amqp => "proto_amqp",
            ProtocolKind::WebRtc => "proto_webrtc",
            ProtocolKind::Mcp => "proto_mcp",
            ProtocolKind::AgentCommunication => "proto_agents",
            ProtocolKind::ProcessSpawn => "proto_subprocess",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A structured note that a visible binding matched a protocol pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub protocol: ProtocolKind,
    /// Pattern-specific kind, e.g. `SELECT`, `connect`, `produce`
    pub kind: String,
    /// Name of the binding the snippet was taken from
    pub variable: String,
    /// Bounded stringified value
    pub snippet: String,
    /// Unix time in seconds
    pub timestamp: f64,
}

/// How the traced function was invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationType {
    #[default]
    Sync,
    Async,
}

impl fmt::Display for InvocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationType::Sync => f.write_str("sync"),
            InvocationType::Async => f.write_str("async"),
        }
    }
}

/// Static description of an instrumented function
///
/// Usually built with the `call_site!` macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite<'a> {
    pub function_name: &'a str,
    pub module: &'a str,
    pub file_path: &'a str,
    pub line_number: u32,
    pub invocation_type: InvocationType,
}

impl<'a> CallSite<'a> {
    pub fn new(function_name: &'a str, module: &'a str, file_path: &'a str, line_number: u32) -> Self {
        Self {
            function_name,
            module,
            file_path,
            line_number,
            invocation_type: InvocationType::Sync,
        }
    }

    /// Mark the site as an async function
    pub fn asynchronous(mut self) -> Self {
        self.invocation_type = InvocationType::Async;
        self
    }
}

/// One captured function invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: CallId,
    pub parent_id: Option<CallId>,
    /// Number of open recorded ancestors at entry
    pub depth: usize,

    pub function_name: String,
    pub module: String,
    pub file_path: String,
    pub line_number: u32,

    /// Unix time in seconds
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub duration_ms: Option<f64>,

    pub framework: Option<String>,
    pub invocation_type: InvocationType,
    pub is_ai_agent: bool,

    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_name: Option<String>,

    #[serde(default)]
    pub evidence: Vec<Evidence>,
    pub exception: Option<String>,

    /// Later visits of the same call path folded into this record
    #[serde(default)]
    pub coalesced_visits: u64,
    /// Summed duration of the coalesced visits that returned
    #[serde(default)]
    pub coalesced_duration_ms: f64,
    /// Coalesced visits that raised
    #[serde(default)]
    pub coalesced_failures: u64,
}

impl CallRecord {
    /// Create an open record for `site`
    pub fn new(call_id: CallId, site: &CallSite<'_>, start_time: f64) -> Self {
        Self {
            call_id,
            parent_id: None,
            depth: 0,
            function_name: site.function_name.to_string(),
            module: site.module.to_string(),
            file_path: site.file_path.to_string(),
            line_number: site.line_number,
            start_time,
            end_time: None,
            duration_ms: None,
            framework: None,
            invocation_type: site.invocation_type,
            is_ai_agent: false,
            thread_id: String::new(),
            thread_name: None,
            evidence: Vec::new(),
            exception: None,
            coalesced_visits: 0,
            coalesced_duration_ms: 0.0,
            coalesced_failures: 0,
        }
    }

    /// Attach the caller and stack depth
    pub fn with_parent(mut self, parent_id: Option<CallId>, depth: usize) -> Self {
        self.parent_id = parent_id;
        self.depth = depth;
        self
    }

    /// Close the record at `end_time`; `end_time` is clamped to `start_time`
    pub fn close(&mut self, end_time: f64) {
        let end_time = end_time.max(self.start_time);
        self.end_time = Some(end_time);
        self.duration_ms = Some((end_time - self.start_time) * 1000.0);
    }

    /// True once the call returned or raised
    pub fn is_closed(&self) -> bool {
        self.duration_ms.is_some()
    }

    /// `module.function` display name
    pub fn qualified_name(&self) -> String {
        if self.module.is_empty() {
            self.function_name.clone()
        } else {
            format!("{}.{}", self.module, self.function_name)
        }
    }

    /// Recorded visit plus coalesced repeats
    pub fn total_visits(&self) -> u64 {
        1 + self.coalesced_visits
    }

    /// Own duration plus the duration of coalesced visits
    pub fn total_duration_ms(&self) -> f64 {
        self.duration_ms.unwrap_or(0.0) + self.coalesced_duration_ms
    }

    /// Visits that ended with an exception
    pub fn failures(&self) -> u64 {
        u64::from(self.exception.is_some()) + self.coalesced_failures
    }

    pub fn evidence_for(&self, protocol: ProtocolKind) -> impl Iterator<Item = &Evidence> {
        self.evidence.iter().filter(move |e| e.protocol == protocol)
    }

    pub fn has_protocol(&self, protocol: ProtocolKind) -> bool {
        self.evidence.iter().any(|e| e.protocol == protocol)
    }

    /// Distinct protocols evidenced on this call
    pub fn protocols(&self) -> BTreeSet<ProtocolKind> {
        self.evidence.iter().map(|e| e.protocol).collect()
    }
}

/// Current wall-clock time as Unix seconds
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
