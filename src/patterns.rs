//! Static pattern tables for protocol detection
//!
//! Each protocol owns a table of needles checked against the stringified
//! value of a visible binding. The first matching needle of a table decides
//! the evidence `kind`. Matching is heuristic: false positives are accepted.
//!
//! Table layout follows the class tables of a syscall filter: plain slices of
//! `&'static str`, grouped per category, no runtime compilation.

use crate::record::ProtocolKind;

/// How a needle is compared against a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Needle {
    /// Case-sensitive substring
    Contains(&'static str),
    /// Case-insensitive substring; the needle must be lowercase
    ContainsNoCase(&'static str),
    /// Case-sensitive prefix of the trimmed value
    Prefix(&'static str),
}

impl Needle {
    /// `lower` must be `raw.to_lowercase()`
    pub fn matches(&self, raw: &str, lower: &str) -> bool {
        match *self {
            Needle::Contains(n) => raw.contains(n),
            Needle::ContainsNoCase(n) => lower.contains(n),
            Needle::Prefix(n) => raw.trim_start().starts_with(n),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Pattern {
    pub needle: Needle,
    pub kind: &'static str,
}

const fn has(needle: &'static str, kind: &'static str) -> Pattern {
    Pattern {
        needle: Needle::Contains(needle),
        kind,
    }
}

const fn has_ci(needle: &'static str, kind: &'static str) -> Pattern {
    Pattern {
        needle: Needle::ContainsNoCase(needle),
        kind,
    }
}

const fn starts(needle: &'static str, kind: &'static str) -> Pattern {
    Pattern {
        needle: Needle::Prefix(needle),
        kind,
    }
}

/// Patterns for one protocol
#[derive(Debug)]
pub struct PatternTable {
    pub protocol: ProtocolKind,
    pub patterns: &'static [Pattern],
}

impl PatternTable {
    /// First pattern matching the value, if any
    pub fn first_match(&self, raw: &str, lower: &str) -> Option<&'static Pattern> {
        self.patterns.iter().find(|p| p.needle.matches(raw, lower))
    }
}

const SQL: &[Pattern] = &[
    has("SELECT ", "SELECT"),
    has("INSERT ", "INSERT"),
    has("UPDATE ", "UPDATE"),
    has("DELETE ", "DELETE"),
    has("CREATE TABLE", "CREATE"),
    has("DROP TABLE", "DROP"),
    has("ALTER TABLE", "ALTER"),
    starts("select ", "SELECT"),
    starts("insert into ", "INSERT"),
];

const WEBSOCKET: &[Pattern] = &[
    has_ci("ws://", "connect"),
    has_ci("wss://", "connect"),
    has_ci("websocket", "event"),
    has_ci("socket.io", "event"),
];

const GRPC: &[Pattern] = &[
    has_ci("grpc", "call"),
    has_ci("protobuf", "message"),
    has_ci(":50051", "call"),
];

const GRAPHQL: &[Pattern] = &[
    has_ci("graphql", "query"),
    has_ci("mutation {", "mutation"),
    has_ci("subscription {", "subscription"),
    has_ci("query {", "query"),
];

const KAFKA: &[Pattern] = &[
    has_ci("kafka", "event"),
    has_ci("bootstrap.servers", "connect"),
    has_ci("bootstrap_servers", "connect"),
    has_ci(":9092", "connect"),
];

const REDIS: &[Pattern] = &[
    has_ci("redis://", "connect"),
    has_ci("rediss://", "connect"),
    has_ci("redis", "command"),
    starts("SET ", "SET"),
    starts("GET ", "GET"),
    starts("HSET ", "HSET"),
    starts("HGET ", "HGET"),
    starts("LPUSH ", "LPUSH"),
    starts("RPUSH ", "RPUSH"),
    starts("SADD ", "SADD"),
    starts("ZADD ", "ZADD"),
    starts("INCR ", "INCR"),
    starts("EXPIRE ", "EXPIRE"),
    starts("DEL ", "DEL"),
    starts("PUBLISH ", "PUBLISH"),
];

const MEMCACHED: &[Pattern] = &[
    has_ci("memcache", "op"),
    has_ci(":11211", "connect"),
];

const ELASTICSEARCH: &[Pattern] = &[
    has_ci("elasticsearch", "query"),
    has_ci("opensearch", "query"),
    has_ci("/_search", "search"),
    has_ci("/_bulk", "bulk"),
    has_ci(":9200", "connect"),
];

const SSE: &[Pattern] = &[
    has_ci("text/event-stream", "stream"),
    has_ci("eventsource", "stream"),
    has_ci("server-sent", "stream"),
    starts("data: ", "event"),
];

const HTTP2: &[Pattern] = &[
    has_ci("http2", "frame"),
    has_ci("http/2", "frame"),
    has_ci("h2c", "upgrade"),
    has_ci(":authority", "header"),
];

const THRIFT: &[Pattern] = &[
    has_ci("thrift", "call"),
    has_ci("tbinaryprotocol", "encode"),
    has_ci("tcompactprotocol", "encode"),
];

const ZEROMQ: &[Pattern] = &[
    has_ci("zeromq", "message"),
    has_ci("zmq", "message"),
    has_ci("ipc://", "connect"),
    has_ci("inproc://", "connect"),
];

const NATS: &[Pattern] = &[
    has_ci("nats://", "connect"),
    has_ci("jetstream", "stream"),
    has_ci("nats", "message"),
];

const MQTT: &[Pattern] = &[
    has_ci("mqtt://", "connect"),
    has_ci("mqtt", "message"),
    has_ci(":1883", "connect"),
    has_ci("paho", "client"),
];

const AMQP: &[Pattern] = &[
    has_ci("amqp://", "connect"),
    has_ci("amqps://", "connect"),
    has_ci("rabbitmq", "message"),
    has_ci("amqp", "message"),
];

const WEBRTC: &[Pattern] = &[
    has_ci("webrtc", "event"),
    has_ci("rtcpeerconnection", "peer"),
    has_ci("icecandidate", "ice"),
    has_ci("stun:", "ice"),
    has_ci("turn:", "ice"),
];

const MCP: &[Pattern] = &[
    has_ci("modelcontextprotocol", "call"),
    has_ci("tools/call", "tool_call"),
    has_ci("resources/read", "resource_read"),
    has_ci("mcp_server", "server"),
    has_ci("mcp-server", "server"),
    has_ci("mcp", "call"),
];

const AGENT: &[Pattern] = &[
    has_ci("langchain", "chain"),
    has_ci("langgraph", "graph"),
    has_ci("agentexecutor", "agent"),
    has_ci("autogen", "agent"),
    has_ci("crewai", "crew"),
    has_ci("llama_index", "index"),
    has_ci("llamaindex", "index"),
    has_ci("semantic_kernel", "agent"),
    has_ci("chat.completions", "llm"),
    has_ci("openai", "llm"),
    has_ci("anthropic", "llm"),
];

const PROCESS_SPAWN: &[Pattern] = &[
    has_ci("subprocess", "spawn"),
    has_ci("popen", "spawn"),
    has_ci("os.system", "spawn"),
    has_ci("/bin/sh", "shell"),
    has_ci("/bin/bash", "shell"),
    has_ci("cmd.exe", "shell"),
    has_ci("powershell", "shell"),
    has_ci("execve", "exec"),
    has_ci("fork(", "fork"),
];

/// All protocol tables in `ProtocolKind::ALL` order
pub static TABLES: [PatternTable; 19] = [
    PatternTable { protocol: ProtocolKind::Sql, patterns: SQL },
    PatternTable { protocol: ProtocolKind::WebSocket, patterns: WEBSOCKET },
    PatternTable { protocol: ProtocolKind::Grpc, patterns: GRPC },
    PatternTable { protocol: ProtocolKind::GraphQl, patterns: GRAPHQL },
    PatternTable { protocol: ProtocolKind::Kafka, patterns: KAFKA },
    PatternTable { protocol: ProtocolKind::Redis, patterns: REDIS },
    PatternTable { protocol: ProtocolKind::Memcached, patterns: MEMCACHED },
    PatternTable { protocol: ProtocolKind::Elasticsearch, patterns: ELASTICSEARCH },
    PatternTable { protocol: ProtocolKind::Sse, patterns: SSE },
    PatternTable { protocol: ProtocolKind::Http2, patterns: HTTP2 },
    PatternTable { protocol: ProtocolKind::Thrift, patterns: THRIFT },
    PatternTable { protocol: ProtocolKind::ZeroMq, patterns: ZEROMQ },
    PatternTable { protocol: ProtocolKind::Nats, patterns: NATS },
    PatternTable { protocol: ProtocolKind::Mqtt, patterns: MQTT },
    PatternTable { protocol: ProtocolKind::Amqp, patterns: AMQP },
    PatternTable { protocol: ProtocolKind::WebRtc, patterns: WEBRTC },
    PatternTable { protocol: ProtocolKind::Mcp, patterns: MCP },
    PatternTable { protocol: ProtocolKind::AgentCommunication, patterns: AGENT },
    PatternTable { protocol: ProtocolKind::ProcessSpawn, patterns: PROCESS_SPAWN },
];

/// Look up the table for one protocol
pub fn table(protocol: ProtocolKind) -> &'static PatternTable {
    // TABLES is laid out in ProtocolKind::ALL order
    let idx = ProtocolKind::ALL
        .iter()
        .position(|p| *p == protocol)
        .unwrap_or(0);
    &TABLES[idx]
}

/// Web and RPC framework markers matched against module and file paths
const FRAMEWORK_MARKERS: &[(&str, &str)] = &[
    ("axum", "Axum"),
    ("actix", "Actix Web"),
    ("rocket", "Rocket"),
    ("warp", "Warp"),
    ("poem", "Poem"),
    ("tonic", "Tonic"),
    ("hyper", "Hyper"),
    ("fastapi", "FastAPI"),
    ("flask", "Flask"),
    ("django", "Django"),
    ("starlette", "Starlette"),
    ("spring", "Spring"),
    ("express", "Express"),
];

/// Infer a web framework from where the call lives
pub fn detect_framework(module: &str, file_path: &str) -> Option<&'static str> {
    let module = module.to_lowercase();
    let file_path = file_path.to_lowercase();
    FRAMEWORK_MARKERS
        .iter()
        .find(|(marker, _)| module.contains(marker) || file_path.contains(marker))
        .map(|(_, name)| *name)
}

/// Agent-framework markers matched against module and function names
const AGENT_SITE_MARKERS: &[&str] = &[
    "agent",
    "langchain",
    "langgraph",
    "autogen",
    "crewai",
    "llama_index",
    "llm",
];

/// True if a call site looks like part of an AI agent
pub fn is_agent_site(module: &str, function_name: &str) -> bool {
    let module = module.to_lowercase();
    let function_name = function_name.to_lowercase();
    AGENT_SITE_MARKERS
        .iter()
        .any(|m| module.contains(m) || function_name.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(protocol: ProtocolKind, value: &str) -> Option<&'static str> {
        table(protocol)
            .first_match(value, &value.to_lowercase())
            .map(|p| p.kind)
    }

    #[test]
    fn test_tables_follow_protocol_order() {
        for (table, protocol) in TABLES.iter().zip(ProtocolKind::ALL) {
            assert_eq!(table.protocol, protocol);
            assert!(!table.patterns.is_empty());
        }
    }

    #[test]
    fn test_sql_keywords() {
        assert_eq!(check(ProtocolKind::Sql, "SELECT * FROM users"), Some("SELECT"));
        assert_eq!(
            check(ProtocolKind::Sql, "INSERT INTO orders (id) VALUES (1)"),
            Some("INSERT")
        );
        assert_eq!(check(ProtocolKind::Sql, "UPDATE customers SET a = 1"), Some("UPDATE"));
        assert_eq!(check(ProtocolKind::Sql, "DELETE FROM temp_data"), Some("DELETE"));
        assert_eq!(check(ProtocolKind::Sql, "select id from t"), Some("SELECT"));
        assert_eq!(check(ProtocolKind::Sql, "please select an option"), None);
    }

    #[test]
    fn test_websocket_urls() {
        assert_eq!(check(ProtocolKind::WebSocket, "ws://localhost:8000/ws"), Some("connect"));
        assert_eq!(check(ProtocolKind::WebSocket, "WSS://api.example.com"), Some("connect"));
        assert_eq!(check(ProtocolKind::WebSocket, "http://example.com"), None);
    }

    #[test]
    fn test_redis_commands_are_prefix_matched() {
        assert_eq!(check(ProtocolKind::Redis, "SET key value"), Some("SET"));
        assert_eq!(check(ProtocolKind::Redis, "redis://cache:6379"), Some("connect"));
        assert_eq!(check(ProtocolKind::Redis, "UPDATE t SET x = 1"), None);
        assert_eq!(check(ProtocolKind::Redis, "DELETE FROM t"), None);
    }

    #[test]
    fn test_grpc_and_kafka() {
        assert_eq!(
            check(ProtocolKind::Grpc, "grpc.insecure_channel(localhost:50051)"),
            Some("call")
        );
        assert_eq!(check(ProtocolKind::Kafka, "KafkaProducer"), Some("event"));
        assert_eq!(check(ProtocolKind::Kafka, "broker:9092"), Some("connect"));
    }

    #[test]
    fn test_detect_framework() {
        assert_eq!(detect_framework("myapp::routes", "/src/axum_server.rs"), Some("Axum"));
        assert_eq!(detect_framework("app.fastapi_main", ""), Some("FastAPI"));
        assert_eq!(detect_framework("myapp::database", "/app/database.rs"), None);
    }

    #[test]
    fn test_is_agent_site() {
        assert!(is_agent_site("myapp::agents::planner", "run"));
        assert!(is_agent_site("myapp", "call_llm"));
        assert!(!is_agent_site("myapp::database", "fetch_users"));
    }
}
