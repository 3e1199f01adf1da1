//! Plain-English summary meant to be pasted into an LLM prompt

use super::{function_metrics, Artifact, ExportContext, Renderer};
use crate::error::Result;
use crate::record::ProtocolKind;

/// What the application does with a protocol, as a noun phrase
pub(crate) fn protocol_phrase(protocol: ProtocolKind) -> &'static str {
    match protocol {
        ProtocolKind::Sql => "SQL queries against a relational database",
        ProtocolKind::WebSocket => "WebSocket connections for real-time messaging",
        ProtocolKind::Grpc => "gRPC remote procedure calls",
        ProtocolKind::GraphQl => "GraphQL queries",
        ProtocolKind::Kafka => "Kafka event streaming",
        ProtocolKind::Redis => "Redis cache commands",
        ProtocolKind::Memcached => "Memcached cache operations",
        ProtocolKind::Elasticsearch => "Elasticsearch search queries",
        ProtocolKind::Sse => "Server-Sent Events streams",
        ProtocolKind::Http2 => "HTTP/2 traffic",
        ProtocolKind::Thrift => "Thrift RPC calls",
        ProtocolKind::ZeroMq => "ZeroMQ messaging",
        ProtocolKind::Nats => "NATS messaging",
        ProtocolKind::Mqtt => "MQTT publish/subscribe messaging",
        ProtocolKind::Amqp => "AMQP message queues",
        ProtocolKind::WebRtc => "WebRTC peer connections",
        ProtocolKind::Mcp => "Model Context Protocol tool calls",
        ProtocolKind::AgentCommunication => "AI agent frameworks",
        ProtocolKind::ProcessSpawn => "child process spawning",
    }
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LlmSummaryRenderer;

impl Renderer for LlmSummaryRenderer {
    fn artifact(&self) -> Artifact {
        Artifact::LlmSummary
    }

    fn render(&self, ctx: &ExportContext<'_>) -> Result<String> {
        let metrics = function_metrics(ctx.records);
        let frameworks = ctx.frameworks();
        let protocols = ctx.protocol_counts();
        let map = &ctx.map;

        let mut text = String::new();
        text.push_str("RUNTIME ANALYSIS SUMMARY\n");
        text.push_str("========================\n\n");
        text.push_str(&format!(
            "Session {} traced process {}. It captured {} across {}.\n\n",
            ctx.session.session_id,
            ctx.session.process_id,
            plural(ctx.records.len(), "call", "calls"),
            plural(map.modules.len(), "module", "modules"),
        ));

        text.push_str("OVERVIEW\n\n");
        match frameworks.as_slice() {
            [] => text.push_str("The traced application does not use a recognised web framework.\n"),
            [one] => text.push_str(&format!("The traced application is built on the {one} framework.\n")),
            many => text.push_str(&format!(
                "The traced application combines the {} frameworks.\n",
                many.join(", ")
            )),
        }
        if protocols.is_empty() {
            text.push_str("No network protocols or external services were observed.\n");
        } else {
            for (protocol, count) in &protocols {
                text.push_str(&format!(
                    "It uses {} ({} observed).\n",
                    protocol_phrase(*protocol),
                    plural(*count, "event", "events")
                ));
            }
        }
        text.push('\n');

        text.push_str("PERFORMANCE\n\n");
        match metrics.first() {
            Some(slowest) => {
                text.push_str(&format!(
                    "The slowest function is {} in {}, taking {:.2} ms in total over {}.\n",
                    slowest.function,
                    slowest.module,
                    slowest.total_time_ms,
                    plural(slowest.call_count as usize, "call", "calls"),
                ));
                for metric in metrics.iter().skip(1).take(4) {
                    text.push_str(&format!(
                        "{} in {} took {:.2} ms over {}.\n",
                        metric.function,
                        metric.module,
                        metric.total_time_ms,
                        plural(metric.call_count as usize, "call", "calls"),
                    ));
                }
            }
            None => text.push_str("No function calls were captured.\n"),
        }
        let failed: Vec<_> = ctx.records.iter().filter(|r| r.exception.is_some()).collect();
        if !failed.is_empty() {
            text.push_str(&format!("{} raised an error:\n", plural(failed.len(), "call", "calls")));
            for record in failed.iter().take(10) {
                text.push_str(&format!(
                    "- {} failed with: {}\n",
                    record.qualified_name(),
                    record.exception.as_deref().unwrap_or_default()
                ));
            }
        }
        text.push('\n');

        text.push_str("ARCHITECTURE INSIGHTS\n\n");
        if map.is_empty() {
            text.push_str("There is not enough captured data to describe the architecture.\n");
        } else {
            for edge in &map.call_edges {
                text.push_str(&format!(
                    "The {} module calls into {} (first seen via {}, {}).\n",
                    edge.from,
                    edge.to,
                    edge.function,
                    plural(edge.count as usize, "call", "calls")
                ));
            }
            for edge in &map.protocol_edges {
                text.push_str(&format!(
                    "The {} module talks to the {} using {}.\n",
                    edge.module,
                    edge.protocol.node_label(),
                    edge.protocol.display_name()
                ));
            }
            if map.call_edges.is_empty() && map.protocol_edges.is_empty() {
                text.push_str("All captured calls stay inside single modules with no external services.\n");
            }
        }

        Ok(text)
    }
}
