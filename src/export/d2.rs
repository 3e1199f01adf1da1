//! D2 architecture diagram

use super::{Artifact, ExportContext, Renderer};
use crate::error::Result;
use crate::record::ProtocolKind;

fn quoted(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\n', '\r'], " ");
    format!("\"{escaped}\"")
}

fn shape(protocol: ProtocolKind) -> &'static str {
    match protocol {
        ProtocolKind::Sql
        | ProtocolKind::Redis
        | ProtocolKind::Memcached
        | ProtocolKind::Elasticsearch => "cylinder",
        ProtocolKind::Kafka
        | ProtocolKind::Amqp
        | ProtocolKind::Nats
        | ProtocolKind::Mqtt
        | ProtocolKind::ZeroMq => "queue",
        ProtocolKind::AgentCommunication => "person",
        _ => "cloud",
    }
}

#[derive(Debug, Clone, Copy)]
pub struct D2Renderer;

impl Renderer for D2Renderer {
    fn artifact(&self) -> Artifact {
        Artifact::D2
    }

    fn render(&self, ctx: &ExportContext<'_>) -> Result<String> {
        let map = &ctx.map;
        let mut out = String::from("direction: right\n\n");

        if map.is_empty() {
            out.push_str("app: \"No calls captured\" {\n  shape: rectangle\n}\n");
            return Ok(out);
        }

        for (module, _) in &map.modules {
            out.push_str(&format!(
                "{}: {} {{\n  shape: rectangle\n}}\n",
                map.module_id(module),
                quoted(module)
            ));
        }
        for protocol in map.protocols() {
            out.push_str(&format!(
                "{}: {} {{\n  shape: {}\n}}\n",
                protocol.node_id(),
                quoted(protocol.node_label()),
                shape(protocol)
            ));
        }
        out.push('\n');

        for edge in &map.call_edges {
            out.push_str(&format!(
                "{} -> {}: {}\n",
                map.module_id(&edge.from),
                map.module_id(&edge.to),
                quoted(&edge.function)
            ));
        }
        for edge in &map.protocol_edges {
            out.push_str(&format!(
                "{} -> {}: {}\n",
                map.module_id(&edge.module),
                edge.protocol.node_id(),
                quoted(&format!("{} x{}", edge.protocol.display_name(), edge.count))
            ));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{records, session};
    use super::*;
    use crate::record::CallRecord;

    fn render(records: &[CallRecord]) -> String {
        let session = session();
        let ctx = ExportContext::new(&session, records);
        D2Renderer.render(&ctx).unwrap()
    }

    #[test]
    fn test_diagram() {
        let d2 = render(&records());
        assert!(d2.starts_with("direction: right"));
        assert!(d2.contains("myapp__database: \"myapp::database\" {"));
        assert!(d2.contains("shape: rectangle"));
        assert!(d2.contains("proto_sql: \"Database\" {\n  shape: cylinder\n}"));
        assert!(d2.contains("myapp__database -> myapp__kafka: \"publish_event\""));
        assert!(d2.contains("myapp__database -> proto_sql: \"SQL x1\""));
    }

    #[test]
    fn test_colliding_modules_stay_distinct() {
        let mut records = records();
        records[0].module = "billing.api".to_string();
        records[1].module = "billing-api".to_string();
        records[2].module = "proto sql".to_string();
        let d2 = render(&records);
        assert_eq!(d2.matches("billing_api: ").count(), 1);
        assert!(d2.contains("billing_api_2: \"billing-api\""));
        assert!(d2.contains("billing_api -> billing_api_2: \"send_message\""));
        assert!(d2.contains("proto_sql_2: \"proto sql\""));
        assert!(d2.contains("proto_sql: \"Database\""));
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quoted("a\"b"), "\"a\\\"b\"");
        assert_eq!(quoted("line\nbreak"), "\"line break\"");
    }

    #[test]
    fn test_empty() {
        let d2 = render(&[]);
        assert!(d2.starts_with("direction: right"));
        assert!(d2.contains("shape: rectangle"));
    }
}
