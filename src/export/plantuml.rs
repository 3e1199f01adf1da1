//! PlantUML sequence diagram
//!
//! Module names, function names and the session id end up inside quoted
//! labels. All of them pass through [`escape_puml`], which strips line
//! breaks and neutralises `@` and quotes, so no user-derived text can open a
//! new line or form a `@startuml`/`@enduml` directive.

use super::{Artifact, ExportContext, Renderer};
use crate::error::Result;
use crate::record::ProtocolKind;
use std::collections::HashMap;

/// Make `text` safe to embed in a PlantUML label
pub fn escape_puml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '@' => out.push_str("<U+0040>"),
            '"' => out.push_str("<U+0022>"),
            '\\' => out.push_str("<U+005C>"),
            '\n' | '\r' | '\t' => out.push(' '),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

fn protocol_shape(protocol: ProtocolKind) -> &'static str {
    match protocol {
        ProtocolKind::Sql
        | ProtocolKind::Redis
        | ProtocolKind::Memcached
        | ProtocolKind::Elasticsearch => "database",
        ProtocolKind::Kafka
        | ProtocolKind::Amqp
        | ProtocolKind::Nats
        | ProtocolKind::Mqtt
        | ProtocolKind::ZeroMq => "queue",
        ProtocolKind::AgentCommunication => "actor",
        _ => "participant",
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlantUmlRenderer;

impl Renderer for PlantUmlRenderer {
    fn artifact(&self) -> Artifact {
        Artifact::PlantUml
    }

    fn render(&self, ctx: &ExportContext<'_>) -> Result<String> {
        let map = &ctx.map;
        let mut out = String::new();

        out.push_str("@startuml\n");
        out.push_str(&format!(
            "title \"Runtime Sequence - {}\"\n",
            escape_puml(&ctx.session.session_id)
        ));
        out.push_str("autonumber\n\n");

        if map.is_empty() {
            out.push_str("note \"No calls captured\" as N0\n");
            out.push_str("@enduml\n");
            return Ok(out);
        }

        let mut aliases: HashMap<&str, String> = HashMap::new();
        for (i, (module, _)) in map.modules.iter().enumerate() {
            let alias = format!("P{i}");
            out.push_str(&format!("participant \"{}\" as {}\n", escape_puml(module), alias));
            aliases.insert(module.as_str(), alias);
        }
        for protocol in map.protocols() {
            out.push_str(&format!(
                "{} \"{}\" as {}\n",
                protocol_shape(protocol),
                protocol.node_label(),
                protocol.node_id()
            ));
        }
        out.push('\n');

        for edge in &map.call_edges {
            if let (Some(from), Some(to)) = (aliases.get(edge.from.as_str()), aliases.get(edge.to.as_str())) {
                out.push_str(&format!("{} -> {} : \"{}\"", from, to, escape_puml(&edge.function)));
                if edge.count > 1 {
                    out.push_str(&format!(" x{}", edge.count));
                }
                out.push('\n');
            }
        }
        for edge in &map.protocol_edges {
            if let Some(from) = aliases.get(edge.module.as_str()) {
                out.push_str(&format!(
                    "{} -> {} : \"{} ({})\"\n",
                    from,
                    edge.protocol.node_id(),
                    edge.protocol.display_name(),
                    edge.count
                ));
            }
        }

        out.push_str("@enduml\n");
        Ok(out)
    }
}
