//! Per-protocol event lists and the inferred architecture map

use super::{to_json, Artifact, ExportContext, Renderer};
use crate::error::Result;
use crate::record::ProtocolKind;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy)]
pub struct DistributedRenderer;

impl Renderer for DistributedRenderer {
    fn artifact(&self) -> Artifact {
        Artifact::Distributed
    }

    fn render(&self, ctx: &ExportContext<'_>) -> Result<String> {
        let mut doc = Map::new();
        doc.insert("session_id".into(), json!(ctx.session.session_id));

        // Every list is present, empty or not
        for protocol in ProtocolKind::ALL {
            let events: Vec<Value> = ctx
                .records
                .iter()
                .flat_map(|record| {
                    record.evidence_for(protocol).map(move |e| {
                        json!({
                            "type": e.kind,
                            "data": e.snippet,
                            "variable": e.variable,
                            "call_id": record.call_id,
                            "module": record.module,
                            "function": record.function_name,
                            "timestamp": e.timestamp,
                        })
                    })
                })
                .collect();
            doc.insert(protocol.list_name().into(), Value::Array(events));
        }

        let map = &ctx.map;
        let call_edges = map.call_edges.iter().map(|edge| {
            json!({
                "from": edge.from,
                "to": edge.to,
                "protocol": "call",
                "function": edge.function,
                "count": edge.count,
            })
        });
        let protocol_edges = map.protocol_edges.iter().map(|edge| {
            json!({
                "from": edge.module,
                "to": edge.protocol.node_label(),
                "protocol": edge.protocol,
                "count": edge.count,
            })
        });

        doc.insert(
            "architecture_map".into(),
            json!({
                "modules": map.modules.iter().map(|(m, _)| m).collect::<Vec<_>>(),
                "protocols": map.protocols(),
                "frameworks": ctx.frameworks(),
                "edges": call_edges.chain(protocol_edges).collect::<Vec<_>>(),
            }),
        );
        doc.insert(
            "process".into(),
            json!({
                "process_id": ctx.session.process_id,
                "parent_process_id": ctx.session.parent_process_id,
            }),
        );

        to_json(self.artifact(), &Value::Object(doc))
    }
}
