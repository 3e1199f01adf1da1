//! Mermaid architecture graph

use super::{Artifact, ExportContext, Renderer};
use crate::error::Result;

/// Mermaid has no backslash escapes inside quoted labels
fn label(text: &str) -> String {
    text.replace('"', "#quot;").replace(['\n', '\r'], " ")
}

#[derive(Debug, Clone, Copy)]
pub struct MermaidRenderer;

impl Renderer for MermaidRenderer {
    fn artifact(&self) -> Artifact {
        Artifact::Mermaid
    }

    fn render(&self, ctx: &ExportContext<'_>) -> Result<String> {
        let map = &ctx.map;
        let mut out = String::from("graph TD\n");

        if map.is_empty() {
            out.push_str("    app[\"No calls captured\"]\n");
            return Ok(out);
        }

        for (module, visits) in &map.modules {
            out.push_str(&format!(
                "    {}[\"{} ({})\"]\n",
                map.module_id(module),
                label(module),
                visits
            ));
        }
        for protocol in map.protocols() {
            out.push_str(&format!(
                "    {}[(\"{}\")]\n",
                protocol.node_id(),
                protocol.node_label()
            ));
        }

        for edge in &map.call_edges {
            out.push_str(&format!(
                "    {} -->|\"{}\"| {}\n",
                map.module_id(&edge.from),
                label(&edge.function),
                map.module_id(&edge.to)
            ));
        }
        for edge in &map.protocol_edges {
            out.push_str(&format!(
                "    {} -->|\"{}\"| {}\n",
                map.module_id(&edge.module),
                edge.protocol.display_name(),
                edge.protocol.node_id()
            ));
        }

        Ok(out)
    }
}
