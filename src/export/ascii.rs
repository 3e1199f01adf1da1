//! Box-drawing architecture map for terminals

use super::{Artifact, ExportContext, Renderer};
use crate::error::Result;
use fnv::FnvHashMap;

const WIDTH: usize = 64;

fn rule(fill: char) -> String {
    format!("+{}+\n", fill.to_string().repeat(WIDTH - 2))
}

fn centered(text: &str) -> String {
    format!("|{:^width$}|\n", text, width = WIDTH - 2)
}

/// Truncate to `max` characters so boxes stay aligned
fn fit(text: &str, max: usize) -> String {
    let clean: String = text.chars().filter(|c| !c.is_control()).collect();
    if clean.chars().count() <= max {
        clean
    } else {
        let mut cut: String = clean.chars().take(max.saturating_sub(3)).collect();
        cut.push_str("...");
        cut
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AsciiRenderer;

impl Renderer for AsciiRenderer {
    fn artifact(&self) -> Artifact {
        Artifact::Ascii
    }

    fn render(&self, ctx: &ExportContext<'_>) -> Result<String> {
        let map = &ctx.map;
        let mut out = String::new();

        out.push_str(&rule('='));
        out.push_str(&centered("RUNTIME ARCHITECTURE MAP"));
        out.push_str(&rule('='));
        out.push_str(&format!("Session: {}\n", fit(&ctx.session.session_id, WIDTH)));
        out.push_str(&format!(
            "Process: {} (parent {})\n",
            ctx.session.process_id, ctx.session.parent_process_id
        ));
        let frameworks = ctx.frameworks();
        if !frameworks.is_empty() {
            out.push_str(&format!("Framework: {}\n", frameworks.join(", ")));
        }
        out.push('\n');

        out.push_str("+----------------------+\n");
        out.push_str("|   YOUR APPLICATION   |\n");
        out.push_str("+----------------------+\n");

        if map.is_empty() {
            out.push_str("           |\n");
            out.push_str("           +-- (no calls captured)\n");
            return Ok(out);
        }

        let mut protocols_by_module: FnvHashMap<&str, Vec<String>> = FnvHashMap::default();
        for edge in &map.protocol_edges {
            protocols_by_module
                .entry(edge.module.as_str())
                .or_default()
                .push(format!("[{}] {}", edge.protocol.display_name(), edge.protocol.node_label()));
        }

        for (module, visits) in &map.modules {
            out.push_str("           |\n");
            out.push_str(&format!(
                "           +-- {} ({} calls)\n",
                fit(module, WIDTH - 24),
                visits
            ));
            if let Some(targets) = protocols_by_module.get(module.as_str()) {
                for target in targets {
                    out.push_str(&format!("           |      +--> {}\n", target));
                }
            }
        }

        if !map.call_edges.is_empty() {
            out.push('\n');
            out.push_str(&rule('-'));
            out.push_str(&centered("CALL FLOW"));
            out.push_str(&rule('-'));
            for edge in &map.call_edges {
                out.push_str(&format!(
                    "  {} --> {} ({} x{})\n",
                    fit(&edge.from, 24),
                    fit(&edge.to, 24),
                    fit(&edge.function, 24),
                    edge.count
                ));
            }
        }

        let protocols = ctx.protocol_counts();
        if !protocols.is_empty() {
            out.push('\n');
            out.push_str(&rule('-'));
            out.push_str(&centered("EXTERNAL SYSTEMS"));
            out.push_str(&rule('-'));
            for (protocol, count) in protocols {
                out.push_str(&format!(
                    "  {:<14} {:<20} {:>6} events\n",
                    protocol.display_name(),
                    protocol.node_label(),
                    count
                ));
            }
        }

        Ok(out)
    }
}
