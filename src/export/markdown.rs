//! Markdown session summary

use super::llm_summary::protocol_phrase;
use super::{function_metrics, Artifact, ExportContext, Renderer};
use crate::error::Result;

const TOP_N: usize = 10;

/// Keep user text from breaking table cells
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\n', '\r'], " ")
}

#[derive(Debug, Clone, Copy)]
pub struct MarkdownRenderer;

impl Renderer for MarkdownRenderer {
    fn artifact(&self) -> Artifact {
        Artifact::Markdown
    }

    fn render(&self, ctx: &ExportContext<'_>) -> Result<String> {
        let session = ctx.session;
        let metrics = function_metrics(ctx.records);
        let frameworks = ctx.frameworks();
        let protocols = ctx.protocol_counts();
        let total_visits = ctx.total_visits();
        let total_ms: f64 = ctx
            .records
            .iter()
            .filter(|r| r.parent_id.is_none())
            .map(|r| r.total_duration_ms())
            .sum();
        let errors: u64 = ctx.records.iter().map(|r| r.failures()).sum();

        let mut md = String::new();
        md.push_str("# Runtime Analysis Summary\n\n");
        md.push_str(&format!("**Session:** `{}`  \n", cell(&session.session_id)));
        md.push_str(&format!(
            "**Process:** {} (parent {})  \n",
            session.process_id, session.parent_process_id
        ));
        md.push_str(&format!("**Captured calls:** {}\n\n", ctx.records.len()));

        md.push_str("## Architecture Overview\n\n");
        if frameworks.is_empty() {
            md.push_str("No web framework was detected.\n\n");
        } else {
            md.push_str(&format!(
                "The traced application runs on **{}**.\n\n",
                frameworks.join("**, **")
            ));
        }

        if protocols.is_empty() {
            md.push_str("No external protocols were detected.\n\n");
        } else {
            md.push_str("Detected protocols:\n\n");
            for (protocol, count) in &protocols {
                md.push_str(&format!(
                    "- **{}**: {} ({} captured)\n",
                    protocol.display_name(),
                    protocol_phrase(*protocol),
                    count
                ));
            }
            md.push('\n');
        }

        if !ctx.map.modules.is_empty() {
            md.push_str("Modules:\n\n");
            for (module, visits) in &ctx.map.modules {
                md.push_str(&format!("- `{}` ({} calls)\n", cell(module), visits));
            }
            md.push('\n');
        }

        md.push_str("## Performance Metrics\n\n");
        md.push_str("| Metric | Value |\n|---|---|\n");
        md.push_str(&format!("| Total calls | {} |\n", total_visits));
        md.push_str(&format!("| Distinct functions | {} |\n", metrics.len()));
        md.push_str(&format!("| Total time | {:.2} ms |\n", total_ms));
        let avg = if total_visits > 0 {
            metrics.iter().map(|m| m.total_time_ms).sum::<f64>() / total_visits as f64
        } else {
            0.0
        };
        md.push_str(&format!("| Average call | {:.2} ms |\n", avg));
        md.push_str(&format!("| Errors | {} |\n\n", errors));

        md.push_str(&format!("## Top {} Slowest Functions\n\n", TOP_N));
        if metrics.is_empty() {
            md.push_str("_No calls were captured._\n");
        } else {
            md.push_str("| # | Function | Module | Calls | Total (ms) | Avg (ms) |\n");
            md.push_str("|---|---|---|---|---|---|\n");
            for (rank, metric) in metrics.iter().take(TOP_N).enumerate() {
                md.push_str(&format!(
                    "| {} | `{}` | `{}` | {} | {:.2} | {:.2} |\n",
                    rank + 1,
                    cell(&metric.function),
                    cell(&metric.module),
                    metric.call_count,
                    metric.total_time_ms,
                    metric.avg_time_ms
                ));
            }
        }

        let failed: Vec<_> = ctx.records.iter().filter(|r| r.exception.is_some()).collect();
        if !failed.is_empty() {
            md.push_str("\n## Errors\n\n");
            for record in failed {
                md.push_str(&format!(
                    "- `{}`: {}\n",
                    cell(&record.qualified_name()),
                    cell(record.exception.as_deref().unwrap_or_default())
                ));
            }
        }

        Ok(md)
    }
}
