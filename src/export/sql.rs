//! SQL evidence flattened across calls

use super::{to_json, Artifact, ExportContext, Renderer};
use crate::error::Result;
use crate::record::{CallId, ProtocolKind};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Serialize)]
struct Query<'a> {
    query: &'a str,
    operation: &'a str,
    variable: &'a str,
    call_id: CallId,
    function: &'a str,
    timestamp: f64,
}

#[derive(Debug, Serialize)]
struct Statistics<'a> {
    total_queries: usize,
    unique_queries: usize,
    by_operation: BTreeMap<&'a str, usize>,
}

#[derive(Debug, Serialize)]
struct SqlAnalysis<'a> {
    session_id: &'a str,
    statistics: Statistics<'a>,
    all_queries: Vec<Query<'a>>,
}

#[derive(Debug, Clone, Copy)]
pub struct SqlRenderer;

impl Renderer for SqlRenderer {
    fn artifact(&self) -> Artifact {
        Artifact::SqlAnalysis
    }

    fn render(&self, ctx: &ExportContext<'_>) -> Result<String> {
        let all_queries: Vec<Query<'_>> = ctx
            .records
            .iter()
            .flat_map(|record| {
                record.evidence_for(ProtocolKind::Sql).map(move |e| Query {
                    query: &e.snippet,
                    operation: &e.kind,
                    variable: &e.variable,
                    call_id: record.call_id,
                    function: &record.function_name,
                    timestamp: e.timestamp,
                })
            })
            .collect();

        let mut by_operation = BTreeMap::new();
        for query in &all_queries {
            *by_operation.entry(query.operation).or_insert(0) += 1;
        }
        let unique: BTreeSet<&str> = all_queries.iter().map(|q| q.query).collect();

        let analysis = SqlAnalysis {
            session_id: &ctx.session.session_id,
            statistics: Statistics {
                total_queries: all_queries.len(),
                unique_queries: unique.len(),
                by_operation,
            },
            all_queries,
        };
        to_json(self.artifact(), &analysis)
    }
}
