//! The result of a complete computation run.

use std::collections::HashMap;

use molsift_core::Summarizable;

use crate::arena::ResourceArena;
use crate::matcher::{MatcherStats, QUERY_CONTEXT};
use crate::processor::RunSummary;
use crate::record::Table;
use crate::warnings::{SuppressionFilter, WarningConsolidator, WarningReport, ROW_CONTEXT};

/// Output tables plus everything worth reporting about a run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub tables: Vec<Table>,
    pub summary: RunSummary,
    pub warnings: WarningReport,
    pub matcher: Option<MatcherStats>,
    /// Units processed per warning context, for the warning summary.
    pub processed: HashMap<String, u64>,
}

impl RunOutput {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name() == name)
    }

    /// The user-facing warning text, `None` when there is nothing to say.
    pub fn warning_summary(&self, filter: &SuppressionFilter) -> Option<String> {
        self.warnings.summary(&self.processed, filter)
    }
}

impl Summarizable for RunOutput {
    fn summary(&self) -> String {
        let tables: Vec<String> = self.tables.iter().map(|t| format!("{} ({})", t.name(), t.len())).collect();
        format!(
            "{}; tables: {}; {} warnings",
            self.summary.summary(),
            tables.join(", "),
            self.warnings.len()
        )
    }
}

/// Surface release failures, freeze the warnings and assemble the output.
pub(crate) fn finish(
    summary: RunSummary,
    tables: Vec<Table>,
    matcher: Option<MatcherStats>,
    query_rows: usize,
    arena: &ResourceArena,
    warnings: &WarningConsolidator,
) -> RunOutput {
    let stats = arena.stats();
    if stats.release_failures > 0 {
        warnings.save_batch_warning(format!(
            "{} native objects could not be released",
            stats.release_failures
        ));
    }
    let processed = HashMap::from([
        (ROW_CONTEXT.to_string(), summary.processed),
        (QUERY_CONTEXT.to_string(), query_rows as u64),
    ]);
    let output = RunOutput {
        tables,
        summary,
        warnings: warnings.generate_warnings(),
        matcher,
        processed,
    };
    tracing::info!(output = %output.summary(), "run finished");
    output
}
