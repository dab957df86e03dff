//! Substructure filter: splits input records by the patterns they contain.

use std::sync::Arc;

use molsift_core::{Result, StructureToolkit};

use crate::arena::{ResourceArena, Wave};
use crate::computation::{ComputeError, InputColumn, RecordComputation};
use crate::host::{ExecutionHost, ScaledHost};
use crate::matcher::{PatternMatcher, PatternSource};
use crate::options::{FilterConfig, FilterOptions};
use crate::processor::ParallelProcessor;
use crate::record::{Record, ScalarKind, Table, Value};
use crate::router::{MatchSet, ResultRouter, TableBuffer};
use crate::run::{self, RunOutput};
use crate::shape::{OutputShape, OutputSpec};
use crate::warnings::WarningConsolidator;

pub const PASSED_TABLE: &str = "Passed molecules";
pub const FAILED_TABLE: &str = "Failed molecules";

/// Share of the progress range spent on pre-processing.
pub const PREPROCESSING_SHARE: f64 = 0.1;

/// Appends the list of matching patterns to each record and marks records
/// that satisfy the criterion in the shared [`MatchSet`].
pub struct SubstructureFilter<T: StructureToolkit> {
    toolkit: Arc<T>,
    matcher: PatternMatcher<T>,
    input: InputColumn,
    matches: Arc<MatchSet>,
    row_key_match_info: bool,
    spec: OutputSpec,
}

impl<T: StructureToolkit> SubstructureFilter<T> {
    /// Compile the query patterns and, when screening is on, fingerprint
    /// every input record.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare(
        toolkit: Arc<T>,
        config: &FilterConfig,
        input: &Table,
        query: &Table,
        matches: Arc<MatchSet>,
        arena: &ResourceArena,
        warnings: &WarningConsolidator,
        host: &dyn ExecutionHost,
    ) -> Result<Self> {
        let sources = PatternSource::from_table(query, config.query.index);
        let mut matcher = PatternMatcher::compile(
            toolkit.clone(),
            &sources,
            config.criterion,
            config.threshold,
            config.params,
            warnings,
        )?;
        matcher.prepare_record_fingerprints(input.rows(), &config.input, arena, host)?;

        let kind = if config.row_key_match_info { ScalarKind::Text } else { ScalarKind::Int };
        let spec = OutputSpec::resolve(&[OutputShape::List { name: config.new_column_name.clone(), kind }])?;
        Ok(SubstructureFilter {
            toolkit,
            matcher,
            input: config.input.clone(),
            matches,
            row_key_match_info: config.row_key_match_info,
            spec,
        })
    }

    pub fn matcher(&self) -> &PatternMatcher<T> {
        &self.matcher
    }

    /// Release patterns and fingerprints and forget unrouted matches.
    pub fn cleanup(&mut self) {
        self.matcher.cleanup();
        self.matches.clear();
    }
}

impl<T: StructureToolkit> RecordComputation for SubstructureFilter<T> {
    fn output_spec(&self) -> &OutputSpec {
        &self.spec
    }

    fn compute(&self, record: &Record, wave: &Wave<'_>) -> std::result::Result<Vec<Value>, ComputeError> {
        let Some(structure) = self.input.structure(record, self.toolkit.as_ref(), wave)? else {
            return Ok(self.spec.empty_values());
        };
        let result = self.matcher.evaluate_and_mark(&record.key, &structure, &self.matches);
        Ok(vec![self.matcher.match_info(&result, self.row_key_match_info)])
    }
}

/// Filter `input` by the patterns in `query`.
///
/// Produces two tables, [`PASSED_TABLE`] and [`FAILED_TABLE`], holding the
/// input records plus the match list column, in input order.
pub fn run_filter<T: StructureToolkit>(
    toolkit: Arc<T>,
    options: &FilterOptions,
    input: &Table,
    query: &Table,
    host: &dyn ExecutionHost,
) -> Result<RunOutput> {
    let warnings = WarningConsolidator::new();
    let config = options.configure(input.schema(), query.schema(), &warnings)?;
    let arena = ResourceArena::new();
    let matches = Arc::new(MatchSet::new());

    let mut filter = SubstructureFilter::prepare(
        toolkit,
        &config,
        input,
        query,
        matches.clone(),
        &arena,
        &warnings,
        &ScaledHost::new(host, 0.0, PREPROCESSING_SHARE),
    )?;
    let schema = input.schema().extend(filter.output_spec().columns())?;
    let mut router = ResultRouter::new(
        matches,
        TableBuffer::new(PASSED_TABLE, schema.clone()),
        TableBuffer::new(FAILED_TABLE, schema),
    );

    let outcome = ParallelProcessor::new(
        &filter,
        &arena,
        &warnings,
        config.processing.row_failure_policy,
        config.processing.processor_config(),
    )
    .run(
        input.records(),
        &mut router,
        &ScaledHost::new(host, PREPROCESSING_SHARE, 1.0 - PREPROCESSING_SHARE),
    );
    let stats = filter.matcher().stats();
    filter.cleanup();
    let summary = outcome?;

    tracing::info!(
        matched = router.matched_count(),
        unmatched = router.unmatched_count(),
        screened_out = stats.screened_out,
        exact_checks = stats.exact_checks,
        "substructure filter finished"
    );
    let (passed, failed) = router.into_sinks();
    Ok(run::finish(
        summary,
        vec![passed.into_table(), failed.into_table()],
        Some(stats),
        query.len(),
        &arena,
        &warnings,
    ))
}
