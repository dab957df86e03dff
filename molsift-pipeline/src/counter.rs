//! Substructure counter: how often does each pattern occur in a record?

use std::sync::Arc;

use molsift_core::{Result, StructureToolkit};

use crate::arena::{ResourceArena, Wave};
use crate::computation::{ComputeError, InputColumn, RecordComputation};
use crate::filter::PREPROCESSING_SHARE;
use crate::host::{ExecutionHost, ScaledHost};
use crate::matcher::{Criterion, PatternMatcher, PatternSource};
use crate::options::{CounterConfig, CounterOptions};
use crate::processor::ParallelProcessor;
use crate::record::{Record, ScalarKind, Table, Value};
use crate::router::{AppendProcessor, TableBuffer};
use crate::run::{self, RunOutput};
use crate::shape::{OutputShape, OutputSpec};
use crate::warnings::WarningConsolidator;

pub const COUNTS_TABLE: &str = "Substructure counts";

/// Appends one integer column per query pattern holding its match count.
/// Columns of empty patterns stay missing.
pub struct SubstructureCounter<T: StructureToolkit> {
    toolkit: Arc<T>,
    matcher: PatternMatcher<T>,
    input: InputColumn,
    unique: bool,
    spec: OutputSpec,
}

impl<T: StructureToolkit> SubstructureCounter<T> {
    pub fn prepare(
        toolkit: Arc<T>,
        config: &CounterConfig,
        input: &Table,
        query: &Table,
        arena: &ResourceArena,
        warnings: &WarningConsolidator,
        host: &dyn ExecutionHost,
    ) -> Result<Self> {
        let sources = PatternSource::from_table(query, config.query.index);
        let mut matcher = PatternMatcher::compile(
            toolkit.clone(),
            &sources,
            Criterion::All,
            config.threshold,
            config.params,
            warnings,
        )?;
        matcher.prepare_record_fingerprints(input.rows(), &config.input, arena, host)?;
        let spec = OutputSpec::resolve(&[OutputShape::FixedArray {
            name: config.column_name_prefix.clone(),
            kind: ScalarKind::Int,
            size: matcher.pattern_count(),
        }])?;
        Ok(SubstructureCounter {
            toolkit,
            matcher,
            input: config.input.clone(),
            unique: config.params.unique,
            spec,
        })
    }

    pub fn matcher(&self) -> &PatternMatcher<T> {
        &self.matcher
    }
}

impl<T: StructureToolkit> RecordComputation for SubstructureCounter<T> {
    fn output_spec(&self) -> &OutputSpec {
        &self.spec
    }

    fn compute(&self, record: &Record, wave: &Wave<'_>) -> std::result::Result<Vec<Value>, ComputeError> {
        let Some(structure) = self.input.structure(record, self.toolkit.as_ref(), wave)? else {
            return Ok(self.spec.empty_values());
        };
        Ok(self
            .matcher
            .count(&record.key, &structure, self.unique)
            .into_iter()
            .map(|count| count.map_or(Value::Missing, |n| Value::Int(n as i64)))
            .collect())
    }
}

/// Count the patterns of `query` in every record of `input`.
pub fn run_counter<T: StructureToolkit>(
    toolkit: Arc<T>,
    options: &CounterOptions,
    input: &Table,
    query: &Table,
    host: &dyn ExecutionHost,
) -> Result<RunOutput> {
    let warnings = WarningConsolidator::new();
    let config = options.configure(input.schema(), query.schema(), &warnings)?;
    let arena = ResourceArena::new();

    let mut counter = SubstructureCounter::prepare(
        toolkit,
        &config,
        input,
        query,
        &arena,
        &warnings,
        &ScaledHost::new(host, 0.0, PREPROCESSING_SHARE),
    )?;
    let schema = input.schema().extend(counter.output_spec().columns())?;
    let mut append = AppendProcessor::new(TableBuffer::new(COUNTS_TABLE, schema));

    let outcome = ParallelProcessor::new(
        &counter,
        &arena,
        &warnings,
        config.processing.row_failure_policy,
        config.processing.processor_config(),
    )
    .run(
        input.records(),
        &mut append,
        &ScaledHost::new(host, PREPROCESSING_SHARE, 1.0 - PREPROCESSING_SHARE),
    );
    let stats = counter.matcher().stats();
    counter.matcher.cleanup();
    let summary = outcome?;

    Ok(run::finish(
        summary,
        vec![append.into_sink().into_table()],
        Some(stats),
        query.len(),
        &arena,
        &warnings,
    ))
}
