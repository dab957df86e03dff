//! Ordering and cleanup guarantees of the parallel processor under random
//! per-record latency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use molsift_core::{Releasable, Result};
use molsift_pipeline::{
    AppendProcessor, ComputeError, JsonLinesSink, MatchSet, OutputShape, OutputSpec, ParallelProcessor,
    ProcessorConfig, Record, RecordComputation, ResourceArena, ResultRouter, RowFailurePolicy, RunState,
    ScalarKind, SilentHost, TableBuffer, Value, Wave, WarningConsolidator,
};
use molsift_pipeline::{Column, ColumnType, Schema};
use rand::Rng;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Scratch {
    released: Arc<AtomicUsize>,
}

impl Releasable for Scratch {
    fn release(&self) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Squares the input after a random delay; even squares are "matches".
struct SlowSquare {
    spec: OutputSpec,
    matches: Arc<MatchSet>,
    released: Arc<AtomicUsize>,
}

impl SlowSquare {
    fn new(matches: Arc<MatchSet>) -> Self {
        SlowSquare {
            spec: OutputSpec::resolve(&[OutputShape::Scalar { name: "square".into(), kind: ScalarKind::Int }])
                .unwrap(),
            matches,
            released: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl RecordComputation for SlowSquare {
    fn output_spec(&self) -> &OutputSpec {
        &self.spec
    }

    fn compute(&self, record: &Record, wave: &Wave<'_>) -> std::result::Result<Vec<Value>, ComputeError> {
        wave.track(Scratch { released: self.released.clone() })?;
        wave.track(Scratch { released: self.released.clone() })?;
        let delay = rand::thread_rng().gen_range(0..400);
        thread::sleep(Duration::from_micros(delay));
        let Some(Value::Int(n)) = record.value(0) else {
            return Err(ComputeError::Failed("not an integer".into()));
        };
        let square = n * n;
        if square % 2 == 0 {
            self.matches.insert(record.key.clone());
        }
        Ok(vec![Value::Int(square)])
    }
}

fn input(n: i64) -> Vec<Result<Record>> {
    (0..n).map(|i| Ok(Record::new(format!("r{i}"), vec![Value::Int(i)]))).collect()
}

fn schema() -> Schema {
    Schema::new(vec![
        Column::new("n", ColumnType::Scalar(ScalarKind::Int)),
        Column::new("square", ColumnType::Scalar(ScalarKind::Int)),
    ])
    .unwrap()
}

#[test]
fn output_order_matches_input_for_any_pool_size() {
    init_tracing();
    for workers in [1, 2, 3, 8] {
        let matches = Arc::new(MatchSet::new());
        let computation = SlowSquare::new(matches.clone());
        let arena = ResourceArena::new();
        let warnings = WarningConsolidator::new();
        let mut append = AppendProcessor::new(TableBuffer::new("squares", schema()));
        let summary = ParallelProcessor::new(
            &computation,
            &arena,
            &warnings,
            RowFailurePolicy::DeliverEmptyValues,
            ProcessorConfig::with_workers(workers),
        )
        .run(input(300), &mut append, &SilentHost)
        .unwrap();

        assert_eq!(summary.state, RunState::Completed);
        let table = append.into_sink().into_table();
        let squares: Vec<i64> = table
            .rows()
            .iter()
            .map(|r| match r.values[1] {
                Value::Int(v) => v,
                _ => -1,
            })
            .collect();
        assert_eq!(squares, (0..300).map(|i| i * i).collect::<Vec<_>>());

        let stats = arena.stats();
        assert_eq!(stats.waves_opened, 300);
        assert_eq!(stats.waves_opened, stats.waves_released);
        assert_eq!(computation.released.load(Ordering::SeqCst), 600);
        assert!(warnings.is_empty());
    }
}

#[test]
fn routing_splits_matches_into_json_lines() {
    init_tracing();
    let matches = Arc::new(MatchSet::new());
    let computation = SlowSquare::new(matches.clone());
    let arena = ResourceArena::new();
    let warnings = WarningConsolidator::new();
    let mut even = JsonLinesSink::new(Vec::new());
    let mut odd = TableBuffer::new("odd", schema());
    let mut router = ResultRouter::new(matches.clone(), &mut even, &mut odd);

    ParallelProcessor::new(
        &computation,
        &arena,
        &warnings,
        RowFailurePolicy::DeliverEmptyValues,
        ProcessorConfig::with_workers(4),
    )
    .run(input(50), &mut router, &SilentHost)
    .unwrap();

    assert_eq!(router.matched_count(), 25);
    assert_eq!(router.unmatched_count(), 25);
    assert!(matches.is_empty());
    drop(router);

    let text = String::from_utf8(even.into_inner().unwrap()).unwrap();
    let keys: Vec<String> = text
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["key"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(keys, (0..50).step_by(2).map(|i| format!("r{i}")).collect::<Vec<_>>());
    assert_eq!(odd.len(), 25);
}
