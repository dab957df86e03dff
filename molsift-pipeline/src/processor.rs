//! Parallel per-record processing with strictly ordered output.
//!
//! Workers compute records concurrently. A single draining loop on the
//! calling thread consumes their results in input order, releases each
//! record's wave and only then hands the record to the result processor.
//! Output sinks therefore never see concurrent writes and always see input
//! order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::{bounded, unbounded};
use molsift_core::{Result, SiftError, Summarizable};

use crate::arena::{ResourceArena, Wave, WaveId};
use crate::computation::{CellFactory, RecordComputation, RowFailurePolicy};
use crate::host::ExecutionHost;
use crate::record::{Record, Value};
use crate::warnings::WarningConsolidator;

/// Consumes computed records in input order on a single thread.
pub trait ResultProcessor {
    fn process_result(&mut self, index: u64, record: Record, values: Vec<Value>) -> Result<()>;
}

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Number of worker threads.
    pub worker_threads: usize,
    /// Records between two progress reports.
    pub progress_interval: usize,
    /// Maximum number of records dispatched but not yet drained.
    pub window: usize,
}

impl ProcessorConfig {
    pub fn with_workers(worker_threads: usize) -> Self {
        let worker_threads = worker_threads.max(1);
        ProcessorConfig {
            worker_threads,
            progress_interval: 20,
            window: worker_threads * 4,
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        let workers = thread::available_parallelism().map(|p| p.get()).unwrap_or(1);
        Self::with_workers(workers)
    }
}

/// Lifecycle of one processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Cancelled => "cancelled",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of a run that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub state: RunState,
    /// Records read from the input and handed to the computation.
    pub dispatched: u64,
    /// Records passed to the result processor.
    pub processed: u64,
    /// Native handles whose release failed.
    pub release_failures: u64,
}

impl Summarizable for RunSummary {
    fn summary(&self) -> String {
        format!(
            "{}: {} of {} records processed, {} release failures",
            self.state, self.processed, self.dispatched, self.release_failures
        )
    }
}

struct Job {
    seq: u64,
    wave: WaveId,
    record: Record,
}

struct Completed {
    seq: u64,
    wave: WaveId,
    record: Record,
    outcome: Result<Vec<Value>>,
}

enum Stop {
    Cancelled,
    Failed(SiftError),
}

#[derive(Default)]
struct Counters {
    dispatched: u64,
    processed: u64,
    release_failures: u64,
}

/// Drives a [`RecordComputation`] over an input sequence.
pub struct ParallelProcessor<'a> {
    factory: CellFactory<'a>,
    arena: &'a ResourceArena,
    config: ProcessorConfig,
    state: RunState,
}

impl<'a> ParallelProcessor<'a> {
    pub fn new(
        computation: &'a dyn RecordComputation,
        arena: &'a ResourceArena,
        warnings: &'a WarningConsolidator,
        policy: RowFailurePolicy,
        config: ProcessorConfig,
    ) -> Self {
        ParallelProcessor {
            factory: CellFactory::new(computation, warnings, policy),
            arena,
            config,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Process every record of `input` and pass the results to `results`
    /// in input order.
    ///
    /// Returns the summary of a completed or cancelled run. A fatal
    /// computation error, an input error or a result processor error fails
    /// the run; every wave opened so far is released before the error is
    /// returned.
    pub fn run<I>(&mut self, input: I, results: &mut dyn ResultProcessor, host: &dyn ExecutionHost) -> Result<RunSummary>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        if self.state != RunState::Idle {
            return Err(SiftError::InvalidInput(format!("processor cannot run again, it is {}", self.state)));
        }
        self.state = RunState::Running;
        let input = input.into_iter();
        let total = match input.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(upper as u64),
            _ => None,
        };
        let parallel = self.factory.computation().supports_parallel_execution() && self.config.worker_threads > 1;
        tracing::info!(parallel, workers = self.config.worker_threads, total, "processing started");

        let mut counters = Counters::default();
        let drain = Drain {
            factory: &self.factory,
            arena: self.arena,
            config: &self.config,
            host,
            total,
        };
        let stop = if parallel {
            drain.parallel(input, results, &mut counters)
        } else {
            drain.sequential(input, results, &mut counters)
        };

        let summary = |state| RunSummary {
            state,
            dispatched: counters.dispatched,
            processed: counters.processed,
            release_failures: counters.release_failures,
        };
        match stop {
            None => {
                self.state = RunState::Completed;
                host.report_progress(1.0, "Processing finished");
                let summary = summary(RunState::Completed);
                tracing::info!(summary = %summary.summary(), "processing finished");
                Ok(summary)
            }
            Some(Stop::Cancelled) => {
                self.state = RunState::Cancelled;
                let summary = summary(RunState::Cancelled);
                tracing::info!(summary = %summary.summary(), "processing cancelled");
                Ok(summary)
            }
            Some(Stop::Failed(e)) => {
                self.state = RunState::Failed;
                tracing::error!(error = %e, dispatched = counters.dispatched, "processing failed");
                Err(e)
            }
        }
    }
}

/// Run the computation for one record, turning a panic into an error.
fn produce_caught(factory: &CellFactory<'_>, record: &Record, wave: &Wave<'_>) -> Result<Vec<Value>> {
    panic::catch_unwind(AssertUnwindSafe(|| factory.produce(record, wave))).unwrap_or_else(|payload| {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(record = %record.key, panic = %msg, "computation panicked");
        Err(SiftError::Computation(format!("computation panicked: {msg}")))
    })
}

struct Drain<'r, 'a> {
    factory: &'r CellFactory<'a>,
    arena: &'a ResourceArena,
    config: &'r ProcessorConfig,
    host: &'r dyn ExecutionHost,
    total: Option<u64>,
}

impl Drain<'_, '_> {
    /// Release the wave, hand over the result and poll the host. Results
    /// arriving after a stop are discarded.
    fn consume(&self, done: Completed, results: &mut dyn ResultProcessor, counters: &mut Counters, stop: &mut Option<Stop>) {
        counters.release_failures += self.arena.release_wave(done.wave) as u64;
        if stop.is_some() {
            return;
        }
        let delivered = done
            .outcome
            .and_then(|values| results.process_result(done.seq, done.record, values));
        if let Err(e) = delivered {
            *stop = Some(Stop::Failed(e));
            return;
        }
        counters.processed += 1;
        let interval = self.config.progress_interval.max(1) as u64;
        if counters.processed % interval == 0 {
            let (fraction, message) = match self.total {
                Some(total) if total > 0 => (
                    counters.processed as f64 / total as f64,
                    format!("Processed {} of {} records", counters.processed, total),
                ),
                _ => (0.0, format!("Processed {} records", counters.processed)),
            };
            self.host.report_progress(fraction, &message);
        }
        if self.host.is_cancelled() {
            *stop = Some(Stop::Cancelled);
        }
    }

    fn sequential(
        &self,
        input: impl Iterator<Item = Result<Record>>,
        results: &mut dyn ResultProcessor,
        counters: &mut Counters,
    ) -> Option<Stop> {
        let mut stop = None;
        if self.host.is_cancelled() {
            return Some(Stop::Cancelled);
        }
        for item in input {
            let record = match item {
                Ok(record) => record,
                Err(e) => return Some(Stop::Failed(e)),
            };
            let seq = counters.dispatched;
            counters.dispatched += 1;
            let wave = self.arena.open_wave();
            let outcome = produce_caught(self.factory, &record, &Wave::new(wave, self.arena));
            self.consume(Completed { seq, wave, record, outcome }, results, counters, &mut stop);
            if stop.is_some() {
                break;
            }
        }
        stop
    }

    fn parallel(
        &self,
        mut input: impl Iterator<Item = Result<Record>>,
        results: &mut dyn ResultProcessor,
        counters: &mut Counters,
    ) -> Option<Stop> {
        let window = self.config.window.max(1) as u64;
        let (job_tx, job_rx) = bounded::<Job>(window as usize);
        let (done_tx, done_rx) = unbounded::<Completed>();

        thread::scope(|scope| {
            for _ in 0..self.config.worker_threads {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                let factory = self.factory;
                let arena = self.arena;
                scope.spawn(move || {
                    for job in job_rx.iter() {
                        let outcome = produce_caught(factory, &job.record, &Wave::new(job.wave, arena));
                        let done = Completed { seq: job.seq, wave: job.wave, record: job.record, outcome };
                        if done_tx.send(done).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(done_tx);

            let mut stop = if self.host.is_cancelled() { Some(Stop::Cancelled) } else { None };
            let mut exhausted = false;
            // Records read before a failing input item are still delivered.
            let mut input_error = None;
            let mut next_drain = 0u64;
            let mut pending: BTreeMap<u64, Completed> = BTreeMap::new();
            let mut outstanding: HashMap<u64, WaveId> = HashMap::new();

            loop {
                while stop.is_none() && !exhausted && counters.dispatched - next_drain < window {
                    match input.next() {
                        None => exhausted = true,
                        Some(Err(e)) => {
                            input_error = Some(e);
                            exhausted = true;
                        }
                        Some(Ok(record)) => {
                            let seq = counters.dispatched;
                            let wave = self.arena.open_wave();
                            if job_tx.send(Job { seq, wave, record }).is_err() {
                                counters.release_failures += self.arena.release_wave(wave) as u64;
                                stop = Some(Stop::Failed(SiftError::Computation("worker pool terminated".into())));
                                break;
                            }
                            outstanding.insert(seq, wave);
                            counters.dispatched += 1;
                        }
                    }
                }
                if next_drain == counters.dispatched {
                    break;
                }
                let done = match pending.remove(&next_drain) {
                    Some(done) => done,
                    None => match done_rx.recv() {
                        Ok(done) => {
                            pending.insert(done.seq, done);
                            continue;
                        }
                        Err(_) => {
                            if stop.is_none() {
                                stop = Some(Stop::Failed(SiftError::Computation(
                                    "worker pool terminated before all records were computed".into(),
                                )));
                            }
                            break;
                        }
                    },
                };
                outstanding.remove(&done.seq);
                next_drain += 1;
                self.consume(done, results, counters, &mut stop);
            }
            drop(job_tx);

            for wave in outstanding.into_values() {
                counters.release_failures += self.arena.release_wave(wave) as u64;
            }
            stop.or(input_error.map(Stop::Failed))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::arena::testing::CountingHandle;
    use crate::computation::ComputeError;
    use crate::host::{CancelFlag, SilentHost};
    use crate::record::ScalarKind;
    use crate::shape::{OutputShape, OutputSpec};

    /// Echoes the record's integer, sleeping a value-dependent time, and
    /// tracks one handle per record.
    struct Echo {
        spec: OutputSpec,
        released: std::sync::Arc<AtomicUsize>,
        parallel: bool,
        fail_on: Option<i64>,
    }

    impl Echo {
        fn new(parallel: bool) -> Self {
            Echo {
                spec: OutputSpec::resolve(&[OutputShape::Scalar { name: "echo".into(), kind: ScalarKind::Int }])
                    .unwrap(),
                released: Default::default(),
                parallel,
                fail_on: None,
            }
        }
    }

    impl RecordComputation for Echo {
        fn output_spec(&self) -> &OutputSpec {
            &self.spec
        }

        fn compute(&self, record: &Record, wave: &Wave<'_>) -> std::result::Result<Vec<Value>, ComputeError> {
            wave.track(CountingHandle { released: self.released.clone(), fail: false })?;
            let Some(Value::Int(n)) = record.value(0) else {
                return Err(ComputeError::Failed("no int".into()));
            };
            if Some(*n) == self.fail_on {
                return Err(ComputeError::Failed("bad record".into()));
            }
            thread::sleep(Duration::from_micros(((n * 7919) % 13) as u64 * 100));
            Ok(vec![Value::Int(*n)])
        }

        fn supports_parallel_execution(&self) -> bool {
            self.parallel
        }
    }

    #[derive(Default)]
    struct Collect {
        seen: Vec<(u64, i64)>,
        fail_at: Option<usize>,
    }

    impl ResultProcessor for Collect {
        fn process_result(&mut self, index: u64, _record: Record, values: Vec<Value>) -> Result<()> {
            if Some(self.seen.len()) == self.fail_at {
                return Err(SiftError::Sink("destination full".into()));
            }
            let n = match values.first() {
                Some(Value::Int(n)) => *n,
                _ => -1,
            };
            self.seen.push((index, n));
            Ok(())
        }
    }

    fn records(n: i64) -> Vec<Result<Record>> {
        (0..n).map(|i| Ok(Record::new(format!("r{i}"), vec![Value::Int(i)]))).collect()
    }

    fn run_with(
        computation: &Echo,
        config: ProcessorConfig,
        input: Vec<Result<Record>>,
        sink: &mut Collect,
        host: &dyn ExecutionHost,
    ) -> (Result<RunSummary>, RunState, crate::arena::ArenaStats) {
        let arena = ResourceArena::new();
        let warnings = WarningConsolidator::new();
        let mut processor =
            ParallelProcessor::new(computation, &arena, &warnings, RowFailurePolicy::DeliverEmptyValues, config);
        let result = processor.run(input, sink, host);
        (result, processor.state(), arena.stats())
    }

    #[test]
    fn parallel_output_keeps_input_order() {
        let echo = Echo::new(true);
        let mut sink = Collect::default();
        let (result, state, stats) = run_with(&echo, ProcessorConfig::with_workers(4), records(200), &mut sink, &SilentHost);
        let summary = result.unwrap();
        assert_eq!(state, RunState::Completed);
        assert_eq!(summary.processed, 200);
        let expected: Vec<_> = (0..200).map(|i| (i as u64, i)).collect();
        assert_eq!(sink.seen, expected);
        assert_eq!(stats.waves_opened, stats.waves_released);
        assert_eq!(echo.released.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn sequential_when_not_parallel_safe() {
        let echo = Echo::new(false);
        let mut sink = Collect::default();
        let (result, _, stats) = run_with(&echo, ProcessorConfig::with_workers(4), records(30), &mut sink, &SilentHost);
        assert_eq!(result.unwrap().processed, 30);
        assert_eq!(sink.seen.len(), 30);
        assert_eq!(stats.open_waves(), 0);
    }

    #[test]
    fn recoverable_failures_yield_missing_values() {
        let mut echo = Echo::new(true);
        echo.fail_on = Some(3);
        let mut sink = Collect::default();
        let (result, _, _) = run_with(&echo, ProcessorConfig::with_workers(3), records(6), &mut sink, &SilentHost);
        assert_eq!(result.unwrap().processed, 6);
        assert_eq!(sink.seen[3], (3, -1));
    }

    #[test]
    fn cancelled_run_releases_everything() {
        let echo = Echo::new(true);
        let flag = CancelFlag::new();
        flag.cancel();
        let mut sink = Collect::default();
        let (result, state, stats) = run_with(&echo, ProcessorConfig::with_workers(2), records(50), &mut sink, &flag);
        assert_eq!(result.unwrap().state, RunState::Cancelled);
        assert_eq!(state, RunState::Cancelled);
        assert!(sink.seen.is_empty());
        assert_eq!(stats.waves_opened, stats.waves_released);
    }

    /// Reports cancellation from the `limit`-th poll on.
    struct CancelAfter {
        polls: AtomicUsize,
        limit: usize,
    }

    impl ExecutionHost for CancelAfter {
        fn is_cancelled(&self) -> bool {
            self.polls.fetch_add(1, Ordering::SeqCst) >= self.limit
        }

        fn report_progress(&self, _fraction: f64, _message: &str) {}
    }

    #[test]
    fn cancellation_between_records() {
        for workers in [1, 3] {
            let echo = Echo::new(true);
            let host = CancelAfter { polls: AtomicUsize::new(0), limit: 5 };
            let mut sink = Collect::default();
            let (result, _, stats) =
                run_with(&echo, ProcessorConfig::with_workers(workers), records(100), &mut sink, &host);
            let summary = result.unwrap();
            assert_eq!(summary.state, RunState::Cancelled);
            assert_eq!(summary.processed, 5);
            assert_eq!(sink.seen.len(), 5);
            assert_eq!(stats.waves_opened, stats.waves_released);
            assert_eq!(echo.released.load(Ordering::SeqCst) as u64, stats.handles_tracked);
        }
    }

    #[test]
    fn sink_failure_fails_run_without_leaks() {
        for workers in [1, 4] {
            let echo = Echo::new(true);
            let mut sink = Collect { fail_at: Some(10), ..Default::default() };
            let (result, state, stats) =
                run_with(&echo, ProcessorConfig::with_workers(workers), records(100), &mut sink, &SilentHost);
            assert!(matches!(result, Err(SiftError::Sink(_))));
            assert_eq!(state, RunState::Failed);
            assert_eq!(sink.seen.len(), 10);
            assert_eq!(stats.waves_opened, stats.waves_released);
            assert_eq!(echo.released.load(Ordering::SeqCst) as u64, stats.handles_released);
        }
    }

    #[test]
    fn input_failure_fails_run() {
        let echo = Echo::new(true);
        let mut input = records(20);
        input[7] = Err(SiftError::Parse("truncated input".into()));
        let mut sink = Collect::default();
        let (result, _, stats) = run_with(&echo, ProcessorConfig::with_workers(3), input, &mut sink, &SilentHost);
        assert!(matches!(result, Err(SiftError::Parse(_))));
        assert_eq!(sink.seen.len(), 7);
        assert_eq!(stats.open_waves(), 0);
    }

    /// Panics on one record key.
    struct PanicOn {
        spec: OutputSpec,
        key: &'static str,
        released: std::sync::Arc<AtomicUsize>,
    }

    impl RecordComputation for PanicOn {
        fn output_spec(&self) -> &OutputSpec {
            &self.spec
        }

        fn compute(&self, record: &Record, wave: &Wave<'_>) -> std::result::Result<Vec<Value>, ComputeError> {
            wave.track(CountingHandle { released: self.released.clone(), fail: false })?;
            if record.key.as_str() == self.key {
                panic!("corrupt record {}", record.key);
            }
            Ok(vec![Value::Int(0)])
        }
    }

    #[test]
    fn panic_fails_run_for_any_pool_size() {
        for workers in [1, 4] {
            let computation = PanicOn {
                spec: OutputSpec::resolve(&[OutputShape::Scalar { name: "out".into(), kind: ScalarKind::Int }])
                    .unwrap(),
                key: "r2",
                released: Default::default(),
            };
            let arena = ResourceArena::new();
            let warnings = WarningConsolidator::new();
            let mut processor = ParallelProcessor::new(
                &computation,
                &arena,
                &warnings,
                RowFailurePolicy::DeliverEmptyValues,
                ProcessorConfig::with_workers(workers),
            );
            let mut sink = Collect::default();
            let result = processor.run(records(5), &mut sink, &SilentHost);
            match result {
                Err(SiftError::Computation(msg)) => assert!(msg.contains("corrupt record r2"), "{msg}"),
                other => panic!("expected a computation error with {workers} workers, got {other:?}"),
            }
            assert_eq!(processor.state(), RunState::Failed);
            assert_eq!(sink.seen.len(), 2);
            let stats = arena.stats();
            assert_eq!(stats.waves_opened, stats.waves_released);
            assert_eq!(computation.released.load(Ordering::SeqCst) as u64, stats.handles_tracked);
        }
    }

    #[test]
    fn processor_runs_once() {
        let echo = Echo::new(true);
        let arena = ResourceArena::new();
        let warnings = WarningConsolidator::new();
        let mut processor = ParallelProcessor::new(
            &echo,
            &arena,
            &warnings,
            RowFailurePolicy::default(),
            ProcessorConfig::with_workers(2),
        );
        let mut sink = Collect::default();
        processor.run(records(3), &mut sink, &SilentHost).unwrap();
        assert!(processor.run(records(3), &mut sink, &SilentHost).is_err());
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(24))]

            #[test]
            fn order_is_preserved(n in 0i64..80, workers in 1usize..6, window in 1usize..10) {
                let echo = Echo::new(true);
                let mut sink = Collect::default();
                let config = ProcessorConfig { worker_threads: workers, progress_interval: 5, window };
                let (result, _, stats) = run_with(&echo, config, records(n), &mut sink, &SilentHost);
                prop_assert_eq!(result.unwrap().processed, n as u64);
                let got: Vec<i64> = sink.seen.iter().map(|(_, v)| *v).collect();
                prop_assert_eq!(got, (0..n).collect::<Vec<_>>());
                prop_assert_eq!(stats.waves_opened, stats.waves_released);
            }
        }
    }
}
