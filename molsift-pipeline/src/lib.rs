//! Ordered parallel per-record computation for molsift.
//!
//! The engine turns each input record into derived values on a worker pool
//! while keeping three promises:
//!
//! - **Input order**: results reach the sinks exactly in input order
//!   ([`ParallelProcessor`]).
//! - **Deterministic cleanup**: native handles live in per-record waves that
//!   are released as soon as the record is consumed ([`ResourceArena`]).
//! - **No aborts for bad records**: recoverable problems become consolidated
//!   warnings ([`WarningConsolidator`]).
//!
//! On top sits the fingerprint-screened [`PatternMatcher`] used by the
//! [`SubstructureFilter`] and [`SubstructureCounter`] computations.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use molsift_chem::GraphToolkit;
//! use molsift_pipeline::{
//!     run_filter, Column, ColumnType, FilterOptions, Record, Schema, SilentHost, Table, Value,
//!     FAILED_TABLE, PASSED_TABLE,
//! };
//!
//! let schema = Schema::new(vec![Column::new("mol", ColumnType::Molecule)]).unwrap();
//! let mut input = Table::new("molecules", schema.clone());
//! input.push(Record::new("ethanol", vec![Value::Molecule("CCO".into())])).unwrap();
//! input.push(Record::new("propane", vec![Value::Molecule("CCC".into())])).unwrap();
//! let mut query = Table::new("patterns", schema);
//! query.push(Record::new("hydroxyl", vec![Value::Molecule("CO".into())])).unwrap();
//!
//! let output = run_filter(
//!     Arc::new(GraphToolkit::new()),
//!     &FilterOptions::default(),
//!     &input,
//!     &query,
//!     &SilentHost,
//! )
//! .unwrap();
//! assert_eq!(output.table(PASSED_TABLE).unwrap().len(), 1);
//! assert_eq!(output.table(FAILED_TABLE).unwrap().len(), 1);
//! ```

pub mod arena;
pub mod computation;
pub mod counter;
pub mod filter;
pub mod host;
pub mod matcher;
pub mod options;
pub mod processor;
pub mod record;
pub mod registry;
pub mod router;
pub mod run;
pub mod shape;
pub mod warnings;

pub use arena::{ArenaStats, ResourceArena, Wave, WaveId};
pub use computation::{CellFactory, ComputeError, EmptyCellPolicy, InputColumn, RecordComputation, RowFailurePolicy};
pub use counter::{run_counter, SubstructureCounter, COUNTS_TABLE};
pub use filter::{run_filter, SubstructureFilter, FAILED_TABLE, PASSED_TABLE};
pub use host::{CancelFlag, ExecutionHost, ScaledHost, SilentHost};
pub use matcher::{
    screen_candidate, Criterion, MatchResult, MatcherStats, PatternMatcher, PatternSource, ScreeningThreshold,
};
pub use options::{CounterConfig, CounterOptions, FilterConfig, FilterOptions, ProcessingOptions};
pub use processor::{ParallelProcessor, ProcessorConfig, ResultProcessor, RunState, RunSummary};
pub use record::{Column, ColumnType, Record, RecordKey, ScalarKind, Schema, Table, Value};
pub use registry::{ComputationRegistry, RunInputs};
pub use router::{AppendProcessor, JsonLinesSink, MatchSet, RecordSink, ResultRouter, TableBuffer};
pub use run::RunOutput;
pub use shape::{OutputShape, OutputSpec};
pub use warnings::{Context, SuppressionFilter, WarningConsolidator, WarningReport};
