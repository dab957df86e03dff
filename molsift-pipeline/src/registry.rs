//! Named computations available to a run.
//!
//! A registry is an ordinary value. Build one at startup, hand it to whoever
//! starts runs, and build another one for an independent setup.

use std::collections::BTreeMap;
use std::sync::Arc;

use molsift_core::{Result, SiftError, StructureToolkit};

use crate::counter::run_counter;
use crate::filter::run_filter;
use crate::host::ExecutionHost;
use crate::options::{CounterOptions, FilterOptions};
use crate::record::Table;
use crate::run::RunOutput;

pub const SUBSTRUCTURE_FILTER: &str = "substructure-filter";
pub const SUBSTRUCTURE_COUNTER: &str = "substructure-counter";

/// Everything a registered computation consumes.
#[derive(Debug, Clone, Copy)]
pub struct RunInputs<'a> {
    pub input: &'a Table,
    pub query: &'a Table,
    /// Options as JSON, interpreted by the computation.
    pub options: &'a str,
}

type Runner = Box<dyn Fn(RunInputs<'_>, &dyn ExecutionHost) -> Result<RunOutput> + Send + Sync>;

#[derive(Default)]
pub struct ComputationRegistry {
    runners: BTreeMap<String, Runner>,
}

impl ComputationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the substructure filter and counter on `toolkit`.
    pub fn with_substructure_nodes<T: StructureToolkit + 'static>(toolkit: Arc<T>) -> Self {
        let mut registry = Self::new();
        let filter_toolkit = toolkit.clone();
        registry.register(SUBSTRUCTURE_FILTER, move |inputs, host| {
            let options = FilterOptions::from_json(inputs.options)?;
            run_filter(filter_toolkit.clone(), &options, inputs.input, inputs.query, host)
        });
        registry.register(SUBSTRUCTURE_COUNTER, move |inputs, host| {
            let options = CounterOptions::from_json(inputs.options)?;
            run_counter(toolkit.clone(), &options, inputs.input, inputs.query, host)
        });
        registry
    }

    /// Register `runner` under `name`, replacing an earlier registration.
    pub fn register<F>(&mut self, name: impl Into<String>, runner: F)
    where
        F: Fn(RunInputs<'_>, &dyn ExecutionHost) -> Result<RunOutput> + Send + Sync + 'static,
    {
        self.runners.insert(name.into(), Box::new(runner));
    }

    /// Registered names in alphabetical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.runners.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.runners.contains_key(name)
    }

    pub fn run(&self, name: &str, inputs: RunInputs<'_>, host: &dyn ExecutionHost) -> Result<RunOutput> {
        let runner = self
            .runners
            .get(name)
            .ok_or_else(|| SiftError::Config(format!("unknown computation '{name}'")))?;
        tracing::debug!(computation = name, records = inputs.input.len(), "starting run");
        runner(inputs, host)
    }
}
