//! User options and their validation against the input schemas.
//!
//! Options deserialize from JSON with every field optional. Before any
//! processing, `configure` resolves them against the actual input and query
//! schemas and rejects inconsistent settings.

use molsift_core::{MatchParams, Result, SiftError};
use serde::{Deserialize, Serialize};

use crate::computation::{EmptyCellPolicy, InputColumn, RowFailurePolicy};
use crate::matcher::{Criterion, ScreeningThreshold};
use crate::processor::ProcessorConfig;
use crate::record::{ColumnType, ScalarKind, Schema};
use crate::warnings::WarningConsolidator;

pub const DEFAULT_MATCH_COLUMN: &str = "Matched Substructs";
pub const DEFAULT_COUNT_PREFIX: &str = "Count";
pub const MAX_MINIMUM_MATCHES: usize = 999;

/// Worker pool and failure handling shared by all computations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    /// Defaults to the available hardware parallelism.
    pub worker_threads: Option<usize>,
    pub progress_interval: usize,
    pub row_failure_policy: RowFailurePolicy,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        ProcessingOptions {
            worker_threads: None,
            progress_interval: 20,
            row_failure_policy: RowFailurePolicy::DeliverEmptyValues,
        }
    }
}

impl ProcessingOptions {
    pub fn processor_config(&self) -> ProcessorConfig {
        let mut config = match self.worker_threads {
            Some(workers) => ProcessorConfig::with_workers(workers),
            None => ProcessorConfig::default(),
        };
        config.progress_interval = self.progress_interval.max(1);
        config
    }
}

/// Options of the substructure filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// Molecule column of the input table, guessed when unset.
    pub input_column: Option<String>,
    /// Pattern column of the query table, guessed when unset.
    pub query_column: Option<String>,
    pub new_column_name: Option<String>,
    pub criterion: Criterion,
    /// `0` disables screening, `-1` uses the built-in threshold.
    pub fingerprint_screening_threshold: i32,
    pub use_chirality: bool,
    /// List matching query keys instead of 1-based pattern indices.
    pub row_key_match_info: bool,
    #[serde(flatten)]
    pub processing: ProcessingOptions,
}

impl Default for FilterOptions {
    fn default() -> Self {
        FilterOptions {
            input_column: None,
            query_column: None,
            new_column_name: None,
            criterion: Criterion::All,
            fingerprint_screening_threshold: -1,
            use_chirality: false,
            row_key_match_info: true,
            processing: ProcessingOptions::default(),
        }
    }
}

/// Filter options resolved against concrete schemas.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    pub input: InputColumn,
    pub query: InputColumn,
    pub new_column_name: String,
    pub criterion: Criterion,
    pub threshold: ScreeningThreshold,
    pub params: MatchParams,
    pub row_key_match_info: bool,
    pub processing: ProcessingOptions,
}

impl FilterOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SiftError::Config(format!("invalid filter options: {e}")))
    }

    pub fn configure(&self, input: &Schema, query: &Schema, warnings: &WarningConsolidator) -> Result<FilterConfig> {
        let input_name = resolve_column(input, self.input_column.as_deref(), "input", &[ColumnType::Molecule], warnings)?;
        let query_name = resolve_column(
            query,
            self.query_column.as_deref(),
            "query",
            &[ColumnType::Molecule, ColumnType::Scalar(ScalarKind::Text)],
            warnings,
        )?;
        let new_column_name = new_column_name(input, self.new_column_name.as_deref(), DEFAULT_MATCH_COLUMN)?;
        if let Criterion::AtLeast { minimum } = self.criterion {
            if !(1..=MAX_MINIMUM_MATCHES).contains(&minimum) {
                return Err(SiftError::Config(format!(
                    "minimum number of matches must be between 1 and {MAX_MINIMUM_MATCHES}, got {minimum}"
                )));
            }
        }
        Ok(FilterConfig {
            input: InputColumn::resolve(input, &input_name, EmptyCellPolicy::DeliverEmptyRow)?,
            query: InputColumn::resolve(query, &query_name, EmptyCellPolicy::TreatAsNull)?,
            new_column_name,
            criterion: self.criterion,
            threshold: ScreeningThreshold::from_setting(self.fingerprint_screening_threshold)?,
            params: MatchParams { use_chirality: self.use_chirality, unique: false },
            row_key_match_info: self.row_key_match_info,
            processing: self.processing.clone(),
        })
    }
}

/// Options of the substructure counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterOptions {
    pub input_column: Option<String>,
    pub query_column: Option<String>,
    /// Count matches covering the same atoms once.
    pub unique_matches_only: bool,
    pub column_name_prefix: Option<String>,
    pub fingerprint_screening_threshold: i32,
    pub use_chirality: bool,
    #[serde(flatten)]
    pub processing: ProcessingOptions,
}

impl Default for CounterOptions {
    fn default() -> Self {
        CounterOptions {
            input_column: None,
            query_column: None,
            unique_matches_only: true,
            column_name_prefix: None,
            fingerprint_screening_threshold: -1,
            use_chirality: false,
            processing: ProcessingOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CounterConfig {
    pub input: InputColumn,
    pub query: InputColumn,
    pub column_name_prefix: String,
    pub threshold: ScreeningThreshold,
    pub params: MatchParams,
    pub processing: ProcessingOptions,
}

impl CounterOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SiftError::Config(format!("invalid counter options: {e}")))
    }

    pub fn configure(&self, input: &Schema, query: &Schema, warnings: &WarningConsolidator) -> Result<CounterConfig> {
        let input_name = resolve_column(input, self.input_column.as_deref(), "input", &[ColumnType::Molecule], warnings)?;
        let query_name = resolve_column(
            query,
            self.query_column.as_deref(),
            "query",
            &[ColumnType::Molecule, ColumnType::Scalar(ScalarKind::Text)],
            warnings,
        )?;
        let prefix = self.column_name_prefix.as_deref().unwrap_or(DEFAULT_COUNT_PREFIX).trim();
        if prefix.is_empty() {
            return Err(SiftError::Config("column name prefix must not be empty".into()));
        }
        if let Some(clash) = input.columns().iter().find(|c| is_count_column(&c.name, prefix)) {
            return Err(SiftError::Config(format!(
                "the input column '{}' clashes with the count columns named '{prefix} <n>'",
                clash.name
            )));
        }
        Ok(CounterConfig {
            input: InputColumn::resolve(input, &input_name, EmptyCellPolicy::DeliverEmptyRow)?,
            query: InputColumn::resolve(query, &query_name, EmptyCellPolicy::TreatAsNull)?,
            column_name_prefix: prefix.to_string(),
            threshold: ScreeningThreshold::from_setting(self.fingerprint_screening_threshold)?,
            params: MatchParams { use_chirality: self.use_chirality, unique: self.unique_matches_only },
            processing: self.processing.clone(),
        })
    }
}

/// Use the configured column or guess the first column of an accepted type.
fn resolve_column(
    schema: &Schema,
    configured: Option<&str>,
    role: &str,
    accepted: &[ColumnType],
    warnings: &WarningConsolidator,
) -> Result<String> {
    if let Some(name) = configured {
        let index = schema
            .find(name)
            .ok_or_else(|| SiftError::Config(format!("{role} column '{name}' does not exist")))?;
        let ty = schema.columns()[index].ty;
        if !accepted.contains(&ty) {
            return Err(SiftError::Config(format!("{role} column '{name}' has incompatible type {ty:?}")));
        }
        return Ok(name.to_string());
    }
    let candidates: Vec<&str> = accepted
        .iter()
        .flat_map(|ty| schema.columns().iter().filter(move |c| c.ty == *ty))
        .map(|c| c.name.as_str())
        .collect();
    let Some(first) = candidates.first() else {
        return Err(SiftError::Config(format!("no compatible {role} column found")));
    };
    if candidates.len() > 1 {
        tracing::info!(role, column = first, candidates = candidates.len(), "auto guessing column");
        warnings.save_global_warning(format!("Auto guessing: Using column {first} as {role} column."));
    }
    Ok(first.to_string())
}

/// Whether `name` has the shape `"{prefix} {n}"` of a count column.
fn is_count_column(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(' '))
        .and_then(|n| n.parse::<usize>().ok())
        .is_some_and(|n| n >= 1)
}

/// The configured new column name, or `default` made unique in `schema`.
fn new_column_name(schema: &Schema, configured: Option<&str>, default: &str) -> Result<String> {
    match configured.map(str::trim) {
        Some("") => Err(SiftError::Config("new column name must not be empty".into())),
        Some(name) if schema.find(name).is_some() => Err(SiftError::Config(format!(
            "the name '{name}' of the new column exists already in the input"
        ))),
        Some(name) => Ok(name.to_string()),
        None => {
            let mut name = default.to_string();
            let mut n = 1;
            while schema.find(&name).is_some() {
                name = format!("{default} (#{n})");
                n += 1;
            }
            Ok(name)
        }
    }
}
