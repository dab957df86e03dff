//! The per-record computation contract and the failure policies around it.

use std::sync::Arc;

use molsift_core::{Result, SiftError, StructureToolkit};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arena::Wave;
use crate::record::{Record, Schema, Value};
use crate::shape::OutputSpec;
use crate::warnings::WarningConsolidator;

pub const EMPTY_INPUT_WARNING: &str = "Encountered empty input cell.";

/// Why a single record could not be computed.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// An input cell was empty and its column policy rejects that.
    #[error("{message}")]
    EmptyInput {
        column: String,
        message: String,
        stops_execution: bool,
    },

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Sift(#[from] SiftError),
}

/// What to do when computing a record fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowFailurePolicy {
    /// Emit missing values for the record and keep going.
    #[default]
    DeliverEmptyValues,
    /// Abort the run.
    StopExecution,
}

/// What to do when an input cell holds no value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyCellPolicy {
    /// Hand the missing value to the computation.
    TreatAsNull,
    /// Substitute a fixed value.
    UseDefault(Value),
    /// Emit missing values for the whole record with a row warning.
    #[default]
    DeliverEmptyRow,
    /// Abort the run.
    StopExecution,
    /// Hand the missing value to the computation, which decides itself.
    Custom,
}

/// A function from one record to its computed output values.
///
/// Implementations must only share state across records through thread-safe
/// collaborators. Every native object created during [`compute`](Self::compute)
/// must be tracked in the given wave before returning; the caller releases
/// the wave after consuming the values.
pub trait RecordComputation: Send + Sync {
    /// Layout of the values [`compute`](Self::compute) returns.
    fn output_spec(&self) -> &OutputSpec;

    fn compute(&self, record: &Record, wave: &Wave<'_>) -> std::result::Result<Vec<Value>, ComputeError>;

    fn supports_parallel_execution(&self) -> bool {
        true
    }
}

/// A column a computation reads, together with its empty cell policy.
#[derive(Debug, Clone, PartialEq)]
pub struct InputColumn {
    pub name: String,
    pub index: usize,
    pub policy: EmptyCellPolicy,
}

impl InputColumn {
    /// Resolve `name` against `schema`.
    pub fn resolve(schema: &Schema, name: &str, policy: EmptyCellPolicy) -> Result<Self> {
        let index = schema
            .find(name)
            .ok_or_else(|| SiftError::Config(format!("input column '{name}' does not exist")))?;
        if let EmptyCellPolicy::UseDefault(default) = &policy {
            if default.is_missing() {
                return Err(SiftError::Config(format!(
                    "column '{name}' uses a default value for empty cells, but none was given"
                )));
            }
        }
        Ok(InputColumn { name: name.to_string(), index, policy })
    }

    /// The cell of `record`, with the empty cell policy applied.
    pub fn read<'a>(&'a self, record: &'a Record) -> std::result::Result<&'a Value, ComputeError> {
        let value = record.value(self.index).ok_or_else(|| {
            ComputeError::Failed(format!("record '{}' has no column '{}'", record.key, self.name))
        })?;
        if !value.is_missing() {
            return Ok(value);
        }
        match &self.policy {
            EmptyCellPolicy::TreatAsNull | EmptyCellPolicy::Custom => Ok(value),
            EmptyCellPolicy::UseDefault(default) => Ok(default),
            EmptyCellPolicy::DeliverEmptyRow => Err(ComputeError::EmptyInput {
                column: self.name.clone(),
                message: format!("Empty cell in ('{}', '{}'). Delivering empty row.", self.name, record.key),
                stops_execution: false,
            }),
            EmptyCellPolicy::StopExecution => Err(ComputeError::EmptyInput {
                column: self.name.clone(),
                message: format!(
                    "An empty cell has been encountered in ('{}', '{}'). Execution failed.",
                    self.name, record.key
                ),
                stops_execution: true,
            }),
        }
    }

    /// Parse the cell as a structure tracked in `wave`.
    ///
    /// Returns `None` for a missing value the policy lets through.
    pub fn structure<T: StructureToolkit>(
        &self,
        record: &Record,
        toolkit: &T,
        wave: &Wave<'_>,
    ) -> std::result::Result<Option<Arc<T::Structure>>, ComputeError> {
        let source = match self.read(record)? {
            Value::Missing => return Ok(None),
            Value::Molecule(s) | Value::Text(s) => s,
            _ => {
                return Err(ComputeError::Failed(format!(
                    "column '{}' does not hold a molecule",
                    self.name
                )))
            }
        };
        let structure = toolkit.parse_structure(source)?;
        Ok(Some(wave.track(structure)?))
    }
}

/// Runs a computation for one record and applies the failure policies.
///
/// Recoverable failures turn into missing values plus a row warning. The
/// returned values always match the computation's output layout.
pub struct CellFactory<'a> {
    computation: &'a dyn RecordComputation,
    warnings: &'a WarningConsolidator,
    policy: RowFailurePolicy,
}

impl<'a> CellFactory<'a> {
    pub fn new(
        computation: &'a dyn RecordComputation,
        warnings: &'a WarningConsolidator,
        policy: RowFailurePolicy,
    ) -> Self {
        CellFactory { computation, warnings, policy }
    }

    pub fn computation(&self) -> &'a dyn RecordComputation {
        self.computation
    }

    pub fn produce(&self, record: &Record, wave: &Wave<'_>) -> Result<Vec<Value>> {
        let spec = self.computation.output_spec();
        match self.computation.compute(record, wave) {
            Ok(values) => Ok(self.conform(spec, values)),
            Err(ComputeError::EmptyInput { message, stops_execution: true, .. }) => {
                tracing::warn!(record = %record.key, "{message}");
                Err(SiftError::Computation(format!("Creation of new data failed: {message}")))
            }
            Err(ComputeError::EmptyInput { column, message, .. }) => {
                tracing::debug!(record = %record.key, column = %column, "{message}");
                self.warnings.save_row_warning(EMPTY_INPUT_WARNING);
                Ok(spec.empty_values())
            }
            Err(e) => match self.policy {
                RowFailurePolicy::DeliverEmptyValues => {
                    let msg = format!("Failed to process data due to {e}. Generating empty result cells.");
                    tracing::debug!(record = %record.key, "{msg}");
                    self.warnings.save_row_warning(msg);
                    Ok(spec.empty_values())
                }
                RowFailurePolicy::StopExecution => {
                    tracing::error!(record = %record.key, error = %e, "creation of new data failed, aborting");
                    Err(SiftError::Computation(format!("Creation of new data failed: {e}")))
                }
            },
        }
    }

    fn conform(&self, spec: &OutputSpec, mut values: Vec<Value>) -> Vec<Value> {
        if values.len() != spec.len() {
            self.warnings.save_row_warning(format!(
                "Computation delivered {} values for {} result columns - adjusted with missing values.",
                values.len(),
                spec.len()
            ));
            values.resize(spec.len(), Value::Missing);
        }
        for (value, column) in values.iter_mut().zip(spec.columns()) {
            if !value.fits(column.ty) {
                self.warnings
                    .save_row_warning("Found a value of the wrong type in a result cell - Replaced it with a missing value.");
                *value = Value::Missing;
            }
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ResourceArena;
    use crate::record::{Column, ColumnType, ScalarKind};
    use crate::shape::OutputShape;
    use crate::warnings::ROW_CONTEXT;

    /// Emits the length of the text in column 0, or fails on "boom".
    struct TextLength {
        spec: OutputSpec,
        input: InputColumn,
    }

    impl TextLength {
        fn new(policy: EmptyCellPolicy) -> Self {
            let schema = Schema::new(vec![Column::new("text", ColumnType::Scalar(ScalarKind::Text))]).unwrap();
            TextLength {
                spec: OutputSpec::resolve(&[OutputShape::Scalar { name: "len".into(), kind: ScalarKind::Int }])
                    .unwrap(),
                input: InputColumn::resolve(&schema, "text", policy).unwrap(),
            }
        }
    }

    impl RecordComputation for TextLength {
        fn output_spec(&self) -> &OutputSpec {
            &self.spec
        }

        fn compute(&self, record: &Record, _wave: &Wave<'_>) -> std::result::Result<Vec<Value>, ComputeError> {
            match self.input.read(record)? {
                Value::Text(t) if t == "boom" => Err(ComputeError::Failed("boom".into())),
                Value::Text(t) if t == "wide" => Ok(vec![Value::Int(1), Value::Int(2)]),
                Value::Text(t) => Ok(vec![Value::Int(t.len() as i64)]),
                Value::Missing => Ok(vec![Value::Int(-1)]),
                _ => Ok(vec![Value::Text("not an int".into())]),
            }
        }
    }

    fn run(policy: EmptyCellPolicy, row_policy: RowFailurePolicy, value: Value) -> (Result<Vec<Value>>, WarningConsolidator) {
        let computation = TextLength::new(policy);
        let warnings = WarningConsolidator::new();
        let arena = ResourceArena::new();
        let wave = Wave::new(arena.open_wave(), &arena);
        let out = CellFactory::new(&computation, &warnings, row_policy).produce(&Record::new("r1", vec![value]), &wave);
        (out, warnings)
    }

    #[test]
    fn computes_values() {
        let (out, warnings) = run(EmptyCellPolicy::default(), RowFailurePolicy::default(), Value::Text("abc".into()));
        assert_eq!(out.unwrap(), vec![Value::Int(3)]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn empty_cell_delivers_empty_row() {
        let (out, warnings) = run(EmptyCellPolicy::DeliverEmptyRow, RowFailurePolicy::StopExecution, Value::Missing);
        assert_eq!(out.unwrap(), vec![Value::Missing]);
        assert_eq!(warnings.generate_warnings().messages(ROW_CONTEXT), vec![EMPTY_INPUT_WARNING]);
    }

    #[test]
    fn empty_cell_can_stop_execution() {
        let (out, _) = run(EmptyCellPolicy::StopExecution, RowFailurePolicy::DeliverEmptyValues, Value::Missing);
        assert!(matches!(out, Err(SiftError::Computation(_))));
    }

    #[test]
    fn empty_cell_passes_through_or_defaults() {
        let (out, _) = run(EmptyCellPolicy::TreatAsNull, RowFailurePolicy::default(), Value::Missing);
        assert_eq!(out.unwrap(), vec![Value::Int(-1)]);
        let (out, _) = run(
            EmptyCellPolicy::UseDefault(Value::Text("hello".into())),
            RowFailurePolicy::default(),
            Value::Missing,
        );
        assert_eq!(out.unwrap(), vec![Value::Int(5)]);
    }

    #[test]
    fn failure_policy() {
        let (out, warnings) = run(EmptyCellPolicy::default(), RowFailurePolicy::DeliverEmptyValues, Value::Text("boom".into()));
        assert_eq!(out.unwrap(), vec![Value::Missing]);
        assert_eq!(
            warnings.generate_warnings().messages(ROW_CONTEXT),
            vec!["Failed to process data due to boom. Generating empty result cells."]
        );

        let (out, _) = run(EmptyCellPolicy::default(), RowFailurePolicy::StopExecution, Value::Text("boom".into()));
        assert!(out.is_err());
    }

    #[test]
    fn malformed_output_is_conformed() {
        let (out, warnings) = run(EmptyCellPolicy::default(), RowFailurePolicy::default(), Value::Text("wide".into()));
        assert_eq!(out.unwrap(), vec![Value::Int(1)]);
        assert_eq!(warnings.generate_warnings().len(), 1);

        let (out, _) = run(EmptyCellPolicy::default(), RowFailurePolicy::default(), Value::Int(4));
        assert_eq!(out.unwrap(), vec![Value::Missing]);
    }

    #[test]
    fn default_without_value_is_rejected() {
        let schema = Schema::new(vec![Column::new("m", ColumnType::Molecule)]).unwrap();
        assert!(InputColumn::resolve(&schema, "m", EmptyCellPolicy::UseDefault(Value::Missing)).is_err());
        assert!(InputColumn::resolve(&schema, "nope", EmptyCellPolicy::default()).is_err());
    }
}
