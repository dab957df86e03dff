//! Output cell shapes, resolved once into a flat column layout.
//!
//! A computation declares what it produces per record as a list of
//! [`OutputShape`]s. Before processing starts these are flattened into an
//! [`OutputSpec`] so the per-record path only deals with a fixed number of
//! typed values.

use molsift_core::{Result, SiftError};

use crate::record::{Column, ColumnType, ScalarKind, Value};

/// What a computation emits for one logical output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputShape {
    /// One scalar value.
    Scalar { name: String, kind: ScalarKind },
    /// `size` scalar values of the same kind, one column each.
    FixedArray { name: String, kind: ScalarKind, size: usize },
    /// One variable-length list value.
    List { name: String, kind: ScalarKind },
}

/// Flattened output layout of a computation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSpec {
    columns: Vec<Column>,
}

impl OutputSpec {
    /// Flatten shapes into columns. Fixed arrays become `name 1` .. `name N`.
    pub fn resolve(shapes: &[OutputShape]) -> Result<Self> {
        let mut columns = Vec::new();
        for shape in shapes {
            match shape {
                OutputShape::Scalar { name, kind } => {
                    columns.push(Column::new(checked_name(name)?, ColumnType::Scalar(*kind)));
                }
                OutputShape::FixedArray { name, kind, size } => {
                    let name = checked_name(name)?;
                    columns.extend(
                        (1..=*size).map(|i| Column::new(format!("{name} {i}"), ColumnType::Scalar(*kind))),
                    );
                }
                OutputShape::List { name, kind } => {
                    columns.push(Column::new(checked_name(name)?, ColumnType::List(*kind)));
                }
            }
        }
        Ok(OutputSpec { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Placeholder values for a record whose computation failed.
    pub fn empty_values(&self) -> Vec<Value> {
        vec![Value::Missing; self.columns.len()]
    }
}

fn checked_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SiftError::Config("output column name must not be empty".into()));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_arrays_flatten() {
        let spec = OutputSpec::resolve(&[
            OutputShape::Scalar { name: "atoms".into(), kind: ScalarKind::Int },
            OutputShape::FixedArray { name: "Count".into(), kind: ScalarKind::Int, size: 3 },
            OutputShape::List { name: "Matches".into(), kind: ScalarKind::Text },
        ])
        .unwrap();
        let names: Vec<_> = spec.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["atoms", "Count 1", "Count 2", "Count 3", "Matches"]);
        assert_eq!(spec.columns()[4].ty, ColumnType::List(ScalarKind::Text));
        assert_eq!(spec.empty_values().len(), 5);
    }

    #[test]
    fn blank_names_rejected() {
        let shapes = [OutputShape::Scalar { name: "  ".into(), kind: ScalarKind::Float }];
        assert!(OutputSpec::resolve(&shapes).is_err());
    }
}
