//! Records, values, schemas and in-memory tables.

use std::collections::HashSet;
use std::fmt;

use molsift_core::{Result, SiftError};
use serde::{Deserialize, Serialize};

/// Stable identifier of a record, unique within one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(key: impl Into<String>) -> Self {
        RecordKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordKey {
    fn from(key: &str) -> Self {
        RecordKey::new(key)
    }
}

/// Scalar cell types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Int,
    Float,
    Text,
}

/// Type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Serialized molecule, parsed on demand by a structure toolkit.
    Molecule,
    Scalar(ScalarKind),
    /// Variable-length list of scalars.
    List(ScalarKind),
}

/// A typed cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Missing,
    Molecule(String),
    Text(String),
    Int(i64),
    Float(f64),
    List(Vec<Value>),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Whether this value can be stored in a column of type `ty`.
    /// Missing values fit every column.
    pub fn fits(&self, ty: ColumnType) -> bool {
        match (self, ty) {
            (Value::Missing, _) => true,
            (Value::Molecule(_), ColumnType::Molecule) => true,
            (Value::Int(_), ColumnType::Scalar(ScalarKind::Int)) => true,
            (Value::Float(_), ColumnType::Scalar(ScalarKind::Float)) => true,
            (Value::Text(_), ColumnType::Scalar(ScalarKind::Text)) => true,
            (Value::List(items), ColumnType::List(kind)) => {
                items.iter().all(|item| item.fits(ColumnType::Scalar(kind)))
            }
            _ => false,
        }
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Column { name: name.into(), ty }
    }
}

/// Ordered column layout shared by all records of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Build a schema, rejecting duplicate column names.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(SiftError::InvalidInput(format!("duplicate column name '{}'", col.name)));
            }
        }
        Ok(Schema { columns })
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

    /// Index of the column called `name`.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Names of all columns holding molecules, in schema order.
    pub fn molecule_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.ty == ColumnType::Molecule)
            .map(|c| c.name.as_str())
    }

    /// This schema followed by `extra` columns.
    pub fn extend(&self, extra: &[Column]) -> Result<Schema> {
        Schema::new(self.columns.iter().chain(extra).cloned().collect())
    }
}

/// One input row: a key and one value per schema column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: RecordKey,
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(key: impl Into<String>, values: Vec<Value>) -> Self {
        Record { key: RecordKey::new(key), values }
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Append computed values to the original ones.
    pub fn merge(mut self, computed: Vec<Value>) -> Record {
        self.values.extend(computed);
        self
    }
}

/// An in-memory table of records with unique keys.
#[derive(Debug, Clone, Default)]
pub struct Table {
    name: String,
    schema: Schema,
    rows: Vec<Record>,
    keys: HashSet<RecordKey>,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Table {
            name: name.into(),
            schema,
            rows: Vec::new(),
            keys: HashSet::new(),
        }
    }

    /// Append a record, checking arity, value types and key uniqueness.
    pub fn push(&mut self, record: Record) -> Result<()> {
        if record.values.len() != self.schema.len() {
            return Err(SiftError::InvalidInput(format!(
                "record '{}' has {} values, table '{}' has {} columns",
                record.key,
                record.values.len(),
                self.name,
                self.schema.len()
            )));
        }
        if let Some((col, _)) = self
            .schema
            .columns()
            .iter()
            .zip(&record.values)
            .find(|(col, value)| !value.fits(col.ty))
        {
            return Err(SiftError::InvalidInput(format!(
                "record '{}' holds a value of the wrong type in column '{}'",
                record.key, col.name
            )));
        }
        if !self.keys.insert(record.key.clone()) {
            return Err(SiftError::InvalidInput(format!(
                "duplicate record key '{}' in table '{}'",
                record.key, self.name
            )));
        }
        self.rows.push(record);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Records as a fallible input sequence with an exact length.
    pub fn records(&self) -> impl ExactSizeIterator<Item = Result<Record>> + '_ {
        self.rows.iter().cloned().map(Ok)
    }

    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.rows.iter().map(|r| &r.key)
    }
}
