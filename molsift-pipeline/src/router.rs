//! Routing of computed records into output sinks.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use molsift_core::{Result, SiftError};
use parking_lot::Mutex;
use serde::Serialize;

use crate::processor::ResultProcessor;
use crate::record::{Record, RecordKey, Schema, Table, Value};

/// Keys of records that satisfied the matching criterion and have not been
/// routed yet.
///
/// One mutex guards the whole set for the whole run. Workers hold it only
/// for a single insert, the draining thread only for a single remove, and
/// nothing ever iterates the set.
#[derive(Debug, Default)]
pub struct MatchSet {
    keys: Mutex<HashSet<RecordKey>>,
}

impl MatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: RecordKey) {
        self.keys.lock().insert(key);
    }

    /// Remove `key`, reporting whether it was present.
    pub fn take(&self, key: &RecordKey) -> bool {
        self.keys.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }

    pub fn clear(&self) {
        self.keys.lock().clear();
    }
}

/// Append-only destination for merged records. Never shared across threads.
pub trait RecordSink {
    fn accept(&mut self, record: Record) -> Result<()>;
}

/// Collects records into an in-memory [`Table`].
#[derive(Debug)]
pub struct TableBuffer {
    table: Table,
}

impl TableBuffer {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        TableBuffer { table: Table::new(name, schema) }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn into_table(self) -> Table {
        self.table
    }
}

impl RecordSink for TableBuffer {
    fn accept(&mut self, record: Record) -> Result<()> {
        self.table.push(record)
    }
}

#[derive(Serialize)]
struct JsonLine<'r> {
    key: &'r RecordKey,
    values: &'r [Value],
}

/// Writes each record as one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink { writer, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn accept(&mut self, record: Record) -> Result<()> {
        let line = JsonLine { key: &record.key, values: &record.values };
        serde_json::to_writer(&mut self.writer, &line)
            .map_err(|e| SiftError::Sink(format!("failed to write record '{}': {e}", record.key)))?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn accept(&mut self, record: Record) -> Result<()> {
        (**self).accept(record)
    }
}

/// Splits merged records into a matched and an unmatched sink.
///
/// Removing the key from the [`MatchSet`] decides the branch, so every
/// record reaches exactly one of the two sinks.
pub struct ResultRouter<M, U> {
    matches: Arc<MatchSet>,
    matched: M,
    unmatched: U,
    matched_count: u64,
    unmatched_count: u64,
}

impl<M: RecordSink, U: RecordSink> ResultRouter<M, U> {
    pub fn new(matches: Arc<MatchSet>, matched: M, unmatched: U) -> Self {
        ResultRouter {
            matches,
            matched,
            unmatched,
            matched_count: 0,
            unmatched_count: 0,
        }
    }

    pub fn route(&mut self, record: Record, values: Vec<Value>) -> Result<()> {
        if self.matches.take(&record.key) {
            self.matched_count += 1;
            self.matched.accept(record.merge(values))
        } else {
            self.unmatched_count += 1;
            self.unmatched.accept(record.merge(values))
        }
    }

    pub fn matched_count(&self) -> u64 {
        self.matched_count
    }

    pub fn unmatched_count(&self) -> u64 {
        self.unmatched_count
    }

    pub fn into_sinks(self) -> (M, U) {
        (self.matched, self.unmatched)
    }
}

impl<M: RecordSink, U: RecordSink> ResultProcessor for ResultRouter<M, U> {
    fn process_result(&mut self, _index: u64, record: Record, values: Vec<Value>) -> Result<()> {
        self.route(record, values)
    }
}

/// Appends computed values to every record and forwards it to one sink.
pub struct AppendProcessor<S> {
    sink: S,
}

impl<S: RecordSink> AppendProcessor<S> {
    pub fn new(sink: S) -> Self {
        AppendProcessor { sink }
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

impl<S: RecordSink> ResultProcessor for AppendProcessor<S> {
    fn process_result(&mut self, _index: u64, record: Record, values: Vec<Value>) -> Result<()> {
        self.sink.accept(record.merge(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Column, ColumnType, ScalarKind};

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", ColumnType::Scalar(ScalarKind::Int)),
            Column::new("flag", ColumnType::Scalar(ScalarKind::Text)),
        ])
        .unwrap()
    }

    #[test]
    fn take_consumes_once() {
        let set = MatchSet::new();
        set.insert("a".into());
        assert!(set.take(&"a".into()));
        assert!(!set.take(&"a".into()));
        assert!(set.is_empty());
    }

    #[test]
    fn router_splits_and_empties_set() {
        let matches = Arc::new(MatchSet::new());
        matches.insert("r2".into());
        let mut router = ResultRouter::new(
            matches.clone(),
            TableBuffer::new("Passed", schema()),
            TableBuffer::new("Failed", schema()),
        );
        for i in 1..=3 {
            let record = Record::new(format!("r{i}"), vec![Value::Int(i)]);
            router.process_result(i as u64, record, vec![Value::Text("x".into())]).unwrap();
        }
        assert_eq!(router.matched_count(), 1);
        assert_eq!(router.unmatched_count(), 2);
        assert!(matches.is_empty());
        let (passed, failed) = router.into_sinks();
        let passed = passed.into_table();
        assert_eq!(passed.rows()[0].key.as_str(), "r2");
        assert_eq!(passed.rows()[0].values.len(), 2);
        assert_eq!(failed.len(), 2);
    }

    #[test]
    fn json_lines_output() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.accept(Record::new("m1", vec![Value::Int(1), Value::Missing])).unwrap();
        sink.accept(Record::new("m2", vec![Value::List(vec![Value::Int(2)])])).unwrap();
        assert_eq!(sink.written(), 2);
        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], r#"{"key":"m1","values":[{"type":"int","value":1},{"type":"missing"}]}"#);
        assert!(lines[1].starts_with(r#"{"key":"m2""#));
    }

    #[test]
    fn append_rejects_bad_arity() {
        let mut append = AppendProcessor::new(TableBuffer::new("out", schema()));
        assert!(append.process_result(0, Record::new("a", vec![Value::Int(1)]), vec![]).is_err());
        append
            .process_result(1, Record::new("b", vec![Value::Int(1)]), vec![Value::Missing])
            .unwrap();
        assert_eq!(append.into_sink().len(), 1);
    }
}
