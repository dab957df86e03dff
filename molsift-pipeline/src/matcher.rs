//! Two-stage pattern matching: fingerprint pre-screen, then exact match.
//!
//! Patterns are compiled once before processing. When enough valid patterns
//! exist, fingerprints are computed for every pattern and, in a second
//! sub-phase, for every input record. During matching a pattern whose
//! fingerprint is not a bit-subset of the record's fingerprint cannot match
//! and skips the exact comparison.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use molsift_core::{Fingerprint, MatchParams, Result, SiftError, StructureToolkit};
use serde::{Deserialize, Serialize};

use crate::arena::{ResourceArena, Wave};
use crate::computation::InputColumn;
use crate::host::ExecutionHost;
use crate::record::{Record, RecordKey, Table, Value};
use crate::router::MatchSet;
use crate::warnings::{Context, WarningConsolidator};

/// Built-in number of valid patterns from which screening is enabled.
pub const DEFAULT_SCREENING_THRESHOLD: usize = 10;

/// Context for warnings about query rows.
pub const QUERY_CONTEXT: &str = "query";

pub const NO_VALID_PATTERNS_WARNING: &str = "No valid query patterns found";

const FINGERPRINT_CHUNK: usize = 256;

/// Rule deciding whether a record's pattern matches qualify it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Criterion {
    /// Every valid pattern matches.
    #[default]
    All,
    /// Every valid pattern matches and the record has exactly as many atoms
    /// as all valid patterns together.
    Exact,
    /// At least `minimum` patterns match.
    AtLeast { minimum: usize },
}

impl Criterion {
    pub fn qualifies(self, matched: usize, valid: usize, atom_count: usize, total_pattern_atoms: usize) -> bool {
        match self {
            Criterion::All => matched == valid,
            Criterion::Exact => matched == valid && atom_count == total_pattern_atoms,
            Criterion::AtLeast { minimum } => matched >= minimum,
        }
    }
}

/// Number of valid patterns from which fingerprint screening kicks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreeningThreshold {
    Disabled,
    MinPatterns(usize),
}

impl ScreeningThreshold {
    /// Interpret the integer setting: `0` disables screening, `-1` selects
    /// [`DEFAULT_SCREENING_THRESHOLD`], a positive value is the threshold.
    pub fn from_setting(value: i32) -> Result<Self> {
        match value {
            0 => Ok(ScreeningThreshold::Disabled),
            -1 => Ok(ScreeningThreshold::MinPatterns(DEFAULT_SCREENING_THRESHOLD)),
            n if n > 0 => Ok(ScreeningThreshold::MinPatterns(n as usize)),
            n => Err(SiftError::Config(format!(
                "fingerprint screening threshold must be -1, 0 or positive, got {n}"
            ))),
        }
    }

    pub fn enabled_for(self, valid_patterns: usize) -> bool {
        match self {
            ScreeningThreshold::Disabled => false,
            ScreeningThreshold::MinPatterns(min) => valid_patterns >= min,
        }
    }
}

/// The pre-screen: can a pattern with fingerprint `pattern` possibly occur
/// in a record with fingerprint `record`?
///
/// Necessary but not sufficient for a structural match. Fingerprints of
/// different sizes cannot be compared and always pass.
pub fn screen_candidate(pattern: &Fingerprint, record: &Fingerprint) -> bool {
    if pattern.nbits() != record.nbits() {
        return true;
    }
    pattern.on_bits() <= record.on_bits() && pattern.and_count(record) == pattern.on_bits()
}

/// One raw pattern source, usually a query table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSource {
    pub key: RecordKey,
    pub source: Option<String>,
}

impl PatternSource {
    pub fn new(key: impl Into<String>, source: Option<&str>) -> Self {
        PatternSource { key: RecordKey::new(key), source: source.map(str::to_string) }
    }

    /// Sources from column `column` of every row of `table`.
    pub fn from_table(table: &Table, column: usize) -> Vec<PatternSource> {
        table
            .rows()
            .iter()
            .map(|row| PatternSource {
                key: row.key.clone(),
                source: match row.value(column) {
                    Some(Value::Molecule(s)) | Some(Value::Text(s)) => Some(s.clone()),
                    _ => None,
                },
            })
            .collect()
    }
}

struct Pattern<Q> {
    index: usize,
    key: RecordKey,
    query: Q,
    fingerprint: Option<Fingerprint>,
}

/// Result of evaluating one record against all patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// Zero-based indices of the matching patterns, ascending.
    pub matched: Vec<usize>,
    pub atom_count: usize,
    pub qualifies: bool,
}

/// Screening effectiveness counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatcherStats {
    pub screened_out: u64,
    pub exact_checks: u64,
}

/// Compiled patterns plus the criterion they are evaluated with.
///
/// Read-only once compiled and prepared, so any number of workers can share
/// it.
pub struct PatternMatcher<T: StructureToolkit> {
    toolkit: Arc<T>,
    patterns: Vec<Option<Pattern<T::Query>>>,
    valid: usize,
    empty: usize,
    total_atoms: usize,
    criterion: Criterion,
    params: MatchParams,
    screening: bool,
    record_fingerprints: HashMap<RecordKey, Fingerprint>,
    screened_out: AtomicU64,
    exact_checks: AtomicU64,
}

impl<T: StructureToolkit> PatternMatcher<T> {
    /// Compile every source in order; pattern indices follow source order.
    ///
    /// Missing or unparsable sources count as empty patterns and are
    /// skipped during matching.
    pub fn compile(
        toolkit: Arc<T>,
        sources: &[PatternSource],
        criterion: Criterion,
        threshold: ScreeningThreshold,
        params: MatchParams,
        warnings: &WarningConsolidator,
    ) -> Result<Self> {
        warnings.register_context(Context::new(QUERY_CONTEXT, "query row", "query rows", true));
        let mut patterns = Vec::with_capacity(sources.len());
        let mut total_atoms = 0;
        for (index, source) in sources.iter().enumerate() {
            let compiled = match source.source.as_deref().map(str::trim) {
                None | Some("") => {
                    warnings.save_warning(QUERY_CONTEXT, "Ignoring empty query pattern.");
                    None
                }
                Some(text) => match toolkit.compile_query(text) {
                    Ok(query) => Some(query),
                    Err(e) => {
                        tracing::debug!(pattern = index + 1, key = %source.key, error = %e, "query pattern rejected");
                        warnings.save_warning(QUERY_CONTEXT, "Ignoring query pattern that could not be parsed.");
                        None
                    }
                },
            };
            patterns.push(compiled.map(|query| {
                total_atoms += toolkit.query_atom_count(&query);
                Pattern { index, key: source.key.clone(), query, fingerprint: None }
            }));
        }

        let valid = patterns.iter().flatten().count();
        let empty = patterns.len() - valid;
        if valid == 0 {
            warnings.save_global_warning(NO_VALID_PATTERNS_WARNING);
        }
        if let Criterion::AtLeast { minimum } = criterion {
            if minimum > valid {
                return Err(SiftError::Config(format!(
                    "at least {minimum} matching patterns requested, but only {valid} valid patterns exist"
                )));
            }
        }

        let screening = threshold.enabled_for(valid);
        if screening {
            for pattern in patterns.iter_mut().flatten() {
                pattern.fingerprint = Some(toolkit.query_fingerprint(&pattern.query));
            }
        }
        tracing::info!(patterns = sources.len(), valid, empty, total_atoms, screening, "query patterns compiled");

        Ok(PatternMatcher {
            toolkit,
            patterns,
            valid,
            empty,
            total_atoms,
            criterion,
            params,
            screening,
            record_fingerprints: HashMap::new(),
            screened_out: AtomicU64::new(0),
            exact_checks: AtomicU64::new(0),
        })
    }

    /// Compute the fingerprint of every record up front.
    ///
    /// Does nothing when screening is disabled. Records whose structure
    /// cannot be read get no fingerprint and are matched exactly. Each
    /// structure lives in its own wave, released before moving on. Stops
    /// early when the host is cancelled.
    pub fn prepare_record_fingerprints(
        &mut self,
        records: &[Record],
        column: &InputColumn,
        arena: &ResourceArena,
        host: &dyn ExecutionHost,
    ) -> Result<()> {
        if !self.screening {
            return Ok(());
        }
        let total = records.len().max(1);
        let mut done = 0;
        for chunk in records.chunks(FINGERPRINT_CHUNK) {
            if host.is_cancelled() {
                break;
            }
            let fingerprints = self.chunk_fingerprints(chunk, column, arena);
            self.record_fingerprints.extend(fingerprints);
            done += chunk.len();
            host.report_progress(done as f64 / total as f64, "Computing record fingerprints");
        }
        tracing::debug!(records = records.len(), fingerprints = self.record_fingerprints.len(), "record fingerprints ready");
        Ok(())
    }

    fn chunk_fingerprints(
        &self,
        chunk: &[Record],
        column: &InputColumn,
        arena: &ResourceArena,
    ) -> Vec<(RecordKey, Fingerprint)> {
        let fingerprint = |record: &Record| -> Option<(RecordKey, Fingerprint)> {
            let wave = arena.open_wave();
            let fp = match column.structure(record, self.toolkit.as_ref(), &Wave::new(wave, arena)) {
                Ok(Some(structure)) => Some(self.toolkit.structure_fingerprint(&structure)),
                Ok(None) => None,
                Err(e) => {
                    tracing::debug!(record = %record.key, error = %e, "no fingerprint for record");
                    None
                }
            };
            arena.release_wave(wave);
            fp.map(|fp| (record.key.clone(), fp))
        };

        #[cfg(feature = "parallel")]
        let fingerprints: Vec<_> = {
            use rayon::prelude::*;
            chunk.par_iter().filter_map(fingerprint).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let fingerprints: Vec<_> = chunk.iter().filter_map(fingerprint).collect();
        fingerprints
    }

    /// Match `structure`, the parsed record `key`, against every valid
    /// pattern and apply the criterion.
    pub fn evaluate(&self, key: &RecordKey, structure: &T::Structure) -> MatchResult {
        let record_fp = self.record_fingerprint(key);
        let mut matched = Vec::new();
        for pattern in self.patterns.iter().flatten() {
            if !self.passes_screen(pattern, record_fp) {
                continue;
            }
            if self.toolkit.has_match(structure, &pattern.query, self.params) {
                matched.push(pattern.index);
            }
        }
        let atom_count = self.toolkit.structure_atom_count(structure);
        let qualifies = self.criterion.qualifies(matched.len(), self.valid, atom_count, self.total_atoms);
        MatchResult { matched, atom_count, qualifies }
    }

    /// [`evaluate`](Self::evaluate), inserting `key` into `matches` when the
    /// record qualifies.
    pub fn evaluate_and_mark(&self, key: &RecordKey, structure: &T::Structure, matches: &MatchSet) -> MatchResult {
        let result = self.evaluate(key, structure);
        if result.qualifies {
            matches.insert(key.clone());
        }
        result
    }

    /// Number of matches of every pattern, `None` for empty patterns.
    pub fn count(&self, key: &RecordKey, structure: &T::Structure, unique: bool) -> Vec<Option<usize>> {
        let record_fp = self.record_fingerprint(key);
        let params = MatchParams { unique, ..self.params };
        self.patterns
            .iter()
            .map(|pattern| {
                pattern.as_ref().map(|pattern| {
                    if self.passes_screen(pattern, record_fp) {
                        self.toolkit.count_matches(structure, &pattern.query, params)
                    } else {
                        0
                    }
                })
            })
            .collect()
    }

    /// The match list value: 1-based pattern indices, or the query keys.
    pub fn match_info(&self, result: &MatchResult, as_keys: bool) -> Value {
        let items = result
            .matched
            .iter()
            .filter_map(|&index| {
                let pattern = self.patterns.get(index)?.as_ref()?;
                Some(if as_keys {
                    Value::Text(pattern.key.as_str().to_string())
                } else {
                    Value::Int(index as i64 + 1)
                })
            })
            .collect();
        Value::List(items)
    }

    fn record_fingerprint(&self, key: &RecordKey) -> Option<&Fingerprint> {
        if self.screening {
            self.record_fingerprints.get(key)
        } else {
            None
        }
    }

    fn passes_screen(&self, pattern: &Pattern<T::Query>, record_fp: Option<&Fingerprint>) -> bool {
        if let (Some(pattern_fp), Some(record_fp)) = (&pattern.fingerprint, record_fp) {
            if !screen_candidate(pattern_fp, record_fp) {
                self.screened_out.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }
        self.exact_checks.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Total number of pattern sources, empty ones included.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn valid_pattern_count(&self) -> usize {
        self.valid
    }

    pub fn empty_pattern_count(&self) -> usize {
        self.empty
    }

    /// Atoms over all valid patterns.
    pub fn total_atom_count(&self) -> usize {
        self.total_atoms
    }

    pub fn screening_enabled(&self) -> bool {
        self.screening
    }

    pub fn criterion(&self) -> Criterion {
        self.criterion
    }

    pub fn record_fingerprint_count(&self) -> usize {
        self.record_fingerprints.len()
    }

    pub fn stats(&self) -> MatcherStats {
        MatcherStats {
            screened_out: self.screened_out.load(Ordering::Relaxed),
            exact_checks: self.exact_checks.load(Ordering::Relaxed),
        }
    }

    /// Drop compiled patterns and record fingerprints after a run.
    pub fn cleanup(&mut self) {
        self.patterns.clear();
        self.record_fingerprints.clear();
        self.valid = 0;
        self.empty = 0;
        self.total_atoms = 0;
    }
}
