//! Consolidation of recoverable warnings across a run.
//!
//! Workers report problems as `(context, message)` pairs. Identical pairs
//! collapse into one entry with an occurrence count, and a single
//! [`WarningConsolidator::generate_warnings`] call freezes the state into a
//! [`WarningReport`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use molsift_core::{Result, SiftError};
use parking_lot::Mutex;
use regex::Regex;

pub const GLOBAL_CONTEXT: &str = "global";
pub const ROW_CONTEXT: &str = "row";
pub const BATCH_CONTEXT: &str = "batch";

/// Scope a warning applies to, used to render occurrence statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub id: String,
    pub name: String,
    pub plural_name: String,
    /// Render statistics even when only one unit was processed.
    pub show_if_single: bool,
}

impl Context {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        plural_name: impl Into<String>,
        show_if_single: bool,
    ) -> Self {
        Context {
            id: id.into(),
            name: name.into(),
            plural_name: plural_name.into(),
            show_if_single,
        }
    }

    /// Warnings without a unit, never annotated with statistics.
    pub fn global() -> Self {
        Context::new(GLOBAL_CONTEXT, "", "", false)
    }

    pub fn row() -> Self {
        Context::new(ROW_CONTEXT, "row", "rows", true)
    }

    pub fn batch() -> Self {
        Context::new(BATCH_CONTEXT, "batch", "batches", false)
    }

    fn auto(id: &str) -> Self {
        Context::new(id, id, id, false)
    }

    fn is_global(&self) -> bool {
        self.id == GLOBAL_CONTEXT
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// One unique message with the number of times it was saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarningEntry {
    pub message: String,
    pub occurrences: u64,
}

#[derive(Default)]
struct State {
    contexts: HashMap<String, Context>,
    occurrences: HashMap<String, BTreeMap<String, u64>>,
    frozen: Option<WarningReport>,
}

/// Thread-safe collector of deduplicated warnings.
pub struct WarningConsolidator {
    state: Mutex<State>,
}

impl WarningConsolidator {
    /// A consolidator knowing the `global`, `row` and `batch` contexts.
    pub fn new() -> Self {
        let consolidator = WarningConsolidator { state: Mutex::new(State::default()) };
        for context in [Context::global(), Context::row(), Context::batch()] {
            consolidator.register_context(context);
        }
        consolidator
    }

    /// Register or replace a context definition.
    pub fn register_context(&self, context: Context) {
        self.state.lock().contexts.insert(context.id.clone(), context);
    }

    /// Record a warning. Unknown context ids are registered on the fly.
    ///
    /// Saving after the report was generated does not change the report;
    /// such late warnings are logged instead.
    pub fn save_warning(&self, context_id: &str, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.state.lock();
        if state.frozen.is_some() {
            tracing::warn!(context = context_id, %message, "warning saved after report was generated");
            return;
        }
        if !state.contexts.contains_key(context_id) {
            state.contexts.insert(context_id.to_string(), Context::auto(context_id));
        }
        *state
            .occurrences
            .entry(context_id.to_string())
            .or_default()
            .entry(message)
            .or_insert(0) += 1;
    }

    pub fn save_global_warning(&self, message: impl Into<String>) {
        self.save_warning(GLOBAL_CONTEXT, message);
    }

    pub fn save_row_warning(&self, message: impl Into<String>) {
        self.save_warning(ROW_CONTEXT, message);
    }

    pub fn save_batch_warning(&self, message: impl Into<String>) {
        self.save_warning(BATCH_CONTEXT, message);
    }

    /// Fold every warning of `other` into this consolidator, adding counts.
    pub fn merge(&self, other: &WarningConsolidator) {
        let (contexts, occurrences) = {
            let other = other.state.lock();
            (other.contexts.clone(), other.occurrences.clone())
        };
        let mut state = self.state.lock();
        for (id, context) in contexts {
            state.contexts.entry(id).or_insert(context);
        }
        for (id, messages) in occurrences {
            let target = state.occurrences.entry(id).or_default();
            for (message, count) in messages {
                *target.entry(message).or_insert(0) += count;
            }
        }
    }

    /// Whether no warning has been saved.
    pub fn is_empty(&self) -> bool {
        self.state.lock().occurrences.values().all(BTreeMap::is_empty)
    }

    /// Freeze the collected warnings into a report.
    ///
    /// The first call takes the snapshot; every later call returns the same
    /// snapshot.
    pub fn generate_warnings(&self) -> WarningReport {
        let mut state = self.state.lock();
        if let Some(report) = &state.frozen {
            return report.clone();
        }
        let mut ids: Vec<&String> = state.occurrences.keys().collect();
        ids.sort_by(|a, b| {
            (a.as_str() != GLOBAL_CONTEXT, a.as_str()).cmp(&(b.as_str() != GLOBAL_CONTEXT, b.as_str()))
        });
        let sections = ids
            .into_iter()
            .filter_map(|id| {
                let messages = &state.occurrences[id];
                if messages.is_empty() {
                    return None;
                }
                let context = state.contexts.get(id).cloned().unwrap_or_else(|| Context::auto(id));
                let entries = messages
                    .iter()
                    .map(|(message, &occurrences)| WarningEntry { message: message.clone(), occurrences })
                    .collect();
                Some((context, entries))
            })
            .collect();
        let report = WarningReport { sections };
        state.frozen = Some(report.clone());
        report
    }

    /// Drop every warning and unfreeze, keeping registered contexts.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.occurrences.clear();
        state.frozen = None;
    }
}

impl Default for WarningConsolidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen warnings: global context first, then contexts by id, messages
/// sorted within each context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarningReport {
    sections: Vec<(Context, Vec<WarningEntry>)>,
}

impl WarningReport {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Number of unique `(context, message)` pairs.
    pub fn len(&self) -> usize {
        self.sections.iter().map(|(_, entries)| entries.len()).sum()
    }

    pub fn sections(&self) -> impl Iterator<Item = (&Context, &[WarningEntry])> {
        self.sections.iter().map(|(context, entries)| (context, entries.as_slice()))
    }

    /// Messages saved under `context_id`, sorted.
    pub fn messages(&self, context_id: &str) -> Vec<&str> {
        self.sections
            .iter()
            .filter(|(context, _)| context.id == context_id)
            .flat_map(|(_, entries)| entries.iter().map(|e| e.message.as_str()))
            .collect()
    }

    /// Occurrence count of one message, 0 when absent.
    pub fn occurrences(&self, context_id: &str, message: &str) -> u64 {
        self.sections
            .iter()
            .filter(|(context, _)| context.id == context_id)
            .flat_map(|(_, entries)| entries.iter())
            .find(|e| e.message == message)
            .map_or(0, |e| e.occurrences)
    }

    /// Render the report as one line per warning.
    ///
    /// `processed` maps context ids to the number of units processed in that
    /// context (e.g. rows). Non-global warnings get a statistic suffix such
    /// as `[All rows]`, `[3 of 10 rows]` or `[4 times]`. Returns `None` when
    /// nothing is left after filtering.
    pub fn summary(&self, processed: &HashMap<String, u64>, filter: &SuppressionFilter) -> Option<String> {
        let mut lines = Vec::new();
        for (context, entries) in &self.sections {
            if filter.suppresses_context(&context.id) {
                continue;
            }
            let total = processed.get(&context.id).copied();
            for entry in entries.iter().filter(|e| !filter.suppresses(&e.message)) {
                let show_stats = !context.is_global()
                    && (context.show_if_single || total.map_or(true, |t| t > 1));
                if !show_stats {
                    lines.push(entry.message.clone());
                    continue;
                }
                let stats = match total {
                    Some(t) if t == entry.occurrences => format!("All {}", context.plural_name),
                    Some(t) if t > entry.occurrences => {
                        let unit = if t == 1 { &context.name } else { &context.plural_name };
                        format!("{} of {} {}", entry.occurrences, t, unit)
                    }
                    _ => format!("{} times", entry.occurrences),
                };
                lines.push(format!("{} [{}]", entry.message, stats));
            }
        }
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

#[derive(Debug, Clone)]
enum Criterion {
    Full(String),
    Sub(String),
    Regex(Regex),
}

/// Warnings and contexts to leave out of a summary.
///
/// Message criteria use a prefix: `FULL:` (also the default without a
/// prefix) must equal the whole message, `SUB:` matches a substring, and
/// `REGEX:` must match the whole message.
#[derive(Debug, Clone, Default)]
pub struct SuppressionFilter {
    criteria: Vec<Criterion>,
    contexts: Vec<String>,
}

impl SuppressionFilter {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn parse<S: AsRef<str>>(criteria: &[S]) -> Result<Self> {
        let criteria = criteria
            .iter()
            .map(|c| {
                let c = c.as_ref();
                if let Some(pattern) = c.strip_prefix("REGEX:") {
                    Regex::new(&format!("^(?:{pattern})$"))
                        .map(Criterion::Regex)
                        .map_err(|e| SiftError::Config(format!("invalid suppression regex '{pattern}': {e}")))
                } else if let Some(sub) = c.strip_prefix("SUB:") {
                    Ok(Criterion::Sub(sub.to_string()))
                } else {
                    Ok(Criterion::Full(c.strip_prefix("FULL:").unwrap_or(c).to_string()))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(SuppressionFilter { criteria, contexts: Vec::new() })
    }

    /// Also suppress every warning of the given contexts.
    pub fn with_contexts<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.contexts.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn suppresses(&self, message: &str) -> bool {
        self.criteria.iter().any(|c| match c {
            Criterion::Full(text) => message == text,
            Criterion::Sub(text) => message.contains(text.as_str()),
            Criterion::Regex(re) => re.is_match(message),
        })
    }

    fn suppresses_context(&self, id: &str) -> bool {
        self.contexts.iter().any(|c| c == id)
    }
}
