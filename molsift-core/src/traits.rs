//! Core trait definitions for the molsift workspace.
//!
//! These traits define the contracts that domain types implement across crates.

use crate::fingerprint::Fingerprint;
use crate::Result;

/// A native object whose memory is not managed by ordinary ownership.
///
/// Handles are registered with a resource arena and released exactly once,
/// together with every other handle created for the same record.
pub trait Releasable: Send + Sync {
    /// Free the native resources behind this handle.
    fn release(&self) -> Result<()>;
}

/// Flags that change how a query is matched against a structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchParams {
    /// Require tetrahedral chirality tags to agree.
    pub use_chirality: bool,
    /// Count matches covering the same atom set only once.
    pub unique: bool,
}

/// The chemistry library seen through its input/output contract.
///
/// Implementations must guarantee pre-screen soundness: whenever
/// [`has_match`](Self::has_match) returns true for `(structure, query)`, every
/// bit of `query_fingerprint(query)` is also set in
/// `structure_fingerprint(structure)`.
pub trait StructureToolkit: Send + Sync {
    /// A parsed molecule, created per record and released with its wave.
    type Structure: Releasable + 'static;
    /// A compiled query pattern, created once per run.
    type Query: Send + Sync;

    /// Parse a serialized molecule.
    fn parse_structure(&self, source: &str) -> Result<Self::Structure>;

    /// Compile a serialized query pattern.
    fn compile_query(&self, source: &str) -> Result<Self::Query>;

    /// Number of primitive units (atoms) in a structure.
    fn structure_atom_count(&self, structure: &Self::Structure) -> usize;

    /// Number of primitive units (atoms) in a query.
    fn query_atom_count(&self, query: &Self::Query) -> usize;

    /// Approximate fingerprint of a structure.
    fn structure_fingerprint(&self, structure: &Self::Structure) -> Fingerprint;

    /// Approximate fingerprint of a query, comparable with structure fingerprints.
    fn query_fingerprint(&self, query: &Self::Query) -> Fingerprint;

    /// Exact structural match.
    fn has_match(&self, structure: &Self::Structure, query: &Self::Query, params: MatchParams) -> bool;

    /// Number of exact matches of `query` in `structure`.
    fn count_matches(&self, structure: &Self::Structure, query: &Self::Query, params: MatchParams) -> usize;
}

/// A type that carries a human-readable name.
pub trait Annotated {
    /// A human-readable name or identifier.
    fn name(&self) -> &str;
}

/// A type that can produce a summary of its contents.
pub trait Summarizable {
    /// A one-line summary suitable for display.
    fn summary(&self) -> String;
}
