//! [`StructureToolkit`] implementation backed by the molecular graph types.

use molsift_core::{Fingerprint, MatchParams, Result, SiftError, StructureToolkit};

use crate::fingerprint::{pattern_fingerprint, DEFAULT_FP_BITS};
use crate::molecule::Molecule;
use crate::smiles::parse_smiles;
use crate::substructure::{find_substructure_matches, has_substructure};

/// Graph-based toolkit reading SMILES for both structures and queries.
#[derive(Debug, Clone)]
pub struct GraphToolkit {
    fp_bits: usize,
}

impl GraphToolkit {
    pub fn new() -> Self {
        Self { fp_bits: DEFAULT_FP_BITS }
    }

    /// Use fingerprints of `fp_bits` bits instead of the default length.
    pub fn with_fingerprint_bits(fp_bits: usize) -> Result<Self> {
        if fp_bits == 0 {
            return Err(SiftError::InvalidInput("fingerprint length must be positive".into()));
        }
        Ok(Self { fp_bits })
    }
}

impl Default for GraphToolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl StructureToolkit for GraphToolkit {
    type Structure = Molecule;
    type Query = Molecule;

    fn parse_structure(&self, source: &str) -> Result<Molecule> {
        parse_smiles(source)
    }

    fn compile_query(&self, source: &str) -> Result<Molecule> {
        let query = parse_smiles(source)?;
        if query.atom_count() == 0 {
            return Err(SiftError::Parse("query pattern has no atoms".into()));
        }
        Ok(query)
    }

    fn structure_atom_count(&self, structure: &Molecule) -> usize {
        structure.atom_count()
    }

    fn query_atom_count(&self, query: &Molecule) -> usize {
        query.atom_count()
    }

    fn structure_fingerprint(&self, structure: &Molecule) -> Fingerprint {
        pattern_fingerprint(structure, self.fp_bits)
    }

    fn query_fingerprint(&self, query: &Molecule) -> Fingerprint {
        pattern_fingerprint(query, self.fp_bits)
    }

    fn has_match(&self, structure: &Molecule, query: &Molecule, params: MatchParams) -> bool {
        has_substructure(structure, query, params)
    }

    fn count_matches(&self, structure: &Molecule, query: &Molecule, params: MatchParams) -> usize {
        find_substructure_matches(structure, query, params).len()
    }
}
