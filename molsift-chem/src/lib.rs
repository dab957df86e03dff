//! Molecular graph backend for molsift.
//!
//! Provides molecular graph representation, SMILES parsing, VF2 substructure
//! search and path-based pattern fingerprints, exposed to the pipeline through
//! [`GraphToolkit`], an implementation of
//! [`StructureToolkit`](molsift_core::StructureToolkit).
//!
//! # Example
//!
//! ```
//! use molsift_chem::{parse_smiles, has_substructure, pattern_fingerprint, DEFAULT_FP_BITS};
//! use molsift_core::MatchParams;
//!
//! let phenol = parse_smiles("Oc1ccccc1").unwrap();
//! let benzene = parse_smiles("c1ccccc1").unwrap();
//! assert!(has_substructure(&phenol, &benzene, MatchParams::default()));
//!
//! let fp_phenol = pattern_fingerprint(&phenol, DEFAULT_FP_BITS);
//! let fp_benzene = pattern_fingerprint(&benzene, DEFAULT_FP_BITS);
//! assert!(fp_benzene.is_subset_of(&fp_phenol));
//! ```

pub mod element;
pub mod fingerprint;
pub mod molecule;
pub mod smiles;
pub mod substructure;
pub mod toolkit;

pub use element::{element_by_number, element_by_symbol, Element};
pub use fingerprint::{pattern_fingerprint, DEFAULT_FP_BITS, MAX_PATH_BONDS};
pub use molecule::{Atom, Bond, BondOrder, Chirality, Molecule};
pub use smiles::{parse_smiles, parse_smiles_named};
pub use substructure::{find_substructure_matches, has_substructure, SubstructureMatch};
pub use toolkit::GraphToolkit;
