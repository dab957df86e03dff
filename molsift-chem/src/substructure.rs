//! Substructure search via VF2-style subgraph isomorphism.

use std::collections::BTreeSet;

use molsift_core::MatchParams;

use crate::molecule::{Atom, Chirality, Molecule};

/// One embedding of a pattern in a target.
#[derive(Debug, Clone, PartialEq)]
pub struct SubstructureMatch {
    /// `(pattern atom, target atom)` for every pattern atom, in pattern order.
    pub atom_mapping: Vec<(usize, usize)>,
}

impl SubstructureMatch {
    /// Target atoms covered by this match, sorted.
    pub fn target_atoms(&self) -> Vec<usize> {
        let mut atoms: Vec<usize> = self.atom_mapping.iter().map(|&(_, t)| t).collect();
        atoms.sort_unstable();
        atoms
    }
}

/// Whether `pattern` embeds into `target`. Stops at the first embedding.
pub fn has_substructure(target: &Molecule, pattern: &Molecule, params: MatchParams) -> bool {
    let mut search = Embedding::new(target, pattern, params);
    search.run(true);
    !search.matches.is_empty()
}

/// Every embedding of `pattern` in `target`.
///
/// With `params.unique`, matches that cover the same set of target atoms
/// (symmetric re-mappings) are reported once.
pub fn find_substructure_matches(
    target: &Molecule,
    pattern: &Molecule,
    params: MatchParams,
) -> Vec<SubstructureMatch> {
    let mut search = Embedding::new(target, pattern, params);
    search.run(false);
    if !params.unique {
        return search.matches;
    }
    let mut seen = BTreeSet::new();
    search
        .matches
        .into_iter()
        .filter(|m| seen.insert(m.target_atoms()))
        .collect()
}

/// Depth-first extension of a partial atom mapping, one pattern atom per level.
struct Embedding<'a> {
    target: &'a Molecule,
    pattern: &'a Molecule,
    params: MatchParams,
    /// Pattern atom each target atom is mapped from.
    pattern_of: Vec<Option<usize>>,
    /// Target atom each pattern atom is mapped to.
    target_of: Vec<Option<usize>>,
    matches: Vec<SubstructureMatch>,
}

impl<'a> Embedding<'a> {
    fn new(target: &'a Molecule, pattern: &'a Molecule, params: MatchParams) -> Self {
        Embedding {
            target,
            pattern,
            params,
            pattern_of: vec![None; target.atom_count()],
            target_of: vec![None; pattern.atom_count()],
            matches: Vec::new(),
        }
    }

    fn run(&mut self, first_only: bool) {
        if self.pattern.atom_count() > self.target.atom_count()
            || self.pattern.bond_count() > self.target.bond_count()
        {
            return;
        }
        let pattern_hist = self.pattern.element_histogram();
        let target_hist = self.target.element_histogram();
        if pattern_hist.iter().zip(target_hist.iter()).any(|(p, t)| p > t) {
            return;
        }
        self.extend(0, first_only);
    }

    fn extend(&mut self, depth: usize, first_only: bool) {
        if depth == self.pattern.atom_count() {
            let atom_mapping = self
                .target_of
                .iter()
                .enumerate()
                .filter_map(|(p, t)| t.map(|t| (p, t)))
                .collect();
            self.matches.push(SubstructureMatch { atom_mapping });
            return;
        }

        let pattern_atom = depth;
        for target_atom in self.candidates(pattern_atom) {
            if !self.is_feasible(pattern_atom, target_atom) {
                continue;
            }
            self.target_of[pattern_atom] = Some(target_atom);
            self.pattern_of[target_atom] = Some(pattern_atom);

            self.extend(depth + 1, first_only);

            self.target_of[pattern_atom] = None;
            self.pattern_of[target_atom] = None;

            if first_only && !self.matches.is_empty() {
                return;
            }
        }
    }

    /// Unmapped target atoms adjacent to every mapped neighbor of `pattern_atom`,
    /// or all unmapped target atoms when no neighbor is mapped yet.
    fn candidates(&self, pattern_atom: usize) -> Vec<usize> {
        let mut candidates: Option<Vec<usize>> = None;
        for (p_neighbor, _) in self.pattern.neighbors(pattern_atom) {
            let Some(t_mapped) = self.target_of[p_neighbor] else {
                continue;
            };
            let around: Vec<usize> = self
                .target
                .neighbors(t_mapped)
                .map(|(n, _)| n)
                .filter(|&n| self.pattern_of[n].is_none())
                .collect();
            candidates = Some(match candidates {
                None => around,
                Some(existing) => existing.into_iter().filter(|n| around.contains(n)).collect(),
            });
        }
        candidates.unwrap_or_else(|| {
            (0..self.target.atom_count())
                .filter(|&i| self.pattern_of[i].is_none())
                .collect()
        })
    }

    fn is_feasible(&self, pattern_atom: usize, target_atom: usize) -> bool {
        if self.pattern.degree(pattern_atom) > self.target.degree(target_atom) {
            return false;
        }
        if !atom_compatible(
            &self.pattern.atoms[pattern_atom],
            &self.target.atoms[target_atom],
            self.params,
        ) {
            return false;
        }
        // Every bond to an already-mapped pattern neighbor must exist in the target.
        self.pattern
            .neighbors(pattern_atom)
            .all(|(p_neighbor, p_bond)| match self.target_of[p_neighbor] {
                None => true,
                Some(t_mapped) => self
                    .target
                    .bond_between(target_atom, t_mapped)
                    .is_some_and(|tb| tb.order == p_bond.order),
            })
    }
}

/// Pattern atom properties that a target atom must reproduce.
///
/// Element and aromaticity always have to agree; charge, isotope and
/// chirality only when the pattern specifies them. Fingerprints hash exactly
/// the always-compared properties, which keeps the pre-screen sound.
fn atom_compatible(pattern: &Atom, target: &Atom, params: MatchParams) -> bool {
    if pattern.atomic_number != target.atomic_number || pattern.aromatic != target.aromatic {
        return false;
    }
    if pattern.charge != 0 && pattern.charge != target.charge {
        return false;
    }
    if pattern.isotope.is_some() && pattern.isotope != target.isotope {
        return false;
    }
    !(params.use_chirality && pattern.chirality != Chirality::Unspecified && pattern.chirality != target.chirality)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smiles::parse_smiles;

    fn smi(s: &str) -> Molecule {
        parse_smiles(s).unwrap()
    }

    #[test]
    fn ring_inside_substituted_ring() {
        let phenol = smi("Oc1ccccc1");
        let benzene = smi("c1ccccc1");
        assert!(has_substructure(&phenol, &benzene, MatchParams::default()));
    }

    #[test]
    fn aromatic_ring_not_in_saturated_ring() {
        let cyclohexane = smi("C1CCCCC1");
        let benzene = smi("c1ccccc1");
        assert!(!has_substructure(&cyclohexane, &benzene, MatchParams::default()));
    }

    #[test]
    fn bond_order_must_agree() {
        assert!(!has_substructure(&smi("CCO"), &smi("C=O"), MatchParams::default()));
        assert!(has_substructure(&smi("CC=O"), &smi("C=O"), MatchParams::default()));
    }

    #[test]
    fn unique_matches_collapse_symmetry() {
        // Benzene maps onto itself in 12 ways, all covering the same atoms.
        let benzene = smi("c1ccccc1");
        let all = find_substructure_matches(&benzene, &benzene, MatchParams::default());
        assert_eq!(all.len(), 12);
        let unique = find_substructure_matches(
            &benzene,
            &benzene,
            MatchParams { unique: true, ..MatchParams::default() },
        );
        assert_eq!(unique.len(), 1);
    }

    #[test]
    fn unique_matches_in_naphthalene() {
        let naphthalene = smi("c1ccc2ccccc2c1");
        let benzene = smi("c1ccccc1");
        let unique = find_substructure_matches(
            &naphthalene,
            &benzene,
            MatchParams { unique: true, ..MatchParams::default() },
        );
        assert_eq!(unique.len(), 2);
    }

    #[test]
    fn charge_specified_only_in_pattern_is_compared() {
        let acetate = smi("CC(=O)[O-]");
        assert!(has_substructure(&acetate, &smi("[O-]"), MatchParams::default()));
        assert!(has_substructure(&acetate, &smi("O"), MatchParams::default()));
        assert!(!has_substructure(&smi("CCO"), &smi("[O-]"), MatchParams::default()));
    }

    #[test]
    fn chirality_only_with_flag() {
        let target = smi("N[C@@H](C)O");
        let query = smi("N[C@H](C)O");
        assert!(has_substructure(&target, &query, MatchParams::default()));
        let chiral = MatchParams { use_chirality: true, ..MatchParams::default() };
        assert!(!has_substructure(&target, &query, chiral));
        assert!(has_substructure(&target, &smi("N[C@@H](C)O"), chiral));
    }
}
