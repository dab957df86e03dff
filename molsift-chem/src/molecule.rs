//! Molecular graph: atoms as vertices, bonds as labelled edges.

use molsift_core::{Annotated, Releasable, Result, Summarizable};

/// Tetrahedral chirality tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Chirality {
    #[default]
    Unspecified,
    /// `@`
    CounterClockwise,
    /// `@@`
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BondOrder {
    Single,
    Double,
    Triple,
    Aromatic,
}

impl BondOrder {
    /// Valence consumed on each end of the bond.
    pub fn valence_units(self) -> u8 {
        match self {
            BondOrder::Double => 2,
            BondOrder::Triple => 3,
            BondOrder::Single | BondOrder::Aromatic => 1,
        }
    }
}

/// Graph vertex. Hydrogens are folded into `hydrogen_count`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Atom {
    pub atomic_number: u8,
    pub charge: i8,
    pub isotope: Option<u16>,
    pub aromatic: bool,
    pub hydrogen_count: u8,
    pub chirality: Chirality,
}

impl Atom {
    pub fn new(atomic_number: u8) -> Self {
        Atom {
            atomic_number,
            charge: 0,
            isotope: None,
            aromatic: false,
            hydrogen_count: 0,
            chirality: Chirality::Unspecified,
        }
    }
}

/// Undirected edge between atoms `begin` and `end`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bond {
    pub begin: usize,
    pub end: usize,
    pub order: BondOrder,
}

#[derive(Debug, Clone)]
pub struct Molecule {
    pub name: String,
    pub atoms: Vec<Atom>,
    pub bonds: Vec<Bond>,
    /// Per atom: `(neighbor, bond index)` pairs.
    neighbors: Vec<Vec<(usize, usize)>>,
}

impl Molecule {
    /// Bond endpoints must index into `atoms`.
    pub fn new(name: impl Into<String>, atoms: Vec<Atom>, bonds: Vec<Bond>) -> Self {
        let mut neighbors = vec![Vec::new(); atoms.len()];
        for (index, bond) in bonds.iter().enumerate() {
            neighbors[bond.begin].push((bond.end, index));
            neighbors[bond.end].push((bond.begin, index));
        }
        Molecule { name: name.into(), atoms, bonds, neighbors }
    }

    /// Heavy atoms only.
    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    pub fn bond_count(&self) -> usize {
        self.bonds.len()
    }

    pub fn degree(&self, atom: usize) -> usize {
        self.neighbors[atom].len()
    }

    /// Adjacent atoms of `atom` with the connecting bond.
    pub fn neighbors(&self, atom: usize) -> impl Iterator<Item = (usize, &Bond)> + '_ {
        self.neighbors[atom].iter().map(move |&(other, bond)| (other, &self.bonds[bond]))
    }

    pub fn bond_between(&self, a: usize, b: usize) -> Option<&Bond> {
        self.neighbors(a).find(|&(other, _)| other == b).map(|(_, bond)| bond)
    }

    /// Atom counts by atomic number, used to reject impossible matches early.
    pub(crate) fn element_histogram(&self) -> [u16; 128] {
        self.atoms.iter().fold([0u16; 128], |mut counts, atom| {
            counts[usize::from(atom.atomic_number & 0x7f)] += 1;
            counts
        })
    }
}

impl Annotated for Molecule {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Summarizable for Molecule {
    fn summary(&self) -> String {
        let name = if self.name.is_empty() { "unnamed" } else { self.name.as_str() };
        format!("{name}: {} atoms, {} bonds", self.atom_count(), self.bond_count())
    }
}

/// The graph is plain Rust memory, freed when the last wave reference drops.
impl Releasable for Molecule {
    fn release(&self) -> Result<()> {
        Ok(())
    }
}
