//! SMILES reader for the organic subset plus bracket atoms.
//!
//! Supports branches, ring closures (`1`..`9`, `%nn`), explicit bond symbols,
//! disconnected fragments, isotopes, charges, hydrogen counts and tetrahedral
//! chirality tags. Directional bond markers are accepted and ignored.

use std::collections::BTreeMap;

use molsift_core::{Result, SiftError};

use crate::element::{element_by_number, element_by_symbol};
use crate::molecule::{Atom, Bond, BondOrder, Chirality, Molecule};

/// Parse a SMILES string into a `Molecule`.
pub fn parse_smiles(smiles: &str) -> Result<Molecule> {
    parse_smiles_named(smiles, "")
}

/// Parse a SMILES string into a `Molecule` with a given name.
pub fn parse_smiles_named(smiles: &str, name: &str) -> Result<Molecule> {
    let mut reader = SmilesReader::new(smiles.trim());
    reader.read()?;
    reader.finish(name)
}

struct SmilesReader<'a> {
    input: &'a [u8],
    pos: usize,
    atoms: Vec<Atom>,
    /// Bracket atoms carry their hydrogen count explicitly.
    bracketed: Vec<bool>,
    bonds: Vec<Bond>,
    open_rings: BTreeMap<u16, (usize, Option<BondOrder>)>,
    branches: Vec<usize>,
    prev_atom: Option<usize>,
    pending_bond: Option<BondOrder>,
}

impl<'a> SmilesReader<'a> {
    fn new(input: &'a str) -> Self {
        SmilesReader {
            input: input.as_bytes(),
            pos: 0,
            atoms: Vec::new(),
            bracketed: Vec::new(),
            bonds: Vec::new(),
            open_rings: BTreeMap::new(),
            branches: Vec::new(),
            prev_atom: None,
            pending_bond: None,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn error(&self, msg: impl Into<String>) -> SiftError {
        SiftError::Parse(format!("{} at position {}", msg.into(), self.pos))
    }

    fn read(&mut self) -> Result<()> {
        while let Some(ch) = self.peek() {
            match ch {
                b'(' => {
                    self.bump();
                    let prev = self.prev_atom.ok_or_else(|| self.error("branch without preceding atom"))?;
                    self.branches.push(prev);
                }
                b')' => {
                    self.bump();
                    let atom = self.branches.pop().ok_or_else(|| self.error("unmatched ')'"))?;
                    self.prev_atom = Some(atom);
                    self.pending_bond = None;
                }
                b'-' => self.set_bond(BondOrder::Single),
                b'=' => self.set_bond(BondOrder::Double),
                b'#' => self.set_bond(BondOrder::Triple),
                b':' => self.set_bond(BondOrder::Aromatic),
                b'/' | b'\\' => {
                    self.bump();
                }
                b'.' => {
                    self.bump();
                    self.prev_atom = None;
                    self.pending_bond = None;
                }
                b'%' => {
                    self.bump();
                    let hi = self.bump().filter(u8::is_ascii_digit);
                    let lo = self.bump().filter(u8::is_ascii_digit);
                    match (hi, lo) {
                        (Some(h), Some(l)) => self.ring_bond((h - b'0') as u16 * 10 + (l - b'0') as u16)?,
                        _ => return Err(self.error("expected two digits after '%'")),
                    }
                }
                b'0'..=b'9' => {
                    self.bump();
                    self.ring_bond((ch - b'0') as u16)?;
                }
                b'[' => self.bracket_atom()?,
                _ => self.organic_atom()?,
            }
        }
        Ok(())
    }

    fn set_bond(&mut self, order: BondOrder) {
        self.bump();
        self.pending_bond = Some(order);
    }

    fn organic_atom(&mut self) -> Result<()> {
        let start = self.pos;
        let ch = self.bump().ok_or_else(|| self.error("unexpected end of input"))?;
        let aromatic = ch.is_ascii_lowercase();
        let two = match (ch, self.peek()) {
            (b'C', Some(b'l')) => Some("Cl"),
            (b'B', Some(b'r')) => Some("Br"),
            _ => None,
        };
        let symbol = match two {
            Some(sym) => {
                self.bump();
                sym
            }
            None => match ch.to_ascii_uppercase() {
                b'B' => "B",
                b'C' => "C",
                b'N' => "N",
                b'O' => "O",
                b'P' => "P",
                b'S' => "S",
                b'F' if !aromatic => "F",
                b'I' if !aromatic => "I",
                _ => {
                    self.pos = start;
                    return Err(self.error(format!("unexpected character '{}'", ch as char)));
                }
            },
        };
        let elem = element_by_symbol(symbol).ok_or_else(|| self.error(format!("unknown element '{symbol}'")))?;
        let mut atom = Atom::new(elem.atomic_number);
        atom.aromatic = aromatic;
        self.push_atom(atom, false);
        Ok(())
    }

    fn bracket_atom(&mut self) -> Result<()> {
        self.bump();
        let isotope = self.number().map(|n| n as u16);

        let first = self.bump().ok_or_else(|| self.error("unterminated bracket atom"))?;
        if !first.is_ascii_alphabetic() {
            return Err(self.error("expected element symbol"));
        }
        let aromatic = first.is_ascii_lowercase();
        let upper = first.to_ascii_uppercase() as char;
        let elem = match self.peek().filter(u8::is_ascii_lowercase) {
            Some(second) if element_by_symbol(&format!("{upper}{}", second as char)).is_some() => {
                self.bump();
                element_by_symbol(&format!("{upper}{}", second as char))
            }
            _ => element_by_symbol(&upper.to_string()),
        }
        .ok_or_else(|| self.error("unknown element in bracket atom"))?;

        let mut chirality = Chirality::Unspecified;
        if self.peek() == Some(b'@') {
            self.bump();
            chirality = Chirality::CounterClockwise;
            if self.peek() == Some(b'@') {
                self.bump();
                chirality = Chirality::Clockwise;
            }
        }

        let mut hydrogens = 0u8;
        if self.peek() == Some(b'H') {
            self.bump();
            hydrogens = self.number().map_or(1, |n| n as u8);
        }

        let mut charge = 0i8;
        if let Some(sign @ (b'+' | b'-')) = self.peek() {
            self.bump();
            let unit: i8 = if sign == b'+' { 1 } else { -1 };
            charge = match self.number() {
                Some(n) => unit * n.min(15) as i8,
                None => {
                    let mut c = unit;
                    while self.peek() == Some(sign) {
                        self.bump();
                        c = c.saturating_add(unit);
                    }
                    c
                }
            };
        }

        if self.bump() != Some(b']') {
            return Err(self.error("expected ']'"));
        }

        self.push_atom(
            Atom {
                atomic_number: elem.atomic_number,
                charge,
                isotope,
                aromatic,
                hydrogen_count: hydrogens,
                chirality,
            },
            true,
        );
        Ok(())
    }

    fn number(&mut self) -> Option<u32> {
        let mut value = None;
        while let Some(d) = self.peek().filter(u8::is_ascii_digit) {
            self.bump();
            value = Some(value.unwrap_or(0u32).saturating_mul(10).saturating_add((d - b'0') as u32));
        }
        value
    }

    fn push_atom(&mut self, atom: Atom, bracketed: bool) {
        let idx = self.atoms.len();
        self.atoms.push(atom);
        self.bracketed.push(bracketed);
        if let Some(prev) = self.prev_atom {
            let order = self.pending_bond.take();
            self.connect(prev, idx, order);
        }
        self.pending_bond = None;
        self.prev_atom = Some(idx);
    }

    fn connect(&mut self, a: usize, b: usize, explicit: Option<BondOrder>) {
        let order = explicit.unwrap_or(if self.atoms[a].aromatic && self.atoms[b].aromatic {
            BondOrder::Aromatic
        } else {
            BondOrder::Single
        });
        self.bonds.push(Bond { begin: a, end: b, order });
    }

    fn ring_bond(&mut self, label: u16) -> Result<()> {
        let current = self.prev_atom.ok_or_else(|| self.error("ring closure without preceding atom"))?;
        match self.open_rings.remove(&label) {
            Some((open, open_order)) => {
                if open == current {
                    return Err(self.error("ring closure to the same atom"));
                }
                let order = self.pending_bond.take().or(open_order);
                self.connect(open, current, order);
            }
            None => {
                let order = self.pending_bond.take();
                self.open_rings.insert(label, (current, order));
            }
        }
        Ok(())
    }

    fn finish(mut self, name: &str) -> Result<Molecule> {
        if let Some(label) = self.open_rings.keys().next() {
            return Err(SiftError::Parse(format!("unclosed ring bond {label}")));
        }
        if !self.branches.is_empty() {
            return Err(SiftError::Parse(format!("{} unclosed branch(es)", self.branches.len())));
        }
        if self.pending_bond.is_some() {
            return Err(SiftError::Parse("dangling bond at end of input".into()));
        }
        self.assign_hydrogen_counts();
        Ok(Molecule::new(name, self.atoms, self.bonds))
    }

    fn assign_hydrogen_counts(&mut self) {
        let mut used = vec![0u8; self.atoms.len()];
        for bond in &self.bonds {
            let units = bond.order.valence_units();
            used[bond.begin] = used[bond.begin].saturating_add(units);
            used[bond.end] = used[bond.end].saturating_add(units);
        }
        for (idx, atom) in self.atoms.iter_mut().enumerate() {
            if self.bracketed[idx] {
                continue;
            }
            let Some(elem) = element_by_number(atom.atomic_number) else {
                continue;
            };
            // One valence unit of an aromatic atom goes to the pi system.
            let bonded = used[idx].saturating_add(u8::from(atom.aromatic));
            if let Some(&valence) = elem.valences.iter().find(|&&v| v >= bonded) {
                atom.hydrogen_count = valence - bonded;
            }
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn simple_smiles() -> impl Strategy<Value = String> {
        let atoms = prop_oneof![Just("C"), Just("N"), Just("O"), Just("S"), Just("Cl")];
        proptest::collection::vec(atoms, 1..=20).prop_map(|parts| parts.join(""))
    }

    proptest! {
        #[test]
        fn parse_smiles_does_not_panic(s in "\\PC{0,100}") {
            let _ = parse_smiles(&s);
        }

        #[test]
        fn chains_parse_to_linear_graphs(smi in simple_smiles()) {
            let mol = parse_smiles(&smi).unwrap();
            prop_assert!(mol.atom_count() > 0);
            prop_assert_eq!(mol.bond_count(), mol.atom_count() - 1);
        }
    }
}
