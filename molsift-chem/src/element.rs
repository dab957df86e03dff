//! Element lookup for the atoms the SMILES subset can express.

/// A chemical element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    pub atomic_number: u8,
    pub symbol: &'static str,
    /// Allowed valences in ascending order, used to infer implicit hydrogens.
    pub valences: &'static [u8],
}

static ELEMENTS: [Element; 16] = [
    Element { atomic_number: 1, symbol: "H", valences: &[1] },
    Element { atomic_number: 5, symbol: "B", valences: &[3] },
    Element { atomic_number: 6, symbol: "C", valences: &[4] },
    Element { atomic_number: 7, symbol: "N", valences: &[3, 5] },
    Element { atomic_number: 8, symbol: "O", valences: &[2] },
    Element { atomic_number: 9, symbol: "F", valences: &[1] },
    Element { atomic_number: 11, symbol: "Na", valences: &[1] },
    Element { atomic_number: 12, symbol: "Mg", valences: &[2] },
    Element { atomic_number: 14, symbol: "Si", valences: &[4] },
    Element { atomic_number: 15, symbol: "P", valences: &[3, 5] },
    Element { atomic_number: 16, symbol: "S", valences: &[2, 4, 6] },
    Element { atomic_number: 17, symbol: "Cl", valences: &[1] },
    Element { atomic_number: 19, symbol: "K", valences: &[1] },
    Element { atomic_number: 34, symbol: "Se", valences: &[2, 4, 6] },
    Element { atomic_number: 35, symbol: "Br", valences: &[1] },
    Element { atomic_number: 53, symbol: "I", valences: &[1, 3, 5] },
];

/// Look up an element by symbol (case-sensitive, e.g. `"Cl"`).
pub fn element_by_symbol(symbol: &str) -> Option<&'static Element> {
    ELEMENTS.iter().find(|e| e.symbol == symbol)
}

/// Look up an element by atomic number.
pub fn element_by_number(atomic_number: u8) -> Option<&'static Element> {
    ELEMENTS.iter().find(|e| e.atomic_number == atomic_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_both_ways() {
        let cl = element_by_symbol("Cl").unwrap();
        assert_eq!(cl.atomic_number, 17);
        assert_eq!(element_by_number(17).unwrap().symbol, "Cl");
        assert!(element_by_symbol("cl").is_none());
        assert!(element_by_number(118).is_none());
    }
}
