//! Path-based pattern fingerprints for substructure pre-screening.
//!
//! Every atom and every simple bond path of up to [`MAX_PATH_BONDS`] bonds is
//! hashed into a bit position. Only properties that substructure matching
//! always compares (element, aromaticity, bond order) enter the hash, so any
//! path of a pattern reappears in every molecule that contains the pattern and
//! the pattern's bits are a subset of the molecule's bits.

use molsift_core::Fingerprint;

use crate::molecule::Molecule;

/// Default fingerprint length in bits.
pub const DEFAULT_FP_BITS: usize = 2048;

/// Longest path, in bonds, that contributes a bit.
pub const MAX_PATH_BONDS: usize = 4;

/// Compute the pattern fingerprint of a molecule.
pub fn pattern_fingerprint(mol: &Molecule, nbits: usize) -> Fingerprint {
    let mut fp = Fingerprint::new(nbits);
    let labels: Vec<u64> = mol
        .atoms
        .iter()
        .map(|a| ((a.atomic_number as u64) << 1) | a.aromatic as u64)
        .collect();

    for &label in &labels {
        fp.set_bit(fold_hash(hash_sequence(&[0, label]), nbits));
    }

    let mut visited = vec![false; mol.atom_count()];
    let mut path = Vec::with_capacity(2 * MAX_PATH_BONDS + 1);
    for start in 0..mol.atom_count() {
        visited[start] = true;
        path.push(labels[start]);
        walk(mol, &labels, start, &mut visited, &mut path, &mut fp, nbits);
        path.pop();
        visited[start] = false;
    }
    fp
}

fn walk(
    mol: &Molecule,
    labels: &[u64],
    atom: usize,
    visited: &mut [bool],
    path: &mut Vec<u64>,
    fp: &mut Fingerprint,
    nbits: usize,
) {
    if path.len() / 2 == MAX_PATH_BONDS {
        return;
    }
    for (next, bond) in mol.neighbors(atom) {
        if visited[next] {
            continue;
        }
        visited[next] = true;
        path.push(100 + bond.order as u64);
        path.push(labels[next]);

        fp.set_bit(fold_hash(canonical_path_hash(path), nbits));
        walk(mol, labels, next, visited, path, fp, nbits);

        path.pop();
        path.pop();
        visited[next] = false;
    }
}

/// Hash a path independently of the direction it was walked in.
fn canonical_path_hash(path: &[u64]) -> u64 {
    let forward = path.iter().copied();
    let backward = path.iter().rev().copied();
    let seq: Vec<u64> = if forward.clone().le(backward.clone()) {
        forward.collect()
    } else {
        backward.collect()
    };
    hash_sequence(&seq)
}

// FNV-1a over 64-bit words.
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn hash_sequence(values: &[u64]) -> u64 {
    let mut h = FNV_OFFSET;
    h = fnv1a_update(h, values.len() as u64);
    for &v in values {
        h = fnv1a_update(h, v);
    }
    h
}

fn fnv1a_update(hash: u64, value: u64) -> u64 {
    let mut h = hash;
    for b in value.to_le_bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

fn fold_hash(hash: u64, nbits: usize) -> usize {
    (hash % nbits as u64) as usize
}
