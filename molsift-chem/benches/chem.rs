use criterion::{black_box, criterion_group, criterion_main, Criterion};
use molsift_chem::{has_substructure, parse_smiles, pattern_fingerprint, DEFAULT_FP_BITS};
use molsift_core::MatchParams;

const SMILES_SET: &[&str] = &[
    "CCO",                                 // ethanol
    "CC(=O)O",                             // acetic acid
    "c1ccccc1",                            // benzene
    "CC(=O)Oc1ccccc1C(=O)O",               // aspirin
    "CC12CCC3C(C1CCC2O)CCC4=CC(=O)CCC34C", // testosterone
    "CC(C)CC1=CC=C(C=C1)C(C)C(=O)O",       // ibuprofen
    "CC(=O)NC1=CC=C(C=C1)O",               // acetaminophen
    "c1ccc2ccccc2c1",                      // naphthalene
    "c1ccncc1",                            // pyridine
    "ClC(Cl)Cl",                           // chloroform
];

fn bench_pattern_fp(c: &mut Criterion) {
    let mols: Vec<_> = SMILES_SET.iter().filter_map(|s| parse_smiles(s).ok()).collect();
    let mols_1k: Vec<_> = mols.iter().cycle().take(1000).collect();

    c.bench_function("pattern_fp_1k_mols", |b| {
        b.iter(|| {
            for mol in black_box(&mols_1k) {
                let _ = pattern_fingerprint(mol, DEFAULT_FP_BITS);
            }
        })
    });
}

fn bench_substructure(c: &mut Criterion) {
    let mols: Vec<_> = SMILES_SET.iter().filter_map(|s| parse_smiles(s).ok()).collect();
    let query = parse_smiles("C(=O)O").unwrap();

    c.bench_function("substructure_carboxyl", |b| {
        b.iter(|| {
            for mol in black_box(&mols) {
                let _ = has_substructure(mol, &query, MatchParams::default());
            }
        })
    });
}

criterion_group!(benches, bench_pattern_fp, bench_substructure);
criterion_main!(benches);
