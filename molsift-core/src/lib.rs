//! Shared primitives, traits, and utilities for the molsift workspace.
//!
//! `molsift-core` provides the foundation that the other molsift crates build on:
//!
//! - **Error types**: [`SiftError`] and [`Result`] for structured error handling
//! - **Traits**: [`Releasable`] native handles and the [`StructureToolkit`] chemistry contract
//! - **Fingerprints**: fixed-length [`Fingerprint`] bit vectors with cached cardinality

pub mod error;
pub mod fingerprint;
pub mod traits;

pub use error::{Result, SiftError};
pub use fingerprint::Fingerprint;
pub use traits::*;
