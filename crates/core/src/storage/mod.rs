//! Storage layer: checksummed index snapshots and benchmark dataset readers.

/// `fvecs` / `ivecs` readers.
pub mod dataset;
/// Snapshot save/load with atomic writes.
pub mod persistence;

pub use dataset::{read_fvecs, read_ivecs, VectorSet};
