//! CatBench: benchmarking machine-learning interatomic potentials against
//! DFT references for catalytic reaction energetics.
//!
//! The crate relaxes every structure of a benchmark dataset with one or more
//! independently configured calculators, reduces the runs to one record,
//! classifies anomalies and keeps a resumable checkpoint of the progress.

pub mod analysis;
pub mod bench;
pub mod core;
pub mod engine;
pub mod interface;
pub mod store;
