use std::path::PathBuf;
use thiserror::Error;

/// A single evaluation (or relaxation step) that the calculator could not
/// complete. Recorded on the run that raised it; never fatal to a benchmark.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CalculationFault {
    #[error("calculator raised: {0}")]
    Raised(String),

    #[error("non-finite energy returned ({0})")]
    NonFiniteEnergy(f64),

    #[error("non-finite force on atom {atom}")]
    NonFiniteForce { atom: usize },

    #[error("calculator returned {got} forces for {expected} atoms")]
    ForceCount { expected: usize, got: usize },

    #[error("direct prediction unavailable: {0}")]
    Unsupported(String),
}

/// Every run of a structure faulted: the record cannot be classified.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("all {runs} runs of {id} faulted")]
pub struct AllRunsFaulted {
    pub id: String,
    pub runs: usize,
}

/// Errors at the configuration and store boundary. These stop a benchmark.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid dataset: {0}")]
    Dataset(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("structure {0} is already stored")]
    DuplicateRecord(String),

    #[error("result store is {actual}, expected {expected}")]
    InvalidPhase {
        expected: &'static str,
        actual: &'static str,
    },
}

impl BenchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BenchError::Io { path: path.into(), source }
    }

    pub fn serde(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        BenchError::Serialization { path: path.into(), source }
    }
}

pub type BenchResult<T> = Result<T, BenchError>;
