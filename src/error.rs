use thiserror::Error;

/// Construction-time validation failures. The simulation itself never fails;
/// degraded states (depletion, empty data) are reported in its result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("tier threshold {0} is outside (-1, 0]")]
    InvalidThreshold(f64),

    #[error("tier multiplier {0} must be finite and non-negative")]
    InvalidMultiplier(f64),

    #[error("genome has {got} genes, expected {expected}")]
    GenomeLength { expected: usize, got: usize },

    #[error("gene {index} = {value} is outside [{low}, {high}]")]
    GeneOutOfRange {
        index: usize,
        value: f64,
        low: f64,
        high: f64,
    },

    #[error("genes are not non-decreasing at index {0}")]
    UnsortedGenes(usize),

    #[error("invalid strategy config: {0}")]
    InvalidStrategy(String),

    #[error("invalid optimizer params: {0}")]
    InvalidOptimizer(String),
}

pub type Result<T> = std::result::Result<T, Error>;
