use thiserror::Error;

/// Errors surfaced by the covariance dictionary-learning routines.
#[derive(Debug, Error)]
pub enum CovDlError {
    /// Input shapes disagree across the observation tensor, dictionary, and
    /// coefficient matrix. Raised before any numeric work starts.
    #[error("dimension mismatch in {what}: found shape {found:?}, incompatible with observations {observations:?}")]
    DimensionMismatch {
        what: &'static str,
        found: Vec<usize>,
        observations: Vec<usize>,
    },
    /// The secular equation of a smoothness projection admits no usable real
    /// root, or the projected vector came back non-finite.
    #[error("smoothness projection is infeasible: quadratic energy {energy} exceeds threshold {gamma} with no admissible root")]
    ProjectionInfeasible { energy: f64, gamma: f64 },
    /// A dictionary row collapsed to exactly zero norm after sparsification.
    #[error("dictionary row {row} collapsed to zero norm after sparsification")]
    DegenerateRow { row: usize },
    /// Construction-time configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias used across the crate.
pub type CovResult<T> = Result<T, CovDlError>;
