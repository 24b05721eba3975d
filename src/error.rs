//! Error types for distfit.

use thiserror::Error;

/// distfit error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Shapes of two related inputs disagree (e.g. weight vector length vs.
    /// number of observation columns).
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An iterative fit failed to converge within its iteration budget.
    #[error("{what} did not converge after {iterations} iterations")]
    NoConvergence { what: &'static str, iterations: usize },

    /// A parameter or dataset is outside the domain of the estimator.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Malformed XML or binary archive data.
    #[error("{format} archive error: {reason}")]
    Serial {
        format: &'static str,
        reason: String,
    },

    /// JSON encoding/decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn xml(reason: impl Into<String>) -> Self {
        Error::Serial {
            format: "XML",
            reason: reason.into(),
        }
    }

    pub(crate) fn binary(reason: impl Into<String>) -> Self {
        Error::Serial {
            format: "binary",
            reason: reason.into(),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
