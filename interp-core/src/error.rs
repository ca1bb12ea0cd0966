//! Error types for the interpolation core.

use thiserror::Error;

/// Errors that surface to the caller.
///
/// Data-quality problems (non-finite constraints, pins outside the region,
/// missing optional backends) are not errors; they are logged and handled
/// where they occur. Only structurally invalid input or configuration and
/// hard numerical failures end up here.
#[derive(Error, Debug)]
pub enum InterpError {
    /// Solver name does not match any backend
    #[error("Unknown solver: {0}")]
    UnknownSolver(String),

    /// `external` was requested without a callable
    #[error("External solver requested but no callable was supplied")]
    MissingExternalSolver,

    /// Backend is not in the dispatcher's registry
    #[error("Solver {0} is not available")]
    UnavailableSolver(&'static str),

    /// Backend was handed the wrong form of the system
    #[error("Solver {solver} needs the {expected} system, got the {actual} one")]
    WrongSystemShape {
        /// Backend name
        solver: &'static str,
        /// Form the backend consumes
        expected: &'static str,
        /// Form it was given
        actual: &'static str,
    },

    /// Constraint batch arrays disagree with the declared shape
    #[error("Shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Which array was inconsistent
        what: &'static str,
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Backend returned a vector of the wrong size
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        actual: usize,
    },

    /// Support geometry is unusable (empty axis, non-positive step)
    #[error("Invalid support: {0}")]
    InvalidSupport(String),

    /// Direct factorization failed
    #[error("Factorization failed: {0}")]
    Factorization(String),

    /// Error reported by sprs
    #[error(transparent)]
    Linalg(#[from] sprs::errors::LinalgError),
}

/// Result type for interpolation operations.
pub type InterpResult<T> = Result<T, InterpError>;
