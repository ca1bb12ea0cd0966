//! Linear algebra layer.
//!
//! Sparse kernels and the solver backends the dispatcher chooses from.

pub mod sparse;
pub mod cg;
pub mod lsqr;
pub mod lu;

#[cfg(feature = "cholesky")]
pub mod cholesky;

#[cfg(feature = "amg")]
pub mod amg;
