//! Interp-core: constrained least-squares scalar-field interpolation
//!
//! This library fits a scalar field to scattered observations over the nodes
//! of a discretised support. It provides:
//!
//! - **Regions**: compaction of an active node subset into dense degrees of freedom
//! - **Constraint accumulation**: soft least-squares rows and hard equality pins
//!   in sparse triplet form, with whole-batch rejection of malformed input
//! - **Assembly**: the rectangular system `A x ≈ B`, or its normal equations
//!   bordered by Lagrange rows for the pins, optionally damped
//! - **Solver dispatch**: conjugate gradient, sparse LDLᵀ, sparse LU, LSQR,
//!   aggregation multigrid and caller-supplied solvers
//!
//! # Algorithm
//!
//! Soft constraints are honoured in the least-squares sense, pins exactly:
//!
//! ```text
//! [ AᵀA   Cᵀ ] [x]   [AᵀB]
//! [ C     0  ] [y] = [ d ]
//! ```
//!
//! The field is the first `nx` entries of the solution, scattered back onto
//! the support's node numbering. Nodes outside the region stay unset.
//!
//! # Example
//!
//! ```ignore
//! use interp_core::{DiscreteInterpolator, SolveOptions, SolverKind, StructuredGrid};
//!
//! let grid = StructuredGrid::new([0.0; 3], [1.0; 3], [10, 10, 10])?;
//! let mut interp = DiscreteInterpolator::new(grid);
//!
//! interp.add_value_constraints(&[[2.5, 2.5, 2.5, 0.0].into()])?;
//! interp.add_gradient_constraints(&[[5.0, 5.0, 5.0, 0.0, 0.0, 1.0].into()])?;
//! interp.solve(SolverKind::from_name("cg")?, SolveOptions::default())?;
//!
//! let values = interp.evaluate_value(&[[4.0, 4.0, 4.0]]);
//! ```
//!
//! # Features
//!
//! - `cholesky` (default): LDLᵀ backend through `sprs-ldl`
//! - `amg` (default): multigrid-preconditioned conjugate gradient
//! - `serde`: serialisation of weights, options and observations

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod assembly;
pub mod constraints;
pub mod error;
pub mod interpolator;
pub mod linalg;
pub mod progress;
pub mod region;
pub mod solver;
pub mod support;

// Re-export main types
pub use assembly::{assemble, AssembledSystem, SystemShape, DAMPING};
pub use constraints::{ConstraintAccumulator, Ingest, LeastSquaresBatch, Rejection};
pub use error::{InterpError, InterpResult};
pub use interpolator::{
    DiscreteInterpolator, GradientConstraint, InterpolationWeights, UpdateStatus,
    ValueConstraint, DEFAULT_PROPERTY_NAME,
};
pub use progress::{ProgressMsg, ProgressSink};
pub use region::Region;
pub use solver::{Backend, BackendRegistry, Dispatcher, ExternalSolver, SolveOptions, SolverKind};
pub use support::{GradientStencil, ScalarField, Stencil, StructuredGrid, Support};

pub use linalg::cg::{CgSettings, IterativeOutcome};
pub use linalg::lsqr::{LsqrOutcome, LsqrSettings, LsqrStop};

#[cfg(feature = "amg")]
pub use linalg::amg::AmgSettings;
