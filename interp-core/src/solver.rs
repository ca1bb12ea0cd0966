//! Solver selection and dispatch.
//!
//! [`SolverKind`] is the closed set of backends with their settings. The
//! [`Dispatcher`] checks each request against a [`BackendRegistry`] built
//! from the cargo features this crate was compiled with, falls back to
//! conjugate gradient when a backend is missing, runs the solve and returns
//! the field part of the solution.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::assembly::AssembledSystem;
use crate::error::{InterpError, InterpResult};
use crate::linalg::cg::{conjugate_gradient, CgSettings};
use crate::linalg::lsqr::{lsqr, LsqrSettings};
use crate::linalg::lu::solve_sparse_lu;
use crate::linalg::sparse::SparseCsc;

#[cfg(feature = "amg")]
use crate::linalg::amg::{solve_amg, AmgSettings};
#[cfg(feature = "cholesky")]
use crate::linalg::cholesky::solve_ldl;

/// Caller-supplied solver for the square system.
///
/// Receives the assembled matrix and right-hand side and returns the
/// solution. Only the first `nx` entries are used.
#[derive(Clone)]
pub struct ExternalSolver(Arc<dyn Fn(&SparseCsc, &[f64]) -> Vec<f64> + Send + Sync>);

impl ExternalSolver {
    pub fn new<F>(solve: F) -> Self
    where
        F: Fn(&SparseCsc, &[f64]) -> Vec<f64> + Send + Sync + 'static,
    {
        Self(Arc::new(solve))
    }

    fn call(&self, a: &SparseCsc, b: &[f64]) -> Vec<f64> {
        (self.0)(a, b)
    }
}

impl fmt::Debug for ExternalSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExternalSolver(..)")
    }
}

/// A solver backend together with its settings.
#[derive(Debug, Clone)]
pub enum SolverKind {
    /// Conjugate gradient on the square system
    Cg(CgSettings),
    /// Sparse LDLᵀ on the square system
    Cholesky,
    /// Sparse LU on the square system
    Lu,
    /// LSQR on the rectangular system
    Lsqr(LsqrSettings),
    /// Multigrid-preconditioned CG on the square system
    #[cfg(feature = "amg")]
    Amg(AmgSettings),
    /// Caller-supplied solver on the square system
    External(ExternalSolver),
}

impl Default for SolverKind {
    fn default() -> Self {
        SolverKind::Cg(CgSettings::default())
    }
}

impl SolverKind {
    /// Resolve a solver by name with default settings.
    ///
    /// Accepts `cg`, `chol`, `lu`, `lsqr` and `pyamg`/`amg`. `external` has
    /// no default and must be built with [`SolverKind::External`].
    pub fn from_name(name: &str) -> InterpResult<Self> {
        match name {
            "cg" => Ok(SolverKind::Cg(CgSettings::default())),
            "chol" | "cholesky" => Ok(SolverKind::Cholesky),
            "lu" => Ok(SolverKind::Lu),
            "lsqr" => Ok(SolverKind::Lsqr(LsqrSettings::default())),
            #[cfg(feature = "amg")]
            "pyamg" | "amg" => Ok(SolverKind::Amg(AmgSettings::default())),
            #[cfg(not(feature = "amg"))]
            "pyamg" | "amg" => {
                log::warn!("Multigrid solver not available, using cg instead");
                Ok(SolverKind::Cg(CgSettings::default()))
            }
            "external" => Err(InterpError::MissingExternalSolver),
            other => Err(InterpError::UnknownSolver(other.to_string())),
        }
    }

    /// Backend this request runs on.
    pub fn backend(&self) -> Backend {
        match self {
            SolverKind::Cg(_) => Backend::Cg,
            SolverKind::Cholesky => Backend::Cholesky,
            SolverKind::Lu => Backend::Lu,
            SolverKind::Lsqr(_) => Backend::Lsqr,
            #[cfg(feature = "amg")]
            SolverKind::Amg(_) => Backend::Amg,
            SolverKind::External(_) => Backend::External,
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        self.backend().name()
    }

    /// Whether the backend consumes the normal-equations form.
    pub fn requires_square(&self) -> bool {
        !matches!(self, SolverKind::Lsqr(_))
    }
}

impl FromStr for SolverKind {
    type Err = InterpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

/// Solver backends, independent of settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Backend {
    Cg,
    Cholesky,
    Lu,
    Lsqr,
    Amg,
    External,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Backend::Cg => "cg",
            Backend::Cholesky => "chol",
            Backend::Lu => "lu",
            Backend::Lsqr => "lsqr",
            Backend::Amg => "amg",
            Backend::External => "external",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of backends usable in this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRegistry {
    available: BTreeSet<Backend>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::detect()
    }
}

impl BackendRegistry {
    /// Backends compiled into this build.
    pub fn detect() -> Self {
        let mut available: BTreeSet<Backend> =
            [Backend::Cg, Backend::Lu, Backend::Lsqr, Backend::External]
                .into_iter()
                .collect();
        if cfg!(feature = "cholesky") {
            available.insert(Backend::Cholesky);
        }
        if cfg!(feature = "amg") {
            available.insert(Backend::Amg);
        }
        Self { available }
    }

    /// Remove a backend. Conjugate gradient is the fallback and stays.
    pub fn without(mut self, backend: Backend) -> Self {
        if backend == Backend::Cg {
            log::warn!("cg is the fallback solver and cannot be disabled");
        } else {
            self.available.remove(&backend);
        }
        self
    }

    pub fn is_available(&self, backend: Backend) -> bool {
        self.available.contains(&backend)
    }

    pub fn available(&self) -> impl Iterator<Item = Backend> + '_ {
        self.available.iter().copied()
    }
}

/// Options that apply to every solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolveOptions {
    /// Add `ε·I` to the square system's diagonal
    pub damp: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        let damp = std::env::var("INTERP_DAMP")
            .ok()
            .map(|v| !matches!(v.trim(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);
        Self { damp }
    }
}

/// Runs solve requests against the available backends.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    registry: BackendRegistry,
}

impl Dispatcher {
    pub fn new(registry: BackendRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// The request that will actually run: `kind`, or default CG when its
    /// backend is unavailable.
    pub fn resolve(&self, kind: &SolverKind) -> SolverKind {
        let backend = kind.backend();
        if self.registry.is_available(backend) {
            kind.clone()
        } else {
            log::warn!("Solver {} is not available, using cg instead", backend);
            SolverKind::default()
        }
    }

    /// Solve `system` and return its first `nx` entries.
    ///
    /// `kind` must already be resolved and match the system's shape.
    pub fn solve(&self, kind: &SolverKind, system: &AssembledSystem) -> InterpResult<Vec<f64>> {
        if !self.registry.is_available(kind.backend()) {
            return Err(InterpError::UnavailableSolver(kind.name()));
        }
        let a = &system.matrix;
        let b = &system.rhs;
        let nx = system.nx;

        if kind.requires_square() != system.is_square() {
            let form = |square: bool| if square { "square" } else { "rectangular" };
            return Err(InterpError::WrongSystemShape {
                solver: kind.name(),
                expected: form(kind.requires_square()),
                actual: form(system.is_square()),
            });
        }

        log::info!("Solving using {}", kind.name());

        let mut x = match kind {
            SolverKind::Cg(settings) => {
                let out = conjugate_gradient(a, b, settings);
                log::info!(
                    "cg finished after {} iterations (residual {:.3e})",
                    out.iterations,
                    out.residual
                );
                out.x
            }
            #[cfg(feature = "cholesky")]
            SolverKind::Cholesky => {
                let positive_definite = matches!(
                    system.shape,
                    crate::assembly::SystemShape::Square { lagrange_rows: 0 }
                );
                solve_ldl(a, b, positive_definite)?
            }
            #[cfg(not(feature = "cholesky"))]
            SolverKind::Cholesky => return Err(InterpError::UnavailableSolver(kind.name())),
            SolverKind::Lu => solve_sparse_lu(a, b)?,
            SolverKind::Lsqr(settings) => {
                let out = lsqr(a, b, settings);
                log::info!(
                    "lsqr stopped after {} iterations: {:?} (rnorm {:.3e})",
                    out.iterations,
                    out.stop,
                    out.rnorm
                );
                out.x
            }
            #[cfg(feature = "amg")]
            SolverKind::Amg(settings) => {
                let out = solve_amg(a, b, settings);
                log::info!(
                    "amg finished after {} iterations (residual {:.3e})",
                    out.iterations,
                    out.residual
                );
                out.x
            }
            SolverKind::External(solver) => solver.call(a, b),
        };

        if x.len() < nx {
            return Err(InterpError::DimensionMismatch {
                expected: nx,
                actual: x.len(),
            });
        }
        x.truncate(nx);
        Ok(x)
    }
}
