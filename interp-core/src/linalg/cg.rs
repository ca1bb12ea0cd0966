//! Preconditioned conjugate gradient.
//!
//! Works on the square (normal-equations) system. The bordered system with
//! Lagrange rows is symmetric but indefinite; CG is still applied to it, as
//! the damped saddle-point systems produced here are well enough behaved in
//! practice, and a breakdown (`pᵀAp == 0`) stops the iteration with a warning.

use std::fmt;
use std::sync::Arc;

use super::sparse::{axpy, diagonal_of, dot, norm2, spmv, SparseCsc};
use crate::progress::{ProgressMsg, ProgressSink};

/// Applies `z = M⁻¹ r`.
pub trait Preconditioner: Send + Sync {
    fn apply(&self, r: &[f64], z: &mut [f64]);
}

/// Builds a preconditioner from the assembled matrix.
pub type PreconditionerFactory = Arc<dyn Fn(&SparseCsc) -> Box<dyn Preconditioner> + Send + Sync>;

/// Diagonal (Jacobi) preconditioner.
///
/// Zero or non-finite diagonal entries are left unscaled.
#[derive(Debug, Clone)]
pub struct Jacobi {
    inv_diag: Vec<f64>,
}

impl Jacobi {
    pub fn new(a: &SparseCsc) -> Self {
        let inv_diag = diagonal_of(a)
            .into_iter()
            .map(|d| if d != 0.0 && d.is_finite() { 1.0 / d } else { 1.0 })
            .collect();
        Self { inv_diag }
    }
}

impl Preconditioner for Jacobi {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        for ((zi, ri), di) in z.iter_mut().zip(r).zip(&self.inv_diag) {
            *zi = ri * di;
        }
    }
}

/// Factory for [`Jacobi`].
pub fn jacobi() -> PreconditionerFactory {
    Arc::new(|a: &SparseCsc| Box::new(Jacobi::new(a)) as Box<dyn Preconditioner>)
}

/// Conjugate gradient settings.
#[derive(Clone)]
pub struct CgSettings {
    /// Iteration cap (None = 10 × system size)
    pub max_iter: Option<usize>,

    /// Starting point. Shorter guesses (field values only) are padded with zeros.
    pub initial_guess: Option<Vec<f64>>,

    /// Relative tolerance on the residual norm
    pub tol: f64,

    /// Absolute tolerance on the residual norm
    pub atol: f64,

    /// Preconditioner built from the matrix before iterating
    pub preconditioner: Option<PreconditionerFactory>,

    /// Per-iteration progress reports
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl Default for CgSettings {
    fn default() -> Self {
        let max_iter = std::env::var("INTERP_CG_MAX_ITER")
            .ok()
            .and_then(|s| s.parse::<usize>().ok());
        let tol = std::env::var("INTERP_CG_TOL")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(1e-12);

        Self {
            max_iter,
            initial_guess: None,
            tol,
            atol: 0.0,
            preconditioner: None,
            progress: None,
        }
    }
}

impl fmt::Debug for CgSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CgSettings")
            .field("max_iter", &self.max_iter)
            .field("initial_guess", &self.initial_guess.as_ref().map(Vec::len))
            .field("tol", &self.tol)
            .field("atol", &self.atol)
            .field("preconditioner", &self.preconditioner.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Result of an iterative solve.
#[derive(Debug, Clone)]
pub struct IterativeOutcome {
    /// Final iterate
    pub x: Vec<f64>,
    /// Iterations performed
    pub iterations: usize,
    /// Final residual norm
    pub residual: f64,
    /// Whether the tolerance was reached
    pub converged: bool,
}

/// Solve `A x = b` with the given settings.
pub fn conjugate_gradient(a: &SparseCsc, b: &[f64], settings: &CgSettings) -> IterativeOutcome {
    let n = b.len();
    let x0 = initial_point(n, settings.initial_guess.as_deref());
    let precond = settings.preconditioner.as_ref().map(|factory| factory(a));
    let max_iter = settings.max_iter.unwrap_or(10 * n.max(1));

    pcg(
        a,
        b,
        x0,
        Tolerance {
            rel: settings.tol,
            abs: settings.atol,
            max_iter,
        },
        precond.as_deref(),
        settings.progress.as_deref(),
        "cg",
    )
}

fn initial_point(n: usize, guess: Option<&[f64]>) -> Vec<f64> {
    match guess {
        Some(g) if g.len() <= n => {
            log::info!("Using starting guess");
            let mut x = g.to_vec();
            x.resize(n, 0.0);
            x
        }
        Some(g) => {
            log::warn!(
                "Starting guess has {} entries for a system of size {}, ignoring",
                g.len(),
                n
            );
            vec![0.0; n]
        }
        None => vec![0.0; n],
    }
}

/// Stopping rule for [`pcg`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tolerance {
    pub rel: f64,
    pub abs: f64,
    pub max_iter: usize,
}

/// Preconditioned CG core shared with the multigrid backend.
pub(crate) fn pcg(
    a: &SparseCsc,
    b: &[f64],
    mut x: Vec<f64>,
    tol: Tolerance,
    precond: Option<&dyn Preconditioner>,
    progress: Option<&dyn ProgressSink>,
    name: &'static str,
) -> IterativeOutcome {
    let n = b.len();
    let bnorm = norm2(b);
    if bnorm == 0.0 {
        return IterativeOutcome {
            x: vec![0.0; n],
            iterations: 0,
            residual: 0.0,
            converged: true,
        };
    }
    let threshold = (tol.rel * bnorm).max(tol.abs);

    // r = b - A x
    let mut r = b.to_vec();
    spmv(a, &x, &mut r, -1.0, 1.0);
    let mut res = norm2(&r);
    if res <= threshold {
        return IterativeOutcome {
            x,
            iterations: 0,
            residual: res,
            converged: true,
        };
    }

    let mut z = vec![0.0; n];
    apply(precond, &r, &mut z);
    let mut p = z.clone();
    let mut rz = dot(&r, &z);
    let mut ap = vec![0.0; n];

    let mut converged = false;
    let mut iterations = 0;
    for iter in 1..=tol.max_iter {
        iterations = iter;
        spmv(a, &p, &mut ap, 1.0, 0.0);
        let pap = dot(&p, &ap);
        if pap == 0.0 || !pap.is_finite() {
            log::warn!("{}: breakdown at iteration {} (pᵀAp = {})", name, iter, pap);
            break;
        }

        let alpha = rz / pap;
        axpy(alpha, &p, &mut x);
        axpy(-alpha, &ap, &mut r);
        res = norm2(&r);

        match progress {
            Some(sink) => sink.emit(ProgressMsg::SolverIteration {
                solver: name,
                iter,
                residual: res,
            }),
            None => log::trace!("{} iter {:4}: residual {:.3e}", name, iter, res),
        }

        if res <= threshold {
            converged = true;
            break;
        }

        apply(precond, &r, &mut z);
        let rz_new = dot(&r, &z);
        let beta = rz_new / rz;
        for (pi, zi) in p.iter_mut().zip(&z) {
            *pi = zi + beta * *pi;
        }
        rz = rz_new;
    }

    if !converged {
        log::warn!(
            "{} did not converge in {} iterations (residual {:.3e}, target {:.3e})",
            name,
            iterations,
            res,
            threshold
        );
    }

    IterativeOutcome {
        x,
        iterations,
        residual: res,
        converged,
    }
}

fn apply(precond: Option<&dyn Preconditioner>, r: &[f64], z: &mut [f64]) {
    match precond {
        Some(m) => m.apply(r, z),
        None => z.copy_from_slice(r),
    }
}
