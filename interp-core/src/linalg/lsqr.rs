//! LSQR for sparse least-squares problems.
//!
//! Solves `min ‖A x − b‖² + damp² ‖x‖²` on the rectangular system directly,
//! without forming `AᵀA`. Follows Paige & Saunders (1982), including their
//! stopping tests on the residual, the normal-equations residual and the
//! condition estimate.

use std::fmt;
use std::sync::Arc;

use super::sparse::{norm2, spmv, spmv_transpose, SparseCsc};
use crate::progress::{ProgressMsg, ProgressSink};

/// LSQR settings.
#[derive(Clone)]
pub struct LsqrSettings {
    /// Iteration cap (None = 2 × number of columns)
    pub iter_lim: Option<usize>,

    /// Damping coefficient
    pub damp: f64,

    /// Relative tolerance on `A` (stopping tests 2 and 1)
    pub atol: f64,

    /// Relative tolerance on `b` (stopping test 1)
    pub btol: f64,

    /// Condition number limit (0 disables the test)
    pub conlim: f64,

    /// Log every iteration at info level
    pub show: bool,

    /// Per-iteration progress reports
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl Default for LsqrSettings {
    fn default() -> Self {
        Self {
            iter_lim: None,
            damp: 0.0,
            atol: 1e-6,
            btol: 1e-6,
            conlim: 1e8,
            show: false,
            progress: None,
        }
    }
}

impl fmt::Debug for LsqrSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LsqrSettings")
            .field("iter_lim", &self.iter_lim)
            .field("damp", &self.damp)
            .field("atol", &self.atol)
            .field("btol", &self.btol)
            .field("conlim", &self.conlim)
            .field("show", &self.show)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Why LSQR stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LsqrStop {
    /// `x = 0` is the exact solution
    TrivialSolution,
    /// `A x = b` solved to within `atol`/`btol`
    CompatibleSystem,
    /// Least-squares problem solved to within `atol`
    LeastSquares,
    /// Condition estimate exceeded `conlim`
    IllConditioned,
    /// Compatible system solved to machine precision
    CompatibleMachinePrecision,
    /// Least-squares problem solved to machine precision
    LeastSquaresMachinePrecision,
    /// Condition estimate exceeded machine precision
    IllConditionedMachinePrecision,
    /// Iteration cap reached
    IterationLimit,
}

/// Result of an LSQR solve.
#[derive(Debug, Clone)]
pub struct LsqrOutcome {
    /// Solution estimate
    pub x: Vec<f64>,
    /// Stopping reason
    pub stop: LsqrStop,
    /// Iterations performed
    pub iterations: usize,
    /// Estimate of ‖[A; damp I] x − [b; 0]‖
    pub rnorm: f64,
    /// Estimate of ‖Aᵀ r − damp² x‖
    pub arnorm: f64,
    /// Condition estimate of `[A; damp I]`
    pub acond: f64,
}

/// Run LSQR on a rectangular system.
pub fn lsqr(a: &SparseCsc, b: &[f64], settings: &LsqrSettings) -> LsqrOutcome {
    let m = a.rows();
    let n = a.cols();
    let iter_lim = settings.iter_lim.unwrap_or(2 * n);
    let damp = settings.damp;
    let dampsq = damp * damp;
    let ctol = if settings.conlim > 0.0 { 1.0 / settings.conlim } else { 0.0 };
    let eps = f64::EPSILON;

    if damp > 0.0 {
        log::info!("Using damping coefficient {}", damp);
    }

    let mut x = vec![0.0; n];

    // Bidiagonalization start: beta u = b, alpha v = Aᵀ u
    let mut u = b.to_vec();
    let mut beta = norm2(&u);
    if beta > 0.0 {
        scale(&mut u, 1.0 / beta);
    }
    let mut v = vec![0.0; n];
    let mut alpha = 0.0;
    if beta > 0.0 {
        spmv_transpose(a, &u, &mut v, 1.0, 0.0);
        alpha = norm2(&v);
    }
    if alpha > 0.0 {
        scale(&mut v, 1.0 / alpha);
    }
    let mut w = v.clone();

    let bnorm = beta;
    let mut rnorm = beta;
    let mut arnorm = alpha * beta;
    if arnorm == 0.0 {
        return LsqrOutcome {
            x,
            stop: LsqrStop::TrivialSolution,
            iterations: 0,
            rnorm,
            arnorm,
            acond: 0.0,
        };
    }

    let mut rhobar = alpha;
    let mut phibar = beta;
    let mut anorm: f64 = 0.0;
    let mut acond = 0.0;
    let mut ddnorm = 0.0;
    let mut res2 = 0.0;
    let mut xxnorm = 0.0;
    let mut z = 0.0;
    let mut cs2 = -1.0;
    let mut sn2 = 0.0;

    let mut stop = LsqrStop::IterationLimit;
    let mut iterations = 0;
    let mut av = vec![0.0; m];
    let mut atu = vec![0.0; n];

    while iterations < iter_lim {
        iterations += 1;

        // beta u = A v - alpha u
        spmv(a, &v, &mut av, 1.0, 0.0);
        for (ui, avi) in u.iter_mut().zip(&av) {
            *ui = avi - alpha * *ui;
        }
        beta = norm2(&u);

        if beta > 0.0 {
            scale(&mut u, 1.0 / beta);
            anorm = (anorm * anorm + alpha * alpha + beta * beta + dampsq).sqrt();
            // alpha v = Aᵀ u - beta v
            spmv_transpose(a, &u, &mut atu, 1.0, 0.0);
            for (vi, atui) in v.iter_mut().zip(&atu) {
                *vi = atui - beta * *vi;
            }
            alpha = norm2(&v);
            if alpha > 0.0 {
                scale(&mut v, 1.0 / alpha);
            }
        }

        // Eliminate the damping parameter
        let (rhobar1, psi) = if damp > 0.0 {
            let rhobar1 = (rhobar * rhobar + dampsq).sqrt();
            let cs1 = rhobar / rhobar1;
            let sn1 = damp / rhobar1;
            let psi = sn1 * phibar;
            phibar *= cs1;
            (rhobar1, psi)
        } else {
            (rhobar, 0.0)
        };

        // Plane rotation to eliminate the subdiagonal of the lower-bidiagonal matrix
        let rho = (rhobar1 * rhobar1 + beta * beta).sqrt();
        let cs = rhobar1 / rho;
        let sn = beta / rho;
        let theta = sn * alpha;
        rhobar = -cs * alpha;
        let phi = cs * phibar;
        phibar *= sn;
        let tau = sn * phi;

        // Update x and w
        let t1 = phi / rho;
        let t2 = -theta / rho;
        let mut dknorm2 = 0.0;
        for ((xi, wi), vi) in x.iter_mut().zip(w.iter_mut()).zip(&v) {
            let dk = *wi / rho;
            dknorm2 += dk * dk;
            *xi += t1 * *wi;
            *wi = vi + t2 * *wi;
        }
        ddnorm += dknorm2;

        // Estimate ‖x‖ via the rotation applied to the upper-bidiagonal form
        let delta = sn2 * rho;
        let gambar = -cs2 * rho;
        let rhs = phi - delta * z;
        let zbar = rhs / gambar;
        let xnorm = (xxnorm + zbar * zbar).sqrt();
        let gamma = (gambar * gambar + theta * theta).sqrt();
        cs2 = gambar / gamma;
        sn2 = theta / gamma;
        z = rhs / gamma;
        xxnorm += z * z;

        acond = anorm * ddnorm.sqrt();
        let res1 = phibar * phibar;
        res2 += psi * psi;
        rnorm = (res1 + res2).sqrt();
        arnorm = alpha * tau.abs();

        let test1 = rnorm / bnorm;
        let test2 = arnorm / (anorm * rnorm + eps);
        let test3 = 1.0 / (acond + eps);
        let t1 = test1 / (1.0 + anorm * xnorm / bnorm);
        let rtol = settings.btol + settings.atol * anorm * xnorm / bnorm;

        if settings.show {
            log::info!(
                "lsqr iter {:4}: rnorm {:.3e} arnorm {:.3e} acond {:.3e}",
                iterations,
                rnorm,
                arnorm,
                acond
            );
        }
        if let Some(sink) = settings.progress.as_deref() {
            sink.emit(ProgressMsg::SolverIteration {
                solver: "lsqr",
                iter: iterations,
                residual: rnorm,
            });
        }

        // Later tests take precedence, matching the reference ordering
        let mut istop = None;
        if 1.0 + test3 <= 1.0 {
            istop = Some(LsqrStop::IllConditionedMachinePrecision);
        }
        if 1.0 + test2 <= 1.0 {
            istop = Some(LsqrStop::LeastSquaresMachinePrecision);
        }
        if 1.0 + t1 <= 1.0 {
            istop = Some(LsqrStop::CompatibleMachinePrecision);
        }
        if test3 <= ctol {
            istop = Some(LsqrStop::IllConditioned);
        }
        if test2 <= settings.atol {
            istop = Some(LsqrStop::LeastSquares);
        }
        if test1 <= rtol {
            istop = Some(LsqrStop::CompatibleSystem);
        }
        if let Some(reason) = istop {
            stop = reason;
            break;
        }
    }

    if stop == LsqrStop::IterationLimit {
        log::warn!("lsqr reached the iteration limit of {}", iter_lim);
    }

    LsqrOutcome {
        x,
        stop,
        iterations,
        rnorm,
        arnorm,
        acond,
    }
}

fn scale(x: &mut [f64], s: f64) {
    for xi in x.iter_mut() {
        *xi *= s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse::from_triplets;

    #[test]
    fn test_lsqr_square_compatible() {
        let a = from_triplets(2, 2, vec![(0, 0, 2.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)]);
        let b = vec![3.0, 4.0];

        let out = lsqr(
            &a,
            &b,
            &LsqrSettings {
                atol: 1e-12,
                btol: 1e-12,
                ..Default::default()
            },
        );

        assert!((out.x[0] - 1.0).abs() < 1e-9, "x = {:?}", out.x);
        assert!((out.x[1] - 1.0).abs() < 1e-9, "x = {:?}", out.x);
    }

    #[test]
    fn test_lsqr_overdetermined_line_fit() {
        // Fit y = c0 + c1 t through (0, 1), (1, 3), (2, 5), (3, 7.5)
        let t = [0.0, 1.0, 2.0, 3.0];
        let y = vec![1.0, 3.0, 5.0, 7.5];
        let mut triplets = Vec::new();
        for (i, &ti) in t.iter().enumerate() {
            triplets.push((i, 0, 1.0));
            if ti != 0.0 {
                triplets.push((i, 1, ti));
            }
        }
        let a = from_triplets(4, 2, triplets);

        let out = lsqr(
            &a,
            &y,
            &LsqrSettings {
                atol: 1e-14,
                btol: 1e-14,
                ..Default::default()
            },
        );

        // Closed form: c1 = 2.15, c0 = 0.9
        assert!((out.x[0] - 0.9).abs() < 1e-8, "x = {:?}", out.x);
        assert!((out.x[1] - 2.15).abs() < 1e-8, "x = {:?}", out.x);
        assert!(out.rnorm > 0.0);
    }

    #[test]
    fn test_lsqr_zero_rhs() {
        let a = from_triplets(3, 2, vec![(0, 0, 1.0), (1, 1, 1.0), (2, 0, 1.0)]);

        let out = lsqr(&a, &[0.0; 3], &LsqrSettings::default());

        assert_eq!(out.stop, LsqrStop::TrivialSolution);
        assert_eq!(out.x, vec![0.0, 0.0]);
    }

    #[test]
    fn test_lsqr_damping_shrinks_solution() {
        let a = from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 1.0)]);
        let b = vec![1.0, 1.0];

        let out = lsqr(
            &a,
            &b,
            &LsqrSettings {
                damp: 1.0,
                atol: 1e-12,
                btol: 1e-12,
                ..Default::default()
            },
        );

        // min ‖x − b‖² + ‖x‖² ⇒ x = b / 2
        assert!((out.x[0] - 0.5).abs() < 1e-9, "x = {:?}", out.x);
        assert!((out.x[1] - 0.5).abs() < 1e-9, "x = {:?}", out.x);
    }
}
