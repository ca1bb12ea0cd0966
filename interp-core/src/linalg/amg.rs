//! Aggregation-based algebraic multigrid.
//!
//! Builds a hierarchy by greedy aggregation on the strength-of-connection
//! graph, with piecewise-constant interpolation and Galerkin coarse operators
//! `A_c = Pᵀ A P`. One symmetric V-cycle (forward Gauss-Seidel before the
//! coarse correction, backward after) is used as the preconditioner of a CG
//! iteration, so the whole solver stays symmetric.
//!
//! Intended for the normal equations of large smooth problems. Bordered
//! systems have (near-)zero diagonal entries in the multiplier block; the
//! smoother skips those rows and convergence is left to the outer CG.

use nalgebra::{DVector, Dyn, LU};

use super::cg::{pcg, IterativeOutcome, Preconditioner, Tolerance};
use super::sparse::{diagonal_of, spmv, to_dense, SparseCsc, SparseTriMat};
use crate::progress::ProgressSink;
use std::fmt;
use std::sync::Arc;

/// Multigrid settings.
#[derive(Clone)]
pub struct AmgSettings {
    /// Maximum number of levels, including the finest
    pub max_levels: usize,

    /// Stop coarsening once a level has at most this many unknowns
    pub coarse_size: usize,

    /// Strength-of-connection threshold θ: `|a_ij| >= θ sqrt(|a_ii a_jj|)`
    pub strength: f64,

    /// Gauss-Seidel sweeps before the coarse correction
    pub pre_smooth: usize,

    /// Gauss-Seidel sweeps after the coarse correction
    pub post_smooth: usize,

    /// Relative residual tolerance of the outer CG
    pub tol: f64,

    /// Outer iteration cap
    pub max_iter: usize,

    /// Per-iteration progress reports
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl Default for AmgSettings {
    fn default() -> Self {
        Self {
            max_levels: 10,
            coarse_size: 64,
            strength: 0.25,
            pre_smooth: 1,
            post_smooth: 1,
            tol: 1e-10,
            max_iter: 200,
            progress: None,
        }
    }
}

impl fmt::Debug for AmgSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmgSettings")
            .field("max_levels", &self.max_levels)
            .field("coarse_size", &self.coarse_size)
            .field("strength", &self.strength)
            .field("pre_smooth", &self.pre_smooth)
            .field("post_smooth", &self.post_smooth)
            .field("tol", &self.tol)
            .field("max_iter", &self.max_iter)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// One level of the hierarchy.
struct Level {
    a: SparseCsc,
    diag: Vec<f64>,
    /// Fine node -> coarse aggregate (the tentative prolongator)
    aggregates: Vec<usize>,
    n_coarse: usize,
}

/// Multigrid hierarchy usable as a preconditioner.
pub struct Hierarchy {
    levels: Vec<Level>,
    coarsest: SparseCsc,
    coarse_lu: Option<LU<f64, Dyn, Dyn>>,
    pre_smooth: usize,
    post_smooth: usize,
}

impl Hierarchy {
    /// Build the hierarchy for a symmetric matrix.
    pub fn build(a: &SparseCsc, settings: &AmgSettings) -> Self {
        let mut levels = Vec::new();
        let mut current = a.clone();

        while levels.len() + 1 < settings.max_levels.max(1) && current.rows() > settings.coarse_size {
            let (aggregates, n_coarse) = aggregate(&current, settings.strength);
            if n_coarse == 0 || n_coarse >= current.rows() {
                break;
            }
            let coarse = galerkin(&current, &aggregates, n_coarse);
            let diag = diagonal_of(&current);
            levels.push(Level {
                a: current,
                diag,
                aggregates,
                n_coarse,
            });
            current = coarse;
        }

        let coarse_lu = if current.rows() > 0 {
            let lu = to_dense(&current).lu();
            if lu.is_invertible() {
                Some(lu)
            } else {
                log::debug!("amg: singular coarsest level, smoothing only");
                None
            }
        } else {
            None
        };

        log::info!(
            "amg: {} levels, coarsest {} unknowns",
            levels.len() + 1,
            current.rows()
        );

        Self {
            levels,
            coarsest: current,
            coarse_lu,
            pre_smooth: settings.pre_smooth,
            post_smooth: settings.post_smooth,
        }
    }

    /// Number of levels including the coarsest.
    pub fn num_levels(&self) -> usize {
        self.levels.len() + 1
    }

    fn vcycle(&self, level: usize, b: &[f64], x: &mut [f64]) {
        let Some(lvl) = self.levels.get(level) else {
            self.coarse_solve(b, x);
            return;
        };

        x.fill(0.0);
        for _ in 0..self.pre_smooth {
            gauss_seidel(&lvl.a, &lvl.diag, b, x, Sweep::Forward);
        }

        // Restrict the residual
        let mut r = b.to_vec();
        spmv(&lvl.a, x, &mut r, -1.0, 1.0);
        let mut rc = vec![0.0; lvl.n_coarse];
        for (i, &agg) in lvl.aggregates.iter().enumerate() {
            rc[agg] += r[i];
        }

        let mut ec = vec![0.0; lvl.n_coarse];
        self.vcycle(level + 1, &rc, &mut ec);

        // Prolongate the correction
        for (i, &agg) in lvl.aggregates.iter().enumerate() {
            x[i] += ec[agg];
        }

        for _ in 0..self.post_smooth {
            gauss_seidel(&lvl.a, &lvl.diag, b, x, Sweep::Backward);
        }
    }

    fn coarse_solve(&self, b: &[f64], x: &mut [f64]) {
        match &self.coarse_lu {
            Some(lu) => match lu.solve(&DVector::from_column_slice(b)) {
                Some(sol) => x.copy_from_slice(sol.as_slice()),
                None => x.fill(0.0),
            },
            None => {
                let diag = diagonal_of(&self.coarsest);
                x.fill(0.0);
                gauss_seidel(&self.coarsest, &diag, b, x, Sweep::Forward);
                gauss_seidel(&self.coarsest, &diag, b, x, Sweep::Backward);
            }
        }
    }
}

impl Preconditioner for Hierarchy {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        self.vcycle(0, r, z);
    }
}

/// Solve `A x = b` with AMG-preconditioned CG.
pub fn solve_amg(a: &SparseCsc, b: &[f64], settings: &AmgSettings) -> IterativeOutcome {
    let hierarchy = Hierarchy::build(a, settings);
    pcg(
        a,
        b,
        vec![0.0; b.len()],
        Tolerance {
            rel: settings.tol,
            abs: 0.0,
            max_iter: settings.max_iter,
        },
        Some(&hierarchy as &dyn Preconditioner),
        settings.progress.as_deref(),
        "amg",
    )
}

/// Greedy aggregation. Returns the aggregate of every node and the count.
fn aggregate(a: &SparseCsc, theta: f64) -> (Vec<usize>, usize) {
    let n = a.rows();
    let diag = diagonal_of(a);

    // Strong neighbours; the matrix is symmetric so column j lists row j.
    let mut strong: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (j, col) in a.outer_iterator().enumerate() {
        for (i, &v) in col.iter() {
            if i != j && v != 0.0 && v.abs() >= theta * (diag[i] * diag[j]).abs().sqrt() {
                strong[j].push(i);
            }
        }
    }

    let mut agg: Vec<Option<usize>> = vec![None; n];
    let mut count = 0;

    // Pass 1: seed aggregates from nodes whose whole neighbourhood is free
    for i in 0..n {
        if agg[i].is_some() || strong[i].iter().any(|&j| agg[j].is_some()) {
            continue;
        }
        agg[i] = Some(count);
        for &j in &strong[i] {
            agg[j] = Some(count);
        }
        count += 1;
    }

    // Pass 2: attach leftovers to a neighbouring aggregate
    let snapshot = agg.clone();
    for i in 0..n {
        if agg[i].is_none() {
            if let Some(target) = strong[i].iter().find_map(|&j| snapshot[j]) {
                agg[i] = Some(target);
            }
        }
    }

    // Pass 3: whatever remains becomes its own aggregate with free neighbours
    for i in 0..n {
        if agg[i].is_some() {
            continue;
        }
        agg[i] = Some(count);
        for &j in &strong[i] {
            if agg[j].is_none() {
                agg[j] = Some(count);
            }
        }
        count += 1;
    }

    (agg.into_iter().map(|a| a.unwrap_or(0)).collect(), count)
}

/// `Pᵀ A P` for a piecewise-constant prolongator.
fn galerkin(a: &SparseCsc, aggregates: &[usize], n_coarse: usize) -> SparseCsc {
    let mut tri = SparseTriMat::new((n_coarse, n_coarse));
    for (&val, (row, col)) in a.iter() {
        tri.add_triplet(aggregates[row], aggregates[col], val);
    }
    tri.to_csc()
}

#[derive(Clone, Copy)]
enum Sweep {
    Forward,
    Backward,
}

/// One Gauss-Seidel sweep on a symmetric matrix (column j is row j).
fn gauss_seidel(a: &SparseCsc, diag: &[f64], b: &[f64], x: &mut [f64], sweep: Sweep) {
    let n = a.rows();
    let dmax = diag.iter().fold(0.0f64, |m, d| m.max(d.abs()));
    let tiny = dmax * 1e-12;

    let mut relax = |i: usize| {
        if diag[i].abs() <= tiny {
            return;
        }
        let mut sum = b[i];
        if let Some(row) = a.outer_view(i) {
            for (j, &v) in row.iter() {
                if j != i {
                    sum -= v * x[j];
                }
            }
        }
        x[i] = sum / diag[i];
    };

    match sweep {
        Sweep::Forward => (0..n).for_each(&mut relax),
        Sweep::Backward => (0..n).rev().for_each(&mut relax),
    }
}
