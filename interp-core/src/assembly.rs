//! System assembly from accumulated constraints.
//!
//! The rectangular system is the raw least-squares matrix `A` (rows × nx)
//! with right-hand side `B`. The square system is the normal equations,
//! bordered by the equality block when pins exist:
//!
//! ```text
//! [ AᵀA   Cᵀ ] [x]   [AᵀB]
//! [ C     0  ] [y] = [ d ]
//! ```
//!
//! `x` are the field values and `y` the Lagrange multipliers enforcing the
//! pins exactly, while the soft rows are honoured in the least-squares
//! sense. Optional damping adds `ε·I` to the whole diagonal.

use crate::constraints::ConstraintAccumulator;
use crate::linalg::sparse::{SparseCsc, SparseTriMat};

/// Diagonal shift applied when damping is requested.
pub const DAMPING: f64 = f64::EPSILON;

/// Which system was assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemShape {
    /// `A` and `B` as accumulated (rows × nx)
    Rectangular,
    /// Normal equations, with `lagrange_rows` bordering rows (0 when unconstrained)
    Square {
        /// Number of equality rows appended after the `nx` field unknowns
        lagrange_rows: usize,
    },
}

/// An assembled linear system.
#[derive(Debug, Clone)]
pub struct AssembledSystem {
    /// System matrix
    pub matrix: SparseCsc,
    /// Right-hand side
    pub rhs: Vec<f64>,
    /// Field unknowns; solutions are truncated to this length
    pub nx: usize,
    /// Shape tag
    pub shape: SystemShape,
}

impl AssembledSystem {
    /// Whether the matrix is the square (normal-equations) form.
    pub fn is_square(&self) -> bool {
        matches!(self.shape, SystemShape::Square { .. })
    }

    /// Total unknowns including Lagrange multipliers.
    pub fn dim(&self) -> usize {
        self.matrix.cols()
    }
}

/// Assemble the accumulated constraints over the accumulator's columns.
pub fn assemble(acc: &ConstraintAccumulator, square: bool, damp: bool) -> AssembledSystem {
    let nx = acc.columns();
    log::info!("Interpolation matrix is {} x {}", acc.rows(), nx);

    if !square {
        if acc.equality_rows() > 0 {
            log::warn!(
                "Using rectangular matrix, {} equality constraints are not used",
                acc.equality_rows()
            );
        } else {
            log::info!("Using rectangular matrix");
        }
        return rectangular(acc, nx);
    }

    let neq = acc.equality_rows();
    let dim = nx + neq;
    let mut tri = SparseTriMat::new((dim, dim));
    let mut rhs = vec![0.0; dim];

    normal_equations(acc, &mut tri, &mut rhs[..nx]);

    if neq > 0 {
        log::info!("Equality block is {} x {}", neq, nx);
        for (row, col, val) in acc.equality_triplets() {
            tri.add_triplet(nx + row, col, val);
            tri.add_triplet(col, nx + row, val);
        }
        rhs[nx..].copy_from_slice(acc.equality_targets());
    }

    if damp {
        log::info!("Adding eps to matrix diagonal");
        for i in 0..dim {
            tri.add_triplet(i, i, DAMPING);
        }
    }

    AssembledSystem {
        matrix: tri.to_csc(),
        rhs,
        nx,
        shape: SystemShape::Square { lagrange_rows: neq },
    }
}

fn rectangular(acc: &ConstraintAccumulator, nx: usize) -> AssembledSystem {
    let mut tri = SparseTriMat::new((acc.rows(), nx));
    for (row, col, val) in acc.triplets() {
        tri.add_triplet(row, col, val);
    }
    AssembledSystem {
        matrix: tri.to_csc(),
        rhs: acc.rhs().to_vec(),
        nx,
        shape: SystemShape::Rectangular,
    }
}

/// Accumulate `AᵀA` into `tri` and `AᵀB` into `atb`.
///
/// Triplets are grouped by row; each row with entries `a_i` at columns `c_i`
/// contributes `a_i a_j` at `(c_i, c_j)`. Duplicates are summed on conversion.
fn normal_equations(acc: &ConstraintAccumulator, tri: &mut SparseTriMat, atb: &mut [f64]) {
    let b = acc.rhs();
    let mut by_row: Vec<Vec<(usize, f64)>> = vec![Vec::new(); acc.rows()];
    for (row, col, val) in acc.triplets() {
        by_row[row].push((col, val));
        atb[col] += val * b[row];
    }

    for entries in &by_row {
        for &(ci, vi) in entries {
            for &(cj, vj) in entries {
                tri.add_triplet(ci, cj, vi * vj);
            }
        }
    }
}
