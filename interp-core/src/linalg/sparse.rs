//! Sparse matrix types and operations.
//!
//! Thin helpers over `sprs` CSC matrices, which is the storage every backend
//! consumes. Assembly goes through triplets; the kernels here are what the
//! iterative solvers need on top of that.

use nalgebra::DMatrix;
use sprs::{CsMat, TriMat};

/// Sparse matrix in CSC format.
pub type SparseCsc = CsMat<f64>;

/// Triplet format sparse matrix builder.
pub type SparseTriMat = TriMat<f64>;

/// Build a sparse CSC matrix from triplets (row, col, value).
///
/// Duplicate entries are summed.
pub fn from_triplets<I>(nrows: usize, ncols: usize, triplets: I) -> SparseCsc
where
    I: IntoIterator<Item = (usize, usize, f64)>,
{
    let mut tri = TriMat::new((nrows, ncols));
    for (i, j, v) in triplets {
        tri.add_triplet(i, j, v);
    }
    tri.to_csc()
}

/// Sparse matrix-vector product: y = alpha * A * x + beta * y
pub fn spmv(a: &SparseCsc, x: &[f64], y: &mut [f64], alpha: f64, beta: f64) {
    assert_eq!(a.cols(), x.len());
    assert_eq!(a.rows(), y.len());

    scale(y, beta);

    if alpha != 0.0 {
        for (val, (row, col)) in a.iter() {
            y[row] += alpha * (*val) * x[col];
        }
    }
}

/// Transpose-vector product: y = alpha * A^T * x + beta * y
pub fn spmv_transpose(a: &SparseCsc, x: &[f64], y: &mut [f64], alpha: f64, beta: f64) {
    assert_eq!(a.rows(), x.len());
    assert_eq!(a.cols(), y.len());

    scale(y, beta);

    if alpha != 0.0 {
        for (col_idx, col) in a.outer_iterator().enumerate() {
            let mut acc = 0.0;
            for (row_idx, &val) in col.iter() {
                acc += val * x[row_idx];
            }
            y[col_idx] += alpha * acc;
        }
    }
}

fn scale(y: &mut [f64], beta: f64) {
    if beta == 0.0 {
        y.fill(0.0);
    } else if beta != 1.0 {
        for yi in y.iter_mut() {
            *yi *= beta;
        }
    }
}

/// Diagonal of a square matrix. Missing diagonal entries read as zero.
pub fn diagonal_of(a: &SparseCsc) -> Vec<f64> {
    let n = a.rows().min(a.cols());
    let mut diag = vec![0.0; n];
    for (val, (row, col)) in a.iter() {
        if row == col {
            diag[row] += *val;
        }
    }
    diag
}

/// Dense copy of a sparse matrix.
pub fn to_dense(a: &SparseCsc) -> DMatrix<f64> {
    let mut dense = DMatrix::zeros(a.rows(), a.cols());
    for (&val, (row, col)) in a.iter() {
        dense[(row, col)] += val;
    }
    dense
}

/// Euclidean norm.
pub fn norm2(x: &[f64]) -> f64 {
    dot(x, x).sqrt()
}

/// Inner product.
pub fn dot(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

/// y += alpha * x
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}
