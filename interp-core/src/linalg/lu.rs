//! Sparse LU backend.
//!
//! Uses faer's sparse LU with partial pivoting, which handles the indefinite
//! bordered systems as well as plain normal equations.

use faer::prelude::*;
use faer::sparse::{SparseColMat, Triplet};

use super::sparse::SparseCsc;
use crate::error::{InterpError, InterpResult};

/// Solve a square system with sparse LU.
pub fn solve_sparse_lu(a: &SparseCsc, b: &[f64]) -> InterpResult<Vec<f64>> {
    let n = a.rows();
    if a.cols() != n {
        return Err(InterpError::DimensionMismatch {
            expected: n,
            actual: a.cols(),
        });
    }
    if b.len() != n {
        return Err(InterpError::DimensionMismatch {
            expected: n,
            actual: b.len(),
        });
    }
    if n == 0 {
        return Ok(Vec::new());
    }

    let triplets: Vec<Triplet<usize, usize, f64>> = a
        .iter()
        .map(|(&val, (row, col))| Triplet::new(row, col, val))
        .collect();

    let a_sp = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets)
        .map_err(|e| InterpError::Factorization(format!("sparse matrix build failed: {e:?}")))?;

    let lu = a_sp
        .sp_lu()
        .map_err(|e| InterpError::Factorization(format!("sparse LU factorization failed: {e:?}")))?;

    let rhs = faer::Mat::<f64>::from_fn(n, 1, |i, _| b[i]);
    let x = lu.solve(rhs);

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let xi = x[(i, 0)];
        if !xi.is_finite() {
            return Err(InterpError::Factorization(
                "sparse LU produced a non-finite solution".into(),
            ));
        }
        out.push(xi);
    }
    Ok(out)
}
