//! Sparse Cholesky backend (LDLᵀ via `sprs-ldl`).
//!
//! Normal-equation systems are symmetric positive (semi-)definite and the
//! factorization is checked for positive pivots. Bordered systems are
//! symmetric indefinite; for those the factorization runs as plain LDLᵀ and
//! only rejects zero pivots.

use sprs::{FillInReduction, SymmetryCheck};
use sprs_ldl::Ldl;

use super::sparse::SparseCsc;
use crate::error::{InterpError, InterpResult};

/// Solve a symmetric system.
///
/// With `positive_definite` set, any pivot `d_i <= 0` is reported as a
/// factorization failure.
pub fn solve_ldl(a: &SparseCsc, b: &[f64], positive_definite: bool) -> InterpResult<Vec<f64>> {
    let n = a.rows();
    if a.cols() != n || b.len() != n {
        return Err(InterpError::DimensionMismatch {
            expected: n,
            actual: if a.cols() != n { a.cols() } else { b.len() },
        });
    }
    if n == 0 {
        return Ok(Vec::new());
    }

    let ldl = Ldl::new()
        .fill_in_reduction(FillInReduction::ReverseCuthillMcKee)
        .check_symmetry(SymmetryCheck::DontCheckSymmetry)
        .numeric(a.view())?;

    for (i, &di) in ldl.d().iter().enumerate() {
        if di == 0.0 || !di.is_finite() {
            return Err(InterpError::Factorization(format!(
                "zero pivot at {} in LDLᵀ factorization",
                i
            )));
        }
        if positive_definite && di < 0.0 {
            return Err(InterpError::Factorization(format!(
                "negative pivot at {} in Cholesky factorization (not SPD)",
                i
            )));
        }
    }

    let x = ldl.solve(b);
    if x.iter().any(|v| !v.is_finite()) {
        return Err(InterpError::Factorization(
            "LDLᵀ produced a non-finite solution".into(),
        ));
    }
    Ok(x)
}
