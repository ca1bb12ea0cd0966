//! Soft and hard constraint accumulation.
//!
//! The accumulator is a builder owning two triplet stores:
//!
//! - least-squares rows `A x ≈ B`, numbered contiguously by a running row
//!   counter that only grows until [`ConstraintAccumulator::reset`]
//! - equality rows `C x = d`, one unit coefficient per pinned degree of
//!   freedom, enforced later through Lagrange multipliers
//!
//! Ingestion is best-effort. A batch carrying non-finite numbers or columns
//! outside the region is dropped as a whole with a warning, and pins on
//! nodes outside the region are skipped. Only arrays whose lengths disagree
//! with their declared shape are reported as errors.

use crate::error::{InterpError, InterpResult};
use crate::region::Region;

/// A batch of least-squares rows.
///
/// Data is row-major. A 2-D batch has shape `(rows, width)`: each row has
/// `width` coefficients and one right-hand side. A stacked batch has shape
/// `(rows, blocks, width)` and contributes `rows * blocks` rows, e.g. one per
/// gradient component of each observation.
#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquaresBatch {
    rows: usize,
    blocks: usize,
    width: usize,
    coefficients: Vec<f64>,
    rhs: Vec<f64>,
    columns: Vec<usize>,
}

impl LeastSquaresBatch {
    /// 2-D batch of shape `(rows, width)`.
    pub fn new(
        rows: usize,
        width: usize,
        coefficients: Vec<f64>,
        rhs: Vec<f64>,
        columns: Vec<usize>,
    ) -> Self {
        Self::stacked(rows, 1, width, coefficients, rhs, columns)
    }

    /// Stacked batch of shape `(rows, blocks, width)`.
    pub fn stacked(
        rows: usize,
        blocks: usize,
        width: usize,
        coefficients: Vec<f64>,
        rhs: Vec<f64>,
        columns: Vec<usize>,
    ) -> Self {
        Self {
            rows,
            blocks,
            width,
            coefficients,
            rhs,
            columns,
        }
    }

    /// Build a 2-D batch from ragged-looking input, checking every row has the
    /// same width.
    pub fn from_rows(
        coefficients: &[Vec<f64>],
        rhs: &[f64],
        columns: &[Vec<usize>],
    ) -> InterpResult<Self> {
        let rows = coefficients.len();
        let width = coefficients.first().map_or(0, Vec::len);
        if columns.len() != rows {
            return Err(InterpError::ShapeMismatch {
                what: "column rows",
                expected: rows,
                actual: columns.len(),
            });
        }
        for (coef, cols) in coefficients.iter().zip(columns) {
            if coef.len() != width {
                return Err(InterpError::ShapeMismatch {
                    what: "coefficient row width",
                    expected: width,
                    actual: coef.len(),
                });
            }
            if cols.len() != width {
                return Err(InterpError::ShapeMismatch {
                    what: "column row width",
                    expected: width,
                    actual: cols.len(),
                });
            }
        }

        Ok(Self::new(
            rows,
            width,
            coefficients.concat(),
            rhs.to_vec(),
            columns.concat(),
        ))
    }

    /// Number of least-squares rows this batch contributes.
    pub fn row_count(&self) -> usize {
        self.rows * self.blocks
    }

    /// Entries per row.
    pub fn width(&self) -> usize {
        self.width
    }

    fn check_shape(&self) -> InterpResult<()> {
        let nrows = self.row_count();
        let nentries = nrows * self.width;
        if self.coefficients.len() != nentries {
            return Err(InterpError::ShapeMismatch {
                what: "coefficients",
                expected: nentries,
                actual: self.coefficients.len(),
            });
        }
        if self.columns.len() != nentries {
            return Err(InterpError::ShapeMismatch {
                what: "column indices",
                expected: nentries,
                actual: self.columns.len(),
            });
        }
        if self.rhs.len() != nrows {
            return Err(InterpError::ShapeMismatch {
                what: "right-hand side",
                expected: nrows,
                actual: self.rhs.len(),
            });
        }
        Ok(())
    }
}

/// Why a batch was dropped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// A coefficient or right-hand side is NaN or infinite
    NonFinite,
    /// A column index lies outside the region
    ColumnOutOfRange {
        /// Offending column
        column: usize,
        /// Number of columns (`nx`)
        ncols: usize,
    },
}

/// Outcome of ingesting a least-squares batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ingest {
    /// Batch stored.
    Accepted {
        /// Rows added to the system
        rows: usize,
        /// Nonzero entries stored
        entries: usize,
    },
    /// Batch dropped; storage unchanged.
    Rejected(Rejection),
}

/// Builder for the sparse constraint system.
#[derive(Debug, Clone, Default)]
pub struct ConstraintAccumulator {
    /// Number of columns (degrees of freedom in the region)
    ncols: usize,

    // Least-squares triplets
    rows: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<f64>,
    rhs: Vec<f64>,
    row_count: usize,

    // Equality triplets
    eq_rows: Vec<usize>,
    eq_cols: Vec<usize>,
    eq_vals: Vec<f64>,
    eq_targets: Vec<f64>,
    eq_count: usize,
}

impl ConstraintAccumulator {
    /// Create an empty accumulator for `ncols` degrees of freedom.
    pub fn new(ncols: usize) -> Self {
        Self {
            ncols,
            ..Default::default()
        }
    }

    /// Update the column count after a region change.
    ///
    /// Stored rows are left alone; callers reset before re-populating.
    pub fn set_columns(&mut self, ncols: usize) {
        self.ncols = ncols;
    }

    /// Number of columns rows are validated against.
    pub fn columns(&self) -> usize {
        self.ncols
    }

    /// Clear both triplet stores and counters.
    pub fn reset(&mut self) {
        log::debug!("Resetting interpolation constraints");
        self.rows.clear();
        self.cols.clear();
        self.vals.clear();
        self.rhs.clear();
        self.row_count = 0;
        self.eq_rows.clear();
        self.eq_cols.clear();
        self.eq_vals.clear();
        self.eq_targets.clear();
        self.eq_count = 0;
    }

    /// Add a batch of least-squares rows.
    ///
    /// Rows are numbered from the running counter. Entries whose coefficient is
    /// exactly zero are not stored, but their row and right-hand side are.
    pub fn add_least_squares(&mut self, batch: &LeastSquaresBatch) -> InterpResult<Ingest> {
        batch.check_shape()?;

        if batch.coefficients.iter().any(|v| !v.is_finite())
            || batch.rhs.iter().any(|v| !v.is_finite())
        {
            log::warn!("Constraints contain NaN or infinite values, not adding constraints");
            return Ok(Ingest::Rejected(Rejection::NonFinite));
        }
        if let Some(&column) = batch.columns.iter().find(|&&c| c >= self.ncols) {
            log::warn!(
                "Constraint column {} outside region of {} nodes, not adding constraints",
                column,
                self.ncols
            );
            return Ok(Ingest::Rejected(Rejection::ColumnOutOfRange {
                column,
                ncols: self.ncols,
            }));
        }

        let nrows = batch.row_count();
        let width = batch.width;
        let mut entries = 0;
        for local_row in 0..nrows {
            let row = self.row_count + local_row;
            let start = local_row * width;
            let coefs = &batch.coefficients[start..start + width];
            let cols = &batch.columns[start..start + width];
            for (&value, &col) in coefs.iter().zip(cols) {
                if value == 0.0 {
                    continue;
                }
                self.rows.push(row);
                self.cols.push(col);
                self.vals.push(value);
                entries += 1;
            }
        }
        self.rhs.extend_from_slice(&batch.rhs);
        self.row_count += nrows;

        Ok(Ingest::Accepted {
            rows: nrows,
            entries,
        })
    }

    /// Pin nodes to fixed values.
    ///
    /// `nodes` are global support indices; they are mapped through `region`
    /// and those outside it are skipped. Returns the number of pins stored.
    pub fn add_equality(
        &mut self,
        region: &Region,
        nodes: &[usize],
        values: &[f64],
    ) -> InterpResult<usize> {
        if nodes.len() != values.len() {
            return Err(InterpError::ShapeMismatch {
                what: "equality values",
                expected: nodes.len(),
                actual: values.len(),
            });
        }
        if region.nx() != self.ncols {
            return Err(InterpError::DimensionMismatch {
                expected: self.ncols,
                actual: region.nx(),
            });
        }

        let mut added = 0;
        for (&node, &value) in nodes.iter().zip(values) {
            let Some(col) = region.local(node) else {
                log::debug!("Equality constraint on node {} outside region, skipping", node);
                continue;
            };
            if !value.is_finite() {
                log::warn!("Equality constraint on node {} has a non-finite value, skipping", node);
                continue;
            }
            self.eq_rows.push(self.eq_count + added);
            self.eq_cols.push(col);
            self.eq_vals.push(1.0);
            self.eq_targets.push(value);
            added += 1;
        }
        self.eq_count += added;

        Ok(added)
    }

    /// Number of least-squares rows.
    pub fn rows(&self) -> usize {
        self.row_count
    }

    /// Number of equality rows.
    pub fn equality_rows(&self) -> usize {
        self.eq_count
    }

    /// Stored least-squares nonzeros.
    pub fn nnz(&self) -> usize {
        self.vals.len()
    }

    /// Stored equality nonzeros.
    pub fn equality_nnz(&self) -> usize {
        self.eq_vals.len()
    }

    /// True when neither store holds any row.
    pub fn is_empty(&self) -> bool {
        self.row_count == 0 && self.eq_count == 0
    }

    /// Least-squares right-hand side, one value per row.
    pub fn rhs(&self) -> &[f64] {
        &self.rhs
    }

    pub(crate) fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.rows
            .iter()
            .zip(&self.cols)
            .zip(&self.vals)
            .map(|((&r, &c), &v)| (r, c, v))
    }

    pub(crate) fn equality_triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.eq_rows
            .iter()
            .zip(&self.eq_cols)
            .zip(&self.eq_vals)
            .map(|((&r, &c), &v)| (r, c, v))
    }

    pub(crate) fn equality_targets(&self) -> &[f64] {
        &self.eq_targets
    }
}
