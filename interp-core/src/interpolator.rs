//! Discrete interpolator: the controller tying region, constraints,
//! assembly and solvers to a support.
//!
//! Observations and raw constraint batches are stored as given. Every solve
//! starts from [`DiscreteInterpolator::setup`], which clears the accumulator
//! and lowers everything stored through the current region and weights, so
//! changes to either always reach the next solve. Raw batches are in region
//! columns and are dropped when the region changes. The solved field is
//! published on the support under the property name.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::assembly::{assemble, AssembledSystem};
use crate::constraints::{ConstraintAccumulator, Ingest, LeastSquaresBatch};
use crate::error::{InterpError, InterpResult};
use crate::region::Region;
use crate::solver::{BackendRegistry, Dispatcher, SolveOptions, SolverKind};
use crate::support::{ScalarField, Stencil, Support};

/// Property name used until [`DiscreteInterpolator::set_property_name`].
pub const DEFAULT_PROPERTY_NAME: &str = "scalar_field";

/// Relative weights of the constraint families.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InterpolationWeights {
    /// Value observations
    pub value: f64,
    /// Gradient observations
    pub gradient: f64,
    /// Support smoothing rows
    pub regularisation: f64,
}

impl Default for InterpolationWeights {
    fn default() -> Self {
        Self {
            value: 1.0,
            gradient: 1.0,
            regularisation: 0.1,
        }
    }
}

/// Observed field value at a point.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ValueConstraint {
    pub position: [f64; 3],
    pub value: f64,
    pub weight: f64,
}

impl From<[f64; 4]> for ValueConstraint {
    /// `(x, y, z, value)` with unit weight.
    fn from(row: [f64; 4]) -> Self {
        Self {
            position: [row[0], row[1], row[2]],
            value: row[3],
            weight: 1.0,
        }
    }
}

/// Observed field gradient at a point.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GradientConstraint {
    pub position: [f64; 3],
    pub vector: [f64; 3],
    pub weight: f64,
}

impl From<[f64; 6]> for GradientConstraint {
    /// `(x, y, z, vx, vy, vz)` with unit weight.
    fn from(row: [f64; 6]) -> Self {
        Self {
            position: [row[0], row[1], row[2]],
            vector: [row[3], row[4], row[5]],
            weight: 1.0,
        }
    }
}

/// Outcome of [`DiscreteInterpolator::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// No solver was ever selected; nothing to re-run
    NotRun,
    /// Field already reflects the current constraints
    UpToDate,
    /// Field was re-solved with the previous solver
    Resolved,
}

/// Least-squares scalar-field interpolator over a support.
#[derive(Debug)]
pub struct DiscreteInterpolator<S: Support> {
    support: S,
    region: Region,
    accumulator: ConstraintAccumulator,
    dispatcher: Dispatcher,
    property_name: String,
    weights: InterpolationWeights,

    values: Vec<ValueConstraint>,
    gradients: Vec<GradientConstraint>,
    batches: Vec<LeastSquaresBatch>,
    pin_nodes: Vec<usize>,
    pin_values: Vec<f64>,

    last_solve: Option<(SolverKind, SolveOptions)>,
    up_to_date: bool,
}

impl<S: Support> DiscreteInterpolator<S> {
    /// Interpolator over every node of `support`, with the backends compiled
    /// into this build.
    pub fn new(support: S) -> Self {
        Self::with_registry(support, BackendRegistry::detect())
    }

    pub fn with_registry(support: S, registry: BackendRegistry) -> Self {
        let region = Region::all(support.node_count());
        let accumulator = ConstraintAccumulator::new(region.nx());
        Self {
            support,
            region,
            accumulator,
            dispatcher: Dispatcher::new(registry),
            property_name: DEFAULT_PROPERTY_NAME.to_string(),
            weights: InterpolationWeights::default(),
            values: Vec::new(),
            gradients: Vec::new(),
            batches: Vec::new(),
            pin_nodes: Vec::new(),
            pin_values: Vec::new(),
            last_solve: None,
            up_to_date: false,
        }
    }

    pub fn support(&self) -> &S {
        &self.support
    }

    pub fn into_support(self) -> S {
        self.support
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Degrees of freedom in the current region.
    pub fn nx(&self) -> usize {
        self.region.nx()
    }

    /// Constraints as currently accumulated.
    pub fn constraints(&self) -> &ConstraintAccumulator {
        &self.accumulator
    }

    pub fn property_name(&self) -> &str {
        &self.property_name
    }

    pub fn weights(&self) -> InterpolationWeights {
        self.weights
    }

    pub fn is_up_to_date(&self) -> bool {
        self.up_to_date
    }

    /// Solver and options of the last solve, replayed by [`Self::update`].
    pub fn last_solver(&self) -> Option<&SolverKind> {
        self.last_solve.as_ref().map(|(kind, _)| kind)
    }

    /// Name under which the solved field is stored on the support.
    pub fn set_property_name(&mut self, name: impl Into<String>) {
        self.property_name = name.into();
        self.up_to_date = false;
    }

    pub fn set_interpolation_weights(&mut self, weights: InterpolationWeights) {
        self.weights = weights;
        self.up_to_date = false;
    }

    /// Restrict the solve to nodes where `predicate` holds.
    pub fn set_region<F>(&mut self, predicate: F)
    where
        F: Fn(&[f64; 3]) -> bool,
    {
        let region = Region::from_predicate(self.support.nodes(), predicate);
        self.replace_region(region);
    }

    /// Restrict the solve to the selected nodes.
    pub fn set_region_mask(&mut self, mask: &[bool]) -> InterpResult<()> {
        if mask.len() != self.support.node_count() {
            return Err(InterpError::ShapeMismatch {
                what: "region mask",
                expected: self.support.node_count(),
                actual: mask.len(),
            });
        }
        self.replace_region(Region::from_mask(mask));
        Ok(())
    }

    /// Back to every node.
    pub fn clear_region(&mut self) {
        self.replace_region(Region::all(self.support.node_count()));
    }

    fn replace_region(&mut self, region: Region) {
        log::debug!("Region has {} of {} nodes", region.nx(), region.len_global());
        if !self.batches.is_empty() {
            log::warn!(
                "Region changed, dropping {} least-squares batches given in region columns",
                self.batches.len()
            );
            self.batches.clear();
        }
        self.region = region;
        self.accumulator.reset();
        self.accumulator.set_columns(self.region.nx());
        self.up_to_date = false;
    }

    /// Drop every stored constraint.
    pub fn reset(&mut self) {
        self.values.clear();
        self.gradients.clear();
        self.batches.clear();
        self.pin_nodes.clear();
        self.pin_values.clear();
        self.accumulator.reset();
        self.up_to_date = false;
    }

    /// Add least-squares rows in region-local columns.
    ///
    /// Rejected batches are not stored. Accepted ones are replayed on every
    /// setup until the region changes, which drops them.
    pub fn add_least_squares_constraints(&mut self, batch: LeastSquaresBatch) -> InterpResult<Ingest> {
        let ingest = self.accumulator.add_least_squares(&batch)?;
        if let Ingest::Accepted { .. } = ingest {
            self.batches.push(batch);
            self.up_to_date = false;
        }
        Ok(ingest)
    }

    /// Pin global nodes to values. Returns the pins inside the current region.
    ///
    /// All pins are kept and re-applied through the region on every setup.
    pub fn add_equality_constraints(&mut self, nodes: &[usize], values: &[f64]) -> InterpResult<usize> {
        let added = self.accumulator.add_equality(&self.region, nodes, values)?;
        self.pin_nodes.extend_from_slice(nodes);
        self.pin_values.extend_from_slice(values);
        self.up_to_date = false;
        Ok(added)
    }

    /// Add value observations. Returns the rows added.
    pub fn add_value_constraints(&mut self, constraints: &[ValueConstraint]) -> InterpResult<usize> {
        self.values.extend_from_slice(constraints);
        self.up_to_date = false;
        let batches = lower_values(&self.support, &self.region, self.weights.value, constraints);
        ingest_all(&mut self.accumulator, &batches)
    }

    /// Add gradient observations. Returns the rows added (three per observation).
    pub fn add_gradient_constraints(&mut self, constraints: &[GradientConstraint]) -> InterpResult<usize> {
        self.gradients.extend_from_slice(constraints);
        self.up_to_date = false;
        let batches = lower_gradients(&self.support, &self.region, self.weights.gradient, constraints);
        ingest_all(&mut self.accumulator, &batches)
    }

    /// Rebuild the accumulator from stored constraints for the current
    /// region and weights.
    pub fn setup(&mut self) -> InterpResult<()> {
        self.accumulator.reset();
        self.accumulator.set_columns(self.region.nx());

        let mut batches = Vec::new();
        if self.weights.regularisation > 0.0 {
            batches.extend(lower_stencils(
                &self.region,
                self.weights.regularisation,
                self.support.regularisation_stencils(),
            ));
        }
        batches.extend(lower_gradients(
            &self.support,
            &self.region,
            self.weights.gradient,
            &self.gradients,
        ));
        batches.extend(lower_values(
            &self.support,
            &self.region,
            self.weights.value,
            &self.values,
        ));
        ingest_all(&mut self.accumulator, &batches)?;
        ingest_all(&mut self.accumulator, &self.batches)?;

        let pinned = self
            .accumulator
            .add_equality(&self.region, &self.pin_nodes, &self.pin_values)?;

        log::debug!(
            "Setup: {} least-squares rows, {} equality rows ({} pins skipped)",
            self.accumulator.rows(),
            pinned,
            self.pin_nodes.len() - pinned
        );
        Ok(())
    }

    /// Assemble the accumulated constraints.
    pub fn build_matrix(&self, square: bool, damp: bool) -> AssembledSystem {
        assemble(&self.accumulator, square, damp)
    }

    /// Solve for the field and publish it on the support.
    pub fn solve(&mut self, kind: SolverKind, options: SolveOptions) -> InterpResult<()> {
        self.last_solve = Some((kind.clone(), options));
        self.setup()?;

        let mut field = ScalarField::unset(self.support.node_count());
        let resolved = self.dispatcher.resolve(&kind);

        // Smoothing rows alone only admit the zero field
        if self.accumulator.is_empty() || !self.has_data() {
            log::warn!("No constraints, solver not run");
        } else {
            let system = self.build_matrix(resolved.requires_square(), options.damp);
            let x = self.dispatcher.solve(&resolved, &system)?;
            for (local, value) in x.into_iter().enumerate() {
                if let Some(global) = self.region.global(local) {
                    field.set(global, value);
                }
            }
        }

        self.check_solution(&field);
        self.support.set_property(&self.property_name, field);
        self.up_to_date = true;
        Ok(())
    }

    fn has_data(&self) -> bool {
        !(self.values.is_empty()
            && self.gradients.is_empty()
            && self.batches.is_empty()
            && self.pin_nodes.is_empty())
    }

    fn check_solution(&self, field: &ScalarField) {
        let in_region = || self.region.active().iter().map(|&g| field.get(g));
        if in_region().all(|v| v.is_none()) {
            log::warn!("Solver not run, no scalar field");
        } else if in_region().all(|v| v == Some(0.0)) {
            log::warn!("No solution, scalar field 0. Add more data.");
        }
    }

    /// Re-solve with the previous solver if anything changed since.
    pub fn update(&mut self) -> InterpResult<UpdateStatus> {
        let Some((kind, options)) = self.last_solve.clone() else {
            log::debug!("Cannot rerun interpolator");
            return Ok(UpdateStatus::NotRun);
        };
        if self.up_to_date {
            return Ok(UpdateStatus::UpToDate);
        }
        self.solve(kind, options)?;
        Ok(UpdateStatus::Resolved)
    }

    /// The published field, if a solve has run.
    pub fn field(&self) -> Option<&ScalarField> {
        self.support.property(&self.property_name)
    }

    /// Field value at points. `None` for non-finite points, points outside
    /// the support, or before any solve.
    pub fn evaluate_value(&self, points: &[[f64; 3]]) -> Vec<Option<f64>> {
        let (finite, index) = finite_points(points);
        let mut out = vec![None; points.len()];
        if finite.is_empty() {
            return out;
        }
        let values = self.support.evaluate_value(&finite, &self.property_name);
        for (i, v) in index.into_iter().zip(values) {
            out[i] = v;
        }
        out
    }

    /// Field gradient at points, with the same conventions as
    /// [`Self::evaluate_value`].
    pub fn evaluate_gradient(&self, points: &[[f64; 3]]) -> Vec<Option<[f64; 3]>> {
        let (finite, index) = finite_points(points);
        let mut out = vec![None; points.len()];
        if finite.is_empty() {
            return out;
        }
        let grads = self.support.evaluate_gradient(&finite, &self.property_name);
        for (i, g) in index.into_iter().zip(grads) {
            out[i] = g;
        }
        out
    }
}

fn finite_points(points: &[[f64; 3]]) -> (Vec<[f64; 3]>, Vec<usize>) {
    points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.iter().all(|c| c.is_finite()))
        .map(|(i, p)| (*p, i))
        .unzip()
}

fn ingest_all(acc: &mut ConstraintAccumulator, batches: &[LeastSquaresBatch]) -> InterpResult<usize> {
    let mut rows = 0;
    for batch in batches {
        if let Ingest::Accepted { rows: added, .. } = acc.add_least_squares(batch)? {
            rows += added;
        }
    }
    Ok(rows)
}

/// Rows of equal width, collected before becoming a batch.
#[derive(Default)]
struct RowBuffer {
    rows: usize,
    coefficients: Vec<f64>,
    rhs: Vec<f64>,
    columns: Vec<usize>,
}

fn into_batches(buffers: BTreeMap<usize, RowBuffer>, blocks: usize) -> Vec<LeastSquaresBatch> {
    buffers
        .into_iter()
        .map(|(width, buf)| {
            LeastSquaresBatch::stacked(buf.rows, blocks, width, buf.coefficients, buf.rhs, buf.columns)
        })
        .collect()
}

/// Region-local columns of a stencil, `None` if any node is outside.
fn local_columns(region: &Region, nodes: &[usize]) -> Option<Vec<usize>> {
    nodes.iter().map(|&n| region.local(n)).collect()
}

fn lower_values<S: Support>(
    support: &S,
    region: &Region,
    weight: f64,
    constraints: &[ValueConstraint],
) -> Vec<LeastSquaresBatch> {
    if weight == 0.0 || constraints.is_empty() {
        return Vec::new();
    }
    let mut buffers: BTreeMap<usize, RowBuffer> = BTreeMap::new();
    let mut skipped = 0;
    for c in constraints {
        let w = weight * c.weight;
        if !(w.is_finite() && c.value.is_finite()) {
            log::warn!("Value constraint at {:?} is not finite, skipping", c.position);
            skipped += 1;
            continue;
        }
        let Some(stencil) = support.value_stencil(&c.position) else {
            skipped += 1;
            continue;
        };
        let Some(columns) = local_columns(region, &stencil.nodes) else {
            skipped += 1;
            continue;
        };
        let buf = buffers.entry(columns.len()).or_default();
        buf.rows += 1;
        buf.coefficients.extend(stencil.weights.iter().map(|v| v * w));
        buf.rhs.push(c.value * w);
        buf.columns.extend(columns);
    }
    if skipped > 0 {
        log::debug!("{} value constraints outside the support or region", skipped);
    }
    into_batches(buffers, 1)
}

fn lower_gradients<S: Support>(
    support: &S,
    region: &Region,
    weight: f64,
    constraints: &[GradientConstraint],
) -> Vec<LeastSquaresBatch> {
    if weight == 0.0 || constraints.is_empty() {
        return Vec::new();
    }
    let mut buffers: BTreeMap<usize, RowBuffer> = BTreeMap::new();
    let mut skipped = 0;
    for c in constraints {
        let w = weight * c.weight;
        if !(w.is_finite() && c.vector.iter().all(|v| v.is_finite())) {
            log::warn!("Gradient constraint at {:?} is not finite, skipping", c.position);
            skipped += 1;
            continue;
        }
        let Some(stencil) = support.gradient_stencil(&c.position) else {
            skipped += 1;
            continue;
        };
        let Some(columns) = local_columns(region, &stencil.nodes) else {
            skipped += 1;
            continue;
        };
        let buf = buffers.entry(columns.len()).or_default();
        buf.rows += 1;
        for axis in 0..3 {
            buf.coefficients.extend(stencil.weights.iter().map(|g| g[axis] * w));
            buf.rhs.push(c.vector[axis] * w);
            buf.columns.extend_from_slice(&columns);
        }
    }
    if skipped > 0 {
        log::debug!("{} gradient constraints outside the support or region", skipped);
    }
    into_batches(buffers, 3)
}

fn lower_stencils(region: &Region, weight: f64, stencils: Vec<Stencil>) -> Vec<LeastSquaresBatch> {
    let mut buffers: BTreeMap<usize, RowBuffer> = BTreeMap::new();
    for stencil in stencils {
        let Some(columns) = local_columns(region, &stencil.nodes) else {
            continue;
        };
        let buf = buffers.entry(columns.len()).or_default();
        buf.rows += 1;
        buf.coefficients.extend(stencil.weights.iter().map(|v| v * weight));
        buf.rhs.push(0.0);
        buf.columns.extend(columns);
    }
    into_batches(buffers, 1)
}
