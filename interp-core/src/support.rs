//! The discretised support the field lives on.
//!
//! The interpolator only needs a handful of things from a mesh: node
//! coordinates, named per-node properties, and shape-function stencils for
//! turning point observations into rows over node values. [`Support`]
//! captures that; [`StructuredGrid`] is a regular-grid implementation with
//! trilinear shape functions.

use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{InterpError, InterpResult};

/// Per-node scalar values; `None` marks an unset node.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScalarField {
    values: Vec<Option<f64>>,
}

impl ScalarField {
    /// A field of `len` unset values.
    pub fn unset(len: usize) -> Self {
        Self {
            values: vec![None; len],
        }
    }

    /// Field from raw values. Non-finite entries become unset.
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            values: values
                .iter()
                .map(|&v| if v.is_finite() { Some(v) } else { None })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, node: usize) -> Option<f64> {
        self.values.get(node).copied().flatten()
    }

    /// Set one node. Non-finite values unset it; out-of-range nodes are ignored.
    pub fn set(&mut self, node: usize, value: f64) {
        if let Some(slot) = self.values.get_mut(node) {
            *slot = if value.is_finite() { Some(value) } else { None };
        }
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Whether no node carries a value.
    pub fn is_all_unset(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// Values with unset nodes as NaN.
    pub fn to_nan_filled(&self) -> Vec<f64> {
        self.values.iter().map(|v| v.unwrap_or(f64::NAN)).collect()
    }
}

/// Value shape functions at a point: `f(p) = Σ weights[i] · f(nodes[i])`.
#[derive(Debug, Clone, PartialEq)]
pub struct Stencil {
    pub nodes: Vec<usize>,
    pub weights: Vec<f64>,
}

/// Gradient shape functions at a point: `∇f(p) = Σ weights[i] · f(nodes[i])`.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientStencil {
    pub nodes: Vec<usize>,
    pub weights: Vec<[f64; 3]>,
}

/// A discretised support with named node properties.
pub trait Support {
    /// Total number of nodes.
    fn node_count(&self) -> usize;

    /// Node coordinates, indexed by global node id.
    fn nodes(&self) -> &[[f64; 3]];

    /// Store a named property, replacing any previous one.
    fn set_property(&mut self, name: &str, field: ScalarField);

    fn property(&self, name: &str) -> Option<&ScalarField>;

    /// Shape functions for the value at `point`, `None` outside the support.
    fn value_stencil(&self, point: &[f64; 3]) -> Option<Stencil>;

    /// Shape functions for the gradient at `point`, `None` outside the support.
    fn gradient_stencil(&self, point: &[f64; 3]) -> Option<GradientStencil>;

    /// Smoothing rows over node values, each with a zero target.
    fn regularisation_stencils(&self) -> Vec<Stencil> {
        Vec::new()
    }

    /// Evaluate a property at points. `None` where the point is outside the
    /// support or touches an unset node.
    fn evaluate_value(&self, points: &[[f64; 3]], name: &str) -> Vec<Option<f64>> {
        let Some(field) = self.property(name) else {
            return vec![None; points.len()];
        };
        points
            .iter()
            .map(|p| {
                let stencil = self.value_stencil(p)?;
                stencil
                    .nodes
                    .iter()
                    .zip(&stencil.weights)
                    .try_fold(0.0, |acc, (&node, &w)| Some(acc + w * field.get(node)?))
            })
            .collect()
    }

    /// Evaluate the gradient of a property at points.
    fn evaluate_gradient(&self, points: &[[f64; 3]], name: &str) -> Vec<Option<[f64; 3]>> {
        let Some(field) = self.property(name) else {
            return vec![None; points.len()];
        };
        points
            .iter()
            .map(|p| {
                let stencil = self.gradient_stencil(p)?;
                let mut grad = [0.0; 3];
                for (&node, w) in stencil.nodes.iter().zip(&stencil.weights) {
                    let v = field.get(node)?;
                    for axis in 0..3 {
                        grad[axis] += w[axis] * v;
                    }
                }
                Some(grad)
            })
            .collect()
    }
}

/// Coordinate tolerance, in cells, for points on the grid boundary.
const BOUNDARY_TOL: f64 = 1e-9;

/// Regular grid of `nsteps[0] × nsteps[1] × nsteps[2]` nodes.
///
/// Node `(i, j, k)` has index `i + nx * (j + ny * k)`. Axes with a single
/// node are flat: points must lie on them and they carry no gradient.
#[derive(Debug, Clone)]
pub struct StructuredGrid {
    origin: [f64; 3],
    step: [f64; 3],
    nsteps: [usize; 3],
    nodes: Vec<[f64; 3]>,
    properties: HashMap<String, ScalarField>,
}

impl StructuredGrid {
    pub fn new(origin: [f64; 3], step: [f64; 3], nsteps: [usize; 3]) -> InterpResult<Self> {
        if nsteps.iter().any(|&n| n == 0) {
            return Err(InterpError::InvalidSupport(format!(
                "grid needs at least one node per axis, got {:?}",
                nsteps
            )));
        }
        if step.iter().any(|&s| !(s.is_finite() && s > 0.0)) {
            return Err(InterpError::InvalidSupport(format!(
                "grid steps must be positive, got {:?}",
                step
            )));
        }
        if origin.iter().any(|o| !o.is_finite()) {
            return Err(InterpError::InvalidSupport(format!(
                "grid origin must be finite, got {:?}",
                origin
            )));
        }

        let [nx, ny, nz] = nsteps;
        let mut nodes = Vec::with_capacity(nx * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    nodes.push([
                        origin[0] + i as f64 * step[0],
                        origin[1] + j as f64 * step[1],
                        origin[2] + k as f64 * step[2],
                    ]);
                }
            }
        }

        Ok(Self {
            origin,
            step,
            nsteps,
            nodes,
            properties: HashMap::new(),
        })
    }

    pub fn nsteps(&self) -> [usize; 3] {
        self.nsteps
    }

    pub fn node_index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.nsteps[0] * (j + self.nsteps[1] * k)
    }

    /// Per-axis footprint of a point: `(node, weight, derivative)` pairs.
    fn footprint(&self, point: &[f64; 3]) -> Option<[Vec<(usize, f64, f64)>; 3]> {
        let mut axes: [Vec<(usize, f64, f64)>; 3] = Default::default();
        for (axis, slots) in axes.iter_mut().enumerate() {
            let n = self.nsteps[axis];
            let t = (point[axis] - self.origin[axis]) / self.step[axis];
            if !t.is_finite() || t < -BOUNDARY_TOL || t > (n - 1) as f64 + BOUNDARY_TOL {
                return None;
            }
            if n == 1 {
                slots.push((0, 1.0, 0.0));
                continue;
            }
            let cell = (t.max(0.0).floor() as usize).min(n - 2);
            let frac = t - cell as f64;
            let inv = 1.0 / self.step[axis];
            slots.push((cell, 1.0 - frac, -inv));
            slots.push((cell + 1, frac, inv));
        }
        Some(axes)
    }
}

impl Support for StructuredGrid {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn nodes(&self) -> &[[f64; 3]] {
        &self.nodes
    }

    fn set_property(&mut self, name: &str, field: ScalarField) {
        self.properties.insert(name.to_string(), field);
    }

    fn property(&self, name: &str) -> Option<&ScalarField> {
        self.properties.get(name)
    }

    fn value_stencil(&self, point: &[f64; 3]) -> Option<Stencil> {
        let [xs, ys, zs] = self.footprint(point)?;
        let mut nodes = Vec::with_capacity(8);
        let mut weights = Vec::with_capacity(8);
        for &(k, wz, _) in &zs {
            for &(j, wy, _) in &ys {
                for &(i, wx, _) in &xs {
                    nodes.push(self.node_index(i, j, k));
                    weights.push(wx * wy * wz);
                }
            }
        }
        Some(Stencil { nodes, weights })
    }

    fn gradient_stencil(&self, point: &[f64; 3]) -> Option<GradientStencil> {
        let [xs, ys, zs] = self.footprint(point)?;
        let mut nodes = Vec::with_capacity(8);
        let mut weights = Vec::with_capacity(8);
        for &(k, wz, dz) in &zs {
            for &(j, wy, dy) in &ys {
                for &(i, wx, dx) in &xs {
                    nodes.push(self.node_index(i, j, k));
                    weights.push([dx * wy * wz, wx * dy * wz, wx * wy * dz]);
                }
            }
        }
        Some(GradientStencil { nodes, weights })
    }

    /// Second differences `f[i-1] - 2 f[i] + f[i+1]` along every axis with at
    /// least three nodes.
    fn regularisation_stencils(&self) -> Vec<Stencil> {
        let [nx, ny, nz] = self.nsteps;
        let mut stencils = Vec::new();
        for axis in 0..3 {
            if self.nsteps[axis] < 3 {
                continue;
            }
            for k in 0..nz {
                for j in 0..ny {
                    for i in 0..nx {
                        let mut idx = [i, j, k];
                        if idx[axis] == 0 || idx[axis] + 1 == self.nsteps[axis] {
                            continue;
                        }
                        let centre = self.node_index(i, j, k);
                        idx[axis] -= 1;
                        let prev = self.node_index(idx[0], idx[1], idx[2]);
                        idx[axis] += 2;
                        let next = self.node_index(idx[0], idx[1], idx[2]);
                        stencils.push(Stencil {
                            nodes: vec![prev, centre, next],
                            weights: vec![1.0, -2.0, 1.0],
                        });
                    }
                }
            }
        }
        stencils
    }
}
