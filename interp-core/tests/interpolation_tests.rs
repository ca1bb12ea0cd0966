//! End-to-end tests for the discrete interpolator.
//!
//! These drive the full pipeline (constraints, assembly, dispatch, write-back)
//! on small structured grids where the answer is known.

use interp_core::{
    Backend, BackendRegistry, DiscreteInterpolator, ExternalSolver, GradientConstraint, Ingest,
    InterpolationWeights, LeastSquaresBatch, Rejection, ScalarField, SolveOptions, SolverKind,
    StructuredGrid, Support, UpdateStatus,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn grid(nsteps: [usize; 3]) -> StructuredGrid {
    StructuredGrid::new([0.0; 3], [1.0; 3], nsteps).expect("valid grid")
}

fn damped() -> SolveOptions {
    SolveOptions { damp: true }
}

fn field_values(interp: &DiscreteInterpolator<StructuredGrid>) -> Vec<Option<f64>> {
    interp.field().expect("field published").values().to_vec()
}

/// Line of three nodes with only pins, no smoothing.
fn pinned_line() -> DiscreteInterpolator<StructuredGrid> {
    let mut interp = DiscreteInterpolator::new(grid([3, 1, 1]));
    interp.set_interpolation_weights(InterpolationWeights {
        regularisation: 0.0,
        ..Default::default()
    });
    let pinned = interp
        .add_equality_constraints(&[0, 1, 2], &[1.0, 2.0, 3.0])
        .unwrap();
    assert_eq!(pinned, 3);
    interp
}

#[test]
fn test_pins_reproduced_by_lu_and_cg() {
    let mut lu = pinned_line();
    let mut cg = pinned_line();

    lu.solve(SolverKind::Lu, damped()).unwrap();
    cg.solve(SolverKind::from_name("cg").unwrap(), damped()).unwrap();

    let lu_field = field_values(&lu);
    let cg_field = field_values(&cg);
    for (i, expected) in [1.0, 2.0, 3.0].into_iter().enumerate() {
        let a = lu_field[i].unwrap();
        let b = cg_field[i].unwrap();
        assert!((a - expected).abs() < 1e-6, "lu node {}: {}", i, a);
        assert!((a - b).abs() < 1e-6, "lu {} vs cg {} at node {}", a, b, i);
    }
}

#[test]
fn test_kkt_system_dimensions() {
    let interp = pinned_line();

    let square = interp.build_matrix(true, false);
    let rect = interp.build_matrix(false, false);

    assert_eq!(square.dim(), 3 + 3);
    assert_eq!(square.rhs[3..], [1.0, 2.0, 3.0]);
    assert_eq!(rect.matrix.shape(), (0, 3));
}

#[test]
fn test_nan_batch_rejected() {
    let mut interp = DiscreteInterpolator::new(grid([4, 1, 1]));
    interp
        .add_least_squares_constraints(LeastSquaresBatch::new(
            1,
            2,
            vec![1.0, -1.0],
            vec![0.5],
            vec![0, 1],
        ))
        .unwrap();
    let nnz = interp.constraints().nnz();

    let ingest = interp
        .add_least_squares_constraints(LeastSquaresBatch::new(
            2,
            2,
            vec![1.0, f64::NAN, 1.0, 1.0],
            vec![0.0, 1.0],
            vec![1, 2, 2, 3],
        ))
        .unwrap();

    assert_eq!(ingest, Ingest::Rejected(Rejection::NonFinite));
    assert_eq!(interp.constraints().nnz(), nnz);
    assert_eq!(interp.constraints().rows(), 1);
}

#[test]
fn test_zero_coefficients_stripped() {
    let mut interp = DiscreteInterpolator::new(grid([4, 1, 1]));

    let ingest = interp
        .add_least_squares_constraints(LeastSquaresBatch::new(
            2,
            2,
            vec![1.0, 0.0, 0.0, 0.0],
            vec![3.0, 4.0],
            vec![0, 1, 2, 3],
        ))
        .unwrap();

    assert_eq!(ingest, Ingest::Accepted { rows: 2, entries: 1 });
    assert_eq!(interp.constraints().nnz(), 1);
    assert_eq!(interp.constraints().rhs(), &[3.0, 4.0]);
}

#[test]
fn test_stacked_batches_number_rows_contiguously() {
    let mut interp = DiscreteInterpolator::new(grid([4, 1, 1]));

    interp
        .add_least_squares_constraints(LeastSquaresBatch::stacked(
            2,
            3,
            1,
            vec![1.0; 6],
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            vec![0, 1, 2, 3, 0, 1],
        ))
        .unwrap();
    interp
        .add_least_squares_constraints(LeastSquaresBatch::new(1, 1, vec![2.0], vec![6.0], vec![2]))
        .unwrap();

    assert_eq!(interp.constraints().rows(), 7);
    assert_eq!(interp.constraints().rhs(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn test_pins_outside_region_dropped() {
    let mut interp = DiscreteInterpolator::new(grid([4, 1, 1]));
    interp.set_region(|p| p[0] >= 2.0);

    let pinned = interp.add_equality_constraints(&[0, 1, 3], &[5.0, 5.0, 5.0]).unwrap();

    assert_eq!(pinned, 1);
    assert_eq!(interp.constraints().equality_rows(), 1);
    assert_eq!(interp.constraints().equality_nnz(), 1);
}

#[test]
fn test_region_change_resets_system() {
    let mut interp = DiscreteInterpolator::new(grid([4, 1, 1]));
    interp
        .add_value_constraints(&[[0.5, 0.0, 0.0, 1.0].into()])
        .unwrap();
    assert_eq!(interp.constraints().rows(), 1);

    interp.set_region(|p| p[0] < 1.5);

    assert_eq!(interp.nx(), 2);
    assert_eq!(interp.constraints().rows(), 0);
    assert_eq!(interp.constraints().columns(), 2);
    assert_eq!(interp.build_matrix(false, false).matrix.shape(), (0, 2));
}

#[test]
fn test_region_change_drops_raw_batches() {
    let mut interp = DiscreteInterpolator::new(grid([4, 1, 1]));
    interp.set_interpolation_weights(InterpolationWeights {
        regularisation: 0.0,
        ..Default::default()
    });
    interp
        .add_least_squares_constraints(LeastSquaresBatch::new(1, 1, vec![1.0], vec![7.0], vec![0]))
        .unwrap();

    interp.set_region_mask(&[false, true, true, true]).unwrap();
    interp.add_equality_constraints(&[3], &[1.0]).unwrap();
    interp.solve(SolverKind::Lu, damped()).unwrap();

    let field = field_values(&interp);
    assert_eq!(field[0], None);
    assert!(field[1].unwrap().abs() < 1e-9, "node 1 took {:?}", field[1]);
    assert!((field[3].unwrap() - 1.0).abs() < 1e-9);
    assert_eq!(interp.constraints().rows(), 0);
}

#[test]
fn test_region_limits_written_nodes() {
    let mut interp = DiscreteInterpolator::new(grid([5, 1, 1]));
    interp.set_region_mask(&[true, true, true, false, false]).unwrap();
    interp.add_equality_constraints(&[0, 2, 4], &[0.0, 2.0, 9.0]).unwrap();
    interp
        .add_value_constraints(&[[1.0, 0.0, 0.0, 1.0].into()])
        .unwrap();

    interp.solve(SolverKind::Lu, damped()).unwrap();

    let field = field_values(&interp);
    assert_eq!(field[3], None);
    assert_eq!(field[4], None);
    assert!((field[0].unwrap()).abs() < 1e-9);
    assert!((field[1].unwrap() - 1.0).abs() < 1e-6);
    assert!((field[2].unwrap() - 2.0).abs() < 1e-9);
}

#[test]
fn test_empty_system_leaves_field_unset() {
    let mut interp = DiscreteInterpolator::new(grid([4, 4, 1]));

    interp.solve(SolverKind::default(), damped()).unwrap();

    let field = interp.field().unwrap();
    assert_eq!(field.len(), 16);
    assert!(field.is_all_unset());
    assert!(interp.is_up_to_date());
}

#[test]
fn test_update_lifecycle() {
    let mut interp = DiscreteInterpolator::new(grid([3, 1, 1]));
    interp.set_interpolation_weights(InterpolationWeights {
        regularisation: 0.0,
        ..Default::default()
    });
    interp.add_equality_constraints(&[0, 2], &[1.0, 3.0]).unwrap();

    assert_eq!(interp.update().unwrap(), UpdateStatus::NotRun);

    interp.solve(SolverKind::Lu, damped()).unwrap();
    let before = field_values(&interp);
    assert_eq!(interp.update().unwrap(), UpdateStatus::UpToDate);
    assert_eq!(field_values(&interp), before);

    // node 1 is unconstrained until the observation ties it to node 0
    interp
        .add_value_constraints(&[[0.5, 0.0, 0.0, 1.5].into()])
        .unwrap();
    assert!(!interp.is_up_to_date());
    assert_eq!(interp.update().unwrap(), UpdateStatus::Resolved);
    assert!(interp.is_up_to_date());
    let after = field_values(&interp);
    assert_ne!(after, before);
    assert!((after[1].unwrap() - 2.0).abs() < 1e-6, "node 1 is {:?}", after[1]);
    assert!(matches!(interp.last_solver(), Some(SolverKind::Lu)));
    assert_eq!(interp.update().unwrap(), UpdateStatus::UpToDate);
}

#[test]
fn test_weight_change_marks_stale() {
    let mut interp = pinned_line();
    interp.solve(SolverKind::Lu, damped()).unwrap();

    interp.set_interpolation_weights(InterpolationWeights::default());

    assert_eq!(interp.update().unwrap(), UpdateStatus::Resolved);
}

#[test]
fn test_missing_cholesky_falls_back_to_cg() {
    let build = |registry: BackendRegistry| {
        let mut interp = DiscreteInterpolator::with_registry(grid([6, 1, 1]), registry);
        interp
            .add_value_constraints(&[
                [0.5, 0.0, 0.0, 1.0].into(),
                [2.5, 0.0, 0.0, 0.0].into(),
                [4.5, 0.0, 0.0, 2.0].into(),
            ])
            .unwrap();
        interp
    };
    let mut fallback = build(BackendRegistry::detect().without(Backend::Cholesky));
    let mut cg = build(BackendRegistry::detect());

    fallback.solve(SolverKind::Cholesky, damped()).unwrap();
    cg.solve(SolverKind::default(), damped()).unwrap();

    assert_eq!(field_values(&fallback), field_values(&cg));
}

#[test]
fn test_external_solver() {
    let mut interp = pinned_line();
    let external = ExternalSolver::new(|_a, b| {
        // Lagrange rows come after the field: the pins themselves
        b[3..].to_vec()
    });

    interp.solve(SolverKind::External(external), damped()).unwrap();

    assert_eq!(field_values(&interp), vec![Some(1.0), Some(2.0), Some(3.0)]);
}

#[test]
fn test_property_name() {
    let mut interp = pinned_line();
    interp.set_property_name("stratigraphy");

    interp.solve(SolverKind::Lu, damped()).unwrap();

    assert!(interp.support().property("stratigraphy").is_some());
    assert!(interp.support().property("scalar_field").is_none());
}

#[test]
fn test_lsqr_ignores_pins() {
    let mut interp = pinned_line();
    interp
        .add_value_constraints(&[[0.5, 0.0, 0.0, 4.0].into(), [1.5, 0.0, 0.0, 4.0].into()])
        .unwrap();

    interp
        .solve(SolverKind::from_name("lsqr").unwrap(), damped())
        .unwrap();

    // The soft rows alone are consistent with a constant field of 4
    let f: Vec<f64> = field_values(&interp).into_iter().map(|v| v.unwrap()).collect();
    assert!((0.5 * (f[0] + f[1]) - 4.0).abs() < 1e-4);
    assert!((0.5 * (f[1] + f[2]) - 4.0).abs() < 1e-4);
    assert!(f[1] > 3.0, "pins should not drag the field: {:?}", f);
}

#[test]
fn test_gradient_observations_recover_plane() {
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let mut interp = DiscreteInterpolator::new(grid([5, 5, 5]));

    let gradients: Vec<GradientConstraint> = (0..20)
        .map(|_| {
            [
                rng.gen_range(0.0..4.0),
                rng.gen_range(0.0..4.0),
                rng.gen_range(0.0..4.0),
                0.0,
                0.0,
                1.0,
            ]
            .into()
        })
        .collect();
    interp.add_gradient_constraints(&gradients).unwrap();
    interp
        .add_value_constraints(&[[2.0, 2.0, 2.0, 0.0].into()])
        .unwrap();

    interp.solve(SolverKind::Lu, damped()).unwrap();

    let p = [1.3, 2.2, 2.7];
    let value = interp.evaluate_value(&[p])[0].unwrap();
    let grad = interp.evaluate_gradient(&[p])[0].unwrap();
    assert!((value - 0.7).abs() < 1e-6, "value {}", value);
    assert!(grad[0].abs() < 1e-6 && grad[1].abs() < 1e-6, "grad {:?}", grad);
    assert!((grad[2] - 1.0).abs() < 1e-6, "grad {:?}", grad);
}

#[test]
fn test_evaluate_masks_non_finite_points() {
    let mut interp = pinned_line();
    interp.solve(SolverKind::Lu, damped()).unwrap();

    let values = interp.evaluate_value(&[[0.5, 0.0, 0.0], [f64::NAN, 0.0, 0.0], [7.0, 0.0, 0.0]]);

    assert!((values[0].unwrap() - 1.5).abs() < 1e-6);
    assert_eq!(values[1], None);
    assert_eq!(values[2], None);
}

#[test]
fn test_nan_filled_view() {
    let field = ScalarField::from_values(&[1.0, f64::NAN, 3.0]);

    let raw = field.to_nan_filled();

    assert_eq!(raw[0], 1.0);
    assert!(raw[1].is_nan());
    assert_eq!(field.get(1), None);
}
