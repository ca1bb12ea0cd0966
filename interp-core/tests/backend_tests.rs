//! Cross-checks between assembly and the solver backends on seeded random
//! systems.

use interp_core::linalg::sparse::to_dense;
use interp_core::{
    assemble, ConstraintAccumulator, DiscreteInterpolator, LeastSquaresBatch, LsqrSettings,
    Region, SolveOptions, SolverKind, StructuredGrid, SystemShape, ValueConstraint,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Random over-determined system with `rows` rows of width 3 over `nx` columns.
fn random_accumulator(rng: &mut ChaCha8Rng, rows: usize, nx: usize) -> ConstraintAccumulator {
    let mut coefficients = Vec::with_capacity(rows * 3);
    let mut columns = Vec::with_capacity(rows * 3);
    for _ in 0..rows {
        for _ in 0..3 {
            coefficients.push(rng.gen_range(-1.0..1.0));
            columns.push(rng.gen_range(0..nx));
        }
    }
    let rhs = (0..rows).map(|_| rng.gen_range(-5.0..5.0)).collect();

    let mut acc = ConstraintAccumulator::new(nx);
    acc.add_least_squares(&LeastSquaresBatch::new(rows, 3, coefficients, rhs, columns))
        .unwrap();
    acc
}

fn random_values(rng: &mut ChaCha8Rng, count: usize, extent: f64) -> Vec<ValueConstraint> {
    (0..count)
        .map(|_| ValueConstraint {
            position: [rng.gen_range(0.0..extent), rng.gen_range(0.0..extent), 0.0],
            value: rng.gen_range(0.0..1.0),
            weight: 1.0,
        })
        .collect()
}

fn solve_field(
    interp: &mut DiscreteInterpolator<StructuredGrid>,
    kind: SolverKind,
    options: SolveOptions,
) -> Vec<f64> {
    interp.solve(kind, options).unwrap();
    interp
        .field()
        .unwrap()
        .values()
        .iter()
        .map(|v| v.expect("node solved"))
        .collect()
}

fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}

#[test]
fn test_kkt_leading_block_is_normal_matrix() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut acc = random_accumulator(&mut rng, 12, 5);
    acc.add_equality(&Region::all(5), &[1, 3], &[0.5, -0.5]).unwrap();

    let rect = assemble(&acc, false, false);
    let square = assemble(&acc, true, false);

    assert_eq!(square.shape, SystemShape::Square { lagrange_rows: 2 });
    assert_eq!(square.matrix.shape(), (7, 7));

    let a = to_dense(&rect.matrix);
    let ata = a.transpose() * &a;
    let kkt = to_dense(&square.matrix);
    for i in 0..5 {
        for j in 0..5 {
            assert!(
                (kkt[(i, j)] - ata[(i, j)]).abs() < 1e-12,
                "({}, {}): {} vs {}",
                i,
                j,
                kkt[(i, j)],
                ata[(i, j)]
            );
        }
    }
    assert_eq!(kkt[(5, 1)], 1.0);
    assert_eq!(kkt[(1, 5)], 1.0);
    assert_eq!(kkt[(6, 3)], 1.0);
    assert_eq!(kkt[(6, 6)], 0.0);
    assert_eq!(&square.rhs[5..], &[0.5, -0.5]);
}

#[test]
fn test_kkt_symmetric() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let mut acc = random_accumulator(&mut rng, 20, 8);
    acc.add_equality(&Region::all(8), &[0, 7], &[1.0, 2.0]).unwrap();

    let kkt = to_dense(&assemble(&acc, true, true).matrix);

    assert_eq!(kkt.shape(), (10, 10));
    for i in 0..10 {
        for j in 0..i {
            assert!((kkt[(i, j)] - kkt[(j, i)]).abs() < 1e-14, "asymmetric at ({}, {})", i, j);
        }
    }
}

#[test]
fn test_lsqr_agrees_with_cg() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let grid = StructuredGrid::new([0.0; 3], [1.0; 3], [6, 6, 1]).unwrap();
    let mut interp = DiscreteInterpolator::new(grid);
    interp
        .add_value_constraints(&random_values(&mut rng, 40, 5.0))
        .unwrap();

    let lsqr = solve_field(
        &mut interp,
        SolverKind::Lsqr(LsqrSettings {
            atol: 1e-14,
            btol: 1e-14,
            conlim: 0.0,
            iter_lim: Some(500),
            ..Default::default()
        }),
        SolveOptions { damp: false },
    );
    let cg = solve_field(&mut interp, SolverKind::default(), SolveOptions { damp: false });

    let diff = max_abs_diff(&lsqr, &cg);
    assert!(diff < 1e-6, "lsqr and cg differ by {}", diff);
}

#[cfg(feature = "cholesky")]
#[test]
fn test_cholesky_agrees_with_lu() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let grid = StructuredGrid::new([0.0; 3], [1.0; 3], [5, 5, 1]).unwrap();
    let mut interp = DiscreteInterpolator::new(grid);
    interp
        .add_value_constraints(&random_values(&mut rng, 30, 4.0))
        .unwrap();

    let chol = solve_field(&mut interp, SolverKind::Cholesky, SolveOptions { damp: true });
    let lu = solve_field(&mut interp, SolverKind::Lu, SolveOptions { damp: true });

    let diff = max_abs_diff(&chol, &lu);
    assert!(diff < 1e-8, "cholesky and lu differ by {}", diff);
}

#[cfg(feature = "amg")]
#[test]
fn test_amg_agrees_with_lu() {
    use interp_core::AmgSettings;

    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let grid = StructuredGrid::new([0.0; 3], [1.0; 3], [12, 12, 1]).unwrap();
    let mut interp = DiscreteInterpolator::new(grid);
    interp
        .add_value_constraints(&random_values(&mut rng, 60, 11.0))
        .unwrap();

    let amg = solve_field(
        &mut interp,
        SolverKind::Amg(AmgSettings {
            tol: 1e-12,
            max_iter: 1000,
            ..Default::default()
        }),
        SolveOptions { damp: true },
    );
    let lu = solve_field(&mut interp, SolverKind::Lu, SolveOptions { damp: true });

    let diff = max_abs_diff(&amg, &lu);
    assert!(diff < 1e-6, "amg and lu differ by {}", diff);
}
