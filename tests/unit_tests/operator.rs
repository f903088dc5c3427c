use fieldstep::assembly::operator::{FieldOperator, OperatorMode};
use fieldstep::constraints::ConstraintSet;
use fieldstep::field::{EquationKind, Field, FieldArity, SolutionVector};
use fieldstep::space::{dof_index, MatrixFreeSpace, UniformLagrangeGrid};
use fieldstep::sparse::LinearOperator;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DVector, U1, U2};

use crate::unit_tests::models::{interval, CubicReaction, Poisson};

fn square() -> UniformLagrangeGrid<f64, U2> {
    UniformLagrangeGrid::unit_box(3, 2).unwrap()
}

#[test]
fn laplace_operator_annihilates_linear_vector_field_in_interior() {
    let grid = square();
    let n = grid.num_nodes();
    let fields = vec![Field::new(0, "v", FieldArity::Vector, EquationKind::TimeIndependent, true)];
    let solutions = vec![SolutionVector::zeros(2 * n)];
    let model = Poisson { field: 0, source: 0.0 };

    let mut constraints = ConstraintSet::new();
    constraints.add_dirichlet_nodes(&grid.boundary_nodes(), n, &[0, 1], 0.0);

    let mut x = DVector::zeros(2 * n);
    for node in 0..n {
        let p = grid.node_position(node);
        x[dof_index(n, node, 0)] = p.x;
        x[dof_index(n, node, 1)] = 2.0 * p.y - p.x;
    }

    let operator = FieldOperator::<f64, U2, _, _>::new(&grid, &model, &fields, &solutions, &constraints, 0)
        .with_mode(OperatorMode::Laplace);
    assert_eq!(operator.mode(), OperatorMode::Laplace);
    assert_eq!(operator.field().name(), "v");

    let mut y = DVector::zeros(2 * n);
    operator.apply_to_slice(y.as_mut_slice(), x.as_slice());

    for dof in 0..2 * n {
        if constraints.is_dirichlet(dof) {
            assert_eq!(y[dof], x[dof]);
        } else {
            assert_scalar_eq!(y[dof], 0.0, comp = abs, tol = 1e-12);
        }
    }
}

#[test]
fn physical_mode_matches_laplace_mode_for_poisson_model() {
    let grid = square();
    let n = grid.num_nodes();
    let fields = vec![Field::new(0, "p", FieldArity::Scalar, EquationKind::TimeIndependent, false)];
    let solutions = vec![SolutionVector::zeros(n)];
    let constraints = ConstraintSet::new();
    let model = Poisson { field: 0, source: 0.0 };
    let x = DVector::from_fn(n, |i, _| ((i * 7) % 5) as f64 - 2.0);

    let physical = FieldOperator::<f64, U2, _, _>::new(&grid, &model, &fields, &solutions, &constraints, 0);
    let laplace = FieldOperator::<f64, U2, _, _>::new(&grid, &model, &fields, &solutions, &constraints, 0)
        .with_mode(OperatorMode::Laplace);

    let mut y_physical = DVector::zeros(n);
    let mut y_laplace = DVector::zeros(n);
    physical
        .apply((&mut y_physical).into(), (&x).into())
        .unwrap();
    laplace
        .apply((&mut y_laplace).into(), (&x).into())
        .unwrap();
    assert_matrix_eq!(y_physical, y_laplace, comp = abs, tol = 1e-12);
}

#[test]
fn linearized_operator_is_symmetric() {
    let grid = interval(1.0, 5, 3);
    let n = grid.num_nodes();
    let fields = vec![Field::new(0, "u", FieldArity::Scalar, EquationKind::TimeIndependent, true)];
    let u = DVector::from_fn(n, |i, _| (i as f64 * 0.4).cos());
    let solutions = vec![SolutionVector::from_values(u)];
    let constraints = ConstraintSet::new()
        .with_dirichlet(0, 0.0)
        .with_dirichlet(n - 1, 0.0);
    let operator = FieldOperator::<f64, U1, _, _>::new(&grid, &CubicReaction, &fields, &solutions, &constraints, 0);

    let x1 = DVector::from_fn(n, |i, _| (i as f64).sin());
    let x2 = DVector::from_fn(n, |i, _| 1.0 / (1.0 + i as f64));
    // Symmetric on the subspace where constrained entries vanish
    let mut z1 = x1.clone();
    let mut z2 = x2.clone();
    constraints.zero_constrained_rows(&mut z1);
    constraints.zero_constrained_rows(&mut z2);
    let mut y1 = DVector::zeros(n);
    let mut y2 = DVector::zeros(n);
    operator.apply_to_slice(y1.as_mut_slice(), z1.as_slice());
    operator.apply_to_slice(y2.as_mut_slice(), z2.as_slice());
    assert_scalar_eq!(z2.dot(&y1), z1.dot(&y2), comp = abs, tol = 1e-12);
    assert!(z1.dot(&y1) > 0.0);
    assert!(z2.dot(&y2) > 0.0);
}

#[test]
fn operator_action_is_linear() {
    let grid = interval(2.0, 3, 2);
    let n = grid.num_nodes();
    let fields = vec![Field::new(0, "u", FieldArity::Scalar, EquationKind::TimeIndependent, true)];
    let solutions = vec![SolutionVector::from_values(DVector::repeat(n, 0.5))];
    let constraints = ConstraintSet::new();
    let operator = FieldOperator::<f64, U1, _, _>::new(&grid, &CubicReaction, &fields, &solutions, &constraints, 0);

    let x1 = DVector::from_fn(n, |i, _| i as f64);
    let x2 = DVector::from_fn(n, |i, _| (i as f64).powi(2) - 3.0);
    let apply = |x: &DVector<f64>| {
        let mut y = DVector::zeros(n);
        operator.apply_to_slice(y.as_mut_slice(), x.as_slice());
        y
    };
    let combined = apply(&(&x1 * 2.0 - &x2));
    let expected = apply(&x1) * 2.0 - apply(&x2);
    assert_matrix_eq!(combined, expected, comp = abs, tol = 1e-10);
}
