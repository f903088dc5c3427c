use fieldstep::allocators::DimAllocator;
use fieldstep::constraints::ConstraintSet;
use fieldstep::field::{EquationKind, FieldArity};
use fieldstep::integrate::integrate_scalar_field;
use fieldstep::model::{PdeModel, PointVariables};
use fieldstep::settings::{FieldSettings, LinearSolverSettings, NonlinearSolverSettings, ProblemSettings, SolverSettings};
use fieldstep::solver::{IncrementContext, IncrementReport, IncrementSolver, NonFiniteSolutionError, SolvePhase};
use fieldstep::space::{dof_index, MatrixFreeSpace, UniformLagrangeGrid};
use fieldstep::SmallDim;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{dvector, DVector, DefaultAllocator, U1, U2};

use crate::unit_tests::models::{
    cubic_reaction_solution, fixed_damping, interval, scalar_field, solver_settings, AuxiliaryFields, CubicReaction,
    ExplicitSource, HeatEquation, NanResidual, Poisson, SourceAndRelaxation,
};

fn solver_1d<M: PdeModel<f64, U1>>(
    grid: UniformLagrangeGrid<f64, U1>,
    model: M,
    settings: SolverSettings<f64>,
) -> IncrementSolver<f64, U1, UniformLagrangeGrid<f64, U1>, M> {
    IncrementSolver::new(grid, model, settings)
}

fn accurate_linear_solver() -> LinearSolverSettings<f64> {
    LinearSolverSettings {
        tolerance: 1e-12,
        ..Default::default()
    }
}

fn node_coordinates(solver: &IncrementSolver<f64, U1, UniformLagrangeGrid<f64, U1>, impl PdeModel<f64, U1>>) -> Vec<f64> {
    (0..solver.space().num_nodes())
        .map(|i| solver.space().node_position(i)[0])
        .collect()
}

fn homogeneous_ends(num_nodes: usize) -> ConstraintSet<f64> {
    ConstraintSet::new()
        .with_dirichlet(0, 0.0)
        .with_dirichlet(num_nodes - 1, 0.0)
}

#[test]
fn explicit_update_with_unit_lumped_masses() {
    let settings = solver_settings(vec![scalar_field("u", EquationKind::ExplicitTimeDependent)]);
    let model = ExplicitSource {
        fields: vec![0],
        source: 0.0,
    };
    let mut solver = solver_1d(interval(2.0, 1, 1), model, settings);
    solver
        .set_initial_condition(0, dvector![2.0, 4.0])
        .unwrap();

    let report = solver
        .solve_increment(&IncrementContext::new(1, 0.1))
        .unwrap();
    assert_eq!(report, IncrementReport::default());
    assert_matrix_eq!(solver.residual(0), dvector![2.0, 4.0], comp = abs, tol = 1e-14);
    assert_matrix_eq!(solver.solution(0).values(), dvector![2.0, 4.0], comp = abs, tol = 1e-14);
    assert!(solver.solution(0).has_current_ghosts());
}

#[test]
fn explicit_update_respects_dirichlet_values() {
    let settings = solver_settings(vec![scalar_field("u", EquationKind::ExplicitTimeDependent)]);
    let model = ExplicitSource {
        fields: vec![0],
        source: 1.0,
    };
    let grid = interval(1.0, 4, 1);
    let n = grid.num_nodes();
    let mut solver = solver_1d(grid, model, settings).with_constraints(0, ConstraintSet::new().with_dirichlet(0, -1.0));
    solver
        .solve_increment(&IncrementContext::new(1, 0.1))
        .unwrap();
    let u = solver.solution(0).values();
    assert_eq!(u[0], -1.0);
    for i in 1..n {
        assert_scalar_eq!(u[i], 1.0, comp = abs, tol = 1e-13);
    }
}

#[test]
fn conserved_field_keeps_its_integral() {
    let fields = vec![scalar_field("u", EquationKind::ExplicitTimeDependent)];
    let model = |source| ExplicitSource {
        fields: vec![0],
        source,
    };
    let initial = |x: f64| x.sin() + 2.0;

    let conserved = ProblemSettings::new(fields.clone())
        .with_time_stepping(0.1, 1)
        .with_conserved_field("u")
        .validate()
        .unwrap();
    let mut solver = solver_1d(interval(2.0, 4, 2), model(0.5), conserved);
    solver
        .interpolate_initial_condition(0, |p, _| initial(p[0]))
        .unwrap();
    let u0 = solver.solution(0).values().clone();
    let integral_before = integrate_scalar_field(solver.space(), &u0);

    solver
        .solve_increment(&IncrementContext::new(1, 0.1))
        .unwrap();
    let u1 = solver.solution(0).values();
    assert_scalar_eq!(integrate_scalar_field(solver.space(), u1), integral_before, comp = abs, tol = 1e-12);
    // The source is uniform, so the correction removes it entirely
    assert_matrix_eq!(u1, u0, comp = abs, tol = 1e-12);

    // Without conservation the source remains
    let mut unconserved = solver_1d(interval(2.0, 4, 2), model(0.5), solver_settings(fields));
    unconserved
        .interpolate_initial_condition(0, |p, _| initial(p[0]))
        .unwrap();
    unconserved
        .solve_increment(&IncrementContext::new(1, 0.1))
        .unwrap();
    let integral_after = integrate_scalar_field(unconserved.space(), unconserved.solution(0).values());
    assert_scalar_eq!(integral_after, integral_before + 1.0, comp = abs, tol = 1e-12);
}

#[test]
fn heat_equation_preserves_integral_and_constants() {
    let dt = 1e-3;
    let model = || HeatEquation { dt, diffusivity: 1.0 };
    let settings = || solver_settings(vec![scalar_field("T", EquationKind::ExplicitTimeDependent)]);

    let mut solver = solver_1d(interval(1.0, 8, 2), model(), settings());
    solver
        .interpolate_initial_condition(0, |p, _| (std::f64::consts::PI * p[0]).cos() + 2.0)
        .unwrap();
    let before = integrate_scalar_field(solver.space(), solver.solution(0).values());
    let peak_before = solver.solution(0).values()[0];
    solver
        .solve_increment(&IncrementContext::new(1, dt))
        .unwrap();
    let after = integrate_scalar_field(solver.space(), solver.solution(0).values());
    assert_scalar_eq!(after, before, comp = abs, tol = 1e-12);
    // Diffusion lowers the maximum
    assert!(solver.solution(0).values()[0] < peak_before);

    let mut constant = solver_1d(interval(1.0, 8, 2), model(), settings());
    constant
        .set_initial_condition(0, DVector::repeat(17, 3.0))
        .unwrap();
    constant
        .solve_increment(&IncrementContext::new(1, dt))
        .unwrap();
    assert_matrix_eq!(constant.solution(0).values(), DVector::repeat(17, 3.0), comp = abs, tol = 1e-12);
}

#[test]
fn poisson_on_interval_is_exact_for_quadratic_solution() {
    let settings =
        solver_settings(vec![scalar_field("p", EquationKind::TimeIndependent).with_linear_solver(accurate_linear_solver())]);
    let grid = interval(1.0, 4, 2);
    let n = grid.num_nodes();
    let mut solver =
        solver_1d(grid, Poisson { field: 0, source: 2.0 }, settings).with_constraints(0, homogeneous_ends(n));

    let report = solver
        .solve_increment(&IncrementContext::new(0, 0.0))
        .unwrap();
    assert_eq!(report.nonlinear_iterations, 1);
    assert_eq!(report.linear_solves, 1);
    assert_eq!(report.failed_linear_solves, 0);

    let expected = DVector::from_iterator(n, node_coordinates(&solver).into_iter().map(|x| x * (1.0 - x)));
    assert_matrix_eq!(solver.solution(0).values(), expected, comp = abs, tol = 1e-8);
}

#[test]
fn laplace_problem_in_square_reproduces_linear_boundary_data() {
    let settings =
        solver_settings(vec![scalar_field("p", EquationKind::TimeIndependent).with_linear_solver(accurate_linear_solver())]);
    let grid = UniformLagrangeGrid::<f64, U2>::unit_box(4, 2).unwrap();
    let n = grid.num_nodes();
    let g = |i: usize| {
        let p = grid.node_position(i);
        p.x + 2.0 * p.y
    };
    let mut constraints = ConstraintSet::new();
    for node in grid.boundary_nodes() {
        constraints.add_dirichlet(dof_index(n, node, 0), g(node));
    }
    let expected = DVector::from_fn(n, |i, _| g(i));

    let mut solver = IncrementSolver::<f64, U2, _, _>::new(grid, Poisson { field: 0, source: 0.0 }, settings)
        .with_constraints(0, constraints);
    solver.distribute_constraints();
    solver
        .solve_increment(&IncrementContext::new(0, 0.0))
        .unwrap();
    assert_matrix_eq!(solver.solution(0).values(), expected, comp = abs, tol = 1e-8);
}

#[test]
fn newton_iteration_solves_cubic_reaction() {
    let nonlinear_solver = NonlinearSolverSettings {
        tolerance: 1e-8,
        ..Default::default()
    };
    let settings = solver_settings(vec![scalar_field("u", EquationKind::TimeIndependent)
        .with_nonlinear(true)
        .with_linear_solver(accurate_linear_solver())
        .with_nonlinear_solver(nonlinear_solver)]);
    let grid = interval(1.0, 8, 2);
    let n = grid.num_nodes();
    let mut solver = solver_1d(grid, CubicReaction, settings).with_constraints(0, homogeneous_ends(n));

    let report = solver
        .solve_increment(&IncrementContext::new(0, 0.0))
        .unwrap();
    assert!(report.nonlinear_iterations >= 2);
    assert!(report.nonlinear_iterations < 10);
    assert_eq!(report.linear_solves, report.nonlinear_iterations);
    // Only the final pass, which starts at a roundoff-level residual, can exhaust the search
    assert!(report.damping_floor_hits <= 1);

    let u = solver.solution(0).values();
    for (i, x) in node_coordinates(&solver).into_iter().enumerate() {
        assert_scalar_eq!(u[i], cubic_reaction_solution(x), comp = abs, tol = 1e-3);
    }
    assert_eq!(u[0], 0.0);
    assert_eq!(u[n - 1], 0.0);
}

#[test]
fn backtracking_bottoms_out_when_residual_is_already_zero() {
    let settings = solver_settings(vec![scalar_field("u", EquationKind::TimeIndependent).with_nonlinear(true)]);
    let grid = interval(1.0, 4, 1);
    let n = grid.num_nodes();
    let mut solver = solver_1d(grid, Poisson { field: 0, source: 0.0 }, settings).with_constraints(0, homogeneous_ends(n));

    let report = solver
        .solve_increment(&IncrementContext::new(0, 0.0))
        .unwrap();
    // No trial step can decrease a zero residual, so the search ends at the minimum coefficient
    assert_eq!(report.nonlinear_iterations, 1);
    assert_eq!(report.damping_floor_hits, 1);
    assert_eq!(solver.solution(0).values(), &DVector::zeros(n));
}

fn source_and_relaxation_settings(max_nonlinear_iterations: usize) -> SolverSettings<f64> {
    ProblemSettings::new(vec![
        scalar_field("source", EquationKind::TimeIndependent).with_linear_solver(accurate_linear_solver()),
        scalar_field("relaxed", EquationKind::TimeIndependent)
            .with_nonlinear(true)
            .with_linear_solver(accurate_linear_solver())
            .with_nonlinear_solver(fixed_damping(0.5)),
    ])
    .with_max_nonlinear_iterations(max_nonlinear_iterations)
    .validate()
    .unwrap()
}

#[test]
fn converged_start_needs_a_single_pass() {
    let grid = interval(1.0, 3, 2);
    let n = grid.num_nodes();
    let mut solver = solver_1d(grid, SourceAndRelaxation { target: 1.0 }, source_and_relaxation_settings(100));
    solver
        .set_initial_condition(1, DVector::repeat(n, 1.0))
        .unwrap();

    let report = solver
        .solve_increment(&IncrementContext::new(0, 0.0))
        .unwrap();
    assert_eq!(report.nonlinear_iterations, 1);
    assert_matrix_eq!(solver.solution(0).values(), DVector::repeat(n, 1.0), comp = abs, tol = 1e-10);
    assert_matrix_eq!(solver.solution(1).values(), DVector::repeat(n, 1.0), comp = abs, tol = 1e-14);
}

#[test]
fn iteration_cap_bounds_number_of_passes() {
    let grid = interval(1.0, 3, 2);
    let n = grid.num_nodes();
    let mut solver = solver_1d(grid, SourceAndRelaxation { target: 1.0 }, source_and_relaxation_settings(3));

    let report = solver
        .solve_increment(&IncrementContext::new(0, 0.0))
        .unwrap();
    assert_eq!(report.nonlinear_iterations, 4);
    // The linear field is solved in the first pass only
    assert_eq!(report.linear_solves, 1 + 4);
    assert_matrix_eq!(solver.solution(0).values(), DVector::repeat(n, 1.0), comp = abs, tol = 1e-10);
    // Each pass halves the distance to the target
    let expected = 1.0 - 0.5f64.powi(4);
    assert_matrix_eq!(solver.solution(1).values(), DVector::repeat(n, expected), comp = abs, tol = 1e-10);
}

fn auxiliary_settings() -> SolverSettings<f64> {
    solver_settings(vec![
        scalar_field("u", EquationKind::ExplicitTimeDependent),
        scalar_field("double", EquationKind::Auxiliary),
        scalar_field("fixed_point", EquationKind::Auxiliary)
            .with_nonlinear(true)
            .with_nonlinear_solver(NonlinearSolverSettings {
                tolerance: 1e-12,
                ..Default::default()
            }),
    ])
}

#[test]
fn auxiliary_fields_follow_explicit_update() {
    let grid = interval(1.0, 2, 1);
    let n = grid.num_nodes();
    let mut solver = solver_1d(grid, AuxiliaryFields, auxiliary_settings());
    solver
        .set_initial_condition(0, DVector::repeat(n, 1.0))
        .unwrap();

    let report = solver
        .solve_increment(&IncrementContext::new(1, 0.1))
        .unwrap();
    assert_eq!(report.linear_solves, 0);
    assert!(report.nonlinear_iterations > 10);
    assert_matrix_eq!(solver.solution(0).values(), DVector::repeat(n, 2.0), comp = abs, tol = 1e-13);
    assert_matrix_eq!(solver.solution(1).values(), DVector::repeat(n, 4.0), comp = abs, tol = 1e-13);
    assert_matrix_eq!(solver.solution(2).values(), DVector::repeat(n, 1.0), comp = abs, tol = 1e-10);
}

/// Explicit `u0 <- u0 + 1`, implicit `M du1 = M`, auxiliary `u2 = 2 u0`.
struct TimeDependentPair;

impl<D> PdeModel<f64, D> for TimeDependentPair
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    fn explicit_rhs(&self, variables: &mut PointVariables<f64, D>) {
        let u0 = variables.scalar_value(0);
        variables.set_scalar_value_term(0, u0 + 1.0);
    }

    fn nonexplicit_rhs(&self, variables: &mut PointVariables<f64, D>) {
        let u0 = variables.scalar_value(0);
        variables.set_scalar_value_term(1, 1.0);
        variables.set_scalar_value_term(2, 2.0 * u0);
    }

    fn linearized_lhs(&self, variables: &mut PointVariables<f64, D>) {
        let du = variables.change_scalar_value();
        variables.set_change_scalar_value_term(du);
    }
}

fn time_dependent_pair_solver() -> IncrementSolver<f64, U1, UniformLagrangeGrid<f64, U1>, TimeDependentPair> {
    let settings = solver_settings(vec![
        scalar_field("u", EquationKind::ExplicitTimeDependent),
        scalar_field("v", EquationKind::ImplicitTimeDependent).with_linear_solver(accurate_linear_solver()),
        scalar_field("w", EquationKind::Auxiliary),
    ]);
    let mut solver = solver_1d(interval(1.0, 2, 2), TimeDependentPair, settings);
    solver
        .set_initial_condition(0, DVector::repeat(5, 1.0))
        .unwrap();
    solver
}

#[test]
fn skipping_time_dependent_fields_only_updates_the_rest() {
    let mut solver = time_dependent_pair_solver();
    let report = solver
        .solve_increment(&IncrementContext::new(0, 0.0).with_skip_time_dependent(true))
        .unwrap();
    assert_eq!(report.linear_solves, 0);
    assert_eq!(solver.solution(0).values(), &DVector::repeat(5, 1.0));
    assert_eq!(solver.solution(1).values(), &DVector::zeros(5));
    assert_matrix_eq!(solver.solution(2).values(), DVector::repeat(5, 2.0), comp = abs, tol = 1e-13);
}

#[test]
fn regular_increment_updates_all_fields() {
    let mut solver = time_dependent_pair_solver();
    let report = solver
        .solve_increment(&IncrementContext::new(1, 0.1).with_logging(false))
        .unwrap();
    assert_eq!(report.linear_solves, 1);
    assert_matrix_eq!(solver.solution(0).values(), DVector::repeat(5, 2.0), comp = abs, tol = 1e-13);
    assert_matrix_eq!(solver.solution(1).values(), DVector::repeat(5, 1.0), comp = abs, tol = 1e-10);
    assert_matrix_eq!(solver.solution(2).values(), DVector::repeat(5, 4.0), comp = abs, tol = 1e-13);
}

#[test]
fn failed_linear_solve_is_not_fatal() {
    let settings = solver_settings(vec![scalar_field("p", EquationKind::TimeIndependent).with_linear_solver(
        LinearSolverSettings {
            max_iterations: 1,
            tolerance: 1e-14,
            ..Default::default()
        },
    )]);
    let grid = interval(1.0, 8, 2);
    let n = grid.num_nodes();
    let mut solver =
        solver_1d(grid, Poisson { field: 0, source: 2.0 }, settings).with_constraints(0, homogeneous_ends(n));

    let report = solver
        .solve_increment(&IncrementContext::new(0, 0.0))
        .unwrap();
    assert_eq!(report.linear_solves, 1);
    assert_eq!(report.failed_linear_solves, 1);

    // The partial update was applied
    let u = solver.solution(0).values();
    assert!(solver.solution(0).is_finite());
    assert!(u.norm() > 0.0);
    let expected = DVector::from_iterator(n, node_coordinates(&solver).into_iter().map(|x| x * (1.0 - x)));
    assert!((u - expected).norm() > 1e-6);
}

fn nan_settings() -> SolverSettings<f64> {
    let linear_solver = LinearSolverSettings {
        max_iterations: 5,
        ..Default::default()
    };
    let field = |name: &str, kind| scalar_field(name, kind).with_linear_solver(linear_solver);
    solver_settings(vec![
        field("explicit", EquationKind::ExplicitTimeDependent),
        field("linear", EquationKind::TimeIndependent),
        field("nonlinear", EquationKind::TimeIndependent)
            .with_nonlinear(true)
            .with_nonlinear_solver(fixed_damping(0.5)),
        field("auxiliary", EquationKind::Auxiliary),
        field("nonlinear_auxiliary", EquationKind::Auxiliary).with_nonlinear(true),
    ])
}

#[test]
fn non_finite_solutions_are_fatal() {
    for target in 0..5 {
        let mut solver = solver_1d(interval(1.0, 2, 1), NanResidual { target }, nan_settings());
        let err = solver
            .solve_increment(&IncrementContext::new(1, 0.1))
            .unwrap_err();
        let err = err
            .downcast_ref::<NonFiniteSolutionError>()
            .expect("error should be a non-finite solution error");
        assert_eq!(err.field_index, target);
        assert_eq!(err.field_name, solver.fields()[target].name());
        let expected_phase = if target == 0 {
            SolvePhase::Explicit
        } else {
            SolvePhase::Nonlinear
        };
        assert_eq!(err.phase, expected_phase);
    }
}

#[test]
fn initial_guess_solves_laplace_problem_for_nonlinear_time_independent_fields() {
    let settings = solver_settings(vec![
        scalar_field("c", EquationKind::TimeIndependent)
            .with_nonlinear(true)
            .with_linear_solver(accurate_linear_solver()),
        scalar_field("p", EquationKind::TimeIndependent),
        scalar_field("w", EquationKind::ImplicitTimeDependent).with_nonlinear(true),
    ]);
    let grid = interval(1.0, 4, 2);
    let n = grid.num_nodes();
    let constraints = ConstraintSet::new()
        .with_dirichlet(0, 1.0)
        .with_dirichlet(n - 1, 0.0);
    let mut solver = solver_1d(grid, CubicReaction, settings)
        .with_constraints(0, constraints.clone())
        .with_constraints(1, ConstraintSet::new().with_dirichlet(0, 5.0))
        .with_constraints(2, constraints);
    let w0 = DVector::from_fn(n, |i, _| if i == 0 { 1.0 } else { 0.5 * i as f64 });
    solver.set_initial_condition(2, w0.clone()).unwrap();
    solver.distribute_constraints();

    solver
        .generate_initial_guess(&IncrementContext::new(0, 0.0))
        .unwrap();
    let expected = DVector::from_iterator(n, node_coordinates(&solver).into_iter().map(|x| 1.0 - x));
    assert_matrix_eq!(solver.solution(0).values(), expected, comp = abs, tol = 1e-10);

    // Linear fields keep their values
    let mut p = DVector::zeros(n);
    p[0] = 5.0;
    assert_eq!(solver.solution(1).values(), &p);

    // Time dependent fields keep their initial conditions
    let mut w = w0;
    w[n - 1] = 0.0;
    assert_eq!(solver.solution(2).values(), &w);
}

#[test]
fn initial_conditions_are_checked_and_constrained() {
    let settings = solver_settings(vec![
        scalar_field("u", EquationKind::ExplicitTimeDependent),
        FieldSettings::new("v", FieldArity::Vector, EquationKind::ExplicitTimeDependent),
    ]);
    let grid = UniformLagrangeGrid::<f64, U2>::unit_box(2, 1).unwrap();
    let n = grid.num_nodes();
    let model = ExplicitSource {
        fields: vec![0, 1],
        source: 0.0,
    };
    let mut solver = IncrementSolver::<f64, U2, _, _>::new(grid, model, settings)
        .with_constraints(1, ConstraintSet::new().with_dirichlet(dof_index(n, 4, 1), 0.0));

    assert!(solver
        .set_initial_condition(0, DVector::zeros(n + 1))
        .is_err());

    solver
        .interpolate_initial_condition(1, |p, c| if c == 0 { p.x } else { p.y + 1.0 })
        .unwrap();
    let v = solver.solution(1).values();
    assert_eq!(v.len(), 2 * n);
    for node in 0..n {
        let p = solver.space().node_position(node);
        assert_eq!(v[dof_index(n, node, 0)], p.x);
        if node != 4 {
            assert_eq!(v[dof_index(n, node, 1)], p.y + 1.0);
        }
    }
    assert_eq!(v[dof_index(n, 4, 1)], 0.0);
    assert!(solver.solution(1).has_current_ghosts());
}
