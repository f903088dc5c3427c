use std::error::Error;
use std::fmt;
use std::marker::PhantomData;
use std::time::Instant;

use eyre::ensure;
use fieldstep_sparse::{CgOutput, CgWorkspace, ConjugateGradient, LinearOperator, SolveError, StoppingCriterion};
use log::{error, info, warn};
use nalgebra::{DVector, DefaultAllocator, OPoint};

use crate::allocators::DimAllocator;
use crate::assembly::mass::{apply_lumped_update, MassLumper};
use crate::assembly::operator::{FieldOperator, OperatorMode};
use crate::assembly::residual::{evaluate_laplace_residual, evaluate_residuals, EquationSet};
use crate::constraints::ConstraintSet;
use crate::field::{EquationKind, Field, SolutionVector};
use crate::integrate::integrate_scalar_field;
use crate::model::PdeModel;
use crate::settings::{LinearSolverSettings, LinearToleranceType, SolverSettings};
use crate::solver::{backtrack, ConservationCorrector, ConvergenceController, DampingPolicy};
use crate::space::{dof_index, MatrixFreeSpace};
use crate::{Real, SmallDim};

/// Run state of a single increment.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct IncrementContext<T> {
    pub increment: usize,
    pub time: T,
    /// Leaves explicit and implicit time dependent fields untouched, as done for the initial increment.
    pub skip_time_dependent: bool,
    /// Whether per-field summaries are logged for this increment.
    pub log_this_increment: bool,
}

impl<T: Real> IncrementContext<T> {
    pub fn new(increment: usize, time: T) -> Self {
        Self {
            increment,
            time,
            skip_time_dependent: false,
            log_this_increment: true,
        }
    }

    pub fn with_skip_time_dependent(self, skip_time_dependent: bool) -> Self {
        Self {
            skip_time_dependent,
            ..self
        }
    }

    pub fn with_logging(self, log_this_increment: bool) -> Self {
        Self {
            log_this_increment,
            ..self
        }
    }
}

/// Statistics of a solved increment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncrementReport {
    /// Number of passes of the nonlinear loop, or zero if it did not run.
    pub nonlinear_iterations: usize,
    pub linear_solves: usize,
    /// Linear solves that did not converge. Their partial updates were applied regardless.
    pub failed_linear_solves: usize,
    /// Backtracking searches that ended at the minimum coefficient.
    pub damping_floor_hits: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SolvePhase {
    Explicit,
    Nonlinear,
    InitialGuess,
}

impl fmt::Display for SolvePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::Nonlinear => write!(f, "nonlinear"),
            Self::InitialGuess => write!(f, "initial guess"),
        }
    }
}

/// A solution vector contains NaN or infinite values.
///
/// This signals numerical divergence and is not recoverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonFiniteSolutionError {
    pub field_index: usize,
    pub field_name: String,
    pub phase: SolvePhase,
}

impl fmt::Display for NonFiniteSolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Solution of field '{}' (index {}) is not finite after the {} phase.",
            self.field_name, self.field_index, self.phase
        )
    }
}

impl Error for NonFiniteSolutionError {}

fn ensure_finite<T: Real>(field: &Field, solution: &SolutionVector<T>, phase: SolvePhase) -> eyre::Result<()> {
    if solution.is_finite() {
        Ok(())
    } else {
        error!(
            "field '{}' has non-finite values after the {} phase, aborting",
            field.name(),
            phase
        );
        Err(NonFiniteSolutionError {
            field_index: field.index(),
            field_name: field.name().to_string(),
            phase,
        }
        .into())
    }
}

/// Solves `A x = b` with Conjugate Gradient, starting from the given `x`.
pub fn solve_linear_system<T, A>(
    workspace: &mut CgWorkspace<T>,
    operator: A,
    b: &DVector<T>,
    x: &mut DVector<T>,
    settings: &LinearSolverSettings<T>,
) -> Result<CgOutput<T>, SolveError<T>>
where
    T: Real,
    A: LinearOperator<T>,
{
    let criterion = match settings.tolerance_type {
        LinearToleranceType::AbsoluteResidual => StoppingCriterion::AbsoluteResidual(settings.tolerance),
        LinearToleranceType::RelativeResidual => StoppingCriterion::RelativeResidual(settings.tolerance),
    };
    ConjugateGradient::new(criterion, settings.max_iterations).solve(workspace, operator, b, x)
}

/// Advances all fields of a problem by one increment.
///
/// The solver owns the solution and residual vectors of every field. Between increments, the
/// solutions are only consistent for outside readers after [`distribute_constraints`] has been
/// called.
///
/// [`distribute_constraints`]: IncrementSolver::distribute_constraints
pub struct IncrementSolver<T, D, S, M>
where
    T: Real,
{
    space: S,
    model: M,
    settings: SolverSettings<T>,
    constraints: Vec<ConstraintSet<T>>,
    solutions: Vec<SolutionVector<T>>,
    residuals: Vec<DVector<T>>,
    mass_lumper: MassLumper<T>,
    cg_workspace: CgWorkspace<T>,
    marker: PhantomData<D>,
}

impl<T, D, S, M> IncrementSolver<T, D, S, M>
where
    T: Real,
    D: SmallDim,
    S: MatrixFreeSpace<T, D>,
    M: PdeModel<T, D>,
    DefaultAllocator: DimAllocator<T, D>,
{
    /// Creates a solver with zero solutions and no constraints.
    pub fn new(space: S, model: M, settings: SolverSettings<T>) -> Self {
        let num_nodes = space.num_nodes();
        let num_fields = settings.fields().len();
        let solutions = settings
            .fields()
            .iter()
            .map(|field| SolutionVector::zeros(field.num_dofs(num_nodes, D::dim())))
            .collect();
        let residuals = settings
            .fields()
            .iter()
            .map(|field| DVector::zeros(field.num_dofs(num_nodes, D::dim())))
            .collect();
        Self {
            space,
            model,
            settings,
            constraints: vec![ConstraintSet::new(); num_fields],
            solutions,
            residuals,
            mass_lumper: MassLumper::default(),
            cg_workspace: CgWorkspace::default(),
            marker: PhantomData,
        }
    }

    pub fn with_constraints(mut self, field_index: usize, constraints: ConstraintSet<T>) -> Self {
        self.set_constraints(field_index, constraints);
        self
    }

    pub fn set_constraints(&mut self, field_index: usize, constraints: ConstraintSet<T>) {
        self.constraints[field_index] = constraints;
    }

    pub fn space(&self) -> &S {
        &self.space
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn settings(&self) -> &SolverSettings<T> {
        &self.settings
    }

    pub fn fields(&self) -> &[Field] {
        self.settings.fields()
    }

    pub fn constraints(&self, field_index: usize) -> &ConstraintSet<T> {
        &self.constraints[field_index]
    }

    pub fn solution(&self, field_index: usize) -> &SolutionVector<T> {
        &self.solutions[field_index]
    }

    pub fn solutions(&self) -> &[SolutionVector<T>] {
        &self.solutions
    }

    /// Direct access to a solution. Ghost values must be refreshed before the next solve.
    pub fn solution_mut(&mut self, field_index: usize) -> &mut SolutionVector<T> {
        &mut self.solutions[field_index]
    }

    /// The residual of a field as of its last evaluation.
    pub fn residual(&self, field_index: usize) -> &DVector<T> {
        &self.residuals[field_index]
    }

    /// Drops cached lumped masses. Must be called whenever the space changes.
    pub fn invalidate_mass(&mut self) {
        self.mass_lumper.invalidate();
    }

    /// Replaces the solution of a field, then enforces its constraints and refreshes ghost values.
    pub fn set_initial_condition(&mut self, field_index: usize, values: DVector<T>) -> eyre::Result<()> {
        let expected = self.solutions[field_index].len();
        ensure!(
            values.len() == expected,
            "initial condition of field '{}' has {} entries, expected {}",
            self.fields()[field_index].name(),
            values.len(),
            expected
        );
        let mut solution = SolutionVector::from_values(values);
        self.constraints[field_index].distribute(solution.values_mut());
        solution.update_ghost_values();
        self.solutions[field_index] = solution;
        Ok(())
    }

    /// Sets the initial condition of a field by evaluating `f(position, component)` at every node.
    pub fn interpolate_initial_condition<F>(&mut self, field_index: usize, f: F) -> eyre::Result<()>
    where
        F: Fn(&OPoint<T, D>, usize) -> T,
    {
        let num_nodes = self.space.num_nodes();
        let num_components = self.fields()[field_index]
            .arity()
            .num_components(D::dim());
        let mut values = DVector::zeros(num_nodes * num_components);
        for node in 0..num_nodes {
            let position = self.space.node_position(node);
            for c in 0..num_components {
                values[dof_index(num_nodes, node, c)] = f(&position, c);
            }
        }
        self.set_initial_condition(field_index, values)
    }

    /// Enforces all constraints on every field and refreshes ghost values.
    ///
    /// After this call the solutions may be handed to output and checkpoint consumers.
    pub fn distribute_constraints(&mut self) {
        for (solution, constraints) in self.solutions.iter_mut().zip(&self.constraints) {
            constraints.distribute(solution.values_mut());
            solution.update_ghost_values();
        }
    }

    /// Solves one increment.
    ///
    /// Explicit time dependent fields are updated first, unless skipped by the context. Then, if there
    /// are any other fields, the nonlinear loop runs until all nonlinear fields have converged or
    /// the iteration cap is reached. Reaching the cap is not an error.
    ///
    /// Returns an error wrapping [`NonFiniteSolutionError`] if any solution blows up.
    pub fn solve_increment(&mut self, context: &IncrementContext<T>) -> eyre::Result<IncrementReport> {
        let start = Instant::now();
        let mut report = IncrementReport::default();

        let fields = self.settings.fields();
        let has_explicit = fields
            .iter()
            .any(|field| field.kind() == EquationKind::ExplicitTimeDependent);
        let has_nonexplicit = fields
            .iter()
            .any(|field| field.kind() != EquationKind::ExplicitTimeDependent);

        if has_explicit && !context.skip_time_dependent {
            self.explicit_phase(context)?;
        }
        if has_nonexplicit {
            self.nonlinear_phase(context, &mut report)?;
        }

        if context.log_this_increment {
            info!(
                "increment {} (time {}) solved in {:.3?} with {} nonlinear iterations",
                context.increment,
                context.time,
                start.elapsed(),
                report.nonlinear_iterations
            );
        }
        Ok(report)
    }

    fn explicit_phase(&mut self, context: &IncrementContext<T>) -> eyre::Result<()> {
        evaluate_residuals(
            &self.space,
            &self.model,
            self.settings.fields(),
            &self.solutions,
            EquationSet::Explicit,
            &mut self.residuals,
        );

        let conserved_field = self.settings.conserved_field();
        for field in self.settings.fields() {
            if field.kind() != EquationKind::ExplicitTimeDependent {
                continue;
            }
            let i = field.index();
            let corrector = (conserved_field == Some(i))
                .then(|| ConservationCorrector::new(integrate_scalar_field(&self.space, self.solutions[i].values())));

            let inverse_mass = self
                .mass_lumper
                .inverse_mass::<D, S>(&self.space, field.arity());
            apply_lumped_update(self.solutions[i].values_mut(), &self.residuals[i], inverse_mass);

            if let Some(corrector) = corrector {
                self.constraints[i].distribute(self.solutions[i].values_mut());
                self.solutions[i].update_ghost_values();
                let integral_after = integrate_scalar_field(&self.space, self.solutions[i].values());
                corrector.correct(self.solutions[i].values_mut(), integral_after, self.space.domain_volume());
            }
            self.constraints[i].distribute_dirichlet(self.solutions[i].values_mut());
            self.solutions[i].update_ghost_values();

            if context.log_this_increment {
                info!(
                    "field '{}' [explicit solve]: current solution: {}, current residual: {}",
                    field.name(),
                    self.solutions[i].l2_norm(),
                    self.residuals[i].norm()
                );
            }
            ensure_finite(field, &self.solutions[i], SolvePhase::Explicit)?;
        }
        Ok(())
    }

    fn nonlinear_phase(&mut self, context: &IncrementContext<T>, report: &mut IncrementReport) -> eyre::Result<()> {
        let mut controller = ConvergenceController::new(self.settings.max_nonlinear_iterations());
        loop {
            controller.begin_pass();
            // All non-explicit residuals are evaluated once per pass, before any field is updated
            evaluate_residuals(
                &self.space,
                &self.model,
                self.settings.fields(),
                &self.solutions,
                EquationSet::NonExplicit,
                &mut self.residuals,
            );

            for i in 0..self.solutions.len() {
                match self.settings.fields()[i].kind() {
                    EquationKind::ImplicitTimeDependent if context.skip_time_dependent => {}
                    EquationKind::ImplicitTimeDependent | EquationKind::TimeIndependent => {
                        self.solve_implicit_field(i, context, &mut controller, report)?
                    }
                    EquationKind::Auxiliary => self.update_auxiliary_field(i, context, &mut controller),
                    EquationKind::ExplicitTimeDependent => {}
                }
                ensure_finite(&self.settings.fields()[i], &self.solutions[i], SolvePhase::Nonlinear)?;
            }

            if !controller.end_pass() {
                break;
            }
        }
        report.nonlinear_iterations = controller.passes();
        Ok(())
    }

    fn solve_implicit_field(
        &mut self,
        i: usize,
        context: &IncrementContext<T>,
        controller: &mut ConvergenceController,
        report: &mut IncrementReport,
    ) -> eyre::Result<()> {
        let field = self.settings.fields()[i].clone();
        let control = *self.settings.control(i);
        // A linear field is solved exactly once per increment
        if !field.is_nonlinear() && !controller.is_first_pass() {
            return Ok(());
        }

        self.constraints[i].zero_constrained_rows(&mut self.residuals[i]);
        let residual_norm = self.residuals[i].norm();

        let mut du = DVector::zeros(self.residuals[i].len());
        let result = {
            let operator = FieldOperator::<T, D, S, M>::new(
                &self.space,
                &self.model,
                self.settings.fields(),
                &self.solutions,
                &self.constraints[i],
                i,
            );
            solve_linear_system(
                &mut self.cg_workspace,
                operator,
                &self.residuals[i],
                &mut du,
                &control.linear_solver,
            )
        };
        report.linear_solves += 1;
        let output = match result {
            Ok(output) => output,
            Err(err) => {
                warn!(
                    "field '{}': linear solver did not converge ({}). The partial update is applied. \
                     Consider increasing the iteration limit or the tolerance.",
                    field.name(),
                    err.kind
                );
                report.failed_linear_solves += 1;
                err.output
            }
        };

        let change_norm = du.norm();
        if field.is_nonlinear() {
            match control.damping {
                DampingPolicy::Fixed { coefficient } => {
                    self.solutions[i]
                        .values_mut()
                        .axpy(coefficient, &du, T::one());
                    self.solutions[i].update_ghost_values();
                }
                DampingPolicy::Backtracking {
                    step_modifier,
                    residual_decrease_coeff,
                } => {
                    let snapshot = self.solutions[i].values().clone();
                    let (space, model, fields) = (&self.space, &self.model, self.settings.fields());
                    let constraints = &self.constraints[i];
                    let solutions = &mut self.solutions;
                    let residuals = &mut self.residuals;
                    let outcome = backtrack(step_modifier, residual_decrease_coeff, residual_norm, |coefficient| {
                        let values = solutions[i].values_mut();
                        values.copy_from(&snapshot);
                        values.axpy(coefficient, &du, T::one());
                        solutions[i].update_ghost_values();
                        evaluate_residuals(
                            space,
                            model,
                            fields,
                            solutions.as_slice(),
                            EquationSet::NonExplicit,
                            residuals.as_mut_slice(),
                        );
                        constraints.zero_constrained_rows(&mut residuals[i]);
                        Ok(residuals[i].norm())
                    })?;
                    if outcome.hit_floor {
                        report.damping_floor_hits += 1;
                    }
                }
            }
        } else {
            *self.solutions[i].values_mut() += &du;
            self.solutions[i].update_ghost_values();
        }

        if context.log_this_increment {
            info!(
                "field '{}' [implicit solve]: initial residual: {}, current residual: {}, nsteps: {}, \
                 tolerance criterion: {}, solution: {}, dU: {}",
                field.name(),
                residual_norm,
                output.residual_norm,
                output.num_iterations,
                output.threshold,
                self.solutions[i].l2_norm(),
                change_norm
            );
        }
        if field.is_nonlinear() {
            controller.report_change(field.name(), &control.criterion, change_norm);
        }
        Ok(())
    }

    fn update_auxiliary_field(&mut self, i: usize, context: &IncrementContext<T>, controller: &mut ConvergenceController) {
        let field = &self.settings.fields()[i];
        if !field.is_nonlinear() && !controller.is_first_pass() {
            return;
        }

        let previous = field
            .is_nonlinear()
            .then(|| self.solutions[i].values().clone());
        let inverse_mass = self
            .mass_lumper
            .inverse_mass::<D, S>(&self.space, field.arity());
        apply_lumped_update(self.solutions[i].values_mut(), &self.residuals[i], inverse_mass);
        self.constraints[i].distribute_dirichlet(self.solutions[i].values_mut());
        self.solutions[i].update_ghost_values();

        if context.log_this_increment {
            info!(
                "field '{}' [auxiliary solve]: current solution: {}, current residual: {}",
                field.name(),
                self.solutions[i].l2_norm(),
                self.residuals[i].norm()
            );
        }
        if let Some(previous) = previous {
            let change_norm = (self.solutions[i].values() - previous).norm();
            controller.report_change(field.name(), &self.settings.control(i).criterion, change_norm);
        }
    }

    /// Replaces the solution of every nonlinear time-independent field by the solution of the Laplace
    /// equation with the same constraints.
    ///
    /// Time-dependent fields keep their initial conditions. Solutions must already hold their
    /// constraint values.
    pub fn generate_initial_guess(&mut self, context: &IncrementContext<T>) -> eyre::Result<()> {
        for i in 0..self.solutions.len() {
            let field = self.settings.fields()[i].clone();
            if !(field.is_nonlinear() && field.kind() == EquationKind::TimeIndependent) {
                continue;
            }
            let control = *self.settings.control(i);

            evaluate_laplace_residual(&self.space, &field, &self.solutions[i], &mut self.residuals[i]);
            self.constraints[i].zero_constrained_rows(&mut self.residuals[i]);

            let mut du = DVector::zeros(self.residuals[i].len());
            let result = {
                let operator = FieldOperator::<T, D, S, M>::new(
                    &self.space,
                    &self.model,
                    self.settings.fields(),
                    &self.solutions,
                    &self.constraints[i],
                    i,
                )
                .with_mode(OperatorMode::Laplace);
                solve_linear_system(
                    &mut self.cg_workspace,
                    operator,
                    &self.residuals[i],
                    &mut du,
                    &control.linear_solver,
                )
            };
            if let Err(err) = &result {
                warn!(
                    "field '{}': initial guess solve did not converge ({})",
                    field.name(),
                    err.kind
                );
            }

            *self.solutions[i].values_mut() += &du;
            self.solutions[i].update_ghost_values();
            if context.log_this_increment {
                info!(
                    "field '{}' [initial guess]: solution: {}, dU: {}",
                    field.name(),
                    self.solutions[i].l2_norm(),
                    du.norm()
                );
            }
            ensure_finite(&field, &self.solutions[i], SolvePhase::InitialGuess)?;
        }
        Ok(())
    }
}
