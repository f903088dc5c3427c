//! Time stepping driver.
use log::info;
use nalgebra::DefaultAllocator;

use crate::allocators::DimAllocator;
use crate::field::{Field, SolutionVector};
use crate::model::PdeModel;
use crate::solver::{IncrementContext, IncrementSolver};
use crate::space::MatrixFreeSpace;
use crate::{Real, SmallDim};

/// Receives the solutions after every increment, e.g. to write output or checkpoints.
///
/// Solutions passed to the observer have their constraints distributed and ghost values refreshed.
pub trait IncrementObserver<T: Real> {
    fn on_increment(
        &mut self,
        context: &IncrementContext<T>,
        fields: &[Field],
        solutions: &[SolutionVector<T>],
    ) -> eyre::Result<()>;
}

impl<T, F> IncrementObserver<T> for F
where
    T: Real,
    F: FnMut(&IncrementContext<T>, &[Field], &[SolutionVector<T>]) -> eyre::Result<()>,
{
    fn on_increment(
        &mut self,
        context: &IncrementContext<T>,
        fields: &[Field],
        solutions: &[SolutionVector<T>],
    ) -> eyre::Result<()> {
        self(context, fields, solutions)
    }
}

/// An observer that does nothing.
#[derive(Debug, Copy, Clone, Default)]
pub struct NoObserver;

impl<T: Real> IncrementObserver<T> for NoObserver {
    fn on_increment(&mut self, _: &IncrementContext<T>, _: &[Field], _: &[SolutionVector<T>]) -> eyre::Result<()> {
        Ok(())
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary<T> {
    /// Number of solved increments, including the initial one.
    pub increments: usize,
    pub final_time: T,
    pub total_nonlinear_iterations: usize,
}

/// Runs a problem from its initial conditions to the final time.
pub struct Simulation<T, D, S, M>
where
    T: Real,
{
    solver: IncrementSolver<T, D, S, M>,
}

impl<T, D, S, M> Simulation<T, D, S, M>
where
    T: Real,
    D: SmallDim,
    S: MatrixFreeSpace<T, D>,
    M: PdeModel<T, D>,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn new(solver: IncrementSolver<T, D, S, M>) -> Self {
        Self { solver }
    }

    pub fn solver(&self) -> &IncrementSolver<T, D, S, M> {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut IncrementSolver<T, D, S, M> {
        &mut self.solver
    }

    pub fn into_solver(self) -> IncrementSolver<T, D, S, M> {
        self.solver
    }

    /// Solves all increments, notifying `observer` after each one.
    ///
    /// Time dependent problems first generate initial guesses and solve an initial increment in which
    /// time dependent fields are held fixed, which makes auxiliary and time-independent fields
    /// consistent with the initial conditions. They then advance `total_increments` steps of size
    /// `dt`. Time-independent problems are solved in a single increment.
    pub fn run(&mut self, observer: &mut impl IncrementObserver<T>) -> eyre::Result<RunSummary<T>> {
        let skip_print_steps = self.solver.settings().skip_print_steps();
        let context_for = |increment: usize, time: T| {
            IncrementContext::new(increment, time).with_logging(increment % skip_print_steps == 0)
        };

        let mut summary = RunSummary {
            increments: 0,
            final_time: T::zero(),
            total_nonlinear_iterations: 0,
        };

        self.solver.distribute_constraints();

        if !self.solver.settings().is_time_dependent() {
            let context = context_for(0, T::zero());
            self.solve_and_observe(&context, observer, &mut summary)?;
            return Ok(summary);
        }

        let time_settings = *self
            .solver
            .settings()
            .time()
            .ok_or_else(|| eyre::eyre!("time dependent problems need time stepping settings"))?;

        let initial = context_for(0, T::zero()).with_skip_time_dependent(true);
        self.solver.generate_initial_guess(&initial)?;
        self.solve_and_observe(&initial, observer, &mut summary)?;

        let mut time = T::zero();
        for increment in 1..=time_settings.total_increments {
            time += time_settings.dt;
            let context = context_for(increment, time);
            if context.log_this_increment {
                info!("time increment: {}, time: {}", increment, time);
            }
            self.solve_and_observe(&context, observer, &mut summary)?;
        }
        Ok(summary)
    }

    fn solve_and_observe(
        &mut self,
        context: &IncrementContext<T>,
        observer: &mut impl IncrementObserver<T>,
        summary: &mut RunSummary<T>,
    ) -> eyre::Result<()> {
        let report = self.solver.solve_increment(context)?;
        self.solver.distribute_constraints();
        observer.on_increment(context, self.solver.fields(), self.solver.solutions())?;
        summary.increments += 1;
        summary.final_time = context.time;
        summary.total_nonlinear_iterations += report.nonlinear_iterations;
        Ok(())
    }
}
