//! Solution of time increments.
mod conservation;
mod convergence;
mod damping;
mod increment;

pub use conservation::ConservationCorrector;
pub use convergence::{ConvergenceController, ConvergenceCriterion};
pub use damping::{backtrack, DampingOutcome, DampingPolicy, MIN_DAMPING_COEFFICIENT};
pub use increment::{
    solve_linear_system, IncrementContext, IncrementReport, IncrementSolver, NonFiniteSolutionError, SolvePhase,
};
