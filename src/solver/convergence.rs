//! Bookkeeping for the nonlinear fixed-point loop of an increment.
use log::{debug, info};

use crate::Real;

/// Criterion deciding whether the update of a nonlinear field is small enough.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ConvergenceCriterion<T> {
    /// The l2-norm of the solution change must not exceed `tolerance`.
    AbsoluteSolutionChange { tolerance: T },
}

impl<T: Real> ConvergenceCriterion<T> {
    pub fn is_satisfied(&self, change_norm: T) -> bool {
        match *self {
            Self::AbsoluteSolutionChange { tolerance } => change_norm <= tolerance,
        }
    }
}

/// Tracks the passes of the nonlinear loop and whether another pass is needed.
///
/// Every pass starts out converged. Any nonlinear field whose change violates its criterion marks
/// the pass as unconverged, unless the iteration cap has been reached, in which case the loop
/// ends regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceController {
    max_iterations: usize,
    pass: usize,
    converged: bool,
}

impl ConvergenceController {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            pass: 0,
            converged: true,
        }
    }

    pub fn begin_pass(&mut self) {
        self.converged = true;
    }

    /// Zero-based index of the current pass.
    pub fn pass_index(&self) -> usize {
        self.pass
    }

    pub fn is_first_pass(&self) -> bool {
        self.pass == 0
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }

    /// Reports the solution change of a nonlinear field. Returns whether the field met its criterion.
    pub fn report_change<T: Real>(&mut self, field_name: &str, criterion: &ConvergenceCriterion<T>, change_norm: T) -> bool {
        let satisfied = criterion.is_satisfied(change_norm);
        debug!(
            "field '{}': solution change {} in nonlinear iteration {}",
            field_name, change_norm, self.pass
        );
        if !satisfied {
            if self.pass < self.max_iterations {
                self.converged = false;
            } else {
                info!(
                    "field '{}' not converged after {} nonlinear iterations, moving on",
                    field_name, self.max_iterations
                );
            }
        }
        satisfied
    }

    /// Ends the current pass. Returns `true` if another pass is required.
    pub fn end_pass(&mut self) -> bool {
        self.pass += 1;
        !self.converged
    }

    /// Number of completed passes.
    pub fn passes(&self) -> usize {
        self.pass
    }
}
