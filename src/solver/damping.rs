//! Damping of nonlinear solution updates.
use log::{debug, warn};
use nalgebra::Scalar;

use crate::Real;

/// Backtracking accepts the current coefficient once it falls below this value.
pub const MIN_DAMPING_COEFFICIENT: f64 = 1e-4;

/// How much of a Newton update `dU` is added to the solution of a nonlinear field.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DampingPolicy<T> {
    /// Starting from a coefficient of one, the coefficient is multiplied by `step_modifier` until
    /// the residual norm drops below `residual_decrease_coeff` times its value before the update.
    Backtracking { step_modifier: T, residual_decrease_coeff: T },
    /// The update is always scaled by the same coefficient.
    Fixed { coefficient: T },
}

/// Result of a backtracking search.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DampingOutcome<T: Scalar> {
    /// The accepted coefficient. The trial for this coefficient was the last one evaluated.
    pub coefficient: T,
    /// Residual norm after the accepted update.
    pub residual_norm: T,
    /// Number of trial updates evaluated.
    pub evaluations: usize,
    /// Whether the coefficient was accepted only because it fell below [`MIN_DAMPING_COEFFICIENT`].
    pub hit_floor: bool,
}

/// Backtracking search for a damping coefficient.
///
/// `trial` must apply the update scaled by the given coefficient to the state *before* the search
/// started (discarding any previous trial) and return the resulting residual norm. When this
/// function returns successfully, the state holds the update of the accepted coefficient.
pub fn backtrack<T, F>(
    step_modifier: T,
    residual_decrease_coeff: T,
    residual_old: T,
    mut trial: F,
) -> eyre::Result<DampingOutcome<T>>
where
    T: Real,
    F: FnMut(T) -> eyre::Result<T>,
{
    assert!(
        step_modifier > T::zero() && step_modifier < T::one(),
        "step modifier must lie in (0, 1)"
    );
    let min_coefficient: T = nalgebra::convert(MIN_DAMPING_COEFFICIENT);

    let mut coefficient = T::one();
    let mut evaluations = 0;
    loop {
        let residual_new = trial(coefficient)?;
        evaluations += 1;
        debug!(
            "old residual: {}, damping coefficient: {}, new residual: {}",
            residual_old, coefficient, residual_new
        );

        if residual_new < residual_old * residual_decrease_coeff {
            return Ok(DampingOutcome {
                coefficient,
                residual_norm: residual_new,
                evaluations,
                hit_floor: false,
            });
        } else if coefficient < min_coefficient {
            warn!(
                "damping coefficient {} reached the minimum without decreasing the residual",
                coefficient
            );
            return Ok(DampingOutcome {
                coefficient,
                residual_norm: residual_new,
                evaluations,
                hit_floor: true,
            });
        } else {
            coefficient *= step_modifier;
        }
    }
}
