use nalgebra::DVector;

use crate::Real;

/// Restores the integral of a conserved scalar field after an explicit update.
///
/// The update generally changes the integral of the field by a small amount. The corrector subtracts
/// the uniform shift `(after - before) / volume` from every coefficient, which for spaces that
/// reproduce constants restores the integral exactly.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ConservationCorrector<T> {
    integral_before: T,
}

impl<T: Real> ConservationCorrector<T> {
    /// Records the integral of the field before the update.
    pub fn new(integral_before: T) -> Self {
        Self { integral_before }
    }

    pub fn integral_before(&self) -> T {
        self.integral_before
    }

    /// The shift that `correct` subtracts.
    pub fn shift(&self, integral_after: T, domain_volume: T) -> T {
        (integral_after - self.integral_before) / domain_volume
    }

    pub fn correct(&self, values: &mut DVector<T>, integral_after: T, domain_volume: T) {
        let shift = self.shift(integral_after, domain_volume);
        values.apply(|u_i| *u_i -= shift);
    }
}
