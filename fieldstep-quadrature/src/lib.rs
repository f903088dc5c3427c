//! Quadrature rules for the reference interval `[-1, 1]`.
//!
//! Tensor-product elements build their rules from these, so only univariate rules live here.
pub mod univariate;

/// A quadrature rule on `[-1, 1]` with points in ascending order.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule1d {
    pub points: Vec<f64>,
    pub weights: Vec<f64>,
}

impl Rule1d {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Approximates `∫_{-1}^{1} f(x) dx`.
    pub fn integrate(&self, f: impl Fn(f64) -> f64) -> f64 {
        self.points.iter().zip(&self.weights).map(|(&x, &w)| w * f(x)).sum()
    }
}
