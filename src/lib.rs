//! Matrix-free finite element time stepping for coupled field variables.
//!
//! Every field is governed by one of four kinds of equations (see [`field::EquationKind`]).
//! One time increment is solved by [`solver::IncrementSolver`]: explicit fields are updated
//! with a lumped mass matrix, after which implicit, time-independent and auxiliary fields take part in
//! a damped nonlinear fixed-point loop. Implicit fields are solved with Conjugate Gradient applied to
//! a matrix-free operator, so no global matrix is ever assembled.
//!
//! The physics enters through [`model::PdeModel`], which is evaluated pointwise at quadrature points.
//! The discretization enters through [`space::MatrixFreeSpace`].
use nalgebra::{DimMin, DimName};

pub mod allocators;
pub mod assembly;
pub mod constraints;
pub mod field;
pub mod integrate;
pub mod model;
pub mod settings;
pub mod simulation;
pub mod solver;
pub mod space;

pub mod sparse {
    pub use fieldstep_sparse::*;
}

pub mod quadrature {
    pub use fieldstep_quadrature::*;
}

pub use fieldstep_traits::Real;

pub extern crate eyre;
pub extern crate nalgebra;

/// A small, fixed-size dimension.
///
/// Used as a trait alias for various traits frequently needed by generic `fieldstep` routines.
pub trait SmallDim: DimName + DimMin<Self, Output = Self> {}

impl<D> SmallDim for D where D: DimName + DimMin<Self, Output = Self> {}
