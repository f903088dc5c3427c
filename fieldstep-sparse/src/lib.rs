//! Linear operators and iterative solvers.
//!
//! Operators are only ever *applied*: the solvers in this crate never look at matrix entries,
//! which makes them usable with matrix-free finite element operators.
pub mod cg;

pub use cg::{
    CgFailure, CgOutput, CgWorkspace, ConjugateGradient, DiagonalOperator, IdentityOperator, LinearOperator,
    SolveError, StoppingCriterion,
};

pub use nalgebra_sparse::{CooMatrix, CsrMatrix};
