//! Field descriptors and solution storage.
use nalgebra::{DVector, Scalar};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Real;

/// Whether a field has one component or one component per spatial dimension.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldArity {
    Scalar,
    Vector,
}

impl FieldArity {
    pub fn num_components(&self, dim: usize) -> usize {
        match self {
            FieldArity::Scalar => 1,
            FieldArity::Vector => dim,
        }
    }
}

/// The kind of equation that determines how a field is advanced in time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquationKind {
    /// Forward Euler style update with the lumped mass matrix.
    ExplicitTimeDependent,
    /// Linearized solve with Conjugate Gradient at every increment.
    ImplicitTimeDependent,
    /// Linearized solve with Conjugate Gradient, with no time derivative.
    TimeIndependent,
    /// Algebraic field obtained by a lumped-mass projection of its residual.
    Auxiliary,
}

impl EquationKind {
    /// Whether the field takes part in the time stepping, i.e. may be skipped at increment 0.
    pub fn is_time_dependent(&self) -> bool {
        matches!(self, Self::ExplicitTimeDependent | Self::ImplicitTimeDependent)
    }

    /// Whether the field is solved with the linearized operator rather than the lumped mass.
    pub fn is_solved_implicitly(&self) -> bool {
        matches!(self, Self::ImplicitTimeDependent | Self::TimeIndependent)
    }
}

impl fmt::Display for EquationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ExplicitTimeDependent => "explicit time dependent",
            Self::ImplicitTimeDependent => "implicit time dependent",
            Self::TimeIndependent => "time independent",
            Self::Auxiliary => "auxiliary",
        };
        write!(f, "{}", name)
    }
}

/// Static description of one field variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    index: usize,
    name: String,
    arity: FieldArity,
    kind: EquationKind,
    nonlinear: bool,
}

impl Field {
    pub fn new(index: usize, name: impl Into<String>, arity: FieldArity, kind: EquationKind, nonlinear: bool) -> Self {
        Self {
            index,
            name: name.into(),
            arity,
            kind,
            nonlinear,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> FieldArity {
        self.arity
    }

    pub fn kind(&self) -> EquationKind {
        self.kind
    }

    pub fn is_nonlinear(&self) -> bool {
        self.nonlinear
    }

    /// Number of degrees of freedom of the field on a space with `num_nodes` nodes in dimension `dim`.
    pub fn num_dofs(&self, num_nodes: usize, dim: usize) -> usize {
        num_nodes * self.arity.num_components(dim)
    }
}

/// Global coefficient vector of a field, together with the state of its ghost values.
///
/// Values owned by other processes ("ghosts") must be refreshed after every write before the
/// vector is read by an evaluator. In a single-process run the refresh is a no-op, but the flag is
/// still tracked so that reads of stale data are caught in debug builds.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionVector<T: Scalar> {
    values: DVector<T>,
    ghosts_current: bool,
}

impl<T: Real> SolutionVector<T> {
    pub fn zeros(num_dofs: usize) -> Self {
        Self::from_values(DVector::zeros(num_dofs))
    }

    pub fn l2_norm(&self) -> T {
        self.values.norm()
    }

    /// Returns `true` if no entry is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v_i| v_i.is_finite())
    }
}

impl<T: Scalar> SolutionVector<T> {
    pub fn from_values(values: DVector<T>) -> Self {
        Self {
            values,
            ghosts_current: true,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &DVector<T> {
        &self.values
    }

    /// Mutable access to the coefficients. Ghost values are considered stale afterwards.
    pub fn values_mut(&mut self) -> &mut DVector<T> {
        self.ghosts_current = false;
        &mut self.values
    }

    pub fn update_ghost_values(&mut self) {
        self.ghosts_current = true;
    }

    pub fn has_current_ghosts(&self) -> bool {
        self.ghosts_current
    }

    pub fn into_values(self) -> DVector<T> {
        self.values
    }
}
