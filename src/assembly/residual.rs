//! Evaluation of field residuals from the pointwise terms of a model.
use nalgebra::{DVector, DefaultAllocator};

use crate::allocators::DimAllocator;
use crate::assembly::global::{add_local_to_global, cell_loop, integrate_term, interpolate_at_point, ElementContribution};
use crate::field::{EquationKind, Field, FieldArity, SolutionVector};
use crate::model::{FieldPointValue, PdeModel};
use crate::space::MatrixFreeSpace;
use crate::{Real, SmallDim};

/// The group of equations evaluated together.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EquationSet {
    /// Right-hand sides of explicit time dependent fields.
    Explicit,
    /// Residuals of implicit, time-independent and auxiliary fields.
    NonExplicit,
}

impl EquationSet {
    pub fn contains(&self, kind: EquationKind) -> bool {
        match self {
            Self::Explicit => kind == EquationKind::ExplicitTimeDependent,
            Self::NonExplicit => kind != EquationKind::ExplicitTimeDependent,
        }
    }
}

/// Evaluates the residuals of all fields in `equations` and overwrites their entries in `residuals`.
///
/// Residuals of fields outside the set are left untouched. All solution vectors must have current
/// ghost values.
pub fn evaluate_residuals<T, D, S, M>(
    space: &S,
    model: &M,
    fields: &[Field],
    solutions: &[SolutionVector<T>],
    equations: EquationSet,
    residuals: &mut [DVector<T>],
) where
    T: Real,
    D: SmallDim,
    S: ?Sized + MatrixFreeSpace<T, D>,
    M: ?Sized + PdeModel<T, D>,
    DefaultAllocator: DimAllocator<T, D>,
{
    assert_eq!(fields.len(), solutions.len());
    assert_eq!(fields.len(), residuals.len());
    debug_assert!(
        solutions.iter().all(SolutionVector::has_current_ghosts),
        "residual evaluated with stale ghost values"
    );

    let active: Vec<usize> = fields
        .iter()
        .filter(|field| equations.contains(field.kind()))
        .map(Field::index)
        .collect();
    if active.is_empty() {
        return;
    }

    let dim = D::dim();
    let num_nodes = space.num_nodes();
    let arities: Vec<FieldArity> = fields.iter().map(Field::arity).collect();

    let contributions = cell_loop(space, &arities, |workspace, _| {
        let quadrature = &workspace.quadrature;
        let variables = &mut workspace.variables;
        let n = quadrature.num_nodes();
        let mut local: Vec<Vec<T>> = active
            .iter()
            .map(|&f| vec![T::zero(); n * arities[f].num_components(dim)])
            .collect();

        for q in 0..quadrature.num_points() {
            variables.reset(&quadrature.points()[q]);
            for (f, solution) in solutions.iter().enumerate() {
                interpolate_at_point(quadrature, q, solution.values().as_slice(), num_nodes, variables.value_mut(f));
            }
            match equations {
                EquationSet::Explicit => model.explicit_rhs(variables),
                EquationSet::NonExplicit => model.nonexplicit_rhs(variables),
            }
            for (local_f, &f) in local.iter_mut().zip(&active) {
                integrate_term(quadrature, q, variables.term(f), local_f);
            }
        }

        ElementContribution {
            nodes: quadrature.nodes().to_vec(),
            local,
        }
    });

    for &f in &active {
        let num_dofs = fields[f].num_dofs(num_nodes, dim);
        if residuals[f].len() != num_dofs {
            residuals[f] = DVector::zeros(num_dofs);
        } else {
            residuals[f].fill(T::zero());
        }
    }
    for contribution in &contributions {
        for (local_f, &f) in contribution.local.iter().zip(&active) {
            add_local_to_global(&contribution.nodes, local_f, num_nodes, residuals[f].as_mut_slice());
        }
    }
}

/// Evaluates `-∫ ∇u : ∇φ_i dx`, the residual of the Laplace problem used to generate initial guesses.
pub fn evaluate_laplace_residual<T, D, S>(space: &S, field: &Field, solution: &SolutionVector<T>, residual: &mut DVector<T>)
where
    T: Real,
    D: SmallDim,
    S: ?Sized + MatrixFreeSpace<T, D>,
    DefaultAllocator: DimAllocator<T, D>,
{
    debug_assert!(solution.has_current_ghosts());
    let dim = D::dim();
    let num_nodes = space.num_nodes();
    let arity = field.arity();
    let u = solution.values().as_slice();

    let contributions = cell_loop(space, &[], |workspace, _| {
        let quadrature = &workspace.quadrature;
        let mut local = vec![T::zero(); quadrature.num_nodes() * arity.num_components(dim)];
        let mut value = FieldPointValue::zero(arity);
        for q in 0..quadrature.num_points() {
            interpolate_at_point(quadrature, q, u, num_nodes, &mut value);
            let term = match &value {
                FieldPointValue::Scalar { gradient, .. } => FieldPointValue::Scalar {
                    value: T::zero(),
                    gradient: -gradient,
                },
                FieldPointValue::Vector { gradient, .. } => FieldPointValue::Vector {
                    value: nalgebra::OVector::zeros(),
                    gradient: -gradient,
                },
            };
            integrate_term(quadrature, q, &term, &mut local);
        }
        (quadrature.nodes().to_vec(), local)
    });

    *residual = DVector::zeros(field.num_dofs(num_nodes, dim));
    for (nodes, local) in &contributions {
        add_local_to_global(nodes, local, num_nodes, residual.as_mut_slice());
    }
}
