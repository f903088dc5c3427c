//! Matrix-free application of linearized field operators.
use std::error::Error;
use std::marker::PhantomData;

use fieldstep_sparse::LinearOperator;
use nalgebra::{DVectorView, DVectorViewMut, DefaultAllocator};

use crate::allocators::DimAllocator;
use crate::assembly::global::{add_local_to_global, cell_loop, integrate_term, interpolate_at_point};
use crate::constraints::ConstraintSet;
use crate::field::{Field, FieldArity, SolutionVector};
use crate::model::{FieldPointValue, PdeModel};
use crate::space::MatrixFreeSpace;
use crate::{Real, SmallDim};

/// Which operator a [`FieldOperator`] applies.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperatorMode {
    /// The linearization provided by [`PdeModel::linearized_lhs`].
    Physical,
    /// The Laplacian `∫ ∇x : ∇φ_i dx`, used to generate initial guesses.
    Laplace,
}

/// The linearized operator of a single field, evaluated around the current solution of all fields.
///
/// Rows of Dirichlet-constrained degrees of freedom act as the identity, so that the operator stays
/// symmetric positive definite on the constrained subspace when the unconstrained one is.
pub struct FieldOperator<'a, T, D, S: ?Sized, M: ?Sized>
where
    T: Real,
{
    space: &'a S,
    model: &'a M,
    fields: &'a [Field],
    solutions: &'a [SolutionVector<T>],
    constraints: &'a ConstraintSet<T>,
    field_index: usize,
    mode: OperatorMode,
    marker: PhantomData<D>,
}

impl<'a, T, D, S, M> FieldOperator<'a, T, D, S, M>
where
    T: Real,
    D: SmallDim,
    S: ?Sized + MatrixFreeSpace<T, D>,
    M: ?Sized + PdeModel<T, D>,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn new(
        space: &'a S,
        model: &'a M,
        fields: &'a [Field],
        solutions: &'a [SolutionVector<T>],
        constraints: &'a ConstraintSet<T>,
        field_index: usize,
    ) -> Self {
        assert_eq!(fields.len(), solutions.len());
        assert!(field_index < fields.len(), "field index out of bounds");
        Self {
            space,
            model,
            fields,
            solutions,
            constraints,
            field_index,
            mode: OperatorMode::Physical,
            marker: PhantomData,
        }
    }

    pub fn with_mode(self, mode: OperatorMode) -> Self {
        Self { mode, ..self }
    }

    pub fn field(&self) -> &Field {
        &self.fields[self.field_index]
    }

    pub fn mode(&self) -> OperatorMode {
        self.mode
    }

    /// Computes `y = A x`.
    pub fn apply_to_slice(&self, y: &mut [T], x: &[T]) {
        let dim = D::dim();
        let num_nodes = self.space.num_nodes();
        let field_index = self.field_index;
        let arity = self.fields[field_index].arity();
        let num_dofs = self.fields[field_index].num_dofs(num_nodes, dim);
        assert_eq!(x.len(), num_dofs, "input vector has wrong length");
        assert_eq!(y.len(), num_dofs, "output vector has wrong length");
        debug_assert!(self.solutions.iter().all(SolutionVector::has_current_ghosts));

        let arities: Vec<FieldArity> = self.fields.iter().map(Field::arity).collect();
        let (model, solutions, mode) = (self.model, self.solutions, self.mode);

        let contributions = cell_loop(self.space, &arities, |workspace, _| {
            let quadrature = &workspace.quadrature;
            let variables = &mut workspace.variables;
            if variables.change_field() != Some(field_index) {
                variables.set_change_field(field_index);
            }
            let mut local = vec![T::zero(); quadrature.num_nodes() * arity.num_components(dim)];

            for q in 0..quadrature.num_points() {
                variables.reset(&quadrature.points()[q]);
                interpolate_at_point(quadrature, q, x, num_nodes, variables.change_mut());
                match mode {
                    OperatorMode::Physical => {
                        for (f, solution) in solutions.iter().enumerate() {
                            interpolate_at_point(
                                quadrature,
                                q,
                                solution.values().as_slice(),
                                num_nodes,
                                variables.value_mut(f),
                            );
                        }
                        model.linearized_lhs(variables);
                        integrate_term(quadrature, q, variables.change_term(), &mut local);
                    }
                    OperatorMode::Laplace => {
                        let term = laplace_term(variables.change());
                        integrate_term(quadrature, q, &term, &mut local);
                    }
                }
            }
            (quadrature.nodes().to_vec(), local)
        });

        y.iter_mut().for_each(|y_i| *y_i = T::zero());
        for (nodes, local) in &contributions {
            add_local_to_global(nodes, local, num_nodes, y);
        }
        self.constraints.copy_constrained_rows(y, x);
    }
}

fn laplace_term<T, D>(change: &FieldPointValue<T, D>) -> FieldPointValue<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    match change {
        FieldPointValue::Scalar { gradient, .. } => FieldPointValue::Scalar {
            value: T::zero(),
            gradient: gradient.clone(),
        },
        FieldPointValue::Vector { gradient, .. } => FieldPointValue::Vector {
            value: nalgebra::OVector::zeros(),
            gradient: gradient.clone(),
        },
    }
}

impl<'a, T, D, S, M> LinearOperator<T> for FieldOperator<'a, T, D, S, M>
where
    T: Real,
    D: SmallDim,
    S: ?Sized + MatrixFreeSpace<T, D>,
    M: ?Sized + PdeModel<T, D>,
    DefaultAllocator: DimAllocator<T, D>,
{
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        self.apply_to_slice(y.as_mut_slice(), x.as_slice());
        Ok(())
    }
}
