//! Volume integrals of fields.
use eyre::ensure;
use nalgebra::{DVector, DefaultAllocator};

use crate::allocators::DimAllocator;
use crate::assembly::global::cell_loop;
use crate::field::{Field, FieldArity, SolutionVector};
use crate::space::MatrixFreeSpace;
use crate::{Real, SmallDim};

/// Integrates the scalar field with coefficients `u` over the domain.
pub fn integrate_scalar_field<T, D, S>(space: &S, u: &DVector<T>) -> T
where
    T: Real,
    D: SmallDim,
    S: ?Sized + MatrixFreeSpace<T, D>,
    DefaultAllocator: DimAllocator<T, D>,
{
    assert_eq!(u.len(), space.num_nodes(), "coefficient vector does not match the space");
    let u = u.as_slice();
    cell_loop(space, &[], |workspace, _| {
        let quadrature = &workspace.quadrature;
        let mut integral = T::zero();
        for q in 0..quadrature.num_points() {
            let u_q = quadrature
                .nodes()
                .iter()
                .zip(quadrature.basis_values(q))
                .fold(T::zero(), |acc, (&node, &phi)| acc + u[node] * phi);
            integral += quadrature.jxw()[q] * u_q;
        }
        integral
    })
    .into_iter()
    .fold(T::zero(), |acc, element_integral| acc + element_integral)
}

/// Integrates a scalar field over the domain.
///
/// Returns an error for vector fields.
pub fn integrate_field<T, D, S>(space: &S, field: &Field, solution: &SolutionVector<T>) -> eyre::Result<T>
where
    T: Real,
    D: SmallDim,
    S: ?Sized + MatrixFreeSpace<T, D>,
    DefaultAllocator: DimAllocator<T, D>,
{
    ensure!(
        field.arity() == FieldArity::Scalar,
        "cannot integrate vector field '{}'",
        field.name()
    );
    debug_assert!(solution.has_current_ghosts());
    Ok(integrate_scalar_field(space, solution.values()))
}
