//! Element loops and the transfer of data between global vectors and element-local quantities.
use itertools::izip;
use nalgebra::{DefaultAllocator, DimName, Scalar};
use rayon::prelude::*;

use crate::allocators::DimAllocator;
use crate::field::FieldArity;
use crate::model::{FieldPointValue, PointVariables};
use crate::space::{dof_index, ElementQuadrature, MatrixFreeSpace};
use crate::{Real, SmallDim};

/// Per-thread scratch data for element loops.
#[derive(Debug)]
pub struct CellWorkspace<T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub quadrature: ElementQuadrature<T, D>,
    pub variables: PointVariables<T, D>,
}

impl<T, D> CellWorkspace<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn new(arities: &[FieldArity]) -> Self {
        Self {
            quadrature: ElementQuadrature::default(),
            variables: PointVariables::new(arities),
        }
    }
}

/// Contribution of a single element to one or more global vectors.
#[derive(Debug, Clone)]
pub struct ElementContribution<T> {
    pub nodes: Vec<usize>,
    /// One local vector per target, each laid out component by component.
    pub local: Vec<Vec<T>>,
}

/// Evaluates `f` for every element of `space` in parallel and returns the results in element order.
///
/// The workspace passed to `f` holds the populated quadrature data of the element.
pub fn cell_loop<T, D, S, R, F>(space: &S, arities: &[FieldArity], f: F) -> Vec<R>
where
    T: Real,
    D: SmallDim,
    S: ?Sized + MatrixFreeSpace<T, D>,
    R: Send,
    F: Fn(&mut CellWorkspace<T, D>, usize) -> R + Sync + Send,
    DefaultAllocator: DimAllocator<T, D>,
{
    (0..space.num_elements())
        .into_par_iter()
        .with_min_len(50)
        .map_init(
            || CellWorkspace::new(arities),
            |workspace, element_index| {
                space.populate_element_quadrature(element_index, &mut workspace.quadrature);
                f(workspace, element_index)
            },
        )
        .collect()
}

/// Evaluates the field with global coefficients `u_global` at quadrature point `q` of the element.
///
/// The arity of `output` determines how coefficients are interpreted.
pub fn interpolate_at_point<T, D>(
    quadrature: &ElementQuadrature<T, D>,
    q: usize,
    u_global: &[T],
    num_nodes: usize,
    output: &mut FieldPointValue<T, D>,
) where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    output.set_zero();
    let phi = quadrature.basis_values(q);
    let grad_phi = quadrature.basis_gradients(q);
    match output {
        FieldPointValue::Scalar { value, gradient } => {
            for (&node, &phi_a, grad_phi_a) in izip!(quadrature.nodes(), phi, grad_phi) {
                let u = u_global[node];
                *value += u * phi_a;
                gradient.axpy(u, grad_phi_a, T::one());
            }
        }
        FieldPointValue::Vector { value, gradient } => {
            for c in 0..D::dim() {
                for (a, &node) in quadrature.nodes().iter().enumerate() {
                    let u = u_global[dof_index(num_nodes, node, c)];
                    value[c] += u * phi[a];
                    for i in 0..D::dim() {
                        gradient[(c, i)] += u * grad_phi[a][i];
                    }
                }
            }
        }
    }
}

/// Adds the weak form of `term` at quadrature point `q`, tested with every element basis function,
/// to `local`.
pub fn integrate_term<T, D>(quadrature: &ElementQuadrature<T, D>, q: usize, term: &FieldPointValue<T, D>, local: &mut [T])
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    let n = quadrature.num_nodes();
    let jxw = quadrature.jxw()[q];
    let phi = quadrature.basis_values(q);
    let grad_phi = quadrature.basis_gradients(q);
    let num_components = term.arity().num_components(D::dim());
    debug_assert_eq!(local.len(), n * num_components);
    for c in 0..num_components {
        for a in 0..n {
            local[c * n + a] += jxw * term.contract(c, phi[a], &grad_phi[a]);
        }
    }
}

/// Adds an element-local vector to the global vector.
pub fn add_local_to_global<T: Real>(nodes: &[usize], local: &[T], num_nodes: usize, global: &mut [T]) {
    let n = nodes.len();
    debug_assert_eq!(local.len() % n.max(1), 0);
    for (c, local_c) in local.chunks_exact(n.max(1)).enumerate() {
        for (&node, &value) in nodes.iter().zip(local_c) {
            global[dof_index(num_nodes, node, c)] += value;
        }
    }
}
