//! Discretization spaces evaluated element by element.
use nalgebra::{DefaultAllocator, DimName, OPoint, OVector, Scalar};

use crate::allocators::DimAllocator;
use crate::{Real, SmallDim};

mod lagrange_grid;

pub use lagrange_grid::UniformLagrangeGrid;

/// Index of the degree of freedom for component `component` at node `node_index`.
///
/// Multi-component fields store their coefficients component by component, so that the scalar
/// layout of a space is a prefix of its vector layout.
pub fn dof_index(num_nodes: usize, node_index: usize, component: usize) -> usize {
    component * num_nodes + node_index
}

/// A finite element space that is only ever accessed through element-wise quadrature data.
///
/// Implementations must be shareable across threads, since element loops run in parallel.
pub trait MatrixFreeSpace<T, D>: Sync
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: DimAllocator<T, D>,
{
    fn num_nodes(&self) -> usize;

    fn num_elements(&self) -> usize;

    fn element_node_count(&self, element_index: usize) -> usize;

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize);

    fn node_position(&self, node_index: usize) -> OPoint<T, D>;

    /// Measure of the whole domain.
    fn domain_volume(&self) -> T;

    /// Populates nodes, quadrature points, weights and basis data of the given element.
    ///
    /// Weights are multiplied by the Jacobian determinant and gradients are given with respect to
    /// physical coordinates.
    fn populate_element_quadrature(&self, element_index: usize, output: &mut ElementQuadrature<T, D>);
}

/// Quadrature data of a single element in physical coordinates.
#[derive(Debug, Clone)]
pub struct ElementQuadrature<T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: DimAllocator<T, D>,
{
    nodes: Vec<usize>,
    points: Vec<OPoint<T, D>>,
    jxw: Vec<T>,
    // Row-major with one row per quadrature point
    basis_values: Vec<T>,
    basis_gradients: Vec<OVector<T, D>>,
}

impl<T, D> Default for ElementQuadrature<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            points: Vec::new(),
            jxw: Vec::new(),
            basis_values: Vec::new(),
            basis_gradients: Vec::new(),
        }
    }
}

impl<T, D> ElementQuadrature<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn resize(&mut self, node_count: usize, quadrature_size: usize) {
        self.nodes.resize(node_count, usize::MAX);
        self.points.resize(quadrature_size, OPoint::origin());
        self.jxw.resize(quadrature_size, T::zero());
        self.basis_values
            .resize(node_count * quadrature_size, T::zero());
        self.basis_gradients
            .resize(node_count * quadrature_size, OVector::zeros());
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_points(&self) -> usize {
        self.jxw.len()
    }

    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [usize] {
        &mut self.nodes
    }

    pub fn points(&self) -> &[OPoint<T, D>] {
        &self.points
    }

    pub fn jxw(&self) -> &[T] {
        &self.jxw
    }

    pub fn points_and_jxw_mut(&mut self) -> (&mut [OPoint<T, D>], &mut [T]) {
        (&mut self.points, &mut self.jxw)
    }

    /// Values of all element basis functions at quadrature point `q`.
    pub fn basis_values(&self, q: usize) -> &[T] {
        let n = self.num_nodes();
        &self.basis_values[q * n..(q + 1) * n]
    }

    /// Physical gradients of all element basis functions at quadrature point `q`.
    pub fn basis_gradients(&self, q: usize) -> &[OVector<T, D>] {
        let n = self.num_nodes();
        &self.basis_gradients[q * n..(q + 1) * n]
    }

    pub fn basis_mut(&mut self, q: usize) -> (&mut [T], &mut [OVector<T, D>]) {
        let n = self.num_nodes();
        (
            &mut self.basis_values[q * n..(q + 1) * n],
            &mut self.basis_gradients[q * n..(q + 1) * n],
        )
    }
}
