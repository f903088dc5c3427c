use std::marker::PhantomData;

use eyre::ensure;
use fieldstep_quadrature::univariate::try_gauss_lobatto;
use fieldstep_quadrature::Rule1d;
use nalgebra::{convert, DefaultAllocator, OPoint, OVector};

use crate::allocators::DimAllocator;
use crate::space::{ElementQuadrature, MatrixFreeSpace};
use crate::{Real, SmallDim};

const MAX_DIM: usize = 3;

/// Axis-aligned box split into equally sized cells carrying tensor-product Lagrange elements.
///
/// Element nodes are the Gauss-Lobatto-Legendre points of the given degree, and the same points
/// are used for quadrature. The element mass matrix is therefore diagonal, which makes the
/// lumped mass exact.
///
/// Both cells and nodes are numbered lexicographically with the first axis running fastest.
#[derive(Debug, Clone)]
pub struct UniformLagrangeGrid<T, D> {
    origin: Vec<T>,
    cell_size: Vec<T>,
    cells_per_dim: Vec<usize>,
    degree: usize,
    reference_points: Vec<T>,
    reference_weights: Vec<T>,
    // lagrange_values[q * (degree + 1) + a] is the value of the a-th 1D basis function at the q-th point
    lagrange_values: Vec<T>,
    lagrange_derivatives: Vec<T>,
    marker: PhantomData<D>,
}

impl<T, D> UniformLagrangeGrid<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn new(
        origin: &OPoint<T, D>,
        extents: &OVector<T, D>,
        cells_per_dim: &[usize],
        degree: usize,
    ) -> eyre::Result<Self> {
        let dim = D::dim();
        ensure!(
            (1..=MAX_DIM).contains(&dim),
            "grids are supported in 1 to {} dimensions, got {}",
            MAX_DIM,
            dim
        );
        ensure!(
            cells_per_dim.len() == dim,
            "expected {} cell counts, got {}",
            dim,
            cells_per_dim.len()
        );
        ensure!(cells_per_dim.iter().all(|&n| n > 0), "every axis needs at least one cell");
        ensure!(
            extents.iter().all(|&l| l > T::zero()),
            "grid extents must be positive"
        );
        ensure!(degree > 0, "element degree must be positive");

        let Rule1d { points, weights } =
            try_gauss_lobatto(degree + 1).ok_or_else(|| eyre::eyre!("no Gauss-Lobatto rule for degree {}", degree))?;

        let p1 = degree + 1;
        let mut lagrange_values = Vec::with_capacity(p1 * p1);
        let mut lagrange_derivatives = Vec::with_capacity(p1 * p1);
        for &xi in &points {
            let (values, derivatives) = lagrange_basis_1d(&points, xi);
            lagrange_values.extend(values.into_iter().map(convert::<f64, T>));
            lagrange_derivatives.extend(derivatives.into_iter().map(convert::<f64, T>));
        }

        let cell_size = extents
            .iter()
            .zip(cells_per_dim)
            .map(|(&l, &n)| l / convert::<f64, T>(n as f64))
            .collect();

        Ok(Self {
            origin: origin.coords.iter().copied().collect(),
            cell_size,
            cells_per_dim: cells_per_dim.to_vec(),
            degree,
            reference_points: points.into_iter().map(convert::<f64, T>).collect(),
            reference_weights: weights.into_iter().map(convert::<f64, T>).collect(),
            lagrange_values,
            lagrange_derivatives,
            marker: PhantomData,
        })
    }

    /// The unit box `[0, 1]^D` with the same number of cells along every axis.
    pub fn unit_box(cells_per_dim: usize, degree: usize) -> eyre::Result<Self> {
        let cells = vec![cells_per_dim; D::dim()];
        Self::new(&OPoint::origin(), &OVector::repeat(T::one()), &cells, degree)
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn cells_per_dim(&self) -> &[usize] {
        &self.cells_per_dim
    }

    /// Nodes on the boundary of the box.
    pub fn boundary_nodes(&self) -> Vec<usize> {
        let nodes_per_dim = self.nodes_per_dim();
        (0..self.num_nodes())
            .filter(|&node| {
                let g = multi_index(node, &nodes_per_dim);
                (0..D::dim()).any(|k| g[k] == 0 || g[k] + 1 == nodes_per_dim[k])
            })
            .collect()
    }

    /// Nodes whose position satisfies the given predicate.
    pub fn nodes_where(&self, mut predicate: impl FnMut(&OPoint<T, D>) -> bool) -> Vec<usize> {
        (0..self.num_nodes())
            .filter(|&node| predicate(&self.node_position(node)))
            .collect()
    }

    fn nodes_per_dim(&self) -> [usize; MAX_DIM] {
        let mut nodes_per_dim = [1; MAX_DIM];
        for (k, &n) in self.cells_per_dim.iter().enumerate() {
            nodes_per_dim[k] = n * self.degree + 1;
        }
        nodes_per_dim
    }

    fn coordinate(&self, axis: usize, cell: usize, local: usize) -> T {
        let h = self.cell_size[axis];
        let xi = self.reference_points[local];
        self.origin[axis] + h * convert::<f64, T>(cell as f64) + (xi + T::one()) * h * convert::<f64, T>(0.5)
    }
}

impl<T, D> MatrixFreeSpace<T, D> for UniformLagrangeGrid<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    fn num_nodes(&self) -> usize {
        self.nodes_per_dim().iter().product()
    }

    fn num_elements(&self) -> usize {
        self.cells_per_dim.iter().product()
    }

    fn element_node_count(&self, _element_index: usize) -> usize {
        (self.degree + 1).pow(D::dim() as u32)
    }

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize) {
        let p1 = self.degree + 1;
        let local_shape = [p1; MAX_DIM];
        let nodes_per_dim = self.nodes_per_dim();
        let cell = multi_index(element_index, &self.cells_per_dim);
        for (a, node) in output.iter_mut().enumerate() {
            let local = multi_index(a, &local_shape[..D::dim()]);
            let mut global = [0; MAX_DIM];
            for k in 0..D::dim() {
                global[k] = cell[k] * self.degree + local[k];
            }
            *node = linear_index(&global, &nodes_per_dim);
        }
    }

    fn node_position(&self, node_index: usize) -> OPoint<T, D> {
        let nodes_per_dim = self.nodes_per_dim();
        let g = multi_index(node_index, &nodes_per_dim[..D::dim()]);
        let mut position = OPoint::origin();
        for k in 0..D::dim() {
            let cell = usize::min(g[k] / self.degree, self.cells_per_dim[k] - 1);
            let local = g[k] - cell * self.degree;
            position.coords[k] = self.coordinate(k, cell, local);
        }
        position
    }

    fn domain_volume(&self) -> T {
        self.cell_size
            .iter()
            .zip(&self.cells_per_dim)
            .fold(T::one(), |volume, (&h, &n)| volume * h * convert::<f64, T>(n as f64))
    }

    fn populate_element_quadrature(&self, element_index: usize, output: &mut ElementQuadrature<T, D>) {
        let dim = D::dim();
        let p1 = self.degree + 1;
        let local_shape = [p1; MAX_DIM];
        let n = self.element_node_count(element_index);
        output.resize(n, n);
        self.populate_element_nodes(output.nodes_mut(), element_index);

        let cell = multi_index(element_index, &self.cells_per_dim);
        let half: T = convert(0.5);
        let two: T = convert(2.0);

        let (points, jxw) = output.points_and_jxw_mut();
        for q in 0..n {
            let qi = multi_index(q, &local_shape[..dim]);
            let mut w = T::one();
            for k in 0..dim {
                points[q].coords[k] = self.coordinate(k, cell[k], qi[k]);
                w *= self.reference_weights[qi[k]] * self.cell_size[k] * half;
            }
            jxw[q] = w;
        }

        for q in 0..n {
            let qi = multi_index(q, &local_shape[..dim]);
            let (values, gradients) = output.basis_mut(q);
            for a in 0..n {
                let ai = multi_index(a, &local_shape[..dim]);
                let factor = |k: usize| self.lagrange_values[qi[k] * p1 + ai[k]];
                values[a] = (0..dim).fold(T::one(), |v, k| v * factor(k));
                for k in 0..dim {
                    let derivative = self.lagrange_derivatives[qi[k] * p1 + ai[k]] * two / self.cell_size[k];
                    gradients[a][k] = (0..dim)
                        .filter(|&j| j != k)
                        .fold(derivative, |g, j| g * factor(j));
                }
            }
        }
    }
}

/// Decomposes a lexicographic index into its per-axis components.
fn multi_index(mut index: usize, shape: &[usize]) -> [usize; MAX_DIM] {
    let mut result = [0; MAX_DIM];
    for (k, &n) in shape.iter().enumerate() {
        result[k] = index % n;
        index /= n;
    }
    result
}

fn linear_index(multi_index: &[usize; MAX_DIM], shape: &[usize; MAX_DIM]) -> usize {
    let mut index = 0;
    for k in (0..MAX_DIM).rev() {
        index = index * shape[k] + multi_index[k];
    }
    index
}

/// Values and derivatives at `x` of the Lagrange polynomials associated with `nodes`.
fn lagrange_basis_1d(nodes: &[f64], x: f64) -> (Vec<f64>, Vec<f64>) {
    let m = nodes.len();
    let mut values = vec![1.0; m];
    let mut derivatives = vec![0.0; m];
    for j in 0..m {
        for i in (0..m).filter(|&i| i != j) {
            values[j] *= (x - nodes[i]) / (nodes[j] - nodes[i]);
        }
        for k in (0..m).filter(|&k| k != j) {
            let mut term = 1.0 / (nodes[j] - nodes[k]);
            for i in (0..m).filter(|&i| i != j && i != k) {
                term *= (x - nodes[i]) / (nodes[j] - nodes[i]);
            }
            derivatives[j] += term;
        }
    }
    (values, derivatives)
}
