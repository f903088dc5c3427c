//! Lumped (diagonal) mass matrices and the explicit update they enable.
use log::debug;
use nalgebra::{convert, DVector, DefaultAllocator, Scalar};

use crate::allocators::DimAllocator;
use crate::assembly::global::cell_loop;
use crate::field::FieldArity;
use crate::space::{dof_index, MatrixFreeSpace};
use crate::{Real, SmallDim};

/// Diagonal entries with magnitude at or below this threshold are inverted to zero.
pub const LUMPED_MASS_THRESHOLD: f64 = 1e-15;

/// Assembles the lumped mass of `space` by integrating the unit field against every basis function.
///
/// For vector fields the unit field has all components equal to one, so each component block of
/// the result holds the same values.
pub fn assemble_lumped_mass<T, D, S>(space: &S, arity: FieldArity) -> DVector<T>
where
    T: Real,
    D: SmallDim,
    S: ?Sized + MatrixFreeSpace<T, D>,
    DefaultAllocator: DimAllocator<T, D>,
{
    let num_nodes = space.num_nodes();
    let num_components = arity.num_components(D::dim());

    let contributions = cell_loop(space, &[], |workspace, _| {
        let quadrature = &workspace.quadrature;
        let mut local = vec![T::zero(); quadrature.num_nodes()];
        for q in 0..quadrature.num_points() {
            let jxw = quadrature.jxw()[q];
            for (m_a, &phi_a) in local.iter_mut().zip(quadrature.basis_values(q)) {
                *m_a += jxw * phi_a;
            }
        }
        (quadrature.nodes().to_vec(), local)
    });

    let mut mass = DVector::zeros(num_nodes * num_components);
    for (nodes, local) in contributions {
        for c in 0..num_components {
            for (&node, &m_a) in nodes.iter().zip(&local) {
                mass[dof_index(num_nodes, node, c)] += m_a;
            }
        }
    }
    mass
}

/// Inverts a lumped mass entry by entry, mapping negligible entries to zero.
pub fn invert_lumped_mass<T: Real>(mass: &DVector<T>) -> DVector<T> {
    let threshold: T = convert(LUMPED_MASS_THRESHOLD);
    mass.map(|m| if m.abs() > threshold { T::one() / m } else { T::zero() })
}

pub fn assemble_inverse_lumped_mass<T, D, S>(space: &S, arity: FieldArity) -> DVector<T>
where
    T: Real,
    D: SmallDim,
    S: ?Sized + MatrixFreeSpace<T, D>,
    DefaultAllocator: DimAllocator<T, D>,
{
    invert_lumped_mass(&assemble_lumped_mass(space, arity))
}

/// Overwrites `solution` with the lumped-mass update `inverse_mass * residual`.
///
/// If the inverse mass is shorter than the solution, it is repeated, i.e. entry `dof` uses
/// `inverse_mass[dof % inverse_mass.len()]`. This allows a scalar lumped mass to serve all
/// components of a vector field.
///
/// # Panics
///
/// Panics if the lengths of `solution` and `residual` differ, or if the solution length is not a
/// multiple of the inverse mass length.
pub fn apply_lumped_update<T: Real>(solution: &mut DVector<T>, residual: &DVector<T>, inverse_mass: &DVector<T>) {
    let m = inverse_mass.len();
    assert_eq!(solution.len(), residual.len(), "solution and residual lengths differ");
    assert!(m > 0 || solution.is_empty(), "empty inverse mass");
    assert_eq!(
        solution.len() % m.max(1),
        0,
        "solution length must be a multiple of the inverse mass length"
    );
    for (dof, (u, &r)) in solution.iter_mut().zip(residual.iter()).enumerate() {
        *u = inverse_mass[dof % m] * r;
    }
}

/// Lazily assembled inverse lumped masses, one per field layout.
///
/// The masses only depend on the space, so they are computed on first use and kept until the
/// space changes, which callers signal with [`MassLumper::invalidate`].
#[derive(Debug, Clone)]
pub struct MassLumper<T: Scalar> {
    scalar: Option<DVector<T>>,
    vector: Option<DVector<T>>,
}

impl<T: Scalar> Default for MassLumper<T> {
    fn default() -> Self {
        Self {
            scalar: None,
            vector: None,
        }
    }
}

impl<T: Real> MassLumper<T> {
    pub fn inverse_mass<D, S>(&mut self, space: &S, arity: FieldArity) -> &DVector<T>
    where
        D: SmallDim,
        S: ?Sized + MatrixFreeSpace<T, D>,
        DefaultAllocator: DimAllocator<T, D>,
    {
        let slot = match arity {
            FieldArity::Scalar => &mut self.scalar,
            FieldArity::Vector => &mut self.vector,
        };
        slot.get_or_insert_with(|| {
            debug!("assembling {:?} lumped mass", arity);
            assemble_inverse_lumped_mass(space, arity)
        })
    }

    pub fn invalidate(&mut self) {
        self.scalar = None;
        self.vector = None;
    }
}
