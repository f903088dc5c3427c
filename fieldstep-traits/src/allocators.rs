//! Allocator bounds bundled into single traits.
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimName, Scalar, U1};

/// Storage for everything that lives at a quadrature point in `D` spatial dimensions.
///
/// Scalar gradients and vector values are `D`-vectors, vector gradients are `D x D` matrices
/// and their rows are `1 x D`.
pub trait DimAllocator<T: Scalar, D: DimName>: Allocator<T, D> + Allocator<T, D, D> + Allocator<T, U1, D> {}

impl<T, D> DimAllocator<T, D> for DefaultAllocator
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D> + Allocator<T, D, D> + Allocator<T, U1, D>,
{
}
