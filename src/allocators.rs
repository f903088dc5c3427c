//! Helper traits for allocator trait bounds.
pub use fieldstep_traits::allocators::*;
