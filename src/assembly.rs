//! Matrix-free evaluation of element integrals.
//!
//! All evaluators share the same structure: elements are processed in parallel, each producing a
//! local contribution, after which contributions are added to global vectors serially in element
//! order. Results are therefore independent of the number of threads.
pub mod global;
pub mod mass;
pub mod operator;
pub mod residual;
