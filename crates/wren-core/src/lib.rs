//! # wren-core
//!
//! Core tensor primitives, typed storage, and reverse-mode autograd for Wren.
//!
//! This crate provides:
//! - [`Tensor`] — n-dimensional array with automatic differentiation
//! - [`Size`] — immutable shape with at most [`MAX_RANK`] positive extents
//! - [`DType`] / [`Storage`] — f32, i32 and bool buffers with explicit coercion
//! - [`backprop`] — topological ordering and backward replay
//! - [`no_grad`] — scoped switch that turns graph recording off
// - DType: supported element types and host scalar conversions
// - Size: n-dimensional shape representation
// - Storage: dtype-tagged contiguous buffer
// - Tensor: graph node (data + grad slot + parents + backward closure)
// - Backprop: reverse-mode engine
// - Ops: minimal traced operator set

pub mod backprop;
pub mod dtype;
pub mod error;
pub mod grad_mode;
pub mod ops;
pub mod shape;
pub mod storage;
pub mod tensor;

pub use backprop::topological_order;
pub use dtype::{DType, Element, Scalar};
pub use error::{Error, Result};
pub use grad_mode::{enable_grad, is_grad_enabled, no_grad, with_no_grad, GradModeGuard};
pub use shape::{Size, MAX_RANK};
pub use storage::Storage;
pub use tensor::{BackwardContext, BackwardFn, Tensor, TensorId};
