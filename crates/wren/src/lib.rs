//! # Wren
//!
//! A minimal tensor and reverse-mode autograd runtime in Rust.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use wren::prelude::*;
//!
//! let x = Tensor::from_slice(&[1.0f32, 2.0, 3.0], Size::new([3])?)?;
//! x.set_requires_grad(true)?;
//! let loss = x.square()?.mean_all()?;
//! loss.backward()?;
//! // d/dx mean(x^2) = 2x / 3
//! let grad = x.grad().unwrap().to_vec::<f32>()?;
//! assert!((grad[2] - 2.0).abs() < 1e-6);
//! # Ok::<(), wren::Error>(())
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `wren-core` | Tensor, Size, DType, Storage, grad mode, Autograd |
//! | `wren-nn` | Module parameter visitor, NamedParameters, StateDict |
//!
//! ## Modules
//!
//! - [`checkpoint`] — Save/load module parameters

/// Re-export core types.
pub use wren_core::{
    backprop::topological_order,
    tensor::{BackwardContext, BackwardFn, TensorId},
    DType, Element, Error, Result, Scalar, Size, Storage, Tensor, MAX_RANK,
};

/// Re-export grad mode controls.
pub use wren_core::grad_mode::{enable_grad, is_grad_enabled, no_grad, with_no_grad, GradModeGuard};

/// Re-export the module layer.
pub mod nn {
    pub use wren_nn::*;
}

/// Checkpoint — save and load module parameters.
pub mod checkpoint;

/// Convenient glob import: `use wren::prelude::*;`
pub mod prelude {
    pub use crate::nn::{Module, NamedParameters, StateDict, StateEntry};
    pub use crate::{
        enable_grad, no_grad, with_no_grad, DType, Error, Result, Scalar, Size, Storage, Tensor,
    };
}
