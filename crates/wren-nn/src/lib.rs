//! # wren-nn
//!
//! The module layer for Wren: parameter discovery and state dicts.
//!
//! 1. **Module trait** — every composite reports its own tensors and its
//!    child modules; names, iteration, `zero_grad` and state handling are
//!    derived from that
//! 2. **NamedParameters** — lazy pre-order walk yielding `("fc1.weight", tensor)`
//! 3. **StateDict** — ordered, owned snapshot of named tensors

pub mod module;
pub mod state_dict;

pub use module::{Module, NamedParameters};
pub use state_dict::{StateDict, StateEntry};
