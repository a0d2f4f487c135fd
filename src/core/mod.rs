//! Core framework-level components
//!
//! - `error`: structured error handling

pub mod error;

pub use error::{DiTError, Result, TensorRole};
