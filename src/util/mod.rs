//! Utility types and functions.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - Math re-exports from glam and transform packing helpers

mod error;
mod math;

pub use error::*;
pub use math::*;
