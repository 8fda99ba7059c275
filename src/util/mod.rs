//! Utility types and functions for wavetrace.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - Math type re-exports from glam and guarded numeric helpers

mod error;
mod math;

pub use error::*;
pub use math::*;
