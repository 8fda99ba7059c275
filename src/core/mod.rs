//! Core layer - the per-slot data model shared by every kernel.
//!
//! This module provides:
//! - [`Ray`] / [`Intersection`] - what flows through the intersection service
//! - [`PathState`] / [`PathFlags`] - per-pixel transport state
//! - [`ActiveCount`] - the live ray-slot count threaded through every stage

mod ray;
mod path;

pub use ray::{visibility, Intersection, Ray};
pub use path::{ActiveCount, PathFlags, PathState};
