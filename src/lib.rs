//! # wavetrace
//!
//! Wavefront Monte Carlo path tracing on a CPU compute device.
//!
//! A batch of camera rays becomes per-pixel radiance through repeated
//! intersect / shade / compact passes over device buffers. Two estimators
//! share that pipeline: a unidirectional path tracer with next-event
//! estimation and homogeneous media, and a bidirectional path tracer.
//!
//! ## Modules
//!
//! - [`util`] - errors and guarded math helpers
//! - [`device`] - buffers, atomic output, compaction, compute queue
//! - [`core`] - rays, hits, path state, live counts
//! - [`scene`] - immutable scene description and presets
//! - [`accel`] - intersection service and BVH
//! - [`kernels`] - shading and camera kernels
//! - [`estimator`] - the estimator contract and both implementations
//! - [`renderer`] - tile driver, film, AOVs
//! - [`session`] - multi-device rendering
//! - [`config`] - JSON render settings
//!
//! ## Example
//!
//! ```ignore
//! use wavetrace::prelude::*;
//!
//! let scene = Preset::Cornell.build(256, 256)?;
//! let est = EstimatorKind::PathTracing.create(EstimatorConfig::default())?;
//! let mut renderer = MonteCarloRenderer::new(est, (64, 64))?;
//! let film = Film::new(256, 256)?;
//! for _ in 0..32 {
//!     renderer.render(&scene, &film)?;
//! }
//! let pixels = film.resolve();
//! ```

pub mod util;
pub mod device;
pub mod core;
pub mod scene;
pub mod accel;
pub mod kernels;
pub mod estimator;
pub mod renderer;
pub mod session;
pub mod config;

// Re-export commonly used types
pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::RenderSettings;
    pub use crate::core::{ActiveCount, Intersection, PathState, Ray};
    pub use crate::device::{AccumulateMode, OutputBuffer};
    pub use crate::estimator::{
        BdptEstimator, EstimateOptions, Estimator, EstimatorConfig, EstimatorKind, PathTracingEstimator,
        QualityLevel,
    };
    pub use crate::renderer::{AovKind, Film, MonteCarloRenderer};
    pub use crate::scene::{Camera, Material, Preset, Scene, SceneBuilder};
    pub use crate::session::RenderSession;
    pub use crate::util::{Error, Result};
}
