//! Radiance estimators.
//!
//! An [`Estimator`] turns a batch of primary rays into radiance accumulated
//! in a caller-owned [`OutputBuffer`]. It owns every scratch buffer it needs
//! (see [`RenderData`]) and drives its kernels through one in-order
//! [`ComputeQueue`].
//!
//! Two implementations exist:
//! - [`PathTracingEstimator`] - wavefront unidirectional path tracing with
//!   next-event estimation and homogeneous media
//! - [`BdptEstimator`] - bidirectional path tracing over surfaces
//!
//! ```ignore
//! let mut est = EstimatorKind::PathTracing.create(EstimatorConfig::default())?;
//! est.set_work_buffer_size(width * height)?;
//! // fill est.ray_buffer_mut()? with primary rays
//! est.estimate(&scene, width * height, QualityLevel::Normal, &output, &EstimateOptions::default())?;
//! ```

pub mod bdpt;
mod data;
pub mod path_tracing;

pub use bdpt::BdptEstimator;
pub use data::RenderData;
pub use path_tracing::PathTracingEstimator;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::{ActiveCount, Intersection, Ray};
use crate::device::{ComputeQueue, DeviceLimits, OutputBuffer};
use crate::kernels::NumericLimits;
use crate::scene::Scene;
use crate::util::{Error, Result};

pub use self::bdpt::BDPT_MAX_SUBPATH_LEN;

/// Quality hint forwarded to the shading kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    /// Skips next-event estimation and emission inside media.
    Rough,
    #[default]
    Normal,
    /// Starts Russian roulette two bounces later.
    Precise,
}

/// Optional per-slot random data an estimator may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomBufferType {
    /// Per-slot seeds, regenerated by `set_random_seed`.
    RandomSeed,
    /// Sobol direction numbers.
    SobolLut,
}

/// Optional side outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntermediateValue {
    /// Fraction of unoccluded light samples per pixel.
    Visibility,
}

/// Supplies radiance for primary rays that hit nothing.
pub trait MissedRayHandler: Sync {
    fn radiance(&self, ray: &Ray) -> Vec3;
}

impl<F: Fn(&Ray) -> Vec3 + Sync> MissedRayHandler for F {
    fn radiance(&self, ray: &Ray) -> Vec3 {
        self(ray)
    }
}

/// Per-call options for [`Estimator::estimate`].
#[derive(Clone, Copy, Default)]
pub struct EstimateOptions<'a> {
    /// Slot `i` writes `output[output_indices[i]]` instead of `output[i]`.
    pub use_output_indices: bool,
    /// Use compare-and-swap adds instead of plain read-modify-write.
    pub atomic_update: bool,
    /// Replaces environment shading of missed primary rays.
    pub missed_primary_rays: Option<&'a dyn MissedRayHandler>,
    /// Light subpaths traced for the whole frame this batch belongs to.
    /// Caustic splats are scaled by image pixels over this count. Defaults
    /// to the batch size.
    pub light_path_count: Option<usize>,
}

impl fmt::Debug for EstimateOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EstimateOptions")
            .field("use_output_indices", &self.use_output_indices)
            .field("atomic_update", &self.atomic_update)
            .field("missed_primary_rays", &self.missed_primary_rays.is_some())
            .field("light_path_count", &self.light_path_count)
            .finish()
    }
}

/// Result of [`Estimator::benchmark`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RayTracingStats {
    pub rays: usize,
    pub iterations: u32,
    pub primary_rays_per_sec: f64,
    pub secondary_rays_per_sec: f64,
    pub shadow_rays_per_sec: f64,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl fmt::Display for RayTracingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = |v: f64| v / 1.0e6;
        write!(
            f,
            "{} rays x {}: primary {:.2} Mrays/s, secondary {:.2} Mrays/s, shadow {:.2} Mrays/s",
            self.rays,
            self.iterations,
            m(self.primary_rays_per_sec),
            m(self.secondary_rays_per_sec),
            m(self.shadow_rays_per_sec)
        )
    }
}

/// Live-slot counts of one bounce of the last estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BounceRecord {
    pub bounce: u32,
    pub rays: usize,
    pub survivors: usize,
}

/// Estimator construction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConfig {
    pub max_bounces: u32,
    pub clamp_ceiling: f32,
    pub throughput_floor: f32,
    pub rr_start_bounce: u32,
    /// Vertices per BDPT subpath, at most [`BDPT_MAX_SUBPATH_LEN`].
    pub max_subpath_len: usize,
    pub limits: DeviceLimits,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        let numeric = NumericLimits::default();
        Self {
            max_bounces: 5,
            clamp_ceiling: numeric.clamp_ceiling,
            throughput_floor: numeric.throughput_floor,
            rr_start_bounce: numeric.rr_start_bounce,
            max_subpath_len: BDPT_MAX_SUBPATH_LEN,
            limits: DeviceLimits::default(),
        }
    }
}

impl EstimatorConfig {
    /// Reject configurations the kernels cannot be built for.
    pub fn validate(&self) -> Result<()> {
        if !(self.clamp_ceiling.is_finite() && self.clamp_ceiling > 0.0) {
            return Err(Error::KernelBuild(format!(
                "clamp ceiling must be positive and finite, got {}",
                self.clamp_ceiling
            )));
        }
        if !(self.throughput_floor.is_finite() && self.throughput_floor >= 0.0) {
            return Err(Error::KernelBuild(format!(
                "throughput floor must be non-negative, got {}",
                self.throughput_floor
            )));
        }
        if !(2..=BDPT_MAX_SUBPATH_LEN).contains(&self.max_subpath_len) {
            return Err(Error::KernelBuild(format!(
                "subpath length {} outside 2..={BDPT_MAX_SUBPATH_LEN}",
                self.max_subpath_len
            )));
        }
        if self.limits.max_allocation_bytes == 0 {
            return Err(Error::KernelBuild("device has no memory".into()));
        }
        Ok(())
    }

    pub fn numeric_limits(&self) -> NumericLimits {
        NumericLimits {
            clamp_ceiling: self.clamp_ceiling,
            throughput_floor: self.throughput_floor,
            rr_start_bounce: self.rr_start_bounce,
        }
    }
}

/// Estimator selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    #[default]
    PathTracing,
    Bdpt,
}

impl EstimatorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::PathTracing => "path_tracing",
            Self::Bdpt => "bdpt",
        }
    }

    pub fn create(self, config: EstimatorConfig) -> Result<Box<dyn Estimator>> {
        Ok(match self {
            Self::PathTracing => Box::new(PathTracingEstimator::new(config)?),
            Self::Bdpt => Box::new(BdptEstimator::new(config)?),
        })
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EstimatorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "path_tracing" | "pt" => Ok(Self::PathTracing),
            "bdpt" => Ok(Self::Bdpt),
            _ => Err(Error::invalid_argument(format!("unknown estimator '{s}'"))),
        }
    }
}

/// Wavefront radiance estimator.
///
/// The caller fills the primary rays through [`ray_buffer_mut`] and, with
/// `use_output_indices`, the output cells through
/// [`output_index_buffer_mut`]; [`estimate`] then adds radiance and one
/// sample count per slot into the output buffer.
///
/// [`ray_buffer_mut`]: Estimator::ray_buffer_mut
/// [`output_index_buffer_mut`]: Estimator::output_index_buffer_mut
/// [`estimate`]: Estimator::estimate
pub trait Estimator: Send {
    fn kind(&self) -> EstimatorKind;

    /// (Re)allocate every work buffer for exactly `size` slots.
    fn set_work_buffer_size(&mut self, size: usize) -> Result<()>;

    fn work_buffer_size(&self) -> usize;

    fn ray_buffer(&self) -> Result<&[Ray]>;

    fn ray_buffer_mut(&mut self) -> Result<&mut [Ray]>;

    fn output_index_buffer_mut(&mut self) -> Result<&mut [u32]>;

    /// Live ray count slot, written by tile setup and by compaction.
    fn ray_count_mut(&mut self) -> Result<&mut ActiveCount>;

    /// Nearest hits of the last [`trace_first_hit`](Estimator::trace_first_hit).
    fn first_hit_buffer(&self) -> Result<&[Intersection]>;

    fn estimate(
        &mut self,
        scene: &Scene,
        n: usize,
        quality: QualityLevel,
        output: &OutputBuffer,
        options: &EstimateOptions<'_>,
    ) -> Result<()>;

    /// Intersect the first `n` primary rays only.
    fn trace_first_hit(&mut self, scene: &Scene, n: usize) -> Result<()>;

    /// Timed intersection throughput over the current primary rays.
    fn benchmark(&mut self, scene: &Scene, n: usize) -> Result<RayTracingStats>;

    fn set_random_seed(&mut self, seed: u64);

    fn max_bounces(&self) -> u32;

    fn set_max_bounces(&mut self, bounces: u32);

    /// Number of completed estimates since the last reseed.
    fn sample_counter(&self) -> u32;

    fn has_random_buffer(&self, kind: RandomBufferType) -> bool;

    /// `None` when the buffer type is unsupported or nothing is allocated.
    fn random_buffer(&self, kind: RandomBufferType) -> Option<&[u32]>;

    fn supports_intermediate_value(&self, _value: IntermediateValue) -> bool {
        false
    }

    fn set_intermediate_value_buffer(
        &mut self,
        value: IntermediateValue,
        _buffer: Option<Arc<OutputBuffer>>,
    ) -> Result<()> {
        Err(Error::Unsupported(format!(
            "{value:?} output is not provided by the {} estimator",
            self.kind()
        )))
    }

    fn queue(&self) -> &ComputeQueue;

    /// Per-bounce live counts of the last estimate.
    fn bounce_log(&self) -> &[BounceRecord] {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(EstimatorConfig::default().validate().is_ok());
        let bad = EstimatorConfig {
            clamp_ceiling: f32::NAN,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::KernelBuild(_))));
        let bad = EstimatorConfig {
            max_subpath_len: 1,
            ..Default::default()
        };
        assert!(matches!(EstimatorKind::Bdpt.create(bad), Err(Error::KernelBuild(_))));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("bdpt".parse::<EstimatorKind>().unwrap(), EstimatorKind::Bdpt);
        assert_eq!("PT".parse::<EstimatorKind>().unwrap(), EstimatorKind::PathTracing);
        assert!("mlt".parse::<EstimatorKind>().is_err());
    }
}
