//! Shading kernels.
//!
//! Every kernel is a plain function over slot-indexed buffers plus a
//! [`KernelContext`]. Kernels never launch anything themselves; the
//! estimators submit them through the compute queue in bounce order.
//!
//! Writes follow one pattern: slot-indexed outputs are written in parallel,
//! per-pixel path updates are returned and scattered afterwards, radiance
//! goes straight into the output buffer through an [`OutputTarget`].

pub mod bdpt;
pub mod camera;
pub mod path_tracing;
pub mod rng;

pub use rng::{Sampler, Stream};

use glam::Vec3;

use crate::device::{AccumulateMode, OutputBuffer};
use crate::estimator::QualityLevel;
use crate::scene::Scene;
use crate::util::sanitize_radiance;

/// Numeric limits shared by the shading kernels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericLimits {
    /// Per-channel ceiling for a single contribution.
    pub clamp_ceiling: f32,
    /// Paths whose throughput drops below this are killed.
    pub throughput_floor: f32,
    /// First bounce at which Russian roulette may terminate a path.
    pub rr_start_bounce: u32,
}

impl Default for NumericLimits {
    fn default() -> Self {
        Self {
            clamp_ceiling: 1.0e4,
            throughput_floor: 1.0e-6,
            rr_start_bounce: 3,
        }
    }
}

/// Per-launch constants.
#[derive(Clone, Copy)]
pub struct KernelContext<'a> {
    pub scene: &'a Scene,
    pub bounce: u32,
    pub max_bounces: u32,
    pub sample: u32,
    pub launch_seed: u32,
    pub quality: QualityLevel,
    pub limits: NumericLimits,
}

impl KernelContext<'_> {
    #[inline]
    pub fn sampler(&self, slot_seed: u32, stream: Stream) -> Sampler {
        Sampler::new(slot_seed, self.launch_seed, self.sample, self.bounce, stream)
    }

    /// Bounce from which Russian roulette applies at this quality.
    #[inline]
    pub fn roulette_start(&self) -> u32 {
        match self.quality {
            QualityLevel::Precise => self.limits.rr_start_bounce + 2,
            _ => self.limits.rr_start_bounce,
        }
    }

    /// Rays spawned at this bounce are never traced.
    #[inline]
    pub fn is_last_pass(&self) -> bool {
        self.bounce + 1 >= self.max_bounces.max(1)
    }

    #[inline]
    pub fn at_bounce(self, bounce: u32) -> Self {
        Self { bounce, ..self }
    }
}

/// Destination of per-pixel contributions.
#[derive(Clone, Copy)]
pub struct OutputTarget<'a> {
    pub buffer: &'a OutputBuffer,
    /// Output cell per pixel. Empty means pixel `i` writes cell `i`.
    pub indices: &'a [u32],
    pub mode: AccumulateMode,
    pub clamp_ceiling: f32,
}

impl OutputTarget<'_> {
    #[inline]
    pub fn cell(&self, pixel: usize) -> usize {
        match self.indices.get(pixel) {
            Some(&c) => c as usize,
            None => pixel,
        }
    }

    /// Add sanitised radiance for `pixel`.
    #[inline]
    pub fn add(&self, pixel: usize, rgb: Vec3) {
        let rgb = sanitize_radiance(rgb, self.clamp_ceiling);
        if rgb != Vec3::ZERO {
            self.buffer.add_radiance(self.cell(pixel), rgb, self.mode);
        }
    }

    /// Add sanitised radiance straight to output cell `cell`, atomically.
    /// Cells outside the buffer are counted by [`OutputBuffer::dropped`].
    #[inline]
    pub fn splat(&self, cell: usize, rgb: Vec3) {
        let rgb = sanitize_radiance(rgb, self.clamp_ceiling);
        if rgb != Vec3::ZERO {
            self.buffer.add_radiance(cell, rgb, AccumulateMode::Atomic);
        }
    }

    #[inline]
    pub fn add_samples(&self, pixel: usize, count: f32) {
        self.buffer.add_samples(self.cell(pixel), count, self.mode);
    }
}

/// Largest channel.
#[inline]
pub(crate) fn max_component(c: Vec3) -> f32 {
    c.x.max(c.y).max(c.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_each_deposit_is_clamped_on_its_own() {
        let out = OutputBuffer::new(3);
        let target = OutputTarget {
            buffer: &out,
            indices: &[2, 0],
            mode: AccumulateMode::Atomic,
            clamp_ceiling: 1.5,
        };
        target.add(0, Vec3::new(100.0, 0.5, f32::NAN));
        target.add(0, Vec3::new(100.0, -3.0, f32::INFINITY));
        target.splat(1, Vec3::splat(7.0));
        assert_eq!(out.get(2), Vec4::new(3.0, 0.5, 0.0, 0.0));
        assert_eq!(out.get(1), Vec4::new(1.5, 1.5, 1.5, 0.0));
        // Pixel 1 maps to cell 0; pixels past the index list write their
        // own cell.
        target.add_samples(1, 1.0);
        target.add_samples(2, 1.0);
        assert_eq!(out.get(0).w, 1.0);
        assert_eq!(out.get(2).w, 1.0);

        target.splat(3, Vec3::ONE);
        assert_eq!(out.dropped(), 1);
    }
}
