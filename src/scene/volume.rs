//! Homogeneous participating media.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Homogeneous medium with a Henyey-Greenstein phase function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub sigma_a: Vec3,
    pub sigma_s: Vec3,
    /// Emitted radiance per unit absorption.
    pub emission: Vec3,
    /// HG asymmetry in (-1, 1).
    pub g: f32,
}

impl Volume {
    pub fn new(sigma_a: Vec3, sigma_s: Vec3, g: f32) -> Self {
        Self {
            sigma_a,
            sigma_s,
            emission: Vec3::ZERO,
            g,
        }
    }

    #[inline]
    pub fn sigma_t(&self) -> Vec3 {
        self.sigma_a + self.sigma_s
    }

    /// Scalar extinction used for distance sampling.
    #[inline]
    pub fn sampling_density(&self) -> f32 {
        let s = self.sigma_t();
        (s.x + s.y + s.z) / 3.0
    }

    #[inline]
    pub fn transmittance(&self, distance: f32) -> Vec3 {
        let s = self.sigma_t() * distance;
        Vec3::new((-s.x).exp(), (-s.y).exp(), (-s.z).exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transmittance() {
        let v = Volume::new(Vec3::splat(0.5), Vec3::splat(0.5), 0.0);
        assert_eq!(v.sampling_density(), 1.0);
        assert!((v.transmittance(1.0).x - (-1.0f32).exp()).abs() < 1e-6);
        assert_eq!(v.transmittance(0.0), Vec3::ONE);
    }
}
