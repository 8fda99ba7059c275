//! Reference scattering functions for wavetrace shading kernels.
//!
//! Everything here works on world-space unit vectors. Directions follow the
//! usual convention: `wo` points away from the surface towards where the
//! light goes (the viewer for eye paths), `wi` points away from the surface
//! towards where the light comes from.
//!
//! ## Contents
//! - [`Frame`] - orthonormal basis around a normal
//! - [`lambert`] / [`mirror`] - the two reflection lobes
//! - [`phase`] - Henyey-Greenstein phase function
//! - [`warp`] - square-to-domain sample warps
//! - [`mis`] - balance and power heuristics

pub mod warp;
pub mod phase;
pub mod mis;

use glam::{Vec2, Vec3};

pub use std::f32::consts::{FRAC_1_PI, PI};

/// Orthonormal basis with `n` as the local z axis.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub s: Vec3,
    pub t: Vec3,
    pub n: Vec3,
}

impl Frame {
    /// Build a frame around a unit normal (Duff et al. branchless ONB).
    pub fn from_normal(n: Vec3) -> Self {
        let sign = 1.0f32.copysign(n.z);
        let a = -1.0 / (sign + n.z);
        let b = n.x * n.y * a;
        let s = Vec3::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x);
        let t = Vec3::new(b, sign + n.y * n.y * a, -n.y);
        Self { s, t, n }
    }

    #[inline]
    pub fn to_world(&self, v: Vec3) -> Vec3 {
        self.s * v.x + self.t * v.y + self.n * v.z
    }

    #[inline]
    pub fn to_local(&self, v: Vec3) -> Vec3 {
        Vec3::new(v.dot(self.s), v.dot(self.t), v.dot(self.n))
    }
}

/// Result of sampling a lobe.
#[derive(Debug, Clone, Copy)]
pub struct LobeSample {
    /// Sampled incident direction (world space).
    pub wi: Vec3,
    /// Lobe value for (wo, wi).
    pub f: Vec3,
    /// Solid-angle pdf of `wi`. For delta lobes this is 1 by convention.
    pub pdf: f32,
    /// Sampled from a delta distribution.
    pub delta: bool,
}

/// Two-sided Lambertian reflection.
pub mod lambert {
    use super::*;

    #[inline]
    fn same_side(wo: Vec3, wi: Vec3, n: Vec3) -> bool {
        wo.dot(n) * wi.dot(n) > 0.0
    }

    pub fn eval(albedo: Vec3, wo: Vec3, wi: Vec3, n: Vec3) -> Vec3 {
        if same_side(wo, wi, n) {
            albedo * FRAC_1_PI
        } else {
            Vec3::ZERO
        }
    }

    pub fn pdf(wo: Vec3, wi: Vec3, n: Vec3) -> f32 {
        if same_side(wo, wi, n) {
            wi.dot(n).abs() * FRAC_1_PI
        } else {
            0.0
        }
    }

    /// Cosine-weighted sample on the hemisphere of `wo`.
    pub fn sample(albedo: Vec3, wo: Vec3, n: Vec3, u: Vec2) -> Option<LobeSample> {
        let side = if wo.dot(n) < 0.0 { -n } else { n };
        let local = warp::cosine_hemisphere(u);
        let wi = Frame::from_normal(side).to_world(local).normalize_or_zero();
        let pdf = warp::cosine_hemisphere_pdf(local.z);
        if pdf <= 0.0 || wi == Vec3::ZERO {
            return None;
        }
        Some(LobeSample {
            wi,
            f: albedo * FRAC_1_PI,
            pdf,
            delta: false,
        })
    }
}

/// Ideal specular reflection.
pub mod mirror {
    use super::*;

    #[inline]
    pub fn reflect(wo: Vec3, n: Vec3) -> Vec3 {
        2.0 * wo.dot(n) * n - wo
    }

    /// Deterministic reflection. The returned `f` already includes the
    /// `1 / |cos|` factor so that `f * |cos| / pdf` equals the reflectance.
    pub fn sample(reflectance: Vec3, wo: Vec3, n: Vec3) -> Option<LobeSample> {
        let wi = reflect(wo, n).normalize_or_zero();
        let cos = wi.dot(n).abs();
        if cos <= 1e-6 {
            return None;
        }
        Some(LobeSample {
            wi,
            f: reflectance / cos,
            pdf: 1.0,
            delta: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_is_orthonormal() {
        for n in [Vec3::Z, -Vec3::Z, Vec3::X, Vec3::new(0.3, -0.4, 0.866).normalize()] {
            let f = Frame::from_normal(n);
            assert!(f.s.dot(f.t).abs() < 1e-5);
            assert!(f.s.dot(f.n).abs() < 1e-5);
            assert!((f.s.length() - 1.0).abs() < 1e-5);
            let v = Vec3::new(0.2, 0.5, 0.7);
            assert!((f.to_local(f.to_world(v)) - v).length() < 1e-5);
        }
    }

    #[test]
    fn test_lambert_sample_matches_pdf() {
        let n = Vec3::Y;
        let wo = Vec3::new(0.0, 1.0, 1.0).normalize();
        let s = lambert::sample(Vec3::ONE, wo, n, Vec2::new(0.3, 0.7)).unwrap();
        assert!(s.wi.dot(n) > 0.0);
        assert!((s.pdf - lambert::pdf(wo, s.wi, n)).abs() < 1e-5);
        assert_eq!(lambert::eval(Vec3::ONE, wo, -s.wi, n), Vec3::ZERO);
    }

    #[test]
    fn test_mirror_reflects() {
        let n = Vec3::Y;
        let wo = Vec3::new(1.0, 1.0, 0.0).normalize();
        let s = mirror::sample(Vec3::ONE, wo, n).unwrap();
        assert!((s.wi - Vec3::new(-1.0, 1.0, 0.0).normalize()).length() < 1e-5);
        assert!(s.delta);
    }
}
