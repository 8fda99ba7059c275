//! Henyey-Greenstein phase function.
//!
//! `g > 0` is forward scattering. `wo` points back along the incoming ray,
//! so forward scattering puts `wi` near `-wo`.

use glam::{Vec2, Vec3};
use std::f32::consts::PI;

use crate::Frame;

/// Phase function value, `cos_theta` measured between `wo` and `wi`.
pub fn henyey_greenstein(cos_theta: f32, g: f32) -> f32 {
    let denom = 1.0 + g * g + 2.0 * g * cos_theta;
    (1.0 - g * g) / (4.0 * PI * denom * denom.max(1e-8).sqrt())
}

/// Evaluate for a (wo, wi) pair. Phase functions are their own pdf.
pub fn eval(wo: Vec3, wi: Vec3, g: f32) -> f32 {
    henyey_greenstein(wo.dot(wi), g)
}

/// Sample `wi` given `wo`. Returns (wi, pdf).
pub fn sample(wo: Vec3, g: f32, u: Vec2) -> (Vec3, f32) {
    let cos_theta = if g.abs() < 1e-3 {
        1.0 - 2.0 * u.x
    } else {
        let sq = (1.0 - g * g) / (1.0 + g - 2.0 * g * u.x);
        -(1.0 + g * g - sq * sq) / (2.0 * g)
    };
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi = 2.0 * PI * u.y;
    let frame = Frame::from_normal(wo);
    let wi = frame
        .to_world(Vec3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta))
        .normalize_or_zero();
    (wi, henyey_greenstein(cos_theta, g))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isotropic_is_constant() {
        let a = henyey_greenstein(0.7, 0.0);
        let b = henyey_greenstein(-0.2, 0.0);
        assert!((a - b).abs() < 1e-6);
        assert!((a - 1.0 / (4.0 * PI)).abs() < 1e-6);
    }

    #[test]
    fn test_sample_pdf_consistent() {
        let wo = Vec3::new(0.0, 0.0, 1.0);
        let (wi, pdf) = sample(wo, 0.5, Vec2::new(0.25, 0.6));
        assert!((eval(wo, wi, 0.5) - pdf).abs() < 1e-4);
    }
}
