//! Surface materials.

use diffuse_bsdf::{lambert, mirror, LobeSample};
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Reference material set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Material {
    /// Two-sided Lambertian reflector.
    Diffuse { albedo: Vec3 },
    /// Ideal mirror.
    Mirror { reflectance: Vec3 },
    /// One-sided emitter (front face = geometric normal side), black BSDF.
    Emissive { radiance: Vec3 },
    /// Invisible interface, used as the boundary of a participating medium.
    Passthrough,
}

impl Material {
    pub fn diffuse(albedo: Vec3) -> Self {
        Self::Diffuse { albedo }
    }

    pub fn mirror(reflectance: Vec3) -> Self {
        Self::Mirror { reflectance }
    }

    pub fn emissive(radiance: Vec3) -> Self {
        Self::Emissive { radiance }
    }

    /// Radiance leaving the surface towards `wo` (geometric normal `ng`).
    pub fn emission(&self, wo: Vec3, ng: Vec3) -> Vec3 {
        match self {
            Self::Emissive { radiance } if wo.dot(ng) > 0.0 => *radiance,
            _ => Vec3::ZERO,
        }
    }

    pub fn is_emissive(&self) -> bool {
        matches!(self, Self::Emissive { .. })
    }

    /// Scattering is a delta distribution.
    pub fn is_delta(&self) -> bool {
        matches!(self, Self::Mirror { .. })
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough)
    }

    /// Surface colour for the albedo AOV.
    pub fn albedo(&self) -> Vec3 {
        match self {
            Self::Diffuse { albedo } => *albedo,
            Self::Mirror { reflectance } => *reflectance,
            Self::Emissive { radiance } => radiance.normalize_or_zero(),
            Self::Passthrough => Vec3::ZERO,
        }
    }

    /// BSDF value. Delta lobes evaluate to zero.
    pub fn eval(&self, wo: Vec3, wi: Vec3, n: Vec3) -> Vec3 {
        match self {
            Self::Diffuse { albedo } => lambert::eval(*albedo, wo, wi, n),
            _ => Vec3::ZERO,
        }
    }

    /// Solid-angle pdf of sampling `wi` given `wo`. Delta lobes give zero.
    pub fn pdf(&self, wo: Vec3, wi: Vec3, n: Vec3) -> f32 {
        match self {
            Self::Diffuse { .. } => lambert::pdf(wo, wi, n),
            _ => 0.0,
        }
    }

    pub fn sample(&self, wo: Vec3, n: Vec3, u: Vec2) -> Option<LobeSample> {
        match self {
            Self::Diffuse { albedo } => lambert::sample(*albedo, wo, n, u),
            Self::Mirror { reflectance } => mirror::sample(*reflectance, wo, n),
            Self::Emissive { .. } | Self::Passthrough => None,
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::Diffuse {
            albedo: Vec3::splat(0.8),
        }
    }
}
