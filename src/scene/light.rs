//! Lights and the light selection distribution.

use diffuse_bsdf::{warp, Frame, PI};
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use super::geometry::{Geometry, Shape};
use crate::util::{luminance, safe_div_f32, PDF_EPSILON};

/// Distance given to shadow rays towards the environment.
pub const ENVIRONMENT_DISTANCE: f32 = 1e30;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Light {
    /// Emissive shape, one-sided along the face normal.
    Area { shape: u32, radiance: Vec3 },
    /// Isotropic point light.
    Point { position: Vec3, intensity: Vec3 },
    /// Constant radiance from every direction.
    Environment { radiance: Vec3 },
}

/// Light sampled from a reference point.
#[derive(Debug, Clone, Copy)]
pub struct LightSample {
    /// Unit direction from the reference point to the light.
    pub wi: Vec3,
    pub distance: f32,
    pub position: Vec3,
    pub normal: Option<Vec3>,
    pub radiance: Vec3,
    /// Solid-angle pdf at the reference point, selection excluded. For
    /// delta lights this is 1.
    pub pdf: f32,
    pub delta: bool,
}

/// Emission sampled from the light itself (light subpath start).
#[derive(Debug, Clone, Copy)]
pub struct EmissionSample {
    pub position: Vec3,
    pub normal: Option<Vec3>,
    pub dir: Vec3,
    pub radiance: Vec3,
    /// Area pdf of the position (1 for delta positions).
    pub pdf_pos: f32,
    /// Solid-angle pdf of the direction.
    pub pdf_dir: f32,
    pub delta_pos: bool,
}

impl Light {
    pub fn is_delta(&self) -> bool {
        matches!(self, Self::Point { .. })
    }

    pub fn is_environment(&self) -> bool {
        matches!(self, Self::Environment { .. })
    }

    /// Selection weight: emitted power, up to a shared constant.
    pub fn power(&self, shapes: &[Shape], scene_radius: f32) -> f32 {
        match self {
            Self::Area { shape, radiance } => {
                let area = shapes.get(*shape as usize).map_or(0.0, |s| s.area);
                luminance(*radiance) * area * PI
            }
            Self::Point { intensity, .. } => luminance(*intensity) * 4.0 * PI,
            Self::Environment { radiance } => {
                luminance(*radiance) * 4.0 * PI * PI * scene_radius * scene_radius
            }
        }
    }

    /// Sample incident light at `p`.
    pub fn sample_li(&self, geo: &Geometry, shapes: &[Shape], p: Vec3, u: Vec2) -> Option<LightSample> {
        match self {
            Self::Area { shape, radiance } => {
                let shape = shapes.get(*shape as usize)?;
                let (q, n) = geo.sample_shape(shape, u)?;
                let d = q - p;
                let dist2 = d.length_squared();
                if dist2 <= PDF_EPSILON {
                    return None;
                }
                let dist = dist2.sqrt();
                let wi = d / dist;
                let cos_l = -wi.dot(n);
                if cos_l <= 0.0 {
                    return None;
                }
                let pdf = safe_div_f32(dist2, cos_l * shape.area);
                (pdf > 0.0).then_some(LightSample {
                    wi,
                    distance: dist,
                    position: q,
                    normal: Some(n),
                    radiance: *radiance,
                    pdf,
                    delta: false,
                })
            }
            Self::Point { position, intensity } => {
                let d = *position - p;
                let dist2 = d.length_squared();
                if dist2 <= PDF_EPSILON {
                    return None;
                }
                let dist = dist2.sqrt();
                Some(LightSample {
                    wi: d / dist,
                    distance: dist,
                    position: *position,
                    normal: None,
                    radiance: *intensity / dist2,
                    pdf: 1.0,
                    delta: true,
                })
            }
            Self::Environment { radiance } => {
                let wi = warp::uniform_sphere(u);
                Some(LightSample {
                    wi,
                    distance: ENVIRONMENT_DISTANCE,
                    position: p + wi * ENVIRONMENT_DISTANCE,
                    normal: None,
                    radiance: *radiance,
                    pdf: warp::uniform_sphere_pdf(),
                    delta: false,
                })
            }
        }
    }

    /// Solid-angle pdf that [`sample_li`](Self::sample_li) produces the
    /// direction from `p` to `q` (a point with face normal `n` on this
    /// light). Delta lights give zero.
    pub fn pdf_li(&self, shapes: &[Shape], p: Vec3, q: Vec3, n: Vec3) -> f32 {
        match self {
            Self::Area { shape, .. } => {
                let Some(shape) = shapes.get(*shape as usize) else {
                    return 0.0;
                };
                let d = q - p;
                let dist2 = d.length_squared();
                let cos_l = (-d.dot(n) / dist2.sqrt()).max(0.0);
                safe_div_f32(dist2, cos_l * shape.area)
            }
            Self::Point { .. } => 0.0,
            Self::Environment { .. } => warp::uniform_sphere_pdf(),
        }
    }

    /// Sample an emitted ray. Environment lights are not supported here.
    pub fn sample_le(&self, geo: &Geometry, shapes: &[Shape], u_pos: Vec2, u_dir: Vec2) -> Option<EmissionSample> {
        match self {
            Self::Area { shape, radiance } => {
                let shape = shapes.get(*shape as usize)?;
                let (p, n) = geo.sample_shape(shape, u_pos)?;
                let local = warp::cosine_hemisphere(u_dir);
                let dir = Frame::from_normal(n).to_world(local).normalize_or_zero();
                let pdf_dir = warp::cosine_hemisphere_pdf(local.z);
                (pdf_dir > 0.0 && shape.area > 0.0).then_some(EmissionSample {
                    position: p,
                    normal: Some(n),
                    dir,
                    radiance: *radiance,
                    pdf_pos: 1.0 / shape.area,
                    pdf_dir,
                    delta_pos: false,
                })
            }
            Self::Point { position, intensity } => Some(EmissionSample {
                position: *position,
                normal: None,
                dir: warp::uniform_sphere(u_dir),
                radiance: *intensity,
                pdf_pos: 1.0,
                pdf_dir: warp::uniform_sphere_pdf(),
                delta_pos: true,
            }),
            Self::Environment { .. } => None,
        }
    }

    /// Area pdf of the emission position.
    pub fn pdf_le_pos(&self, shapes: &[Shape]) -> f32 {
        match self {
            Self::Area { shape, .. } => shapes
                .get(*shape as usize)
                .map_or(0.0, |s| safe_div_f32(1.0, s.area)),
            Self::Point { .. } => 1.0,
            Self::Environment { .. } => 0.0,
        }
    }

    /// Solid-angle pdf of emitting along `dir` from a point with normal `n`.
    pub fn pdf_le_dir(&self, n: Option<Vec3>, dir: Vec3) -> f32 {
        match (self, n) {
            (Self::Area { .. }, Some(n)) => warp::cosine_hemisphere_pdf(n.dot(dir)),
            (Self::Point { .. }, _) => warp::uniform_sphere_pdf(),
            _ => 0.0,
        }
    }
}

/// Discrete distribution used to pick one light per sample.
#[derive(Debug, Clone, Default)]
pub struct LightDistribution {
    /// Light index of each entry.
    entries: Vec<u32>,
    cdf: Vec<f32>,
    /// Selection pdf per light index (0 for lights not in the distribution).
    pdf: Vec<f32>,
}

impl LightDistribution {
    /// Build from (light index, weight) pairs over `light_count` lights.
    /// Falls back to uniform if every weight is zero.
    pub fn new(light_count: usize, weights: impl IntoIterator<Item = (usize, f32)>) -> Self {
        let items: Vec<(usize, f32)> = weights
            .into_iter()
            .filter(|&(i, _)| i < light_count)
            .map(|(i, w)| (i, if w.is_finite() { w.max(0.0) } else { 0.0 }))
            .collect();
        let mut pdf = vec![0.0; light_count];
        if items.is_empty() {
            return Self {
                entries: Vec::new(),
                cdf: Vec::new(),
                pdf,
            };
        }

        let total: f32 = items.iter().map(|&(_, w)| w).sum();
        let uniform = total <= 0.0;
        let weight = |w: f32| {
            if uniform {
                1.0 / items.len() as f32
            } else {
                w / total
            }
        };

        let mut running = 0.0;
        let mut entries = Vec::with_capacity(items.len());
        let mut cdf = Vec::with_capacity(items.len());
        for &(i, w) in &items {
            let p = weight(w);
            running += p;
            pdf[i] += p;
            entries.push(i as u32);
            cdf.push(running);
        }
        if let Some(last) = cdf.last_mut() {
            *last = 1.0;
        }
        Self { entries, cdf, pdf }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick a light. Returns (light index, selection pdf).
    pub fn sample(&self, u: f32) -> Option<(usize, f32)> {
        if self.entries.is_empty() {
            return None;
        }
        let k = self.cdf.partition_point(|&c| c <= u).min(self.entries.len() - 1);
        let light = self.entries[k] as usize;
        Some((light, self.pdf[light]))
    }

    pub fn pdf(&self, light: usize) -> f32 {
        self.pdf.get(light).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_proportional() {
        let d = LightDistribution::new(3, [(0, 1.0), (2, 3.0)]);
        assert_eq!(d.pdf(0), 0.25);
        assert_eq!(d.pdf(1), 0.0);
        assert_eq!(d.pdf(2), 0.75);
        assert_eq!(d.sample(0.1), Some((0, 0.25)));
        assert_eq!(d.sample(0.5), Some((2, 0.75)));
        assert_eq!(d.sample(0.9999), Some((2, 0.75)));
    }

    #[test]
    fn test_distribution_empty_and_zero_weights() {
        assert!(LightDistribution::new(0, []).sample(0.5).is_none());
        let d = LightDistribution::new(2, [(0, 0.0), (1, 0.0)]);
        assert_eq!(d.pdf(0), 0.5);
    }

    #[test]
    fn test_point_light_falloff() {
        let l = Light::Point {
            position: Vec3::new(0.0, 2.0, 0.0),
            intensity: Vec3::splat(4.0),
        };
        let s = l.sample_li(&Geometry::default(), &[], Vec3::ZERO, Vec2::ZERO).unwrap();
        assert!(s.delta);
        assert_eq!(s.radiance, Vec3::ONE);
        assert_eq!(s.wi, Vec3::Y);
    }
}
