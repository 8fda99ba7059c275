//! Camera and its projections.
//!
//! The image plane sits at distance 1 along `forward`. Raster coordinates
//! run from (0, 0) at the top-left corner to (width, height). Projection,
//! importance and directional pdfs are only defined for the pinhole
//! projection.

use diffuse_bsdf::warp;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::{visibility, Ray};
use crate::util::{Error, Result};

/// Far distance given to primary rays.
pub const CAMERA_FAR: f32 = 1e30;

/// How primary rays leave the camera.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Projection {
    /// Pinhole at `position`.
    #[default]
    Perspective,
    /// Thin lens of radius `aperture`, sharp at `focus_distance` along the
    /// view axis.
    PerspectiveDof { aperture: f32, focus_distance: f32 },
    /// Parallel rays along `forward`; `height` is the world-space image
    /// height.
    Orthographic { height: f32 },
}

impl Projection {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Perspective => Ok(()),
            Self::PerspectiveDof {
                aperture,
                focus_distance,
            } => {
                if !(aperture.is_finite() && aperture >= 0.0) {
                    return Err(Error::invalid_argument(format!("aperture {aperture}")));
                }
                if !(focus_distance.is_finite() && focus_distance > 0.0) {
                    return Err(Error::invalid_argument(format!("focus distance {focus_distance}")));
                }
                Ok(())
            }
            Self::Orthographic { height } if height.is_finite() && height > 0.0 => Ok(()),
            Self::Orthographic { height } => Err(Error::invalid_argument(format!("orthographic height {height}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub position: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    /// tan(fov_y / 2)
    pub tan_half_fov: f32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub projection: Projection,
}

impl Camera {
    /// Camera at `eye` looking at `target`, vertical fov in degrees.
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3, fov_y_deg: f32, width: u32, height: u32) -> Self {
        let forward = (target - eye).normalize_or_zero();
        let right = forward.cross(up).normalize_or_zero();
        let up = right.cross(forward);
        Self {
            position: eye,
            forward,
            right,
            up,
            tan_half_fov: (fov_y_deg.to_radians() * 0.5).tan(),
            width: width.max(1),
            height: height.max(1),
            projection: Projection::Perspective,
        }
    }

    /// Orthographic camera at `eye` looking at `target`; `view_height` is
    /// the world-space height of the image.
    pub fn orthographic(eye: Vec3, target: Vec3, up: Vec3, view_height: f32, width: u32, height: u32) -> Self {
        Self::look_at(eye, target, up, 45.0, width, height).with_projection(Projection::Orthographic {
            height: view_height,
        })
    }

    /// Same view through a thin lens.
    pub fn with_depth_of_field(self, aperture: f32, focus_distance: f32) -> Self {
        self.with_projection(Projection::PerspectiveDof {
            aperture,
            focus_distance,
        })
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// All primary rays start at `position`, so light paths can be joined
    /// to the camera directly.
    #[inline]
    pub fn is_pinhole(&self) -> bool {
        match self.projection {
            Projection::Perspective => true,
            Projection::PerspectiveDof { aperture, .. } => aperture <= 0.0,
            Projection::Orthographic { .. } => false,
        }
    }

    #[inline]
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Same view at another resolution.
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    /// Image plane area at distance 1.
    #[inline]
    pub fn image_plane_area(&self) -> f32 {
        let h = 2.0 * self.tan_half_fov;
        h * h * self.aspect()
    }

    /// Primary ray through a continuous raster position. `lens` is a
    /// uniform sample on the unit square, used by the thin lens only.
    pub fn generate_ray(&self, raster: Vec2, lens: Vec2) -> Ray {
        let ndc = Vec2::new(
            raster.x / self.width as f32 * 2.0 - 1.0,
            1.0 - raster.y / self.height as f32 * 2.0,
        );
        let pinhole = (self.forward
            + self.right * ndc.x * self.tan_half_fov * self.aspect()
            + self.up * ndc.y * self.tan_half_fov)
            .normalize();
        let (origin, dir) = match self.projection {
            Projection::Perspective => (self.position, pinhole),
            Projection::PerspectiveDof {
                aperture,
                focus_distance,
            } => {
                let focus = self.position + pinhole * (focus_distance / pinhole.dot(self.forward));
                let disk = warp::concentric_disk(lens) * aperture;
                let origin = self.position + self.right * disk.x + self.up * disk.y;
                let dir = (focus - origin).normalize_or_zero();
                if dir == Vec3::ZERO {
                    (self.position, pinhole)
                } else {
                    (origin, dir)
                }
            }
            Projection::Orthographic { height } => {
                let half = 0.5 * height;
                let origin = self.position + self.right * ndc.x * half * self.aspect() + self.up * ndc.y * half;
                (origin, self.forward)
            }
        };
        Ray::new(origin, dir, CAMERA_FAR, visibility::PRIMARY)
    }

    /// Raster position of a world point seen through the pinhole, `None`
    /// if outside the frustum.
    pub fn project(&self, p: Vec3) -> Option<Vec2> {
        let d = p - self.position;
        let z = d.dot(self.forward);
        if z <= 1e-6 {
            return None;
        }
        let x = d.dot(self.right) / (z * self.tan_half_fov * self.aspect());
        let y = d.dot(self.up) / (z * self.tan_half_fov);
        if x.abs() > 1.0 + 1e-5 || y.abs() > 1.0 + 1e-5 {
            return None;
        }
        Some(Vec2::new(
            (x + 1.0) * 0.5 * self.width as f32,
            (1.0 - y) * 0.5 * self.height as f32,
        ))
    }

    /// Raster cell index of a raster position.
    pub fn raster_index(&self, raster: Vec2) -> Option<usize> {
        let x = raster.x.floor();
        let y = raster.y.floor();
        if x < 0.0 || y < 0.0 || x >= self.width as f32 || y >= self.height as f32 {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    /// Importance emitted along `dir` (unit, world space). Normalised so that
    /// it integrates to one over the image plane.
    pub fn importance(&self, dir: Vec3) -> f32 {
        if !self.is_pinhole() {
            return 0.0;
        }
        let cos = dir.dot(self.forward);
        if cos <= 0.0 || self.project(self.position + dir).is_none() {
            return 0.0;
        }
        let cos2 = cos * cos;
        1.0 / (self.image_plane_area() * cos2 * cos2)
    }

    /// Solid-angle pdf of generating `dir` by uniform image-plane sampling.
    /// Zero for projections without a single pinhole.
    pub fn pdf_dir(&self, dir: Vec3) -> f32 {
        if !self.is_pinhole() {
            return 0.0;
        }
        let cos = dir.dot(self.forward);
        if cos <= 0.0 || self.project(self.position + dir).is_none() {
            return 0.0;
        }
        1.0 / (self.image_plane_area() * cos * cos * cos)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::look_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y, 45.0, 256, 256)
    }
}
