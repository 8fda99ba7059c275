//! Triangle geometry and shapes.

use diffuse_bsdf::warp;
use glam::{Vec2, Vec3};

/// A group of triangles sharing a material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shape {
    pub first_triangle: u32,
    pub triangle_count: u32,
    pub material: u32,
    /// Medium enclosed by this shape's boundary.
    pub volume: Option<u32>,
    /// Visibility mask (see [`crate::core::visibility`]).
    pub mask: u32,
    pub area: f32,
    /// Area light attached to this shape.
    pub light: Option<u32>,
}

/// Shading-ready description of a hit point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePoint {
    pub position: Vec3,
    /// Interpolated normal, on the same side as the geometric normal.
    pub shading_normal: Vec3,
    /// Face normal from the triangle winding.
    pub geometric_normal: Vec3,
    pub uv: Vec2,
    pub shape: usize,
    pub material: usize,
    pub prim: usize,
}

/// Scene-wide indexed triangle storage.
#[derive(Debug, Clone, Default)]
pub struct Geometry {
    pub positions: Vec<Vec3>,
    /// Per-vertex normals; zero vectors mean "use the face normal".
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub triangles: Vec<[u32; 3]>,
    pub triangle_shape: Vec<u32>,
    /// Running area fraction inside the owning shape, ends at 1.
    pub triangle_cdf: Vec<f32>,
}

impl Geometry {
    #[inline]
    pub fn corners(&self, prim: usize) -> (Vec3, Vec3, Vec3) {
        let t = self.triangles[prim];
        (
            self.positions[t[0] as usize],
            self.positions[t[1] as usize],
            self.positions[t[2] as usize],
        )
    }

    pub fn triangle_area(&self, prim: usize) -> f32 {
        let (a, b, c) = self.corners(prim);
        (b - a).cross(c - a).length() * 0.5
    }

    /// Position, shading normal, geometric normal and uv at barycentrics
    /// (b1, b2) of triangle `prim`.
    pub fn interpolate(&self, prim: usize, bary: Vec2) -> (Vec3, Vec3, Vec3, Vec2) {
        let t = self.triangles[prim];
        let (a, b, c) = self.corners(prim);
        let w = Vec3::new(1.0 - bary.x - bary.y, bary.x, bary.y);
        let position = a * w.x + b * w.y + c * w.z;
        let ng = (b - a).cross(c - a).normalize_or_zero();

        let n = |i: usize| self.normals.get(t[i] as usize).copied().unwrap_or(Vec3::ZERO);
        let ns = (n(0) * w.x + n(1) * w.y + n(2) * w.z).normalize_or_zero();
        let ns = if ns == Vec3::ZERO {
            ng
        } else if ns.dot(ng) < 0.0 {
            -ns
        } else {
            ns
        };

        let uv = |i: usize| self.uvs.get(t[i] as usize).copied().unwrap_or(Vec2::ZERO);
        let uv = uv(0) * w.x + uv(1) * w.y + uv(2) * w.z;
        (position, ns, ng, uv)
    }

    /// Uniform point on a shape by area. Returns (position, face normal).
    pub fn sample_shape(&self, shape: &Shape, u: Vec2) -> Option<(Vec3, Vec3)> {
        let first = shape.first_triangle as usize;
        let count = shape.triangle_count as usize;
        if count == 0 {
            return None;
        }
        let cdf = &self.triangle_cdf[first..first + count];
        let k = cdf.partition_point(|&c| c <= u.x).min(count - 1);
        let lo = if k == 0 { 0.0 } else { cdf[k - 1] };
        let width = cdf[k] - lo;
        let ux = if width > 0.0 { ((u.x - lo) / width).clamp(0.0, 1.0) } else { 0.5 };

        let prim = first + k;
        let (a, b, c) = self.corners(prim);
        let bary = warp::uniform_triangle(Vec2::new(ux, u.y));
        let p = a * bary.x + b * bary.y + c * (1.0 - bary.x - bary.y);
        let n = (b - a).cross(c - a).normalize_or_zero();
        Some((p, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> (Geometry, Shape) {
        let geo = Geometry {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0), Vec3::Y],
            normals: vec![Vec3::ZERO; 4],
            uvs: vec![Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y],
            triangles: vec![[0, 1, 2], [0, 2, 3]],
            triangle_shape: vec![0, 0],
            triangle_cdf: vec![0.5, 1.0],
        };
        let shape = Shape {
            first_triangle: 0,
            triangle_count: 2,
            material: 0,
            volume: None,
            mask: u32::MAX,
            area: 1.0,
            light: None,
        };
        (geo, shape)
    }

    #[test]
    fn test_interpolate_uses_face_normal_without_vertex_normals() {
        let (geo, _) = quad();
        let (p, ns, ng, uv) = geo.interpolate(0, Vec2::new(0.5, 0.25));
        assert_eq!(ng, Vec3::Z);
        assert_eq!(ns, Vec3::Z);
        assert!((p - Vec3::new(0.75, 0.25, 0.0)).length() < 1e-6);
        assert!((uv - Vec2::new(0.75, 0.25)).length() < 1e-6);
    }

    #[test]
    fn test_sample_shape_stays_on_shape() {
        let (geo, shape) = quad();
        for i in 0..8 {
            let u = Vec2::new(i as f32 / 8.0, 0.3);
            let (p, n) = geo.sample_shape(&shape, u).unwrap();
            assert!(p.x >= -1e-6 && p.x <= 1.0 + 1e-6 && p.y >= -1e-6 && p.y <= 1.0 + 1e-6);
            assert_eq!(n, Vec3::Z);
        }
    }
}
