//! Ray and intersection records.
//!
//! Both are `Pod` so that a buffer of them can be snapshotted as raw bytes,
//! the same way a device buffer would be read back.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Visibility mask bits. A ray only sees shapes whose mask overlaps its own.
pub mod visibility {
    pub const PRIMARY: u32 = 1 << 0;
    pub const SECONDARY: u32 = 1 << 1;
    pub const SHADOW: u32 = 1 << 2;
    /// Medium boundaries only.
    pub const INTERFACE: u32 = 1 << 3;
    pub const ALL: u32 = PRIMARY | SECONDARY | SHADOW;
}

/// Ray slot (48 bytes).
///
/// - `o`: xyz = origin, w = max distance
/// - `d`: xyz = direction, w = time
/// - `extra`: x = solid-angle pdf of the strategy that produced the ray,
///   y = distance already travelled from the vertex that sampled it
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Ray {
    pub o: [f32; 4],
    pub d: [f32; 4],
    pub extra: [f32; 2],
    pub mask: u32,
    pub active: u32,
}

impl Ray {
    /// Active ray with a unit direction.
    pub fn new(origin: Vec3, dir: Vec3, max_t: f32, mask: u32) -> Self {
        Self {
            o: origin.extend(max_t).to_array(),
            d: dir.extend(0.0).to_array(),
            extra: [0.0; 2],
            mask,
            active: 1,
        }
    }

    /// Inactive slot; intersection and occlusion queries report a miss.
    pub const INACTIVE: Self = Self {
        o: [0.0; 4],
        d: [0.0; 4],
        extra: [0.0; 2],
        mask: 0,
        active: 0,
    };

    pub fn with_pdf(mut self, pdf: f32) -> Self {
        self.extra[0] = pdf;
        self
    }

    pub fn with_travelled(mut self, distance: f32) -> Self {
        self.extra[1] = distance;
        self
    }

    #[inline]
    pub fn origin(&self) -> Vec3 {
        Vec3::new(self.o[0], self.o[1], self.o[2])
    }

    #[inline]
    pub fn direction(&self) -> Vec3 {
        Vec3::new(self.d[0], self.d[1], self.d[2])
    }

    #[inline]
    pub fn max_t(&self) -> f32 {
        self.o[3]
    }

    #[inline]
    pub fn pdf(&self) -> f32 {
        self.extra[0]
    }

    #[inline]
    pub fn travelled(&self) -> f32 {
        self.extra[1]
    }

    /// Vertex that sampled this ray. Differs from the origin after the ray
    /// was continued through an invisible interface.
    #[inline]
    pub fn source(&self) -> Vec3 {
        self.origin() - self.direction() * self.extra[1]
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active != 0
    }

    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin() + self.direction() * t
    }
}

/// Intersection record (32 bytes), one per ray slot.
///
/// `uvwt`: xy = barycentrics of vertices 1 and 2, w = hit distance.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Intersection {
    pub shape_id: i32,
    pub prim_id: i32,
    pub _pad: [u32; 2],
    pub uvwt: [f32; 4],
}

impl Default for Intersection {
    fn default() -> Self {
        Self::MISS
    }
}

impl Intersection {
    pub const MISS: Self = Self {
        shape_id: -1,
        prim_id: -1,
        _pad: [0; 2],
        uvwt: [0.0, 0.0, 0.0, f32::INFINITY],
    };

    #[inline]
    pub fn is_hit(&self) -> bool {
        self.shape_id >= 0
    }

    #[inline]
    pub fn t(&self) -> f32 {
        self.uvwt[3]
    }

    #[inline]
    pub fn barycentrics(&self) -> Vec2 {
        Vec2::new(self.uvwt[0], self.uvwt[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(std::mem::size_of::<Ray>(), 48);
        assert_eq!(std::mem::size_of::<Intersection>(), 32);
    }

    #[test]
    fn test_ray_accessors() {
        let r = Ray::new(Vec3::ONE, Vec3::Z, 10.0, visibility::ALL).with_pdf(0.5);
        assert_eq!(r.at(2.0), Vec3::new(1.0, 1.0, 3.0));
        assert_eq!(r.max_t(), 10.0);
        assert_eq!(r.pdf(), 0.5);
        let r = r.with_travelled(2.0);
        assert_eq!(r.source(), Vec3::new(1.0, 1.0, -1.0));
        assert!(r.is_active());
        assert!(!Ray::INACTIVE.is_active());
        assert!(!Intersection::default().is_hit());
    }
}
