//! BVH node and bounds types.
//!
//! Flat array layout:
//! - 32-byte nodes (two per cache line)
//! - leaves reference a contiguous range of the reordered triangle list

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Bounds of a triangle.
    pub fn from_triangle(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self {
            min: a.min(b).min(c),
            max: a.max(b).max(c),
        }
    }

    #[inline]
    pub fn grow_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// Surface area (SAH cost).
    #[inline]
    pub fn area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let d = self.max - self.min;
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    #[inline]
    pub fn centroid(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Radius of the bounding sphere around the centroid.
    pub fn radius(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            (self.max - self.min).length() * 0.5
        }
    }

    /// Slab test. Returns the entry distance if the box is hit within
    /// `[0, t_max]`.
    #[inline]
    pub fn hit(&self, origin: Vec3, inv_dir: Vec3, t_max: f32) -> Option<f32> {
        let t0 = (self.min - origin) * inv_dir;
        let t1 = (self.max - origin) * inv_dir;
        let t_near = t0.min(t1).max_element().max(0.0);
        let t_far = t0.max(t1).min_element().min(t_max);
        (t_near <= t_far).then_some(t_near)
    }
}

/// Flat BVH node (32 bytes).
///
/// Internal node: `left_or_first` = left child index, `count` = 0; the
/// right child is `left_or_first + 1`.
/// Leaf node: `left_or_first` = first triangle, `count` > 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left_or_first: u32,
    pub aabb_max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    pub fn new(bounds: &Aabb, left_or_first: u32, count: u32) -> Self {
        Self {
            aabb_min: bounds.min.to_array(),
            left_or_first,
            aabb_max: bounds.max.to_array(),
            count,
        }
    }

    #[inline]
    pub fn bounds(&self) -> Aabb {
        Aabb {
            min: Vec3::from_array(self.aabb_min),
            max: Vec3::from_array(self.aabb_max),
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_grow_and_area() {
        let mut b = Aabb::EMPTY;
        assert!(b.is_empty());
        assert_eq!(b.area(), 0.0);
        b.grow_point(Vec3::ZERO);
        b.grow_point(Vec3::ONE);
        assert_eq!(b.area(), 6.0);
        assert_eq!(b.centroid(), Vec3::splat(0.5));
    }

    #[test]
    fn test_slab_hit() {
        let b = Aabb {
            min: Vec3::splat(-1.0),
            max: Vec3::splat(1.0),
        };
        let origin = Vec3::new(0.0, 0.0, -5.0);
        let inv = Vec3::new(0.0, 0.0, 1.0).recip();
        assert_eq!(b.hit(origin, inv, 100.0), Some(4.0));
        assert_eq!(b.hit(origin, inv, 3.0), None);
        let inv_away = Vec3::new(0.0, 0.0, -1.0).recip();
        assert_eq!(b.hit(origin, inv_away, 100.0), None);
    }
}
