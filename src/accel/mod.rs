//! Intersection service.
//!
//! The estimators only see [`IntersectionService`]: batched nearest-hit and
//! occlusion queries bounded by the live slot count. [`BvhIntersector`] is
//! the reference implementation.
//!
//! ## Architecture
//! ```text
//! Scene triangles → bounds → SAH BVH build → flat node array → parallel traversal
//! ```

pub mod bvh;
pub mod build;
pub mod traverse;

pub use bvh::{Aabb, BvhNode};
pub use build::{build_bvh, Bvh};
pub use traverse::BvhIntersector;

use crate::core::{ActiveCount, Intersection, Ray};

/// Batched ray queries.
///
/// Both queries read `rays[..live]` and write the matching prefix of the
/// output; entries past `live` are left untouched. Inactive rays miss.
pub trait IntersectionService: Send + Sync {
    /// Nearest hit per ray. Misses get [`Intersection::MISS`].
    fn query_intersection(&self, rays: &[Ray], live: ActiveCount, hits: &mut [Intersection]);

    /// Any hit per ray within its max distance: 1 = occluded, 0 = clear.
    fn query_occlusion(&self, rays: &[Ray], live: ActiveCount, occluded: &mut [u32]);

    /// Short name for logs.
    fn name(&self) -> &str {
        "custom"
    }
}
