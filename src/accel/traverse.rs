//! Reference BVH intersector.

use glam::Vec3;
use rayon::prelude::*;

use super::build::{build_bvh, Bvh};
use super::bvh::Aabb;
use super::IntersectionService;
use crate::core::{ActiveCount, Intersection, Ray};

/// Traversal stack depth. SAH trees over a few million triangles stay well
/// below this.
const STACK_SIZE: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Tri {
    v0: Vec3,
    e1: Vec3,
    e2: Vec3,
    prim: u32,
    shape: u32,
    mask: u32,
}

/// Hit on a triangle: (t, u, v).
#[inline]
fn hit_triangle(tri: &Tri, origin: Vec3, dir: Vec3, t_max: f32) -> Option<(f32, f32, f32)> {
    // Moller-Trumbore
    let p = dir.cross(tri.e2);
    let det = tri.e1.dot(p);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - tri.v0;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(tri.e1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = tri.e2.dot(q) * inv_det;
    (t > 0.0 && t < t_max).then_some((t, u, v))
}

/// SAH BVH over the scene triangles.
#[derive(Debug)]
pub struct BvhIntersector {
    bvh: Bvh,
    /// Triangles in leaf order.
    tris: Vec<Tri>,
}

impl BvhIntersector {
    /// Build over indexed triangles. `tri_shape[i]` is the shape of
    /// triangle `i`, `shape_masks[s]` the visibility mask of shape `s`.
    pub fn new(
        positions: &[Vec3],
        triangles: &[[u32; 3]],
        tri_shape: &[u32],
        shape_masks: &[u32],
    ) -> Self {
        let corners = |t: &[u32; 3]| {
            (
                positions[t[0] as usize],
                positions[t[1] as usize],
                positions[t[2] as usize],
            )
        };
        let bounds: Vec<Aabb> = triangles
            .iter()
            .map(|t| {
                let (a, b, c) = corners(t);
                Aabb::from_triangle(a, b, c)
            })
            .collect();
        let bvh = build_bvh(&bounds);

        let tris = bvh
            .prim_indices
            .iter()
            .map(|&i| {
                let (a, b, c) = corners(&triangles[i]);
                let shape = tri_shape[i];
                Tri {
                    v0: a,
                    e1: b - a,
                    e2: c - a,
                    prim: i as u32,
                    shape,
                    mask: shape_masks.get(shape as usize).copied().unwrap_or(u32::MAX),
                }
            })
            .collect();

        tracing::debug!(triangles = triangles.len(), nodes = bvh.nodes.len(), "bvh ready");
        Self { bvh, tris }
    }

    pub fn node_count(&self) -> usize {
        self.bvh.nodes.len()
    }

    /// World bounds of all geometry.
    pub fn bounds(&self) -> Aabb {
        if self.tris.is_empty() {
            Aabb::EMPTY
        } else {
            self.bvh.nodes[0].bounds()
        }
    }

    /// Walk the tree. With `any_hit` the first accepted hit ends the walk.
    fn traverse(&self, ray: &Ray, any_hit: bool) -> Option<(f32, f32, f32, &Tri)> {
        if !ray.is_active() || self.tris.is_empty() {
            return None;
        }
        let origin = ray.origin();
        let dir = ray.direction();
        let inv_dir = dir.recip();
        let mut t_max = ray.max_t();
        let mut best = None;

        let mut stack = [0u32; STACK_SIZE];
        let mut sp = 0usize;
        stack[sp] = 0;
        sp += 1;

        while sp > 0 {
            sp -= 1;
            let node = &self.bvh.nodes[stack[sp] as usize];
            if node.bounds().hit(origin, inv_dir, t_max).is_none() {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for tri in &self.tris[first..first + node.count as usize] {
                    if tri.mask & ray.mask == 0 {
                        continue;
                    }
                    if let Some((t, u, v)) = hit_triangle(tri, origin, dir, t_max) {
                        t_max = t;
                        best = Some((t, u, v, tri));
                        if any_hit {
                            return best;
                        }
                    }
                }
                continue;
            }

            // push the far child first so the near one is popped next
            let left = node.left_or_first;
            let right = left + 1;
            let dl = self.bvh.nodes[left as usize].bounds().hit(origin, inv_dir, t_max);
            let dr = self.bvh.nodes[right as usize].bounds().hit(origin, inv_dir, t_max);
            let (near, far) = match (dl, dr) {
                (Some(a), Some(b)) if b < a => (Some(right), Some(left)),
                (Some(_), Some(_)) => (Some(left), Some(right)),
                (Some(_), None) => (Some(left), None),
                (None, Some(_)) => (Some(right), None),
                (None, None) => (None, None),
            };
            for child in [far, near].into_iter().flatten() {
                if sp < STACK_SIZE {
                    stack[sp] = child;
                    sp += 1;
                } else {
                    tracing::warn!("bvh traversal stack overflow, subtree skipped");
                }
            }
        }
        best
    }
}

impl IntersectionService for BvhIntersector {
    fn query_intersection(&self, rays: &[Ray], live: ActiveCount, hits: &mut [Intersection]) {
        let n = live.get();
        hits[..n]
            .par_iter_mut()
            .zip(rays[..n].par_iter())
            .for_each(|(hit, ray)| {
                *hit = match self.traverse(ray, false) {
                    Some((t, u, v, tri)) => Intersection {
                        shape_id: tri.shape as i32,
                        prim_id: tri.prim as i32,
                        _pad: [0; 2],
                        uvwt: [u, v, 0.0, t],
                    },
                    None => Intersection::MISS,
                };
            });
    }

    fn query_occlusion(&self, rays: &[Ray], live: ActiveCount, occluded: &mut [u32]) {
        let n = live.get();
        occluded[..n]
            .par_iter_mut()
            .zip(rays[..n].par_iter())
            .for_each(|(o, ray)| {
                *o = u32::from(self.traverse(ray, true).is_some());
            });
    }

    fn name(&self) -> &str {
        "bvh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::visibility;
    use rand::{Rng, SeedableRng};

    /// Grid of small triangles in the z = 0 plane, shape = row index.
    fn grid() -> (Vec<Vec3>, Vec<[u32; 3]>, Vec<u32>) {
        let mut positions = Vec::new();
        let mut tris = Vec::new();
        let mut shapes = Vec::new();
        for y in 0..10 {
            for x in 0..10 {
                let base = positions.len() as u32;
                let o = Vec3::new(x as f32, y as f32, (x + y) as f32 * 0.1);
                positions.extend([o, o + Vec3::X * 0.9, o + Vec3::Y * 0.9]);
                tris.push([base, base + 1, base + 2]);
                shapes.push(y as u32);
            }
        }
        (positions, tris, shapes)
    }

    fn brute_force(positions: &[Vec3], tris: &[[u32; 3]], ray: &Ray) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (i, t) in tris.iter().enumerate() {
            let a = positions[t[0] as usize];
            let tri = Tri {
                v0: a,
                e1: positions[t[1] as usize] - a,
                e2: positions[t[2] as usize] - a,
                prim: i as u32,
                shape: 0,
                mask: u32::MAX,
            };
            let t_max = best.map_or(ray.max_t(), |b| b.1);
            if let Some((t, _, _)) = hit_triangle(&tri, ray.origin(), ray.direction(), t_max) {
                best = Some((i, t));
            }
        }
        best
    }

    #[test]
    fn test_matches_brute_force() {
        let (positions, tris, shapes) = grid();
        let masks = vec![visibility::ALL; 10];
        let isect = BvhIntersector::new(&positions, &tris, &shapes, &masks);

        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let rays: Vec<Ray> = (0..256)
            .map(|_| {
                let o = Vec3::new(rng.gen_range(-1.0..11.0), rng.gen_range(-1.0..11.0), 10.0);
                let d = Vec3::new(rng.gen_range(-0.3..0.3), rng.gen_range(-0.3..0.3), -1.0).normalize();
                Ray::new(o, d, 1e30, visibility::ALL)
            })
            .collect();
        let mut hits = vec![Intersection::MISS; rays.len()];
        isect.query_intersection(&rays, ActiveCount::new(rays.len()), &mut hits);

        for (ray, hit) in rays.iter().zip(&hits) {
            match brute_force(&positions, &tris, ray) {
                Some((prim, t)) => {
                    assert_eq!(hit.prim_id, prim as i32);
                    assert!((hit.t() - t).abs() < 1e-4);
                    assert_eq!(hit.shape_id, shapes[prim] as i32);
                }
                None => assert!(!hit.is_hit()),
            }
        }
    }

    #[test]
    fn test_occlusion_and_masks() {
        let positions = vec![Vec3::new(-1.0, -1.0, 0.0), Vec3::new(3.0, -1.0, 0.0), Vec3::new(-1.0, 3.0, 0.0)];
        let tris = vec![[0, 1, 2]];
        let isect = BvhIntersector::new(&positions, &tris, &[0], &[visibility::PRIMARY]);

        let through = Ray::new(Vec3::new(0.0, 0.0, 1.0), -Vec3::Z, 5.0, visibility::PRIMARY);
        let short = Ray::new(Vec3::new(0.0, 0.0, 1.0), -Vec3::Z, 0.5, visibility::PRIMARY);
        let shadow = Ray::new(Vec3::new(0.0, 0.0, 1.0), -Vec3::Z, 5.0, visibility::SHADOW);
        let rays = [through, short, shadow, Ray::INACTIVE];
        let mut occ = [9u32; 5];
        isect.query_occlusion(&rays, ActiveCount::new(4), &mut occ);
        assert_eq!(occ, [1, 0, 0, 0, 9]);
    }
}
