//! SAH-based BVH builder.
//!
//! Works on primitive bounds only, so the same builder serves any primitive
//! type. Uses binned Surface Area Heuristic splits and writes a compact
//! node array where siblings are adjacent.

use glam::Vec3;

use super::bvh::{Aabb, BvhNode};

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Leaves at or below this size are never split.
const MAX_LEAF_SIZE: usize = 4;

/// Built BVH.
#[derive(Debug, Clone)]
pub struct Bvh {
    /// Flat node array (index 0 = root).
    pub nodes: Vec<BvhNode>,
    /// Primitive order referenced by leaves.
    pub prim_indices: Vec<usize>,
}

#[derive(Clone, Copy)]
struct Bin {
    bounds: Aabb,
    count: usize,
}

impl Default for Bin {
    fn default() -> Self {
        Self {
            bounds: Aabb::EMPTY,
            count: 0,
        }
    }
}

/// Chosen split plane.
struct Split {
    axis: usize,
    position: f32,
    cost: f32,
}

/// Build a BVH over primitive bounds.
#[tracing::instrument(skip_all, fields(prim_count = bounds.len()))]
pub fn build_bvh(bounds: &[Aabb]) -> Bvh {
    let n = bounds.len();
    if n == 0 {
        return Bvh {
            nodes: vec![BvhNode::new(&Aabb { min: Vec3::ZERO, max: Vec3::ZERO }, 0, 0)],
            prim_indices: Vec::new(),
        };
    }

    let centroids: Vec<Vec3> = bounds.iter().map(Aabb::centroid).collect();
    let mut indices: Vec<usize> = (0..n).collect();
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);
    nodes.push(BvhNode::new(&Aabb::EMPTY, 0, 0));

    // (node, start, end) ranges still to process, depth-first
    let mut stack = vec![(0usize, 0usize, n)];

    while let Some((node_idx, start, end)) = stack.pop() {
        let count = end - start;
        let mut node_bounds = Aabb::EMPTY;
        let mut centroid_bounds = Aabb::EMPTY;
        for &i in &indices[start..end] {
            node_bounds.grow(&bounds[i]);
            centroid_bounds.grow_point(centroids[i]);
        }

        let leaf = BvhNode::new(&node_bounds, start as u32, count as u32);
        if count <= MAX_LEAF_SIZE {
            nodes[node_idx] = leaf;
            continue;
        }

        let leaf_cost = count as f32 * INTERSECT_COST * node_bounds.area();
        let split = match find_split(&indices[start..end], bounds, &centroids, &centroid_bounds) {
            Some(s) if s.cost < leaf_cost => s,
            _ => {
                nodes[node_idx] = leaf;
                continue;
            }
        };

        let mid = start
            + partition(&mut indices[start..end], |&i| {
                centroids[i][split.axis] < split.position
            });
        let mid = if mid == start || mid == end {
            (start + end) / 2
        } else {
            mid
        };

        let left = nodes.len();
        nodes.push(BvhNode::new(&Aabb::EMPTY, 0, 0));
        nodes.push(BvhNode::new(&Aabb::EMPTY, 0, 0));
        nodes[node_idx] = BvhNode::new(&node_bounds, left as u32, 0);

        stack.push((left + 1, mid, end));
        stack.push((left, start, mid));
    }

    Bvh {
        nodes,
        prim_indices: indices,
    }
}

/// Binned SAH search across all three axes.
fn find_split(
    indices: &[usize],
    bounds: &[Aabb],
    centroids: &[Vec3],
    centroid_bounds: &Aabb,
) -> Option<Split> {
    let mut best: Option<Split> = None;

    for axis in 0..3 {
        let lo = centroid_bounds.min[axis];
        let extent = centroid_bounds.max[axis] - lo;
        if extent < 1e-8 {
            continue;
        }

        let mut bins = [Bin::default(); NUM_BINS];
        let scale = NUM_BINS as f32 / extent;
        for &i in indices {
            let b = (((centroids[i][axis] - lo) * scale) as usize).min(NUM_BINS - 1);
            bins[b].bounds.grow(&bounds[i]);
            bins[b].count += 1;
        }

        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = Aabb::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = sweep.area();
            left_count[i] = sweep_count;
        }

        sweep = Aabb::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            let cost = TRAVERSAL_COST
                + INTERSECT_COST
                    * (left_count[i - 1] as f32 * left_area[i - 1]
                        + sweep_count as f32 * sweep.area());
            if best.as_ref().map_or(true, |b| cost < b.cost) {
                best = Some(Split {
                    axis,
                    position: lo + (i as f32 / NUM_BINS as f32) * extent,
                    cost,
                });
            }
        }
    }

    best
}

/// Partition in place. Returns the number of elements satisfying `pred`.
fn partition<T>(slice: &mut [T], pred: impl Fn(&T) -> bool) -> usize {
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}
