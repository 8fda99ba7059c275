//! Work buffers shared by both estimators, plus the stages they share.

use std::time::{Duration, Instant};

use diffuse_bsdf::{lambert, Frame};
use glam::{Vec2, Vec3};
use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;

use super::{EstimateOptions, RayTracingStats};
use crate::core::{visibility, ActiveCount, Intersection, PathState, Ray};
use crate::device::{compact, AccumulateMode, Allocator, ComputeQueue, DeviceLimits, Kernel, OutputBuffer, Parity, PingPong};
use crate::kernels::{OutputTarget, Sampler, Stream};
use crate::scene::Scene;
use crate::util::{offset_origin, Error, Result};

/// Timed iterations per benchmark phase.
pub(crate) const BENCHMARK_ITERATIONS: u32 = 100;

/// Every slot-sized buffer an estimator owns.
///
/// Slot buffers are indexed by ray slot, path buffers by pixel (the slot a
/// path started in). `pixel_indices` maps one to the other and is rebuilt
/// after every compaction.
#[derive(Debug)]
pub struct RenderData {
    size: usize,
    bytes: usize,
    pub rays: PingPong<Ray>,
    pub hits: Vec<Intersection>,
    pub shadow_rays: Vec<Ray>,
    pub light_samples: Vec<Vec3>,
    pub occluded: Vec<u32>,
    pub predicates: Vec<u32>,
    pub compacted: Vec<u32>,
    pub pixel_indices: PingPong<u32>,
    pub output_indices: Vec<u32>,
    /// 0..size, written once at allocation.
    pub iota: Vec<u32>,
    pub paths: Vec<PathState>,
    pub random_seeds: Vec<u32>,
    pub first_hits: Vec<Intersection>,
    pub ray_count: ActiveCount,
}

impl RenderData {
    /// Allocate every buffer for `size` slots. The returned allocator keeps
    /// counting against the same limits for estimator-specific buffers.
    pub fn allocate(size: usize, limits: DeviceLimits, rng: &mut StdRng) -> Result<(Self, Allocator)> {
        let mut alloc = Allocator::new(limits);
        let mut data = Self {
            size,
            bytes: 0,
            rays: alloc.ping_pong(size, Ray::INACTIVE)?,
            hits: alloc.buffer(size, Intersection::MISS)?,
            shadow_rays: alloc.buffer(size, Ray::INACTIVE)?,
            light_samples: alloc.buffer(size, Vec3::ZERO)?,
            occluded: alloc.buffer(size, 0u32)?,
            predicates: alloc.buffer(size, 0u32)?,
            compacted: alloc.buffer(size, 0u32)?,
            pixel_indices: alloc.ping_pong(size, 0u32)?,
            output_indices: alloc.buffer(size, 0u32)?,
            iota: alloc.buffer(size, 0u32)?,
            paths: alloc.buffer(size, PathState::FRESH)?,
            random_seeds: alloc.buffer(size, 0u32)?,
            first_hits: alloc.buffer(size, Intersection::MISS)?,
            ray_count: ActiveCount::ZERO,
        };
        data.iota.par_iter_mut().enumerate().for_each(|(i, v)| *v = i as u32);
        data.output_indices.copy_from_slice(&data.iota);
        data.reseed(rng);
        data.bytes = alloc.allocated();
        Ok((data, alloc))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes held by the shared buffers.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Refill the per-slot seed buffer.
    pub fn reseed(&mut self, rng: &mut StdRng) {
        for s in &mut self.random_seeds {
            *s = rng.gen();
        }
    }

    /// Primary rays live in the even half.
    pub fn primary_rays(&self) -> &[Ray] {
        self.rays.current(Parity::Even)
    }

    pub fn primary_rays_mut(&mut self) -> &mut [Ray] {
        self.rays.current_mut(Parity::Even)
    }

    /// Fail with `WorkBufferTooSmall` when `n` exceeds the allocation.
    pub fn check_capacity(&self, n: usize) -> Result<()> {
        if n > self.size {
            return Err(Error::WorkBufferTooSmall {
                requested: n,
                capacity: self.size,
            });
        }
        Ok(())
    }

    /// `InitPathData`: fresh paths and identity pixel mapping for `n` slots.
    pub fn init_paths(&mut self, n: usize) -> ActiveCount {
        self.paths[..n].par_iter_mut().for_each(|p| *p = PathState::FRESH);
        let (even, odd) = self.pixel_indices.both_mut();
        even[..n].copy_from_slice(&self.iota[..n]);
        odd[..n].copy_from_slice(&self.iota[..n]);
        self.ray_count = ActiveCount::new(n);
        self.ray_count
    }

    /// `Compact` then `RestorePixelIndices` for bounce `parity`. Returns the
    /// surviving slot count.
    pub fn compact_and_restore(
        &mut self,
        queue: &mut ComputeQueue,
        bounce: u32,
        live: ActiveCount,
    ) -> ActiveCount {
        let parity = Parity::of(bounce);
        let predicates = &self.predicates;
        let compacted = &mut self.compacted;
        let survivors = queue
            .launch(Kernel::Compact, Some(bounce), live, |g| {
                compact(&predicates[..g.get()], &mut compacted[..g.get()])
            })
            .unwrap_or(ActiveCount::ZERO)
            .within(self.size);

        let (cur, prev) = self.pixel_indices.split_mut(parity);
        let prev: &[u32] = prev;
        let compacted = &self.compacted;
        queue.launch(Kernel::RestorePixelIndices, Some(bounce), survivors, |g| {
            cur[..g.get()]
                .par_iter_mut()
                .zip(compacted[..g.get()].par_iter())
                .for_each(|(dst, &src)| *dst = prev[src as usize]);
        });
        self.ray_count = survivors;
        survivors
    }
}

/// Where and how an estimate writes its contributions. Targets are built
/// per phase because they borrow the output index buffer.
#[derive(Clone, Copy)]
pub(crate) struct Sink<'a> {
    pub buffer: &'a OutputBuffer,
    pub use_indices: bool,
    pub mode: AccumulateMode,
    pub clamp_ceiling: f32,
}

impl<'a> Sink<'a> {
    pub fn new(buffer: &'a OutputBuffer, options: &EstimateOptions<'_>, clamp_ceiling: f32) -> Self {
        Self {
            buffer,
            use_indices: options.use_output_indices,
            mode: AccumulateMode::from_atomic(options.atomic_update),
            clamp_ceiling,
        }
    }

    /// Same settings, another buffer.
    pub fn with_buffer<'b>(&self, buffer: &'b OutputBuffer) -> Sink<'b> {
        Sink {
            buffer,
            use_indices: self.use_indices,
            mode: self.mode,
            clamp_ceiling: self.clamp_ceiling,
        }
    }

    /// Target for one phase. Without output indices pixel `i` writes cell `i`.
    pub fn target<'b>(&self, output_indices: &'b [u32]) -> OutputTarget<'b>
    where
        'a: 'b,
    {
        OutputTarget {
            buffer: self.buffer,
            indices: if self.use_indices { output_indices } else { &[] },
            mode: self.mode,
            clamp_ceiling: self.clamp_ceiling,
        }
    }
}

/// Nearest-hit query over the current half.
pub(crate) fn intersect(
    queue: &mut ComputeQueue,
    scene: &Scene,
    kernel: Kernel,
    bounce: Option<u32>,
    rays: &[Ray],
    live: ActiveCount,
    hits: &mut [Intersection],
) {
    queue.launch(kernel, bounce, live, |g| {
        scene.accel().query_intersection(rays, g, hits);
    });
}

/// Occlusion query over the shadow ray buffer.
pub(crate) fn intersect_shadow(
    queue: &mut ComputeQueue,
    scene: &Scene,
    bounce: Option<u32>,
    rays: &[Ray],
    live: ActiveCount,
    occluded: &mut [u32],
) {
    queue.launch(Kernel::IntersectShadow, bounce, live, |g| {
        scene.accel().query_occlusion(rays, g, occluded);
    });
}

/// Shared benchmark loop: primary, secondary and shadow intersection over
/// the first `n` primary rays. Writes only scratch buffers.
pub(crate) fn run_benchmark(
    queue: &mut ComputeQueue,
    scene: &Scene,
    data: &mut RenderData,
    n: usize,
) -> Result<RayTracingStats> {
    data.check_capacity(n)?;
    let live = ActiveCount::new(n);
    let accel = scene.accel();

    queue.set_recording(false);
    queue.finish();

    let timed = |f: &mut dyn FnMut()| {
        let start = Instant::now();
        for _ in 0..BENCHMARK_ITERATIONS {
            f();
        }
        start.elapsed()
    };

    let (primary, secondary) = data.rays.split_mut(Parity::Even);
    let hits = &mut data.hits;
    let primary_time = timed(&mut || accel.query_intersection(primary, live, hits));

    // One diffuse shading pass turns the primary hits into bounce and
    // shadow rays.
    let seeds = &data.random_seeds;
    let first: &[Intersection] = hits;
    let camera_pos = scene.camera().position;
    secondary[..n]
        .par_iter_mut()
        .zip(data.shadow_rays[..n].par_iter_mut())
        .enumerate()
        .for_each(|(i, (next, shadow))| {
            let hit = first[i];
            let Some(sp) = scene.surface(&hit) else {
                *next = Ray::INACTIVE;
                *shadow = Ray::INACTIVE;
                return;
            };
            let mut sampler = Sampler::new(seeds[i], 0, 0, 1, Stream::Surface);
            let wo = (camera_pos - sp.position).normalize_or_zero();
            *next = lambert::sample(Vec3::ONE, wo, sp.shading_normal, sampler.next_2d())
                .map(|s| {
                    Ray::new(
                        offset_origin(sp.position, sp.geometric_normal, s.wi),
                        s.wi,
                        f32::MAX,
                        visibility::SECONDARY,
                    )
                })
                .unwrap_or(Ray::INACTIVE);
            let dir = Frame::from_normal(sp.shading_normal)
                .to_world(diffuse_bsdf::warp::cosine_hemisphere(Vec2::new(0.5, 0.5)));
            *shadow = Ray::new(
                offset_origin(sp.position, sp.geometric_normal, dir),
                dir,
                scene.radius() * 2.0,
                visibility::SHADOW,
            );
        });

    let secondary_time = timed(&mut || accel.query_intersection(secondary, live, hits));
    let shadow_rays = &data.shadow_rays;
    let occluded = &mut data.occluded;
    let shadow_time = timed(&mut || accel.query_occlusion(shadow_rays, live, occluded));

    queue.finish();
    queue.set_recording(true);

    let rate = |d: Duration| {
        let secs = d.as_secs_f64();
        if secs > 0.0 {
            (n as f64 * f64::from(BENCHMARK_ITERATIONS)) / secs
        } else {
            0.0
        }
    };
    let stats = RayTracingStats {
        rays: n,
        iterations: BENCHMARK_ITERATIONS,
        primary_rays_per_sec: rate(primary_time),
        secondary_rays_per_sec: rate(secondary_time),
        shadow_rays_per_sec: rate(shadow_time),
        elapsed: primary_time + secondary_time + shadow_time,
    };
    tracing::info!(%stats, accel = accel.name(), "benchmark");
    Ok(stats)
}
