//! Bidirectional path tracer.
//!
//! One estimate traces an eye subpath and a light subpath per pixel with the
//! same intersect / filter / compact loop as the path tracer, then runs one
//! connection launch per strategy `(s, t)`:
//!
//! | strategy       | kernel            | deposit                     |
//! |----------------|-------------------|-----------------------------|
//! | s = 0          | `SampleSurface`   | while tracing the eye path  |
//! | s = 1, t >= 2  | `ConnectDirect`   | `GatherContributions`       |
//! | s, t >= 2      | `Connect`         | `GatherContributions`       |
//! | s >= 2, t = 1  | `ConnectCaustics` | `GatherCausticContributions`|
//!
//! The t = 1 strategies need a pinhole camera and are skipped otherwise.
//! Media are ignored; the environment is only seen by escaping eye paths.

pub mod mis;
pub mod vertex;

pub use mis::{mis_weight, ConnectionPdfs, MisVertex, SplitCaps};
pub use vertex::{PathVertex, Subpaths, VertexKind, BDPT_MAX_SUBPATH_LEN};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::data::{intersect, intersect_shadow, run_benchmark, RenderData, Sink};
use super::{
    BounceRecord, EstimateOptions, Estimator, EstimatorConfig, EstimatorKind, QualityLevel, RandomBufferType,
    RayTracingStats,
};
use crate::core::{ActiveCount, Intersection, Ray};
use crate::device::{ComputeQueue, Kernel, OutputBuffer, Parity};
use crate::kernels::bdpt::{
    apply_vertex_updates, connect, connect_caustics, connect_direct, gather_caustic_contributions,
    generate_light_vertices, generate_vertices, sample_surface, shade_escaped, split_caps, ConnectionOutputs,
    SubpathMode, NO_SPLAT,
};
use crate::kernels::path_tracing::{
    advance_iteration_count, filter_path_stream, gather_light_samples, scatter_paths, shade_background, SlotInputs,
};
use crate::kernels::KernelContext;
use crate::scene::Scene;
use crate::util::{Error, Result};

/// Shared buffers plus both vertex strips and the caustic splat cells.
#[derive(Debug)]
struct BdptData {
    render: RenderData,
    eye: Subpaths,
    light: Subpaths,
    splats: Vec<u32>,
}

impl BdptData {
    fn allocate(size: usize, config: &EstimatorConfig, rng: &mut StdRng) -> Result<Self> {
        let (render, mut alloc) = RenderData::allocate(size, config.limits, rng)?;
        let eye = Subpaths::allocate(&mut alloc, size, config.max_subpath_len)?;
        let light = Subpaths::allocate(&mut alloc, size, config.max_subpath_len)?;
        let splats = alloc.buffer(size, NO_SPLAT)?;
        tracing::debug!(size, bytes = alloc.allocated(), "bdpt buffers allocated");
        Ok(Self {
            render,
            eye,
            light,
            splats,
        })
    }
}

pub struct BdptEstimator {
    config: EstimatorConfig,
    max_bounces: u32,
    data: Option<BdptData>,
    queue: ComputeQueue,
    rng: StdRng,
    sample_counter: u32,
    bounce_log: Vec<BounceRecord>,
}

impl BdptEstimator {
    pub fn new(config: EstimatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            max_bounces: config.max_bounces,
            data: None,
            queue: ComputeQueue::new("bdpt"),
            rng: StdRng::seed_from_u64(0),
            sample_counter: 0,
            bounce_log: Vec::new(),
        })
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    fn render(&self) -> Result<&RenderData> {
        self.data.as_ref().map(|d| &d.render).ok_or(Error::WorkBufferNotAllocated)
    }

    fn render_mut(&mut self) -> Result<&mut RenderData> {
        self.data.as_mut().map(|d| &mut d.render).ok_or(Error::WorkBufferNotAllocated)
    }
}

/// Trace one kind of subpath for `passes` bounces starting from the rays in
/// the even half. Records eye-path bounces in `log`.
#[allow(clippy::too_many_arguments)]
fn trace_subpaths(
    queue: &mut ComputeQueue,
    ctx: &KernelContext<'_>,
    mode: SubpathMode,
    data: &mut RenderData,
    strips: &mut Subpaths,
    n: usize,
    passes: u32,
    sink: Sink<'_>,
    options: &EstimateOptions<'_>,
    log: &mut Vec<BounceRecord>,
) {
    let scene = ctx.scene;
    let eye = mode == SubpathMode::Eye;
    let mut live = ActiveCount::new(n);

    for bounce in 0..passes {
        let _bounce_span = tracing::trace_span!("bounce", bounce, ?mode).entered();
        let ctx = ctx.at_bounce(bounce);
        let parity = Parity::of(bounce);
        let b = Some(bounce);

        intersect(queue, scene, Kernel::Intersect, b, data.rays.current(parity), live, &mut data.hits);

        if eye && bounce > 0 && scene.has_environment() {
            let out = sink.target(&data.output_indices);
            let rays = data.rays.current(parity);
            let pixels = data.pixel_indices.current(parity.flip());
            let (hits, paths) = (&data.hits, &data.paths);
            let radiance = scene.environment_radiance();
            queue.launch(Kernel::ShadeMiss, b, live, |g| {
                let g = g.get();
                shade_escaped(&rays[..g], &hits[..g], &pixels[..g], paths, radiance, out);
            });
        }

        {
            let pixels = data.pixel_indices.current(parity.flip());
            let (hits, paths) = (&data.hits, &data.paths);
            let predicates = &mut data.predicates;
            let updates = queue.launch(Kernel::FilterPathStream, b, live, |g| {
                let g = g.get();
                filter_path_stream(&ctx, &hits[..g], &pixels[..g], paths, &mut predicates[..g])
            });
            if let Some(updates) = updates {
                scatter_paths(&mut data.paths, updates);
            }
        }

        let survivors = data.compact_and_restore(queue, bounce, live);
        if eye {
            log.push(BounceRecord {
                bounce,
                rays: live.get(),
                survivors: survivors.get(),
            });
        }

        if eye && bounce == 0 {
            let handler = options.missed_primary_rays;
            if handler.is_some() || scene.has_environment() {
                let out = sink.target(&data.output_indices);
                let kernel = if handler.is_some() {
                    Kernel::HandleMissedRays
                } else {
                    Kernel::ShadeBackground
                };
                let rays = data.rays.current(Parity::Even);
                let (hits, predicates, paths) = (&data.hits, &data.predicates, &data.paths);
                let background = scene.environment_radiance();
                queue.launch(kernel, b, ActiveCount::new(n), |g| {
                    let g = g.get();
                    shade_background(&rays[..g], &hits[..g], &predicates[..g], paths, background, handler, out);
                });
            }
        }

        let updates = {
            let out = sink.target(&data.output_indices);
            let (cur, next) = data.rays.split_mut(parity);
            let input = SlotInputs {
                rays: cur,
                hits: &data.hits,
                pixels: data.pixel_indices.current(parity),
                compacted: &data.compacted,
                paths: &data.paths,
                seeds: &data.random_seeds,
            };
            let strips: &Subpaths = strips;
            queue.launch(Kernel::SampleSurface, b, survivors, |g| {
                sample_surface(&ctx, mode, input, strips, &mut next[..g.get()], out)
            })
        };
        if let Some(updates) = updates {
            apply_vertex_updates(&mut data.paths, strips, updates);
        }

        live = survivors;
    }
}

impl Estimator for BdptEstimator {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Bdpt
    }

    fn set_work_buffer_size(&mut self, size: usize) -> Result<()> {
        self.data = None;
        self.data = Some(BdptData::allocate(size, &self.config, &mut self.rng)?);
        Ok(())
    }

    fn work_buffer_size(&self) -> usize {
        self.data.as_ref().map_or(0, |d| d.render.size())
    }

    fn ray_buffer(&self) -> Result<&[Ray]> {
        Ok(self.render()?.primary_rays())
    }

    fn ray_buffer_mut(&mut self) -> Result<&mut [Ray]> {
        Ok(self.render_mut()?.primary_rays_mut())
    }

    fn output_index_buffer_mut(&mut self) -> Result<&mut [u32]> {
        Ok(&mut self.render_mut()?.output_indices)
    }

    fn ray_count_mut(&mut self) -> Result<&mut ActiveCount> {
        Ok(&mut self.render_mut()?.ray_count)
    }

    fn first_hit_buffer(&self) -> Result<&[Intersection]> {
        Ok(&self.render()?.first_hits)
    }

    fn estimate(
        &mut self,
        scene: &Scene,
        n: usize,
        quality: QualityLevel,
        output: &OutputBuffer,
        options: &EstimateOptions<'_>,
    ) -> Result<()> {
        let data = self.data.as_mut().ok_or(Error::WorkBufferNotAllocated)?;
        data.render.check_capacity(n)?;
        let _span = tracing::debug_span!("estimate", estimator = "bdpt", n, sample = self.sample_counter).entered();

        self.queue.reset_log();
        self.bounce_log.clear();

        let ctx = KernelContext {
            scene,
            bounce: 0,
            max_bounces: self.max_bounces,
            sample: self.sample_counter,
            launch_seed: self.rng.gen(),
            quality,
            limits: self.config.numeric_limits(),
        };
        let sink = Sink::new(output, options, self.config.clamp_ceiling);
        let stride = data.eye.stride();
        let all = ActiveCount::new(n);
        let BdptData {
            render,
            eye,
            light,
            splats,
        } = data;

        // Eye subpaths.
        self.queue.launch(Kernel::InitPathData, None, all, |g| render.init_paths(g.get()));
        self.queue.launch(Kernel::GenerateVertices, None, all, |g| {
            let g = g.get();
            eye.clear(g);
            generate_vertices(scene.camera(), &mut render.rays.current_mut(Parity::Even)[..g], eye);
        });
        let eye_passes = SubpathMode::Eye.vertex_cap(self.max_bounces, stride).saturating_sub(1) as u32;
        trace_subpaths(
            &mut self.queue,
            &ctx,
            SubpathMode::Eye,
            render,
            eye,
            n,
            eye_passes,
            sink,
            options,
            &mut self.bounce_log,
        );

        // Light subpaths.
        self.queue.launch(Kernel::InitPathData, None, all, |g| render.init_paths(g.get()));
        self.queue.launch(Kernel::GenerateLightVertices, None, all, |g| {
            let g = g.get();
            light.clear(g);
            let seeds = &render.random_seeds[..g];
            let rays = &mut render.rays.current_mut(Parity::Even)[..g];
            generate_light_vertices(&ctx, seeds, rays, &mut render.paths[..g], light);
        });
        let light_passes = SubpathMode::Light.vertex_cap(self.max_bounces, stride).saturating_sub(1) as u32;
        trace_subpaths(
            &mut self.queue,
            &ctx,
            SubpathMode::Light,
            render,
            light,
            n,
            light_passes,
            sink,
            options,
            &mut Vec::new(),
        );

        // Connections.
        let longest = |strips: &Subpaths| strips.lens[..n].iter().copied().max().unwrap_or(0) as usize;
        let (max_t, max_s) = (longest(&*eye), longest(&*light));
        let max_depth = self.max_bounces as usize;
        let depth_ok = |s: usize, t: usize| s + t - 2 <= max_depth;
        let light_paths = options.light_path_count.unwrap_or(n).max(1);
        let scale = scene.camera().pixel_count() as f32 / light_paths as f32;
        let pixels = &render.iota[..n];
        let caps = split_caps(scene.camera(), self.max_bounces, stride);

        let mut strategies = Vec::new();
        for t in 2..=max_t {
            if depth_ok(1, t) {
                strategies.push((1, t));
            }
        }
        for s in 2..=max_s {
            for t in 2..=max_t {
                if depth_ok(s, t) {
                    strategies.push((s, t));
                }
            }
        }
        for s in 2..=max_s {
            if caps.caustics && depth_ok(s, 1) {
                strategies.push((s, 1));
            }
        }

        for (s, t) in strategies {
            let depth = Some((s + t - 2) as u32);
            let outputs = ConnectionOutputs {
                shadow_rays: &mut render.shadow_rays[..n],
                contributions: &mut render.light_samples[..n],
            };
            let kernel = match (s, t) {
                (1, _) => Kernel::ConnectDirect,
                (_, 1) => Kernel::ConnectCaustics,
                _ => Kernel::Connect,
            };
            let seeds = &render.random_seeds;
            let (eye, light) = (&*eye, &*light);
            let splats_out = &mut splats[..n];
            self.queue.launch(kernel, depth, all, |_| match kernel {
                Kernel::ConnectDirect => connect_direct(&ctx, t, eye, seeds, outputs),
                Kernel::ConnectCaustics => connect_caustics(scene, s, caps, light, scale, outputs, splats_out),
                _ => connect(scene, (s, t), caps, eye, light, outputs),
            });

            intersect_shadow(&mut self.queue, scene, depth, &render.shadow_rays, all, &mut render.occluded);

            let out = sink.target(&render.output_indices);
            let (shadow, occluded, contributions) = (&render.shadow_rays, &render.occluded, &render.light_samples);
            if t == 1 {
                let splats = &splats[..n];
                self.queue.launch(Kernel::GatherCausticContributions, depth, all, |g| {
                    let g = g.get();
                    gather_caustic_contributions(&shadow[..g], &occluded[..g], &contributions[..g], &splats[..g], out);
                });
            } else {
                self.queue.launch(Kernel::GatherContributions, depth, all, |g| {
                    let g = g.get();
                    gather_light_samples(&shadow[..g], &occluded[..g], &contributions[..g], &pixels[..g], out);
                });
            }
        }

        let out = sink.target(&render.output_indices);
        self.queue.launch(Kernel::AdvanceIterationCount, None, all, |g| {
            advance_iteration_count(g.get(), out);
        });

        self.sample_counter = self.sample_counter.wrapping_add(1);
        self.queue.finish();
        Ok(())
    }

    fn trace_first_hit(&mut self, scene: &Scene, n: usize) -> Result<()> {
        let data = &mut self.data.as_mut().ok_or(Error::WorkBufferNotAllocated)?.render;
        data.check_capacity(n)?;
        intersect(
            &mut self.queue,
            scene,
            Kernel::TraceFirstHit,
            None,
            data.rays.current(Parity::Even),
            ActiveCount::new(n),
            &mut data.first_hits,
        );
        self.queue.finish();
        Ok(())
    }

    fn benchmark(&mut self, scene: &Scene, n: usize) -> Result<RayTracingStats> {
        let data = &mut self.data.as_mut().ok_or(Error::WorkBufferNotAllocated)?.render;
        run_benchmark(&mut self.queue, scene, data, n)
    }

    fn set_random_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        if let Some(data) = self.data.as_mut() {
            data.render.reseed(&mut self.rng);
        }
        self.sample_counter = 0;
    }

    fn max_bounces(&self) -> u32 {
        self.max_bounces
    }

    fn set_max_bounces(&mut self, bounces: u32) {
        self.max_bounces = bounces;
    }

    fn sample_counter(&self) -> u32 {
        self.sample_counter
    }

    fn has_random_buffer(&self, kind: RandomBufferType) -> bool {
        kind == RandomBufferType::RandomSeed
    }

    fn random_buffer(&self, kind: RandomBufferType) -> Option<&[u32]> {
        match kind {
            RandomBufferType::RandomSeed => self.data.as_ref().map(|d| d.render.random_seeds.as_slice()),
            RandomBufferType::SobolLut => None,
        }
    }

    fn queue(&self) -> &ComputeQueue {
        &self.queue
    }

    fn bounce_log(&self) -> &[BounceRecord] {
        &self.bounce_log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::IntermediateValue;
    use crate::kernels::camera::generate_primary_rays;
    use crate::scene::Preset;
    use std::sync::Arc;

    fn render_once(est: &mut BdptEstimator, scene: &Scene) -> OutputBuffer {
        let n = scene.camera().pixel_count();
        est.set_work_buffer_size(n).unwrap();
        let cells: Vec<u32> = (0..n as u32).collect();
        generate_primary_rays(scene.camera(), &cells, 3, 0, true, est.ray_buffer_mut().unwrap());
        let out = OutputBuffer::new(n);
        est.estimate(scene, n, QualityLevel::Normal, &out, &EstimateOptions::default())
            .unwrap();
        out
    }

    #[test]
    fn test_visibility_unsupported() {
        let mut est = BdptEstimator::new(EstimatorConfig::default()).unwrap();
        assert!(!est.supports_intermediate_value(IntermediateValue::Visibility));
        let buf = Arc::new(OutputBuffer::new(1));
        assert!(matches!(
            est.set_intermediate_value_buffer(IntermediateValue::Visibility, Some(buf)),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_strategy_kernels_fire() {
        let scene = Preset::LitPlane.build(8, 8).unwrap();
        let mut est = BdptEstimator::new(EstimatorConfig::default()).unwrap();
        let out = render_once(&mut est, &scene);
        let q = est.queue();
        assert_eq!(q.fired(Kernel::GenerateVertices).count(), 1);
        assert_eq!(q.fired(Kernel::GenerateLightVertices).count(), 1);
        assert!(q.fired(Kernel::ConnectDirect).count() >= 1);
        assert!(q.fired(Kernel::ConnectCaustics).count() >= 1);
        assert_eq!(q.fired(Kernel::AdvanceIterationCount).count(), 1);
        let total = out.total();
        assert_eq!(total.w, 64.0);
        assert!(total.x > 0.0);
        assert_eq!(est.sample_counter(), 1);
    }

    #[test]
    fn test_depth_limit_respected() {
        let scene = Preset::LitPlane.build(4, 4).unwrap();
        let mut est = BdptEstimator::new(EstimatorConfig::default()).unwrap();
        est.set_max_bounces(1);
        render_once(&mut est, &scene);
        for l in est.queue().launches() {
            if matches!(
                l.kernel,
                Kernel::ConnectDirect | Kernel::Connect | Kernel::ConnectCaustics
            ) {
                assert!(l.bounce.unwrap_or(0) <= 1, "{l:?}");
            }
        }
    }
}
