//! Wavefront unidirectional path tracer.
//!
//! Each bounce runs the same fixed kernel sequence over the live slots:
//!
//! ```text
//! Intersect → EvaluateVolume → ShadeMiss → FilterPathStream → Compact
//!   → RestorePixelIndices → ShadeVolume → ShadeSurface
//!   → [bounce 0: ShadeBackground, AdvanceIterationCount]
//!   → IntersectShadow → GatherLightSamples → GatherVisibility
//! ```
//!
//! The live count returned by compaction bounds every later launch, so once
//! it reaches zero nothing but the per-sample bookkeeping fires.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::data::{intersect, intersect_shadow, run_benchmark, RenderData, Sink};
use super::{
    BounceRecord, EstimateOptions, Estimator, EstimatorConfig, EstimatorKind, IntermediateValue, QualityLevel,
    RandomBufferType, RayTracingStats,
};
use crate::core::{ActiveCount, Intersection, Ray};
use crate::device::{ComputeQueue, Kernel, OutputBuffer, Parity};
use crate::kernels::path_tracing::{
    advance_iteration_count, evaluate_volume, filter_path_stream, gather_light_samples, gather_visibility,
    scatter_paths, shade_background, shade_miss, shade_surface, shade_volume, SlotInputs, SlotOutputs,
};
use crate::kernels::KernelContext;
use crate::scene::Scene;
use crate::util::{Error, Result};

pub struct PathTracingEstimator {
    config: EstimatorConfig,
    max_bounces: u32,
    data: Option<RenderData>,
    queue: ComputeQueue,
    rng: StdRng,
    sample_counter: u32,
    visibility: Option<Arc<OutputBuffer>>,
    bounce_log: Vec<BounceRecord>,
}

impl PathTracingEstimator {
    /// Fails with `KernelBuild` on an invalid configuration.
    pub fn new(config: EstimatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            max_bounces: config.max_bounces,
            data: None,
            queue: ComputeQueue::new("path_tracing"),
            rng: StdRng::seed_from_u64(0),
            sample_counter: 0,
            visibility: None,
            bounce_log: Vec::new(),
        })
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    fn data(&self) -> Result<&RenderData> {
        self.data.as_ref().ok_or(Error::WorkBufferNotAllocated)
    }

    fn data_mut(&mut self) -> Result<&mut RenderData> {
        self.data.as_mut().ok_or(Error::WorkBufferNotAllocated)
    }
}

impl Estimator for PathTracingEstimator {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::PathTracing
    }

    fn set_work_buffer_size(&mut self, size: usize) -> Result<()> {
        self.data = None;
        let (data, _) = RenderData::allocate(size, self.config.limits, &mut self.rng)?;
        tracing::debug!(size, bytes = data.bytes(), "path tracer buffers allocated");
        self.data = Some(data);
        Ok(())
    }

    fn work_buffer_size(&self) -> usize {
        self.data.as_ref().map_or(0, RenderData::size)
    }

    fn ray_buffer(&self) -> Result<&[Ray]> {
        Ok(self.data()?.primary_rays())
    }

    fn ray_buffer_mut(&mut self) -> Result<&mut [Ray]> {
        Ok(self.data_mut()?.primary_rays_mut())
    }

    fn output_index_buffer_mut(&mut self) -> Result<&mut [u32]> {
        Ok(&mut self.data_mut()?.output_indices)
    }

    fn ray_count_mut(&mut self) -> Result<&mut ActiveCount> {
        Ok(&mut self.data_mut()?.ray_count)
    }

    fn first_hit_buffer(&self) -> Result<&[Intersection]> {
        Ok(&self.data()?.first_hits)
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
        data.check_capacity(n)?;
        let _span = tracing::debug_span!("estimate", estimator = "path_tracing", n, sample = self.sample_counter)
            .entered();

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
        let has_volumes = !scene.volumes().is_empty();

        let mut live = self
            .queue
            .launch(Kernel::InitPathData, None, ActiveCount::new(n), |g| data.init_paths(g.get()))
            .unwrap_or(ActiveCount::ZERO);

        for bounce in 0..self.max_bounces.max(1) {
            let _bounce_span = tracing::trace_span!("bounce", bounce).entered();
            let ctx = ctx.at_bounce(bounce);
            let parity = Parity::of(bounce);
            let b = Some(bounce);

            intersect(
                &mut self.queue,
                scene,
                Kernel::Intersect,
                b,
                data.rays.current(parity),
                live,
                &mut data.hits,
            );

            if has_volumes {
                let out = sink.target(&data.output_indices);
                let rays = data.rays.current(parity);
                let pixels = data.pixel_indices.current(parity.flip());
                let paths = &data.paths;
                let seeds = &data.random_seeds;
                let hits = &mut data.hits;
                let updates = self.queue.launch(Kernel::EvaluateVolume, b, live, |g| {
                    let g = g.get();
                    evaluate_volume(&ctx, &rays[..g], &pixels[..g], paths, seeds, out, &mut hits[..g])
                });
                if let Some(updates) = updates {
                    scatter_paths(&mut data.paths, updates);
                }
            }

            if bounce > 0 && scene.has_environment() {
                let out = sink.target(&data.output_indices);
                let rays = data.rays.current(parity);
                let pixels = data.pixel_indices.current(parity.flip());
                let (hits, paths) = (&data.hits, &data.paths);
                self.queue.launch(Kernel::ShadeMiss, b, live, |g| {
                    let g = g.get();
                    shade_miss(&ctx, &rays[..g], &hits[..g], &pixels[..g], paths, out);
                });
            }

            {
                let pixels = data.pixel_indices.current(parity.flip());
                let (hits, paths) = (&data.hits, &data.paths);
                let predicates = &mut data.predicates;
                let updates = self.queue.launch(Kernel::FilterPathStream, b, live, |g| {
                    let g = g.get();
                    filter_path_stream(&ctx, &hits[..g], &pixels[..g], paths, &mut predicates[..g])
                });
                if let Some(updates) = updates {
                    scatter_paths(&mut data.paths, updates);
                }
            }

            let survivors = data.compact_and_restore(&mut self.queue, bounce, live);
            self.bounce_log.push(BounceRecord {
                bounce,
                rays: live.get(),
                survivors: survivors.get(),
            });
            tracing::trace!(bounce, rays = live.get(), survivors = survivors.get(), "compacted");

            let (volume_updates, surface_updates) = {
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
                let shadow_rays = &mut data.shadow_rays;
                let light_samples = &mut data.light_samples;

                let volume_updates = if has_volumes {
                    self.queue.launch(Kernel::ShadeVolume, b, survivors, |g| {
                        let g = g.get();
                        shade_volume(
                            &ctx,
                            input,
                            SlotOutputs {
                                next_rays: &mut next[..g],
                                shadow_rays: &mut shadow_rays[..g],
                                light_samples: &mut light_samples[..g],
                            },
                        )
                    })
                } else {
                    None
                };
                let surface_updates = self.queue.launch(Kernel::ShadeSurface, b, survivors, |g| {
                    let g = g.get();
                    shade_surface(
                        &ctx,
                        input,
                        SlotOutputs {
                            next_rays: &mut next[..g],
                            shadow_rays: &mut shadow_rays[..g],
                            light_samples: &mut light_samples[..g],
                        },
                        out,
                    )
                });
                (volume_updates, surface_updates)
            };
            // Both kernels read the same pre-shading paths, so scattered
            // slots are only ever shaded once.
            for updates in [volume_updates, surface_updates].into_iter().flatten() {
                scatter_paths(&mut data.paths, updates);
            }

            if bounce == 0 {
                let out = sink.target(&data.output_indices);
                let all = ActiveCount::new(n);
                let handler = options.missed_primary_rays;
                if handler.is_some() || scene.has_environment() {
                    let kernel = if handler.is_some() {
                        Kernel::HandleMissedRays
                    } else {
                        Kernel::ShadeBackground
                    };
                    let rays = data.rays.current(Parity::Even);
                    let (hits, predicates, paths) = (&data.hits, &data.predicates, &data.paths);
                    let background = scene.environment_radiance();
                    self.queue.launch(kernel, b, all, |g| {
                        let g = g.get();
                        shade_background(&rays[..g], &hits[..g], &predicates[..g], paths, background, handler, out);
                    });
                }
                self.queue.launch(Kernel::AdvanceIterationCount, b, all, |g| {
                    advance_iteration_count(g.get(), out);
                });
            }

            intersect_shadow(
                &mut self.queue,
                scene,
                b,
                &data.shadow_rays,
                survivors,
                &mut data.occluded,
            );

            {
                let out = sink.target(&data.output_indices);
                let pixels = data.pixel_indices.current(parity);
                let (shadow, occluded, samples) = (&data.shadow_rays, &data.occluded, &data.light_samples);
                self.queue.launch(Kernel::GatherLightSamples, b, survivors, |g| {
                    let g = g.get();
                    gather_light_samples(&shadow[..g], &occluded[..g], &samples[..g], &pixels[..g], out);
                });
                if let Some(vis) = &self.visibility {
                    let vis_out = sink.with_buffer(vis).target(&data.output_indices);
                    self.queue.launch(Kernel::GatherVisibility, b, survivors, |g| {
                        let g = g.get();
                        gather_visibility(&shadow[..g], &occluded[..g], &pixels[..g], vis_out);
                    });
                }
            }

            live = survivors;
        }

        self.sample_counter = self.sample_counter.wrapping_add(1);
        self.queue.finish();
        Ok(())
    }

    fn trace_first_hit(&mut self, scene: &Scene, n: usize) -> Result<()> {
        let data = self.data.as_mut().ok_or(Error::WorkBufferNotAllocated)?;
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
        let data = self.data.as_mut().ok_or(Error::WorkBufferNotAllocated)?;
        run_benchmark(&mut self.queue, scene, data, n)
    }

    fn set_random_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        if let Some(data) = self.data.as_mut() {
            data.reseed(&mut self.rng);
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
            RandomBufferType::RandomSeed => self.data.as_ref().map(|d| d.random_seeds.as_slice()),
            RandomBufferType::SobolLut => None,
        }
    }

    fn supports_intermediate_value(&self, value: IntermediateValue) -> bool {
        value == IntermediateValue::Visibility
    }

    fn set_intermediate_value_buffer(
        &mut self,
        value: IntermediateValue,
        buffer: Option<Arc<OutputBuffer>>,
    ) -> Result<()> {
        match value {
            IntermediateValue::Visibility => self.visibility = buffer,
        }
        Ok(())
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
    use crate::scene::Preset;

    #[test]
    fn test_buffers_required() {
        let mut est = PathTracingEstimator::new(EstimatorConfig::default()).unwrap();
        assert!(matches!(est.ray_buffer_mut(), Err(Error::WorkBufferNotAllocated)));
        assert!(matches!(est.first_hit_buffer(), Err(Error::WorkBufferNotAllocated)));
        let scene = Preset::LitPlane.build(2, 2).unwrap();
        let out = OutputBuffer::new(4);
        let err = est
            .estimate(&scene, 4, QualityLevel::Normal, &out, &EstimateOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::WorkBufferNotAllocated));
    }

    #[test]
    fn test_estimate_larger_than_buffers() {
        let mut est = PathTracingEstimator::new(EstimatorConfig::default()).unwrap();
        est.set_work_buffer_size(4).unwrap();
        let scene = Preset::LitPlane.build(2, 2).unwrap();
        let out = OutputBuffer::new(8);
        let err = est
            .estimate(&scene, 8, QualityLevel::Normal, &out, &EstimateOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::WorkBufferTooSmall { requested: 8, capacity: 4 }));
    }

    #[test]
    fn test_seed_buffer_and_counter() {
        let mut est = PathTracingEstimator::new(EstimatorConfig::default()).unwrap();
        est.set_work_buffer_size(16).unwrap();
        est.set_random_seed(5);
        let a = est.random_buffer(RandomBufferType::RandomSeed).unwrap().to_vec();
        est.set_random_seed(5);
        assert_eq!(est.random_buffer(RandomBufferType::RandomSeed).unwrap(), a.as_slice());
        assert!(est.random_buffer(RandomBufferType::SobolLut).is_none());
        assert!(!est.has_random_buffer(RandomBufferType::SobolLut));
        assert_eq!(est.sample_counter(), 0);
    }
}
