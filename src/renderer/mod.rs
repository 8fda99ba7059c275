//! Tile driver.
//!
//! [`MonteCarloRenderer`] splits a film into tiles that fit the estimator's
//! work buffers, generates jittered primary rays per tile and lets the
//! estimator accumulate radiance straight into the film through output
//! indices. One `render` call adds one sample to every film pixel.
//!
//! ```ignore
//! let est = EstimatorKind::PathTracing.create(EstimatorConfig::default())?;
//! let mut renderer = MonteCarloRenderer::new(est, (64, 64))?;
//! let film = Film::new(256, 256)?;
//! for _ in 0..16 {
//!     renderer.render(&scene, &film)?;
//! }
//! ```

pub mod aov;
mod film;
mod tiles;

pub use aov::AovKind;
pub use film::Film;
pub use tiles::{tiles, Tile, Tiles};

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::ActiveCount;
use crate::device::{AccumulateMode, ComputeQueue, Kernel, OutputBuffer};
use crate::estimator::{EstimateOptions, Estimator, IntermediateValue, MissedRayHandler, QualityLevel};
use crate::kernels::camera::{generate_primary_rays, generate_tile_domain};
use crate::scene::Scene;
use crate::util::{Error, Result};

/// Tile size used when none is given.
pub const DEFAULT_TILE_SIZE: (u32, u32) = (1920, 1080);

pub struct MonteCarloRenderer {
    estimator: Box<dyn Estimator>,
    tile_width: u32,
    tile_height: u32,
    sample_counter: u32,
    rng: StdRng,
    quality: QualityLevel,
    atomic_update: bool,
    /// Film cells of the current tile.
    cells: Vec<u32>,
    aovs: Vec<(AovKind, Film)>,
    visibility: Option<Film>,
    background: Option<Arc<dyn MissedRayHandler + Send>>,
    queue: ComputeQueue,
}

impl MonteCarloRenderer {
    /// Take ownership of `estimator` and size its buffers for one tile.
    pub fn new(mut estimator: Box<dyn Estimator>, tile_size: (u32, u32)) -> Result<Self> {
        let (tile_width, tile_height) = tile_size;
        if tile_width == 0 || tile_height == 0 {
            return Err(Error::invalid_argument(format!("tile size {tile_width}x{tile_height}")));
        }
        let slots = tile_width as usize * tile_height as usize;
        estimator.set_work_buffer_size(slots)?;
        tracing::debug!(estimator = %estimator.kind(), tile_width, tile_height, "renderer created");
        Ok(Self {
            estimator,
            tile_width,
            tile_height,
            sample_counter: 0,
            rng: StdRng::seed_from_u64(0),
            quality: QualityLevel::Normal,
            atomic_update: false,
            cells: vec![0; slots],
            aovs: Vec::new(),
            visibility: None,
            background: None,
            queue: ComputeQueue::new("renderer"),
        })
    }

    pub fn with_default_tiles(estimator: Box<dyn Estimator>) -> Result<Self> {
        Self::new(estimator, DEFAULT_TILE_SIZE)
    }

    pub fn estimator(&self) -> &dyn Estimator {
        self.estimator.as_ref()
    }

    pub fn estimator_mut(&mut self) -> &mut dyn Estimator {
        self.estimator.as_mut()
    }

    pub fn tile_size(&self) -> (u32, u32) {
        (self.tile_width, self.tile_height)
    }

    /// Frames rendered since the last clear.
    pub fn sample_counter(&self) -> u32 {
        self.sample_counter
    }

    pub fn queue(&self) -> &ComputeQueue {
        &self.queue
    }

    pub fn set_quality(&mut self, quality: QualityLevel) {
        self.quality = quality;
    }

    pub fn set_atomic_update(&mut self, atomic: bool) {
        self.atomic_update = atomic;
    }

    /// Seed both the estimator and the jitter stream.
    pub fn set_random_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        self.estimator.set_random_seed(seed);
    }

    /// Radiance for primary rays that escape, replacing the environment.
    pub fn set_background(&mut self, handler: Option<Arc<dyn MissedRayHandler + Send>>) {
        self.background = handler;
    }

    /// Attach or detach an AOV film.
    pub fn set_aov(&mut self, kind: AovKind, film: Option<Film>) {
        self.aovs.retain(|(k, _)| *k != kind);
        if let Some(film) = film {
            self.aovs.push((kind, film));
        }
    }

    pub fn aov(&self, kind: AovKind) -> Option<&Film> {
        self.aovs.iter().find(|(k, _)| *k == kind).map(|(_, f)| f)
    }

    /// Route light-sample visibility into `film`. Fails with `Unsupported`
    /// when the estimator has no visibility output.
    pub fn set_visibility_output(&mut self, film: Option<Film>) -> Result<()> {
        let buffer: Option<Arc<OutputBuffer>> = film.as_ref().map(|f| Arc::clone(f.buffer()));
        self.estimator
            .set_intermediate_value_buffer(IntermediateValue::Visibility, buffer)?;
        self.visibility = film;
        Ok(())
    }

    /// Zero the film and every attached output, restart the sample count.
    pub fn clear(&mut self, film: &Film) {
        film.clear();
        for (_, aov) in &self.aovs {
            aov.clear();
        }
        if let Some(vis) = &self.visibility {
            vis.clear();
        }
        self.sample_counter = 0;
    }

    /// Add one sample per pixel of `film`.
    pub fn render(&mut self, scene: &Scene, film: &Film) -> Result<()> {
        let camera = scene.camera();
        if camera.width != film.width() || camera.height != film.height() {
            return Err(Error::invalid_argument(format!(
                "camera is {}x{} but film is {}x{}",
                camera.width,
                camera.height,
                film.width(),
                film.height()
            )));
        }
        let _span = tracing::debug_span!("render", sample = self.sample_counter).entered();
        self.queue.reset_log();

        let launch_seed: u32 = self.rng.gen();
        let background = self.background.as_deref().map(|h| h as &dyn MissedRayHandler);
        let options = EstimateOptions {
            use_output_indices: true,
            atomic_update: self.atomic_update,
            missed_primary_rays: background,
            light_path_count: Some(film.pixel_count()),
        };

        for tile in tiles(film.width(), film.height(), self.tile_width, self.tile_height) {
            let _tile_span = tracing::trace_span!("tile", x = tile.x, y = tile.y).entered();
            let n = self
                .queue
                .launch(Kernel::GenerateTileDomain, None, ActiveCount::new(tile.pixel_count()), |_| {
                    generate_tile_domain(&tile, film.width(), &mut self.cells)
                })
                .unwrap_or(ActiveCount::ZERO);
            let cells = &self.cells[..n.get()];
            self.estimator.output_index_buffer_mut()?[..n.get()].copy_from_slice(cells);
            *self.estimator.ray_count_mut()? = n;

            if !self.aovs.is_empty() {
                let rays = self.estimator.ray_buffer_mut()?;
                self.queue.launch(Kernel::GeneratePrimaryRays, None, n, |_| {
                    generate_primary_rays(camera, cells, launch_seed, self.sample_counter, false, rays);
                });
                self.estimator.trace_first_hit(scene, n.get())?;
                let hits = &self.estimator.first_hit_buffer()?[..n.get()];
                let aovs = &self.aovs;
                self.queue.launch(Kernel::FillAovs, None, n, |_| {
                    aov::fill_aovs(scene, hits, cells, aovs, AccumulateMode::Plain);
                });
            }

            let rays = self.estimator.ray_buffer_mut()?;
            self.queue.launch(Kernel::GeneratePrimaryRays, None, n, |_| {
                generate_primary_rays(camera, cells, launch_seed, self.sample_counter, true, rays);
            });
            self.estimator
                .estimate(scene, n.get(), self.quality, film.buffer(), &options)?;
        }

        self.sample_counter = self.sample_counter.wrapping_add(1);
        self.queue.finish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::{EstimatorConfig, EstimatorKind};
    use crate::scene::Preset;
    use glam::Vec3;

    fn renderer(kind: EstimatorKind, tile: (u32, u32)) -> MonteCarloRenderer {
        let est = kind.create(EstimatorConfig::default()).unwrap();
        MonteCarloRenderer::new(est, tile).unwrap()
    }

    #[test]
    fn test_every_pixel_gets_one_sample() {
        let scene = Preset::Cornell.build(7, 5).unwrap();
        let film = Film::new(7, 5).unwrap();
        let mut r = renderer(EstimatorKind::PathTracing, (3, 2));
        r.render(&scene, &film).unwrap();
        r.render(&scene, &film).unwrap();
        for c in film.buffer().snapshot() {
            assert_eq!(c.w, 2.0);
        }
        assert_eq!(r.sample_counter(), 2);
        assert_eq!(r.queue().fired(Kernel::GenerateTileDomain).count(), 9);
    }

    #[test]
    fn test_film_size_mismatch() {
        let scene = Preset::Cornell.build(4, 4).unwrap();
        let film = Film::new(8, 4).unwrap();
        let mut r = renderer(EstimatorKind::PathTracing, (4, 4));
        assert!(matches!(r.render(&scene, &film), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_clear_resets_counter() {
        let scene = Preset::LitPlane.build(4, 4).unwrap();
        let film = Film::new(4, 4).unwrap();
        let mut r = renderer(EstimatorKind::Bdpt, (4, 4));
        r.render(&scene, &film).unwrap();
        r.clear(&film);
        assert_eq!(r.sample_counter(), 0);
        assert_eq!(film.buffer().total().w, 0.0);
    }

    #[test]
    fn test_aovs_filled() {
        let scene = Preset::LitPlane.build(4, 4).unwrap();
        let film = Film::new(4, 4).unwrap();
        let depth = Film::new(4, 4).unwrap();
        let normal = Film::new(4, 4).unwrap();
        let mut r = renderer(EstimatorKind::PathTracing, (2, 2));
        r.set_aov(AovKind::Depth, Some(depth.clone()));
        r.set_aov(AovKind::GeometricNormal, Some(normal.clone()));
        r.render(&scene, &film).unwrap();
        // The centre of the image looks at the plane.
        let d = depth.get(2, 2);
        assert_eq!(d.w, 1.0);
        assert!(d.x > 0.0);
        let n = normal.get(2, 2);
        assert!((n.truncate() - Vec3::Y).length() < 1e-3);
        assert!(r.aov(AovKind::Albedo).is_none());
    }

    #[test]
    fn test_visibility_forwarding() {
        let film = Film::new(2, 2).unwrap();
        let mut pt = renderer(EstimatorKind::PathTracing, (2, 2));
        assert!(pt.set_visibility_output(Some(film.clone())).is_ok());
        let mut bdpt = renderer(EstimatorKind::Bdpt, (2, 2));
        assert!(matches!(
            bdpt.set_visibility_output(Some(film)),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_zero_tile_rejected() {
        let est = EstimatorKind::PathTracing.create(EstimatorConfig::default()).unwrap();
        assert!(matches!(
            MonteCarloRenderer::new(est, (0, 8)),
            Err(Error::InvalidArgument(_))
        ));
    }
}
