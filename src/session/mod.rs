//! Multi-device render session.
//!
//! The coordinator renders on the calling thread with the primary device and
//! owns the canonical film. Every other device runs on its own worker thread
//! (see [`worker`]) and ships partial sums back as [`Snapshot`]s. A snapshot
//! is only added if it was rendered against the current scene state;
//! anything older is dropped and counted.

pub mod worker;

pub use worker::{Snapshot, WorkerCommand, WorkerHandle};

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::RenderSettings;
use crate::core::ActiveCount;
use crate::device::{AccumulateMode, ComputeQueue, Kernel};
use crate::renderer::{Film, MonteCarloRenderer};
use crate::scene::Scene;
use crate::util::Result;

/// Per-device counters shared with the workers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStats {
    pub samples: u64,
    pub published: u64,
    pub error: Option<String>,
}

pub struct RenderSession {
    settings: RenderSettings,
    primary: MonteCarloRenderer,
    film: Film,
    scene: Arc<Scene>,
    scene_state: u64,
    workers: Vec<WorkerHandle>,
    results_tx: Sender<Snapshot>,
    results: Receiver<Snapshot>,
    stats: Arc<Mutex<Vec<DeviceStats>>>,
    /// Samples added to the canonical film, all devices.
    samples: u64,
    stale_dropped: u64,
    queue: ComputeQueue,
}

impl RenderSession {
    /// Start `settings.devices - 1` workers and hand them `scene`.
    pub fn new(settings: RenderSettings, scene: Scene) -> Result<Self> {
        settings.validate()?;
        let primary = settings.create_renderer(0)?;
        let film = Film::new(scene.camera().width, scene.camera().height)?;
        let stats = Arc::new(Mutex::new(vec![DeviceStats::default(); settings.devices]));
        let (results_tx, results) = channel();

        let mut session = Self {
            primary,
            film,
            scene: Arc::new(scene),
            scene_state: 0,
            workers: Vec::with_capacity(settings.devices.saturating_sub(1)),
            results_tx,
            results,
            stats,
            samples: 0,
            stale_dropped: 0,
            queue: ComputeQueue::new("session"),
            settings,
        };
        for device in 1..session.settings.devices {
            let worker = WorkerHandle::spawn(
                device,
                session.settings.clone(),
                session.results_tx.clone(),
                Arc::clone(&session.stats),
            )?;
            worker.set_scene(Arc::clone(&session.scene), session.scene_state);
            session.workers.push(worker);
        }
        tracing::info!(
            devices = session.settings.devices,
            estimator = %session.settings.estimator,
            "render session started"
        );
        Ok(session)
    }

    pub fn film(&self) -> &Film {
        &self.film
    }

    pub fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }

    /// Monotonic scene version; bumped by every [`set_scene`](Self::set_scene).
    pub fn scene_state(&self) -> u64 {
        self.scene_state
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }

    pub fn device_stats(&self) -> Vec<DeviceStats> {
        self.stats.lock().clone()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn queue(&self) -> &ComputeQueue {
        &self.queue
    }

    /// Replace the scene on every device and restart accumulation.
    pub fn set_scene(&mut self, scene: Scene) -> Result<()> {
        let (w, h) = (scene.camera().width, scene.camera().height);
        if w != self.film.width() || h != self.film.height() {
            self.film = Film::new(w, h)?;
        }
        self.scene_state += 1;
        self.scene = Arc::new(scene);
        self.primary.clear(&self.film);
        self.samples = 0;
        for worker in &self.workers {
            worker.set_scene(Arc::clone(&self.scene), self.scene_state);
        }
        tracing::info!(state = self.scene_state, "scene changed");
        Ok(())
    }

    /// Render one sample on the primary device, then merge worker snapshots.
    pub fn render_sample(&mut self) -> Result<()> {
        self.primary.render(&self.scene, &self.film)?;
        self.samples += 1;
        if let Some(s) = self.stats.lock().get_mut(0) {
            s.samples += 1;
        }
        self.update();
        Ok(())
    }

    /// Merge every pending worker snapshot. Returns how many were added.
    pub fn update(&mut self) -> usize {
        let mut added = 0;
        while let Ok(snapshot) = self.results.try_recv() {
            if self.accumulate(&snapshot) {
                added += 1;
            }
        }
        added
    }

    /// `AccumulateData`: add `snapshot` to the canonical film if it matches
    /// the current scene state and film size.
    pub fn accumulate(&mut self, snapshot: &Snapshot) -> bool {
        if snapshot.state != self.scene_state || snapshot.data.len() != self.film.pixel_count() {
            self.stale_dropped += 1;
            tracing::warn!(
                device = snapshot.device,
                state = snapshot.state,
                current = self.scene_state,
                dropped = self.stale_dropped,
                "dropping stale snapshot"
            );
            return false;
        }
        let film = &self.film;
        self.queue
            .launch(Kernel::AccumulateData, None, ActiveCount::new(snapshot.data.len()), |_| {
                film.buffer().accumulate(&snapshot.data, AccumulateMode::Plain);
            });
        self.samples += u64::from(snapshot.samples);
        tracing::trace!(device = snapshot.device, samples = snapshot.samples, "snapshot merged");
        true
    }

    /// Render until the canonical film holds at least `samples` samples per
    /// pixel, counting worker contributions.
    pub fn render_to(&mut self, samples: u64) -> Result<()> {
        while self.samples < samples {
            self.render_sample()?;
        }
        Ok(())
    }

    /// Stop and join every worker. Snapshots already queued are merged.
    pub fn stop(&mut self) {
        for worker in &mut self.workers {
            worker.stop();
        }
        self.workers.clear();
        self.update();
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            tracing::info!(workers = self.workers.len(), "stopping render session");
        }
        for worker in &mut self.workers {
            worker.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Preset;
    use glam::Vec4;

    fn settings(devices: usize) -> RenderSettings {
        RenderSettings {
            width: 4,
            height: 4,
            devices,
            publish_interval_ms: 0,
            scene: Preset::LitPlane,
            ..Default::default()
        }
    }

    fn session(devices: usize) -> RenderSession {
        let s = settings(devices);
        let scene = s.build_scene().unwrap();
        RenderSession::new(s, scene).unwrap()
    }

    fn snapshot(state: u64) -> Snapshot {
        Snapshot {
            device: 1,
            state,
            samples: 2,
            data: vec![Vec4::new(1.0, 1.0, 1.0, 2.0); 16],
        }
    }

    #[test]
    fn test_stale_snapshot_dropped() {
        let mut s = session(1);
        s.set_scene(Preset::LitPlane.build(4, 4).unwrap()).unwrap();
        assert_eq!(s.scene_state(), 1);

        assert!(!s.accumulate(&snapshot(0)));
        assert_eq!(s.stale_dropped(), 1);
        assert_eq!(s.film().buffer().total(), Vec4::ZERO);

        assert!(s.accumulate(&snapshot(1)));
        assert_eq!(s.film().buffer().total().w, 32.0);
        assert_eq!(s.samples(), 2);
        assert_eq!(s.queue().fired(Kernel::AccumulateData).count(), 1);
    }

    #[test]
    fn test_wrong_size_snapshot_dropped() {
        let mut s = session(1);
        let mut snap = snapshot(0);
        snap.data.truncate(3);
        assert!(!s.accumulate(&snap));
        assert_eq!(s.stale_dropped(), 1);
    }

    #[test]
    fn test_single_device_renders() {
        let mut s = session(1);
        s.render_to(3).unwrap();
        assert_eq!(s.samples(), 3);
        assert_eq!(s.film().buffer().total().w, 48.0);
        assert_eq!(s.worker_count(), 0);
    }

    #[test]
    fn test_set_scene_clears_film() {
        let mut s = session(1);
        s.render_sample().unwrap();
        s.set_scene(Preset::LitPlane.build(4, 4).unwrap()).unwrap();
        assert_eq!(s.film().buffer().total().w, 0.0);
        assert_eq!(s.samples(), 0);
    }

    #[test]
    fn test_workers_stop_on_drop() {
        let mut s = session(2);
        assert_eq!(s.worker_count(), 1);
        s.render_sample().unwrap();
        drop(s);
    }
}
