//! Render worker threads.
//!
//! Each worker owns a renderer and a local film. It renders one sample at a
//! time and periodically ships its partial sum to the coordinator, tagged
//! with the scene state it was rendered against. Samples rendered since
//! the last publish are flushed when the worker stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use glam::Vec4;
use parking_lot::Mutex;

use super::DeviceStats;
use crate::config::RenderSettings;
use crate::renderer::{Film, MonteCarloRenderer};
use crate::scene::Scene;
use crate::util::{Error, Result};

/// Commands sent from the coordinator to a worker.
#[derive(Debug)]
pub enum WorkerCommand {
    /// Render `scene` from now on. `state` tags every later snapshot.
    SetScene { scene: Arc<Scene>, state: u64 },
    /// Stop the worker thread.
    Stop,
}

/// Partial film sum of one worker.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub device: usize,
    pub state: u64,
    pub samples: u32,
    pub data: Vec<Vec4>,
}

/// Handle to one worker thread.
pub struct WorkerHandle {
    device: usize,
    tx: Sender<WorkerCommand>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn the worker for `device`. The renderer is built on the worker
    /// thread; failures are logged there and end the worker.
    pub fn spawn(
        device: usize,
        settings: RenderSettings,
        results: Sender<Snapshot>,
        stats: Arc<Mutex<Vec<DeviceStats>>>,
    ) -> Result<Self> {
        let (tx, rx) = channel::<WorkerCommand>();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            device,
            settings,
            rx,
            results,
            stop: Arc::clone(&stop),
            stats,
        };
        let handle = thread::Builder::new()
            .name(format!("wavetrace-device-{device}"))
            .spawn(move || worker.run())?;
        Ok(Self {
            device,
            tx,
            stop,
            handle: Some(handle),
        })
    }

    pub fn device(&self) -> usize {
        self.device
    }

    pub fn set_scene(&self, scene: Arc<Scene>, state: u64) {
        let _ = self.tx.send(WorkerCommand::SetScene { scene, state });
    }

    /// Stop the worker and wait for it to finish.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.tx.send(WorkerCommand::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(device = self.device, "worker panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    device: usize,
    settings: RenderSettings,
    rx: Receiver<WorkerCommand>,
    results: Sender<Snapshot>,
    stop: Arc<AtomicBool>,
    stats: Arc<Mutex<Vec<DeviceStats>>>,
}

/// What the worker is currently rendering.
struct Job {
    scene: Arc<Scene>,
    state: u64,
    film: Film,
    samples: u32,
    last_publish: Instant,
}

impl Worker {
    fn run(self) {
        let _span = tracing::info_span!("worker", device = self.device).entered();
        let mut renderer = match self.settings.create_renderer(self.device) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "failed to create renderer");
                self.record_error(&e);
                return;
            }
        };
        tracing::info!("worker started");
        if let Err(e) = self.render_loop(&mut renderer) {
            tracing::error!(error = %e, "worker stopped on error");
            self.record_error(&e);
        }
        tracing::info!("worker stopped");
    }

    fn render_loop(&self, renderer: &mut MonteCarloRenderer) -> Result<()> {
        let interval = self.settings.publish_interval();
        let mut job: Option<Job> = None;

        while !self.stop.load(Ordering::Relaxed) {
            // Block while idle, poll while rendering.
            let first = if job.is_none() {
                match self.rx.recv() {
                    Ok(cmd) => Some(cmd),
                    Err(_) => break,
                }
            } else {
                None
            };
            match drain_to_latest(&self.rx, first) {
                Drained::Stop => break,
                Drained::Scene { scene, state } => {
                    job = Some(self.start_job(renderer, scene, state, job.take())?);
                }
                Drained::Nothing => {}
            }

            let Some(job) = job.as_mut() else {
                continue;
            };
            renderer.render(&job.scene, &job.film)?;
            job.samples += 1;
            self.update_stats(|s| s.samples += 1);

            if job.last_publish.elapsed() >= interval {
                self.publish(job)?;
            }
        }

        if let Some(job) = job.as_mut().filter(|j| j.samples > 0) {
            if let Err(e) = self.publish(job) {
                tracing::debug!(error = %e, samples = job.samples, "final snapshot not delivered");
            }
        }
        Ok(())
    }

    /// Reset the local film for a new scene state, reusing it when the
    /// resolution is unchanged.
    fn start_job(
        &self,
        renderer: &mut MonteCarloRenderer,
        scene: Arc<Scene>,
        state: u64,
        previous: Option<Job>,
    ) -> Result<Job> {
        let (w, h) = (scene.camera().width, scene.camera().height);
        let film = match previous {
            Some(prev) if prev.film.width() == w && prev.film.height() == h => prev.film,
            _ => Film::new(w, h)?,
        };
        renderer.clear(&film);
        tracing::debug!(state, "scene changed");
        Ok(Job {
            scene,
            state,
            film,
            samples: 0,
            last_publish: Instant::now(),
        })
    }

    fn publish(&self, job: &mut Job) -> Result<()> {
        let snapshot = Snapshot {
            device: self.device,
            state: job.state,
            samples: job.samples,
            data: job.film.buffer().snapshot(),
        };
        self.results
            .send(snapshot)
            .map_err(|_| Error::other("coordinator disconnected"))?;
        job.film.clear();
        job.samples = 0;
        job.last_publish = Instant::now();
        self.update_stats(|s| s.published += 1);
        Ok(())
    }

    fn update_stats(&self, f: impl FnOnce(&mut DeviceStats)) {
        if let Some(s) = self.stats.lock().get_mut(self.device) {
            f(s);
        }
    }

    fn record_error(&self, e: &Error) {
        self.update_stats(|s| s.error = Some(e.to_string()));
    }
}

enum Drained {
    Nothing,
    Scene { scene: Arc<Scene>, state: u64 },
    Stop,
}

/// Drain queued commands, keeping only the newest scene. `Stop` wins over
/// everything.
fn drain_to_latest(rx: &Receiver<WorkerCommand>, first: Option<WorkerCommand>) -> Drained {
    let mut latest = Drained::Nothing;
    let mut next = first;
    loop {
        let cmd = match next.take() {
            Some(cmd) => cmd,
            None => match rx.try_recv() {
                Ok(cmd) => cmd,
                Err(TryRecvError::Empty) => return latest,
                Err(TryRecvError::Disconnected) => return Drained::Stop,
            },
        };
        match cmd {
            WorkerCommand::SetScene { scene, state } => latest = Drained::Scene { scene, state },
            WorkerCommand::Stop => return Drained::Stop,
        }
    }
}
