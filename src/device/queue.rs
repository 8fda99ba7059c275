//! In-order compute queue.
//!
//! Kernels execute synchronously in submission order. The queue keeps a
//! launch log for the most recent estimate so tests and tools can see which
//! kernels fired, at which bounce and with which grid size. A launch with an
//! empty grid is skipped, the same way an indirect dispatch of zero groups
//! does nothing.

use std::fmt;

use crate::core::ActiveCount;

/// Named kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    InitPathData,
    Intersect,
    EvaluateVolume,
    ShadeMiss,
    FilterPathStream,
    Compact,
    RestorePixelIndices,
    ShadeVolume,
    ShadeSurface,
    ShadeBackground,
    HandleMissedRays,
    AdvanceIterationCount,
    IntersectShadow,
    GatherLightSamples,
    GatherVisibility,
    TraceFirstHit,
    GenerateVertices,
    GenerateLightVertices,
    SampleSurface,
    ConnectDirect,
    Connect,
    ConnectCaustics,
    GatherContributions,
    GatherCausticContributions,
    GenerateTileDomain,
    GeneratePrimaryRays,
    FillAovs,
    AccumulateData,
}

impl Kernel {
    pub fn name(self) -> &'static str {
        match self {
            Self::InitPathData => "InitPathData",
            Self::Intersect => "Intersect",
            Self::EvaluateVolume => "EvaluateVolume",
            Self::ShadeMiss => "ShadeMiss",
            Self::FilterPathStream => "FilterPathStream",
            Self::Compact => "Compact",
            Self::RestorePixelIndices => "RestorePixelIndices",
            Self::ShadeVolume => "ShadeVolume",
            Self::ShadeSurface => "ShadeSurface",
            Self::ShadeBackground => "ShadeBackgroundEnvMap",
            Self::HandleMissedRays => "HandleMissedRays",
            Self::AdvanceIterationCount => "AdvanceIterationCount",
            Self::IntersectShadow => "IntersectShadow",
            Self::GatherLightSamples => "GatherLightSamples",
            Self::GatherVisibility => "GatherVisibility",
            Self::TraceFirstHit => "TraceFirstHit",
            Self::GenerateVertices => "GenerateVertices",
            Self::GenerateLightVertices => "GenerateLightVertices",
            Self::SampleSurface => "SampleSurface",
            Self::ConnectDirect => "ConnectDirect",
            Self::Connect => "Connect",
            Self::ConnectCaustics => "ConnectCaustics",
            Self::GatherContributions => "GatherContributions",
            Self::GatherCausticContributions => "GatherCausticContributions",
            Self::GenerateTileDomain => "GenerateTileDomain",
            Self::GeneratePrimaryRays => "GeneratePrimaryRays",
            Self::FillAovs => "FillAOVs",
            Self::AccumulateData => "AccumulateData",
        }
    }

    /// Kernels that shade or deposit radiance for live slots.
    pub fn is_shading(self) -> bool {
        matches!(
            self,
            Self::EvaluateVolume
                | Self::ShadeMiss
                | Self::ShadeVolume
                | Self::ShadeSurface
                | Self::IntersectShadow
                | Self::GatherLightSamples
                | Self::GatherVisibility
                | Self::SampleSurface
        )
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One fired launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchRecord {
    pub kernel: Kernel,
    pub bounce: Option<u32>,
    pub grid: usize,
}

/// In-order queue with a launch log.
#[derive(Debug)]
pub struct ComputeQueue {
    label: &'static str,
    launches: Vec<LaunchRecord>,
    skipped: usize,
    finishes: u64,
    recording: bool,
}

impl ComputeQueue {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            launches: Vec::new(),
            skipped: 0,
            finishes: 0,
            recording: true,
        }
    }

    /// Run `body` over `grid` slots unless the grid is empty.
    pub fn launch<R>(
        &mut self,
        kernel: Kernel,
        bounce: Option<u32>,
        grid: ActiveCount,
        body: impl FnOnce(ActiveCount) -> R,
    ) -> Option<R> {
        if grid.is_empty() {
            self.skipped += 1;
            tracing::trace!(queue = self.label, %kernel, ?bounce, "skip empty launch");
            return None;
        }
        tracing::trace!(queue = self.label, %kernel, ?bounce, grid = grid.get(), "launch");
        if self.recording {
            self.launches.push(LaunchRecord {
                kernel,
                bounce,
                grid: grid.get(),
            });
        }
        Some(body(grid))
    }

    /// Completion point. Launches already ran, so this only marks the
    /// boundary for the log and tracing.
    pub fn finish(&mut self) {
        self.finishes += 1;
        tracing::trace!(queue = self.label, launches = self.launches.len(), "finish");
    }

    /// Forget the launch log (called at the start of each estimate).
    pub fn reset_log(&mut self) {
        self.launches.clear();
        self.skipped = 0;
    }

    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    pub fn launches(&self) -> &[LaunchRecord] {
        &self.launches
    }

    /// Launches of `kernel` in the current log.
    pub fn fired(&self, kernel: Kernel) -> impl Iterator<Item = &LaunchRecord> + '_ {
        self.launches.iter().filter(move |l| l.kernel == kernel)
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn finishes(&self) -> u64 {
        self.finishes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_grid_does_not_fire() {
        let mut q = ComputeQueue::new("test");
        let mut ran = false;
        assert!(q.launch(Kernel::ShadeSurface, Some(1), ActiveCount::ZERO, |_| ran = true).is_none());
        assert!(!ran);
        assert_eq!(q.skipped(), 1);
        assert!(q.launches().is_empty());
    }

    #[test]
    fn test_launch_log() {
        let mut q = ComputeQueue::new("test");
        let r = q.launch(Kernel::Intersect, Some(0), ActiveCount::new(4), |g| g.get() * 2);
        assert_eq!(r, Some(8));
        assert_eq!(q.fired(Kernel::Intersect).count(), 1);
        q.finish();
        assert_eq!(q.finishes(), 1);
        q.reset_log();
        assert!(q.launches().is_empty());
    }
}
