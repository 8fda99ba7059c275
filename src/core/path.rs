//! Per-pixel path state and the active-slot count.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::ops::Range;

/// Path flag bits.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PathFlags(pub u32);

impl PathFlags {
    pub const NONE: Self = Self(0);
    pub const KILLED: Self = Self(1 << 0);
    pub const SCATTERED: Self = Self(1 << 1);
    pub const SPECULAR: Self = Self(1 << 2);
    /// No light sample was taken at the last scattering vertex, or there
    /// was none yet.
    pub const UNSAMPLED: Self = Self(1 << 3);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

/// In-flight path record (32 bytes), indexed by pixel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PathState {
    pub throughput: [f32; 3],
    /// Current medium, -1 = none.
    pub volume: i32,
    pub flags: PathFlags,
    pub _pad: [u32; 3],
}

impl Default for PathState {
    fn default() -> Self {
        Self::FRESH
    }
}

impl PathState {
    /// State written by `InitPathData`.
    pub const FRESH: Self = Self {
        throughput: [1.0; 3],
        volume: -1,
        flags: PathFlags::UNSAMPLED,
        _pad: [0; 3],
    };

    #[inline]
    pub fn throughput(&self) -> Vec3 {
        Vec3::from_array(self.throughput)
    }

    #[inline]
    pub fn set_throughput(&mut self, t: Vec3) {
        self.throughput = t.to_array();
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        !self.flags.contains(PathFlags::KILLED)
    }

    #[inline]
    pub fn kill(&mut self) {
        self.flags.insert(PathFlags::KILLED);
    }

    #[inline]
    pub fn is_scattered(&self) -> bool {
        self.flags.contains(PathFlags::SCATTERED)
    }

    #[inline]
    pub fn is_specular(&self) -> bool {
        self.flags.contains(PathFlags::SPECULAR)
    }

    /// Emission reached from here was not also sampled as a light, so it
    /// counts with weight one.
    #[inline]
    pub fn skips_light_mis(&self) -> bool {
        self.is_specular() || self.flags.contains(PathFlags::UNSAMPLED)
    }

    #[inline]
    pub fn medium(&self) -> Option<usize> {
        usize::try_from(self.volume).ok()
    }

    #[inline]
    pub fn set_medium(&mut self, volume: Option<usize>) {
        self.volume = volume.map_or(-1, |v| v as i32);
    }
}

/// Number of live ray slots for the current stage.
///
/// Produced by compaction and passed by value into every launch that
/// follows it, bounding that launch's grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActiveCount(usize);

impl ActiveCount {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn new(count: usize) -> Self {
        Self(count)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn range(self) -> Range<usize> {
        0..self.0
    }

    /// Panics if the count exceeds the allocated capacity. A compaction that
    /// overflows its buffers can only come from a broken predicate.
    #[inline]
    #[track_caller]
    pub fn within(self, capacity: usize) -> Self {
        assert!(
            self.0 <= capacity,
            "active count {} exceeds work buffer capacity {}",
            self.0,
            capacity
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut p = PathState::FRESH;
        assert!(p.is_alive());
        p.flags.insert(PathFlags::SCATTERED);
        assert!(p.is_scattered());
        p.flags.remove(PathFlags::SCATTERED);
        assert!(!p.is_scattered());
        p.kill();
        assert!(!p.is_alive());
    }

    #[test]
    fn test_light_mis_needs_a_sampled_vertex() {
        let mut p = PathState::FRESH;
        assert!(p.skips_light_mis());
        p.flags.remove(PathFlags::UNSAMPLED);
        assert!(!p.skips_light_mis());
        p.flags.insert(PathFlags::SPECULAR);
        assert!(p.skips_light_mis());
    }

    #[test]
    fn test_medium_roundtrip() {
        let mut p = PathState::FRESH;
        assert_eq!(p.medium(), None);
        p.set_medium(Some(3));
        assert_eq!(p.medium(), Some(3));
    }

    #[test]
    #[should_panic(expected = "exceeds work buffer capacity")]
    fn test_active_count_overflow_panics() {
        ActiveCount::new(9).within(8);
    }
}
