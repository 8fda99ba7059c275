//! Float4 accumulation buffer.
//!
//! Cells store `f32` bit patterns in `AtomicU32`s so that kernels running on
//! many rayon workers can share `&OutputBuffer`. xyz = summed radiance,
//! w = accumulated sample count. Writes to cells past the end are counted
//! and dropped.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use glam::{Vec3, Vec4};
use rayon::prelude::*;

/// How a kernel adds into an output cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccumulateMode {
    /// Load, add, store. Loses updates if two writers hit the same cell.
    #[default]
    Plain,
    /// Compare-and-swap loop over the bit pattern.
    Atomic,
}

impl AccumulateMode {
    pub fn from_atomic(atomic: bool) -> Self {
        if atomic {
            Self::Atomic
        } else {
            Self::Plain
        }
    }
}

#[inline]
fn add_f32(cell: &AtomicU32, v: f32, mode: AccumulateMode) {
    if v == 0.0 {
        return;
    }
    match mode {
        AccumulateMode::Plain => {
            let cur = f32::from_bits(cell.load(Ordering::Relaxed));
            cell.store((cur + v).to_bits(), Ordering::Relaxed);
        }
        AccumulateMode::Atomic => {
            let mut cur = cell.load(Ordering::Relaxed);
            loop {
                let new = (f32::from_bits(cur) + v).to_bits();
                match cell.compare_exchange_weak(cur, new, Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => break,
                    Err(actual) => cur = actual,
                }
            }
        }
    }
}

/// Per-pixel float4 accumulation buffer.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    cells: Vec<[AtomicU32; 4]>,
    dropped: AtomicU64,
}

impl OutputBuffer {
    /// Zero-initialised buffer with `len` cells.
    pub fn new(len: usize) -> Self {
        let cells = (0..len)
            .map(|_| std::array::from_fn(|_| AtomicU32::new(0)))
            .collect();
        Self {
            cells,
            dropped: AtomicU64::new(0),
        }
    }

    /// Buffer initialised from host data.
    pub fn from_slice(data: &[Vec4]) -> Self {
        let out = Self::new(data.len());
        out.load(data);
        out
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Read one cell. Returns zero for out-of-range indices.
    pub fn get(&self, idx: usize) -> Vec4 {
        match self.cells.get(idx) {
            Some(c) => Vec4::new(
                f32::from_bits(c[0].load(Ordering::Relaxed)),
                f32::from_bits(c[1].load(Ordering::Relaxed)),
                f32::from_bits(c[2].load(Ordering::Relaxed)),
                f32::from_bits(c[3].load(Ordering::Relaxed)),
            ),
            None => Vec4::ZERO,
        }
    }

    /// Add into a cell. Out-of-range indices are dropped.
    #[inline]
    pub fn add(&self, idx: usize, v: Vec4, mode: AccumulateMode) {
        match self.cells.get(idx) {
            Some(c) => {
                add_f32(&c[0], v.x, mode);
                add_f32(&c[1], v.y, mode);
                add_f32(&c[2], v.z, mode);
                add_f32(&c[3], v.w, mode);
            }
            None => self.drop_write(idx),
        }
    }

    #[cold]
    fn drop_write(&self, idx: usize) {
        if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
            tracing::warn!(cell = idx, len = self.cells.len(), "write past the output buffer dropped");
        }
    }

    /// Writes dropped for landing outside the buffer. Only the first one
    /// is logged.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn add_radiance(&self, idx: usize, rgb: Vec3, mode: AccumulateMode) {
        self.add(idx, rgb.extend(0.0), mode);
    }

    #[inline]
    pub fn add_samples(&self, idx: usize, count: f32, mode: AccumulateMode) {
        match self.cells.get(idx) {
            Some(c) => add_f32(&c[3], count, mode),
            None => self.drop_write(idx),
        }
    }

    /// Zero every cell.
    pub fn clear(&self) {
        self.cells.par_iter().for_each(|c| {
            for ch in c {
                ch.store(0, Ordering::Relaxed);
            }
        });
    }

    /// Overwrite with host data (length must match, extra cells untouched).
    pub fn load(&self, data: &[Vec4]) {
        self.cells.par_iter().zip(data.par_iter()).for_each(|(c, v)| {
            for (ch, x) in c.iter().zip(v.to_array()) {
                ch.store(x.to_bits(), Ordering::Relaxed);
            }
        });
    }

    /// Host-readable copy of the whole buffer.
    pub fn snapshot(&self) -> Vec<Vec4> {
        (0..self.cells.len()).into_par_iter().map(|i| self.get(i)).collect()
    }

    /// Add a host snapshot cell by cell.
    pub fn accumulate(&self, data: &[Vec4], mode: AccumulateMode) {
        data.par_iter()
            .enumerate()
            .for_each(|(i, v)| self.add(i, *v, mode));
    }

    /// Sum of all cells, for diagnostics and tests.
    pub fn total(&self) -> Vec4 {
        self.snapshot().into_iter().fold(Vec4::ZERO, |a, b| a + b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let out = OutputBuffer::new(2);
        out.add_radiance(1, Vec3::new(1.0, 2.0, 3.0), AccumulateMode::Plain);
        out.add_samples(1, 1.0, AccumulateMode::Atomic);
        assert_eq!(out.get(1), Vec4::new(1.0, 2.0, 3.0, 1.0));
        assert_eq!(out.get(0), Vec4::ZERO);
        assert_eq!(out.get(7), Vec4::ZERO);
        assert_eq!(out.dropped(), 0);
    }

    #[test]
    fn test_out_of_range_writes_are_counted() {
        let out = OutputBuffer::new(2);
        out.add(2, Vec4::ONE, AccumulateMode::Plain);
        out.add_radiance(9, Vec3::ONE, AccumulateMode::Atomic);
        out.add_samples(usize::MAX, 1.0, AccumulateMode::Plain);
        assert_eq!(out.dropped(), 3);
        assert_eq!(out.total(), Vec4::ZERO);
    }

    #[test]
    fn test_atomic_adds_do_not_lose_updates() {
        let out = OutputBuffer::new(1);
        (0..10_000).into_par_iter().for_each(|_| {
            out.add(0, Vec4::ONE, AccumulateMode::Atomic);
        });
        assert_eq!(out.get(0), Vec4::splat(10_000.0));
    }

    #[test]
    fn test_accumulate_and_clear() {
        let out = OutputBuffer::from_slice(&[Vec4::ONE, Vec4::splat(2.0)]);
        out.accumulate(&[Vec4::ONE, Vec4::ONE], AccumulateMode::Plain);
        assert_eq!(out.snapshot(), vec![Vec4::splat(2.0), Vec4::splat(3.0)]);
        out.clear();
        assert_eq!(out.total(), Vec4::ZERO);
    }
}
