//! Device buffer allocation and double buffering.

use bytemuck::Pod;

use crate::util::{Error, Result};

/// Capacity limits of the compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Total bytes one estimator may hold in working buffers.
    pub max_allocation_bytes: usize,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_allocation_bytes: 4 << 30,
        }
    }
}

/// Tracks the bytes handed out for one `set_work_buffer_size` call.
#[derive(Debug)]
pub struct Allocator {
    limits: DeviceLimits,
    bytes: usize,
}

impl Allocator {
    pub fn new(limits: DeviceLimits) -> Self {
        Self { limits, bytes: 0 }
    }

    /// Bytes allocated so far.
    pub fn allocated(&self) -> usize {
        self.bytes
    }

    /// Allocate `len` elements filled with `fill`.
    pub fn buffer<T: Pod>(&mut self, len: usize, fill: T) -> Result<Vec<T>> {
        let size = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(Error::AllocationFailed {
                requested: usize::MAX,
                limit: self.limits.max_allocation_bytes,
            })?;
        let total = self.bytes.saturating_add(size);
        if total > self.limits.max_allocation_bytes {
            return Err(Error::AllocationFailed {
                requested: total,
                limit: self.limits.max_allocation_bytes,
            });
        }

        let mut v = Vec::new();
        v.try_reserve_exact(len).map_err(|_| Error::AllocationFailed {
            requested: total,
            limit: self.limits.max_allocation_bytes,
        })?;
        v.resize(len, fill);
        self.bytes = total;
        Ok(v)
    }

    /// Allocate both halves of a ping-pong pair.
    pub fn ping_pong<T: Pod>(&mut self, len: usize, fill: T) -> Result<PingPong<T>> {
        Ok(PingPong {
            halves: [self.buffer(len, fill)?, self.buffer(len, fill)?],
        })
    }
}

/// Bounce parity selecting the current half of a [`PingPong`] pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    #[inline]
    pub fn of(bounce: u32) -> Self {
        if bounce % 2 == 0 {
            Self::Even
        } else {
            Self::Odd
        }
    }

    #[inline]
    pub fn flip(self) -> Self {
        match self {
            Self::Even => Self::Odd,
            Self::Odd => Self::Even,
        }
    }

    #[inline]
    fn index(self) -> usize {
        match self {
            Self::Even => 0,
            Self::Odd => 1,
        }
    }
}

/// Two equally sized buffers; one is "current" for a bounce, the other
/// "next". Which is which is decided only through [`Parity`].
#[derive(Debug, Clone, Default)]
pub struct PingPong<T> {
    halves: [Vec<T>; 2],
}

impl<T> PingPong<T> {
    pub fn len(&self) -> usize {
        self.halves[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.halves[0].is_empty()
    }

    #[inline]
    pub fn current(&self, parity: Parity) -> &[T] {
        &self.halves[parity.index()]
    }

    #[inline]
    pub fn current_mut(&mut self, parity: Parity) -> &mut [T] {
        &mut self.halves[parity.index()]
    }

    /// Split into (current, next).
    #[inline]
    pub fn split_mut(&mut self, parity: Parity) -> (&mut [T], &mut [T]) {
        let [even, odd] = &mut self.halves;
        match parity {
            Parity::Even => (even.as_mut_slice(), odd.as_mut_slice()),
            Parity::Odd => (odd.as_mut_slice(), even.as_mut_slice()),
        }
    }

    /// Both halves mutably, for initialisation.
    pub fn both_mut(&mut self) -> (&mut [T], &mut [T]) {
        let [even, odd] = &mut self.halves;
        (even.as_mut_slice(), odd.as_mut_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_alternates() {
        assert_eq!(Parity::of(0), Parity::Even);
        assert_eq!(Parity::of(3), Parity::Odd);
        assert_eq!(Parity::of(3).flip(), Parity::Even);
    }

    #[test]
    fn test_split_selects_halves() {
        let mut alloc = Allocator::new(DeviceLimits::default());
        let mut pp = alloc.ping_pong(4, 0u32).unwrap();
        {
            let (cur, next) = pp.split_mut(Parity::Odd);
            cur[0] = 1;
            next[0] = 2;
        }
        assert_eq!(pp.current(Parity::Odd)[0], 1);
        assert_eq!(pp.current(Parity::Even)[0], 2);
    }

    #[test]
    fn test_allocation_limit() {
        let mut alloc = Allocator::new(DeviceLimits {
            max_allocation_bytes: 64,
        });
        assert!(alloc.buffer(8, 0u32).is_ok());
        let err = alloc.buffer(16, 0u32).unwrap_err();
        assert!(matches!(err, Error::AllocationFailed { requested: 96, limit: 64 }));
        assert_eq!(alloc.allocated(), 32);
    }
}
