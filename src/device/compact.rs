//! Prefix-sum stream compaction.
//!
//! Blocked two-pass scan: count survivors per block in parallel, exclusive
//! scan of the block counts, then every block writes its survivors into its
//! own disjoint window of the output.

use rayon::prelude::*;

use crate::core::ActiveCount;

/// Elements handled by one block.
const BLOCK_SIZE: usize = 4096;

/// Write the indices `i` with `predicates[i] != 0` into the front of `out`,
/// in ascending order. Returns their count.
///
/// Panics if `out` cannot hold all survivors.
pub fn compact(predicates: &[u32], out: &mut [u32]) -> ActiveCount {
    let counts: Vec<usize> = predicates
        .par_chunks(BLOCK_SIZE)
        .map(|block| block.iter().filter(|&&p| p != 0).count())
        .collect();
    let total: usize = counts.iter().sum();
    let live = ActiveCount::new(total).within(out.len());

    let mut windows = Vec::with_capacity(counts.len());
    let mut rest = &mut out[..total];
    for &count in &counts {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(count);
        windows.push(head);
        rest = tail;
    }

    predicates
        .par_chunks(BLOCK_SIZE)
        .zip(windows.into_par_iter())
        .enumerate()
        .for_each(|(block, (preds, window))| {
            let base = block * BLOCK_SIZE;
            let survivors = preds
                .iter()
                .enumerate()
                .filter(|(_, &p)| p != 0)
                .map(|(i, _)| (base + i) as u32);
            for (dst, idx) in window.iter_mut().zip(survivors) {
                *dst = idx;
            }
        });

    live
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn reference(preds: &[u32]) -> Vec<u32> {
        preds
            .iter()
            .enumerate()
            .filter(|(_, &p)| p != 0)
            .map(|(i, _)| i as u32)
            .collect()
    }

    #[test]
    fn test_empty_and_full() {
        let mut out = vec![0u32; 8];
        assert_eq!(compact(&[0; 8], &mut out), ActiveCount::ZERO);
        assert_eq!(compact(&[1; 8], &mut out).get(), 8);
        assert_eq!(out, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_matches_reference_across_blocks() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for &len in &[1usize, 17, BLOCK_SIZE - 1, BLOCK_SIZE, 3 * BLOCK_SIZE + 11] {
            let preds: Vec<u32> = (0..len).map(|_| rng.gen_range(0..2)).collect();
            let mut out = vec![u32::MAX; len];
            let live = compact(&preds, &mut out);
            let expected = reference(&preds);
            assert_eq!(live.get(), expected.len());
            assert_eq!(&out[..live.get()], expected.as_slice());
        }
    }

    #[test]
    #[should_panic]
    fn test_overflow_is_invariant_violation() {
        let mut out = vec![0u32; 2];
        compact(&[1, 1, 1], &mut out);
    }
}
