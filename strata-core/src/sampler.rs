//! Distributed index sampling
//!
//! Partitions dataset indices across ranks. Every rank computes the same
//! permutation from `(seed, epoch)` and keeps every `world_size`-th entry.

use crate::dist::ProcessGroup;
use crate::error::{Result, StrataError};

/// Deterministic per-rank index partition
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    len: usize,
    rank: usize,
    world_size: usize,
    shuffle: bool,
    seed: u64,
}

impl DistributedSampler {
    pub fn new(len: usize, rank: usize, world_size: usize, shuffle: bool, seed: u64) -> Result<Self> {
        if world_size == 0 || rank >= world_size {
            return Err(StrataError::InvalidConfig {
                reason: format!("rank {} invalid for world size {}", rank, world_size),
            });
        }
        Ok(Self {
            len,
            rank,
            world_size,
            shuffle,
            seed,
        })
    }

    /// Sampler for the calling rank of `group`
    pub fn for_group(len: usize, group: &dyn ProcessGroup, shuffle: bool, seed: u64) -> Result<Self> {
        let (rank, world_size) = group.rank_and_world_size();
        Self::new(len, rank, world_size, shuffle, seed)
    }

    /// Indices each rank receives per epoch
    pub fn num_samples(&self) -> usize {
        self.len.div_ceil(self.world_size)
    }

    /// Indices for this rank in `epoch`
    ///
    /// The permuted list is padded by wrapping around to a multiple of the
    /// world size, so every rank gets `num_samples()` indices.
    pub fn indices(&self, epoch: u64) -> Vec<usize> {
        if self.len == 0 {
            return Vec::new();
        }

        let mut order: Vec<usize> = (0..self.len).collect();
        if self.shuffle {
            // LCG seeded from (seed, epoch)
            let mut state = self
                .seed
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .wrapping_add(epoch);
            for i in (1..order.len()).rev() {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                let j = ((state >> 33) as usize) % (i + 1);
                order.swap(i, j);
            }
        }

        let total = self.num_samples() * self.world_size;
        order
            .iter()
            .copied()
            .cycle()
            .take(total)
            .skip(self.rank)
            .step_by(self.world_size)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_partition_covers_all() {
        let world = 3;
        let mut seen = HashSet::new();
        let mut total = 0;
        for rank in 0..world {
            let sampler = DistributedSampler::new(10, rank, world, true, 7).unwrap();
            let indices = sampler.indices(0);
            assert_eq!(indices.len(), 4);
            total += indices.len();
            seen.extend(indices);
        }
        assert_eq!(total, 12);
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn test_deterministic_per_epoch() {
        let sampler = DistributedSampler::new(50, 1, 2, true, 42).unwrap();
        assert_eq!(sampler.indices(3), sampler.indices(3));
        assert_ne!(sampler.indices(3), sampler.indices(4));
    }

    #[test]
    fn test_sequential_without_shuffle() {
        let sampler = DistributedSampler::new(5, 1, 2, false, 0).unwrap();
        assert_eq!(sampler.indices(0), vec![1, 3, 0]);
    }

    #[test]
    fn test_invalid_rank() {
        assert!(DistributedSampler::new(5, 2, 2, false, 0).is_err());
    }
}
