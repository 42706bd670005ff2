// ============================================================
// Layer 4 — Sharded Sampler
// ============================================================
// Decides which dataset indices this rank visits in an epoch:
//
//   1. order  — 0..n, shuffled with seed + epoch when enabled
//   2. pad    — repeat from the front until the length is a
//               multiple of world_size (every rank gets the
//               same number of samples)
//   3. stride — rank r takes positions r, r + W, r + 2W, ...
//
// `set_epoch` changes the shuffle for the next pass. All ranks
// use the same seed and epoch, so the shards stay disjoint.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

#[derive(Debug)]
pub struct ShardSampler {
    len:        usize,
    world_size: usize,
    rank:       usize,
    shuffle:    bool,
    seed:       u64,
    epoch:      AtomicUsize,
}

impl ShardSampler {
    pub fn new(len: usize, world_size: usize, rank: usize, shuffle: bool, seed: u64) -> Self {
        let world_size = world_size.max(1);
        Self {
            len,
            world_size,
            rank: rank.min(world_size - 1),
            shuffle,
            seed,
            epoch: AtomicUsize::new(0),
        }
    }

    /// Visit every index in order, single rank
    pub fn sequential(len: usize) -> Self {
        Self::new(len, 1, 0, false, 0)
    }

    pub fn set_epoch(&self, epoch: usize) {
        self.epoch.store(epoch, Ordering::Relaxed);
    }

    pub fn epoch(&self) -> usize {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Indices each rank visits per epoch
    pub fn num_samples(&self) -> usize {
        self.len.div_ceil(self.world_size)
    }

    /// This rank's indices for the current epoch
    pub fn indices(&self) -> Vec<usize> {
        if self.len == 0 {
            return Vec::new();
        }

        let mut order: Vec<usize> = (0..self.len).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch() as u64));
            order.shuffle(&mut rng);
        }

        let total = self.num_samples() * self.world_size;
        let padded = order.iter().copied().cycle().take(total);

        padded.skip(self.rank).step_by(self.world_size).collect()
    }
}
