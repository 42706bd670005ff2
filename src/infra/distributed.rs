// ============================================================
// Layer 6 — Worker Group (in-process collectives)
// ============================================================
// A multi-rank run is one process with one thread per device.
// The launcher creates a WorkerGroup, and every rank thread
// joins it once and receives a GroupMember:
//
//   barrier()          — wait until every rank reached it
//   all_reduce_sum()   — element-wise sum of a f32 buffer
//   all_reduce_mean()  — the same, divided by world_size
//   broadcast(root)    — copy root's buffer to every rank
//   abort(reason)      — fail the group, wake every waiter
//
// Collectives run in rounds. Each rank adds its buffer to the
// round's sum; the last one to arrive publishes the sum and
// opens the next round. A round cannot complete without every
// rank, so a published sum stays readable until all waiters of
// that round have copied it.
//
// Reference: Rust Book §16 (Shared-State Concurrency)

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DistributedError {
    #[error("a worker group needs at least one rank")]
    EmptyGroup,

    #[error("rank {rank} does not exist in a group of {world_size}")]
    RankOutOfRange { rank: usize, world_size: usize },

    #[error("rank {0} has already joined the group")]
    RankTaken(usize),

    #[error("collective buffers differ in length: {expected} vs {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("worker group aborted: {0}")]
    Aborted(String),

    #[error("worker group lock poisoned")]
    Poisoned,
}

#[derive(Debug, Default)]
struct Round {
    /// Which ranks hold a GroupMember
    joined:    Vec<bool>,
    /// Number of the round currently collecting contributions
    number:    u64,
    arrived:   usize,
    sum:       Vec<f32>,
    /// Result of the last completed round
    published: Vec<f32>,
    failure:   Option<String>,
}

/// Shared state of all ranks in one run.
#[derive(Debug)]
pub struct WorkerGroup {
    world_size: usize,
    round:      Mutex<Round>,
    wake:       Condvar,
}

impl WorkerGroup {
    pub fn new(world_size: usize) -> Result<Arc<Self>, DistributedError> {
        if world_size == 0 {
            return Err(DistributedError::EmptyGroup);
        }
        let round = Round { joined: vec![false; world_size], ..Round::default() };
        Ok(Arc::new(Self { world_size, round: Mutex::new(round), wake: Condvar::new() }))
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Claim `rank`. Every rank must join before the first collective.
    pub fn join(self: &Arc<Self>, rank: usize) -> Result<Arc<GroupMember>, DistributedError> {
        if rank >= self.world_size {
            return Err(DistributedError::RankOutOfRange { rank, world_size: self.world_size });
        }
        let mut round = self.lock()?;
        if round.joined[rank] {
            return Err(DistributedError::RankTaken(rank));
        }
        round.joined[rank] = true;
        tracing::debug!("Rank {} joined a group of {}", rank, self.world_size);
        Ok(Arc::new(GroupMember { group: Arc::clone(self), rank }))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Round>, DistributedError> {
        self.round.lock().map_err(|_| DistributedError::Poisoned)
    }

    fn fail(&self, reason: String) {
        if let Ok(mut round) = self.lock() {
            round.failure.get_or_insert(reason);
        }
        self.wake.notify_all();
    }
}

/// One rank's handle on its WorkerGroup.
#[derive(Debug)]
pub struct GroupMember {
    group: Arc<WorkerGroup>,
    rank:  usize,
}

impl GroupMember {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn barrier(&self) -> Result<(), DistributedError> {
        self.all_reduce_sum(&mut [])
    }

    pub fn all_reduce_mean(&self, buffer: &mut [f32]) -> Result<(), DistributedError> {
        self.all_reduce_sum(buffer)?;
        let world = self.group.world_size as f32;
        for value in buffer.iter_mut() {
            *value /= world;
        }
        Ok(())
    }

    /// Overwrite `buffer` on every rank with the contents it has on `root`
    pub fn broadcast(&self, buffer: &mut [f32], root: usize) -> Result<(), DistributedError> {
        if self.rank != root {
            buffer.fill(0.0);
        }
        self.all_reduce_sum(buffer)
    }

    /// Fail the group: waiting ranks wake up with `Aborted`, later calls fail
    pub fn abort(&self, reason: &str) {
        self.group.fail(reason.to_string());
    }

    pub fn all_reduce_sum(&self, buffer: &mut [f32]) -> Result<(), DistributedError> {
        let group = &self.group;
        let mut round = group.lock()?;

        if let Some(reason) = &round.failure {
            return Err(DistributedError::Aborted(reason.clone()));
        }

        if round.arrived == 0 {
            round.sum.clear();
            round.sum.resize(buffer.len(), 0.0);
        } else if round.sum.len() != buffer.len() {
            let error = DistributedError::LengthMismatch { expected: round.sum.len(), got: buffer.len() };
            round.failure.get_or_insert(error.to_string());
            group.wake.notify_all();
            return Err(error);
        }

        for (acc, value) in round.sum.iter_mut().zip(buffer.iter()) {
            *acc += *value;
        }
        round.arrived += 1;

        let number = round.number;
        if round.arrived == group.world_size {
            round.published = std::mem::take(&mut round.sum);
            round.arrived = 0;
            round.number += 1;
            group.wake.notify_all();
        } else {
            round = group
                .wake
                .wait_while(round, |r| r.number == number && r.failure.is_none())
                .map_err(|_| DistributedError::Poisoned)?;
            if round.number == number {
                let reason = round.failure.clone().unwrap_or_default();
                return Err(DistributedError::Aborted(reason));
            }
        }

        buffer.copy_from_slice(&round.published);
        Ok(())
    }
}

impl Drop for GroupMember {
    fn drop(&mut self) {
        // A rank that panics would leave its peers blocked forever
        if std::thread::panicking() {
            self.group.fail(format!("rank {} panicked", self.rank));
        }
    }
}
