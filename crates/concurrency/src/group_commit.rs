//! Group commit
//!
//! Commit requests are identified by a monotonically increasing sequence
//! number. The coordinator tracks the highest sequence known to be durable.
//!
//! ## Protocol
//!
//! ```text
//! enter(target):
//!   durable >= target      -> Satisfied (return immediately)
//!   no leader              -> Leader (caller builds and writes one batch)
//!   otherwise              -> sleep until the leader finishes, then re-check
//! ```
//!
//! The leader publishes the watermark it reached and drops its guard. Waiters
//! whose target is now covered return; the rest elect a new leader among
//! themselves. At most one batch is being built at any time.

use parking_lot::{Condvar, Mutex};
use tracing::trace;

#[derive(Debug, Default)]
struct State {
    leader: bool,
    durable: u64,
    batches: u64,
}

/// Leader/follower commit coordinator.
#[derive(Debug, Default)]
pub struct GroupCommit {
    state: Mutex<State>,
    leader_done: Condvar,
}

/// Outcome of [`GroupCommit::enter`].
#[must_use]
pub enum Role<'a> {
    /// The target is already durable; carries the current watermark
    Satisfied(u64),
    /// The caller must write a batch, then publish through the guard
    Leader(LeaderGuard<'a>),
}

impl GroupCommit {
    /// Coordinator with nothing durable yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `target` is durable or the caller becomes leader.
    pub fn enter(&self, target: u64) -> Role<'_> {
        let mut state = self.state.lock();
        loop {
            if state.durable >= target {
                return Role::Satisfied(state.durable);
            }
            if !state.leader {
                state.leader = true;
                return Role::Leader(LeaderGuard { group: self });
            }
            self.leader_done.wait(&mut state);
        }
    }

    /// Highest durable sequence
    pub fn durable(&self) -> u64 {
        self.state.lock().durable
    }

    /// Number of batches led so far
    pub fn batches(&self) -> u64 {
        self.state.lock().batches
    }
}

/// Leadership of one batch. Dropping it wakes every waiter.
pub struct LeaderGuard<'a> {
    group: &'a GroupCommit,
}

impl LeaderGuard<'_> {
    /// Advance the durable watermark to `seq`. Lower values are ignored.
    pub fn publish(&self, seq: u64) {
        let mut state = self.group.state.lock();
        if seq > state.durable {
            state.durable = seq;
        }
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.group.state.lock();
        state.leader = false;
        state.batches += 1;
        trace!(durable = state.durable, batch = state.batches, "batch done");
        self.group.leader_done.notify_all();
    }
}
