//! Intent log counters
//!
//! Counters are plain relaxed atomics bumped on the hot path; [`ZilStats::snapshot`]
//! copies them into a serializable struct for reporting.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one open log.
#[derive(Debug, Default)]
pub struct ZilStats {
    pub(crate) commit_count: AtomicU64,
    pub(crate) commit_writer_count: AtomicU64,
    pub(crate) itx_count: AtomicU64,
    pub(crate) itx_indirect_count: AtomicU64,
    pub(crate) itx_indirect_bytes: AtomicU64,
    pub(crate) itx_copied_count: AtomicU64,
    pub(crate) itx_copied_bytes: AtomicU64,
    pub(crate) itx_needcopy_count: AtomicU64,
    pub(crate) itx_needcopy_bytes: AtomicU64,
    pub(crate) lwb_issued_count: AtomicU64,
    pub(crate) lwb_alloc_failures: AtomicU64,
    pub(crate) fallback_syncs: AtomicU64,
    pub(crate) device_flushes: AtomicU64,
}

/// Point-in-time copy of [`ZilStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ZilStatsSnapshot {
    /// `commit` calls that were not disabled by policy
    pub commit_count: u64,
    /// Batches written by a group commit leader
    pub commit_writer_count: u64,
    /// Submitted itxs
    pub itx_count: u64,
    /// Indirect write itxs
    pub itx_indirect_count: u64,
    /// Bytes covered by indirect write itxs
    pub itx_indirect_bytes: u64,
    /// Write itxs with data copied at submission
    pub itx_copied_count: u64,
    /// Bytes copied at submission
    pub itx_copied_bytes: u64,
    /// Write itxs fetched while building blocks
    pub itx_needcopy_count: u64,
    /// Bytes fetched while building blocks
    pub itx_needcopy_bytes: u64,
    /// Log blocks handed to the block store
    pub lwb_issued_count: u64,
    /// Successor allocations that failed
    pub lwb_alloc_failures: u64,
    /// Commits satisfied by waiting for a checkpoint instead of writing
    pub fallback_syncs: u64,
    /// Device cache flushes issued
    pub device_flushes: u64,
}

impl ZilStats {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> ZilStatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ZilStatsSnapshot {
            commit_count: get(&self.commit_count),
            commit_writer_count: get(&self.commit_writer_count),
            itx_count: get(&self.itx_count),
            itx_indirect_count: get(&self.itx_indirect_count),
            itx_indirect_bytes: get(&self.itx_indirect_bytes),
            itx_copied_count: get(&self.itx_copied_count),
            itx_copied_bytes: get(&self.itx_copied_bytes),
            itx_needcopy_count: get(&self.itx_needcopy_count),
            itx_needcopy_bytes: get(&self.itx_needcopy_bytes),
            lwb_issued_count: get(&self.lwb_issued_count),
            lwb_alloc_failures: get(&self.lwb_alloc_failures),
            fallback_syncs: get(&self.fallback_syncs),
            device_flushes: get(&self.device_flushes),
        }
    }
}
