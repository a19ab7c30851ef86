//! Set of block addresses seen by one walk.
//!
//! A chain whose trailer links back to an earlier block would make claim and
//! destroy visit (and free) the same block twice. Walks record every address
//! they act on and skip repeats.

use intentlog_core::{BlockRef, Dva};
use rustc_hash::FxHashSet;

/// Addresses already visited.
#[derive(Debug, Default)]
pub struct DvaTree {
    seen: FxHashSet<Dva>,
}

impl DvaTree {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `block`; false if its address was already present.
    pub fn add(&mut self, block: &BlockRef) -> bool {
        self.seen.insert(block.dva)
    }

    /// True if `block`'s address was recorded.
    pub fn contains(&self, block: &BlockRef) -> bool {
        self.seen.contains(&block.dva)
    }

    /// Number of recorded addresses
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
