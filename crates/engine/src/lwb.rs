//! Log write buffers
//!
//! Every block of the in-memory chain is tracked by an [`Lwb`]. Its life:
//!
//! ```text
//! Opened --(issue: encode + write_async)--> Issued --(write done)--> Done --(sync)--> freed
//! ```
//!
//! An `Opened` lwb has an allocated, seeded block but nothing written; it is the
//! append point of the chain. While a commit batch fills it, its bytes live in a
//! [`Staging`] buffer owned by the writer, so the chain list itself never holds
//! record data.

use intentlog_core::{BlockRef, Epoch, LogRecord};
use intentlog_durability::body_capacity;

/// Write state of a chain block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LwbState {
    /// Allocated, not written
    Opened,
    /// Write in flight
    Issued,
    /// Write completed (successfully or not)
    Done,
}

/// One block of the in-memory chain.
#[derive(Debug, Clone)]
pub(crate) struct Lwb {
    pub(crate) id: u64,
    pub(crate) block_ref: BlockRef,
    /// Epoch the block was allocated in (0 if inherited from the header)
    pub(crate) alloc_epoch: Epoch,
    /// Newest epoch whose records or hold the block carries
    pub(crate) max_epoch: Epoch,
    pub(crate) state: LwbState,
}

impl Lwb {
    pub(crate) fn opened(id: u64, block_ref: BlockRef, alloc_epoch: Epoch) -> Self {
        Lwb {
            id,
            block_ref,
            alloc_epoch,
            max_epoch: alloc_epoch,
            state: LwbState::Opened,
        }
    }

    /// True once the block can be released by a sync of `epoch`.
    pub(crate) fn reclaimable_at(&self, epoch: Epoch) -> bool {
        self.state == LwbState::Done && self.alloc_epoch <= epoch && self.max_epoch <= epoch
    }
}

/// Record bytes accumulated for the open lwb during one commit batch.
#[derive(Debug)]
pub(crate) struct Staging {
    pub(crate) lwb_id: u64,
    pub(crate) block: BlockRef,
    pub(crate) body: Vec<u8>,
    pub(crate) max_epoch: Epoch,
    pub(crate) records: usize,
}

impl Staging {
    pub(crate) fn new(lwb_id: u64, block: BlockRef) -> Self {
        Staging {
            lwb_id,
            block,
            body: Vec::with_capacity(body_capacity(block.size as usize)),
            max_epoch: 0,
            records: 0,
        }
    }

    /// Record space left before the trailer
    pub(crate) fn free(&self) -> usize {
        body_capacity(self.block.size as usize).saturating_sub(self.body.len())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub(crate) fn push(&mut self, record: &LogRecord) {
        debug_assert!(record.encoded_len() <= self.free());
        record.encode_into(&mut self.body);
        self.max_epoch = self.max_epoch.max(record.epoch);
        self.records += 1;
    }
}
