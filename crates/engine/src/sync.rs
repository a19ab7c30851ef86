//! Per-epoch sync callback
//!
//! Runs once for every epoch while the epoch manager syncs it. Outside of claim,
//! this is the only place the header changes: the replay position is carried
//! over, a pending destroy takes effect, and log blocks whose records are all
//! covered by the epoch are released.

use crate::zilog::Zilog;
use intentlog_core::{epoch_slot, BlockRef, ChainSeed, Epoch, LogHeader};
use tracing::{debug, trace};

impl Zilog {
    /// Apply everything that becomes durable with `epoch`.
    ///
    /// Called by the epoch manager; idempotent for an epoch already processed.
    pub fn sync(&self, epoch: Epoch) {
        let mut reclaimed: Vec<BlockRef> = Vec::new();
        {
            let mut inner = self.inner.lock();
            if epoch <= inner.synced_epoch {
                return;
            }
            inner.synced_epoch = epoch;
            let mut header = self.header.lock();

            let slot = epoch_slot(epoch);
            if inner.replayed_seq[slot] != 0 {
                header.replay_seq = inner.replayed_seq[slot];
                inner.replayed_seq[slot] = 0;
            }

            if inner.destroy_epoch != 0 && epoch == inner.destroy_epoch {
                let old_head = header.head;
                *header = LogHeader::default();
                inner.replayed_seq = Default::default();
                if inner.keep_first && !old_head.is_hole() {
                    header.head = old_head.with_seed(ChainSeed::generate(self.objset_id));
                }
                inner.destroy_epoch = 0;
                inner.keep_first = false;
                debug!(epoch, head = %header.head, "log destroyed");
            }

            while let Some(front) = inner.chain.front() {
                header.head = front.block_ref;
                if !front.reclaimable_at(epoch) {
                    break;
                }
                if let Some(lwb) = inner.chain.pop_front() {
                    reclaimed.push(lwb.block_ref);
                }
                if inner.chain.is_empty() {
                    header.head = BlockRef::HOLE;
                }
            }

            inner.pending.retain(|itx| itx.epoch > epoch);
        }

        if !reclaimed.is_empty() {
            trace!(epoch, blocks = reclaimed.len(), "log blocks reclaimed");
        }
        for block in &reclaimed {
            self.store.free(block, epoch);
        }
    }
}
