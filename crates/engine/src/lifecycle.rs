//! Claim, chain check and destroy
//!
//! [`claim`] runs at pool import, before the dataset is opened: it walks the
//! chain left by the previous run, reserves every block the walk depends on
//! (allocations from epochs that never synced were rolled back by the crash)
//! and records the walk bounds in the header so that replay sees exactly what
//! the claim saw. [`check_log_chain`] is the same walk without reservations.
//!
//! [`Zilog::destroy`] releases a chain, either the in-memory one or the
//! on-disk one found at open, and zeroes the header when its epoch syncs.

use crate::zilog::Zilog;
use intentlog_core::{
    BlockError, BlockRef, Epoch, Error, HeaderFlags, LogHeader, Result, TxType, WriteRecord,
};
use intentlog_durability::{ChainEndReason, ChainWalk, DvaTree, WalkEnd, WalkSummary};
use intentlog_storage::{BlockStore, EpochManager};
use tracing::{debug, info, warn};

/// Result of a [`claim`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimOutcome {
    /// False if the header was empty or already claimed
    pub claimed: bool,
    /// Log blocks walked
    pub blocks: u64,
    /// Records walked
    pub records: u64,
    /// Blocks (log and data) newly reserved
    pub blocks_claimed: u64,
    /// True if the claim left records for replay
    pub replay_needed: bool,
}

/// Walk a chain, calling `on_claimable` once for every block born at or after
/// `min_epoch`: log blocks, and the data blocks of indirect writes.
///
/// Data blocks are read before they are handed out; one that fails its
/// checksum was never completely written and ends the walk there.
fn visit_chain<S, F>(
    store: &S,
    header: &LogHeader,
    min_epoch: Epoch,
    mut on_claimable: F,
) -> Result<WalkSummary>
where
    S: BlockStore + ?Sized,
    F: FnMut(&BlockRef) -> Result<()>,
{
    let mut seen = DvaTree::new();
    let mut summary = WalkSummary::default();
    let mut walk = ChainWalk::new(store, header);

    for block in walk.by_ref() {
        let block = block?;
        summary.blk_count += 1;
        summary.max_blk_seq = block.block_ref.seed().seq;
        if block.block_ref.birth >= min_epoch && seen.add(&block.block_ref) {
            on_claimable(&block.block_ref)?;
        }

        for record in &block.records {
            if record.tx_type() == Some(TxType::Write) {
                let write = WriteRecord::decode(&record.payload)?;
                let data = write.block_ref;
                if write.is_indirect() && data.birth >= min_epoch && seen.add(&data) {
                    match store.read(&data) {
                        Ok(_) => on_claimable(&data)?,
                        Err(e) if e.is_checksum() => {
                            debug!(seq = record.seq, data = %data, "write data unreadable, chain ends");
                            summary.end = WalkEnd::ChainEnd(ChainEndReason::Unreadable);
                            return Ok(summary);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            summary.lr_count += 1;
            summary.max_lr_seq = record.seq;
        }
    }

    summary.end = walk.summary().end;
    Ok(summary)
}

/// Walk the chain of `header` and report what a claim would find, without
/// reserving anything.
pub fn check_log_chain<S: BlockStore + ?Sized>(
    store: &S,
    header: &LogHeader,
    min_claim_epoch: Epoch,
) -> Result<WalkSummary> {
    visit_chain(store, header, min_claim_epoch, |_| Ok(()))
}

/// Reserve the chain of `header` for this import, whose first epoch is
/// `first_epoch`, and record the walk bounds in the header.
///
/// Claiming an already claimed header is a no-op, unless it was claimed by this
/// same import, which is a caller bug.
pub fn claim<S: BlockStore + ?Sized>(
    store: &S,
    header: &mut LogHeader,
    first_epoch: Epoch,
) -> Result<ClaimOutcome> {
    if header.is_claimed() && header.claim_epoch == first_epoch {
        return Err(Error::ClaimTwice { epoch: first_epoch });
    }
    if header.is_claimed() || header.is_empty() {
        return Ok(ClaimOutcome::default());
    }

    let mut blocks_claimed = 0u64;
    let summary = visit_chain(store, header, first_epoch, |block| {
        match store.claim(block, first_epoch) {
            Ok(()) => {
                blocks_claimed += 1;
                Ok(())
            }
            Err(BlockError::AlreadyClaimed { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    })?;

    header.claim_epoch = first_epoch;
    header.claim_blk_seq = summary.max_blk_seq;
    header.claim_lr_seq = summary.max_lr_seq;
    header.flags.insert(HeaderFlags::CLAIM_LR_SEQ_VALID);
    let replay_needed = summary.lr_count > 0 || summary.blk_count > 1;
    if replay_needed {
        header.flags.insert(HeaderFlags::REPLAY_NEEDED);
    }

    info!(
        epoch = first_epoch,
        blocks = summary.blk_count,
        records = summary.lr_count,
        claimed = blocks_claimed,
        replay_needed,
        "log chain claimed"
    );
    Ok(ClaimOutcome {
        claimed: true,
        blocks: summary.blk_count,
        records: summary.lr_count,
        blocks_claimed,
        replay_needed,
    })
}

impl Zilog {
    /// Release the whole chain. The header is zeroed when the current epoch
    /// syncs; with `keep_first` it keeps the first block, reseeded as the head
    /// of a fresh chain.
    pub fn destroy(&self, keep_first: bool) -> Result<()> {
        let previous = self.inner.lock().destroy_epoch;
        if previous != 0 {
            self.epochs.wait_until_synced(previous);
        }
        let header = *self.header.lock();
        if header.head.is_hole() && self.inner.lock().chain.is_empty() {
            return Ok(());
        }

        let _writer = self.writer.lock();
        if keep_first && !self.inner.lock().chain.is_empty() {
            return Err(Error::InvalidState(
                "cannot keep the first block of a chain still being written".into(),
            ));
        }
        let hold = self.epochs.hold_epoch_open();
        let epoch = hold.epoch();

        let in_memory = {
            let mut inner = self.inner.lock();
            debug_assert!(epoch > inner.destroy_epoch);
            inner.destroy_epoch = epoch;
            inner.keep_first = keep_first;
            std::mem::take(&mut inner.chain)
        };

        let mut freed = 0usize;
        if !in_memory.is_empty() {
            for lwb in &in_memory {
                self.store.free(&lwb.block_ref, epoch);
                freed += 1;
            }
        } else {
            freed = self.free_on_disk_chain(&header, epoch, keep_first);
        }

        info!(
            objset = self.objset_id,
            epoch,
            freed,
            keep_first,
            "log destroy scheduled"
        );
        self.epochs.release_to_quiesce(hold);
        Ok(())
    }

    /// Free the blocks of the chain referenced by `header` in `epoch`.
    fn free_on_disk_chain(&self, header: &LogHeader, epoch: Epoch, keep_first: bool) -> usize {
        let mut seen = DvaTree::new();
        let mut freed = 0usize;
        let walk = ChainWalk::new(&*self.store, header);

        for block in walk {
            let block = match block {
                Ok(block) => block,
                Err(e) => {
                    warn!(error = %e, "log chain walk failed, remaining blocks leak");
                    break;
                }
            };
            let is_head = block.block_ref.dva == header.head.dva;
            if !(keep_first && is_head) && seen.add(&block.block_ref) {
                self.store.free(&block.block_ref, epoch);
                freed += 1;
            }
            if !header.is_claimed() {
                continue;
            }
            for record in &block.records {
                if record.tx_type() != Some(TxType::Write) {
                    continue;
                }
                match WriteRecord::decode(&record.payload) {
                    Ok(write)
                        if write.is_indirect()
                            && write.block_ref.birth >= header.claim_epoch
                            && seen.add(&write.block_ref) =>
                    {
                        self.store.free(&write.block_ref, epoch);
                        freed += 1;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(seq = record.seq, error = %e, "undecodable write record"),
                }
            }
        }
        freed
    }
}
