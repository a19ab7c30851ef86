//! Lazy chain walker
//!
//! [`ChainWalk`] follows a log chain from the header's head block, one block
//! per `next()`, validating each block with the chain codec. Claim, replay,
//! destroy and the offline chain check all drive the same walker.
//!
//! ## Walk bounds
//!
//! Once a header is claimed, the walk never goes past what the claim pass saw:
//! blocks with a sequence above `claim_blk_seq` are not visited and records with
//! a sequence above `claim_lr_seq` are dropped. Blocks written after the claim
//! (possible while replay itself logs new records) are thereby invisible.
//!
//! ## Invalid blocks
//!
//! A block that fails validation ends the chain, but it is still yielded (with
//! `parsed == false`) because it was allocated and must be claimed or freed like
//! any other chain block.

use crate::chain::{decode_and_validate, ChainEndReason};
use intentlog_core::{BlockRef, Error, HeaderFlags, LogHeader, LogRecord, Result};
use intentlog_storage::BlockStore;
use tracing::{debug, trace};

/// One block visited by a walk.
#[derive(Debug, Clone)]
pub struct WalkedBlock {
    /// The block as referenced by its predecessor (or the header)
    pub block_ref: BlockRef,
    /// Records within the walk bounds, in write order
    pub records: Vec<LogRecord>,
    /// False if the block was not read (walk bound) or failed validation
    pub parsed: bool,
}

/// Why a walk finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkEnd {
    /// Not finished yet
    #[default]
    Running,
    /// The chain ended with a hole (empty log)
    Hole,
    /// A block failed validation; everything before it is valid
    ChainEnd(ChainEndReason),
    /// The claim bounds were reached
    ClaimBound,
    /// A non-checksum read error stopped the walk
    Error,
}

/// Counters of a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSummary {
    /// Highest block sequence visited
    pub max_blk_seq: u64,
    /// Highest record sequence yielded
    pub max_lr_seq: u64,
    /// Blocks visited
    pub blk_count: u64,
    /// Records yielded
    pub lr_count: u64,
    /// How the walk ended
    pub end: WalkEnd,
}

impl WalkSummary {
    /// Human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "walked {} blocks (max seq {}), {} records (max seq {}), end {:?}",
            self.blk_count, self.max_blk_seq, self.lr_count, self.max_lr_seq, self.end
        )
    }
}

/// Iterator over the blocks of a log chain.
pub struct ChainWalk<'a, S: BlockStore + ?Sized> {
    store: &'a S,
    head: BlockRef,
    claim_blk_seq: u64,
    claim_lr_seq: u64,
    cursor: BlockRef,
    summary: WalkSummary,
}

impl<'a, S: BlockStore + ?Sized> ChainWalk<'a, S> {
    /// Walk the chain of `header`, honoring its claim bounds.
    pub fn new(store: &'a S, header: &LogHeader) -> Self {
        let claim_blk_seq = if header.is_claimed() {
            header.claim_blk_seq
        } else {
            u64::MAX
        };
        let claim_lr_seq = if header.flags.contains(HeaderFlags::CLAIM_LR_SEQ_VALID) {
            header.claim_lr_seq
        } else {
            u64::MAX
        };
        ChainWalk {
            store,
            head: header.head,
            claim_blk_seq,
            claim_lr_seq,
            cursor: header.head,
            summary: WalkSummary::default(),
        }
    }

    /// Walk from `head` without bounds.
    pub fn unbounded(store: &'a S, head: BlockRef) -> Self {
        let header = LogHeader {
            head,
            ..LogHeader::default()
        };
        Self::new(store, &header)
    }

    /// Start over from the head block.
    pub fn restart(&mut self) {
        self.cursor = self.head;
        self.summary = WalkSummary::default();
    }

    /// Counters so far
    pub fn summary(&self) -> WalkSummary {
        self.summary
    }

    /// Consume the remaining blocks and return the final counters.
    pub fn finish(mut self) -> Result<WalkSummary> {
        for block in self.by_ref() {
            block?;
        }
        Ok(self.summary)
    }

    fn finished(&self) -> bool {
        self.summary.end != WalkEnd::Running
    }

    fn stop(&mut self, end: WalkEnd) {
        self.summary.end = end;
        self.cursor = BlockRef::HOLE;
    }

    fn unparsed(block_ref: BlockRef) -> WalkedBlock {
        WalkedBlock {
            block_ref,
            records: Vec::new(),
            parsed: false,
        }
    }
}

impl<'a, S: BlockStore + ?Sized> Iterator for ChainWalk<'a, S> {
    type Item = Result<WalkedBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished() {
            return None;
        }
        let block = self.cursor;
        if block.is_hole() {
            self.stop(WalkEnd::Hole);
            return None;
        }
        let blk_seq = block.seed().seq;
        if blk_seq > self.claim_blk_seq {
            self.stop(WalkEnd::ClaimBound);
            return None;
        }
        self.summary.max_blk_seq = blk_seq;
        self.summary.blk_count += 1;

        if self.summary.max_lr_seq == self.claim_lr_seq && blk_seq == self.claim_blk_seq {
            self.stop(WalkEnd::ClaimBound);
            return Some(Ok(Self::unparsed(block)));
        }

        let bytes = match self.store.read(&block) {
            Ok(bytes) => bytes,
            Err(e) if e.is_checksum() => {
                debug!(block = %block, "log block unreadable, chain ends");
                self.stop(WalkEnd::ChainEnd(ChainEndReason::Unreadable));
                return Some(Ok(Self::unparsed(block)));
            }
            Err(e) => {
                self.stop(WalkEnd::Error);
                return Some(Err(Error::Block(e)));
            }
        };

        let decoded = match decode_and_validate(&bytes, &block) {
            Ok(decoded) => decoded,
            Err(end) => {
                trace!(%end, "chain end");
                self.stop(WalkEnd::ChainEnd(end.reason));
                return Some(Ok(Self::unparsed(block)));
            }
        };

        let mut records = decoded.records;
        if let Some(cut) = records.iter().position(|r| r.seq > self.claim_lr_seq) {
            records.truncate(cut);
            self.stop(WalkEnd::ClaimBound);
        } else {
            self.cursor = decoded.next_block;
        }
        if let Some(last) = records.last() {
            self.summary.max_lr_seq = last.seq;
        }
        self.summary.lr_count += records.len() as u64;

        Some(Ok(WalkedBlock {
            block_ref: block,
            records,
            parsed: true,
        }))
    }
}
