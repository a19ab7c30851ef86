//! Persisted log header
//!
//! One [`LogHeader`] exists per dataset. The dataset layer persists it with each
//! checkpoint; the log mutates it only from the sync integrator, the claim pass,
//! and replay bookkeeping.

use crate::error::{Error, Result};
use crate::types::{BlockRef, Epoch, BLOCK_REF_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Header flag bitset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct HeaderFlags(u64);

impl HeaderFlags {
    /// The chain holds records that must be replayed before new writes.
    pub const REPLAY_NEEDED: HeaderFlags = HeaderFlags(0x1);
    /// `claim_lr_seq` is valid and bounds the chain walk.
    pub const CLAIM_LR_SEQ_VALID: HeaderFlags = HeaderFlags(0x2);

    /// No flags set
    pub const fn empty() -> Self {
        HeaderFlags(0)
    }

    /// Raw bits
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Build from raw bits, keeping unknown bits
    pub const fn from_bits(bits: u64) -> Self {
        HeaderFlags(bits)
    }

    /// True if every bit of `other` is set
    pub const fn contains(&self, other: HeaderFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`
    pub fn insert(&mut self, other: HeaderFlags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`
    pub fn remove(&mut self, other: HeaderFlags) {
        self.0 &= !other.0;
    }
}

/// Encoded size of a [`LogHeader`].
pub const HEADER_SIZE: usize = BLOCK_REF_SIZE + 5 * 8;

/// Persisted per-dataset log header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogHeader {
    /// First block of the chain, or a hole for an empty log
    pub head: BlockRef,
    /// Epoch of the import that claimed the chain (0 = unclaimed)
    pub claim_epoch: Epoch,
    /// Highest block sequence seen by the claim pass
    pub claim_blk_seq: u64,
    /// Highest record sequence seen by the claim pass
    pub claim_lr_seq: u64,
    /// Highest record sequence already replayed
    pub replay_seq: u64,
    /// Flag bits
    pub flags: HeaderFlags,
}

impl LogHeader {
    /// True if the header references no chain.
    pub fn is_empty(&self) -> bool {
        self.head.is_hole()
    }

    /// True if the chain holds records that must be replayed.
    pub fn replay_needed(&self) -> bool {
        self.flags.contains(HeaderFlags::REPLAY_NEEDED)
    }

    /// True if a claim pass recorded walk bounds.
    pub fn is_claimed(&self) -> bool {
        self.claim_epoch != 0
    }

    /// Highest record sequence covered by the claim.
    pub fn claim_seq(&self) -> u64 {
        self.claim_lr_seq
    }

    /// Encode to the fixed-width on-disk form.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        self.head.encode_into(&mut out[..BLOCK_REF_SIZE]);
        let fields = [
            self.claim_epoch,
            self.claim_blk_seq,
            self.claim_lr_seq,
            self.replay_seq,
            self.flags.bits(),
        ];
        for (i, v) in fields.iter().enumerate() {
            let at = BLOCK_REF_SIZE + i * 8;
            LittleEndian::write_u64(&mut out[at..at + 8], *v);
        }
        out
    }

    /// Decode from the fixed-width on-disk form.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "log header needs {} bytes, have {}",
                HEADER_SIZE,
                buf.len()
            )));
        }
        let word = |i: usize| {
            let at = BLOCK_REF_SIZE + i * 8;
            LittleEndian::read_u64(&buf[at..at + 8])
        };
        Ok(LogHeader {
            head: BlockRef::decode(&buf[..BLOCK_REF_SIZE])?,
            claim_epoch: word(0),
            claim_blk_seq: word(1),
            claim_lr_seq: word(2),
            replay_seq: word(3),
            flags: HeaderFlags::from_bits(word(4)),
        })
    }
}

/// Header shared between the dataset layer and the log.
pub type SharedHeader = Arc<Mutex<LogHeader>>;

/// Wrap a header for sharing with an open log.
pub fn shared(header: LogHeader) -> SharedHeader {
    Arc::new(Mutex::new(header))
}
