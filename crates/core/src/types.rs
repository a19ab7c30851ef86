//! Core value types for the intent log
//!
//! This module defines the fundamental identity types used throughout the system:
//! - [`Epoch`]: checkpoint (transaction group) number
//! - [`Dva`]: physical address of a block on one device
//! - [`BlockRef`]: copyable handle to a block, carrying size, birth epoch and checksum
//! - [`ChainSeed`]: per-incarnation seed mixed into every log block checksum
//!
//! `BlockRef` has a fixed-width little-endian encoding of [`BLOCK_REF_SIZE`] bytes
//! so it can be embedded in block trailers and write records.

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_128;

/// Checkpoint number. Epoch 0 is never a real epoch.
pub type Epoch = u64;

/// Number of in-flight epoch slots tracked by per-epoch arrays.
pub const EPOCH_SLOTS: usize = 4;

/// Slot index of `epoch` in a per-epoch array of [`EPOCH_SLOTS`] entries.
#[inline]
pub fn epoch_slot(epoch: Epoch) -> usize {
    (epoch & (EPOCH_SLOTS as u64 - 1)) as usize
}

/// Encoded size of a [`BlockRef`].
pub const BLOCK_REF_SIZE: usize = 64;

/// Size of the log block trailer: next block ref, used bytes, pad, embedded checksum.
pub const TRAILER_SIZE: usize = BLOCK_REF_SIZE + 4 + 4 + 16;

/// Storage device identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Device virtual address: where a block lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Dva {
    /// Device holding the block
    pub device: DeviceId,
    /// Byte offset on the device
    pub offset: u64,
}

impl Dva {
    /// Create a new address
    pub fn new(device: DeviceId, offset: u64) -> Self {
        Dva { device, offset }
    }
}

impl std::fmt::Display for Dva {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:#x}", self.device, self.offset)
    }
}

/// How the checksum words of a [`BlockRef`] are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChecksumKind {
    /// Log block: the words hold the [`ChainSeed`]; the block carries its own
    /// checksum in the trailer and is validated by the chain codec.
    #[default]
    Embedded = 0,
    /// Data block: the words hold a digest of the contents, verified on read.
    Content = 1,
}

impl ChecksumKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ChecksumKind::Embedded),
            1 => Some(ChecksumKind::Content),
            _ => None,
        }
    }
}

/// Opaque, copyable handle to a physical storage block.
///
/// The all-zero value is [`BlockRef::HOLE`], meaning "no block". A hole has
/// size zero; every allocated block has a non-zero size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockRef {
    /// Physical address
    pub dva: Dva,
    /// Allocated size in bytes
    pub size: u32,
    /// Epoch in which the block was allocated
    pub birth: Epoch,
    /// Checksum interpretation
    pub kind: ChecksumKind,
    /// Seed words or content digest, depending on `kind`
    pub checksum: [u64; 4],
}

impl BlockRef {
    /// The "no block" sentinel.
    pub const HOLE: BlockRef = BlockRef {
        dva: Dva {
            device: DeviceId(0),
            offset: 0,
        },
        size: 0,
        birth: 0,
        kind: ChecksumKind::Embedded,
        checksum: [0; 4],
    };

    /// Create a reference to a freshly allocated block with an empty checksum.
    pub fn new(dva: Dva, size: u32, birth: Epoch, kind: ChecksumKind) -> Self {
        BlockRef {
            dva,
            size,
            birth,
            kind,
            checksum: [0; 4],
        }
    }

    /// True if this is the hole sentinel.
    #[inline]
    pub fn is_hole(&self) -> bool {
        self.size == 0
    }

    /// Chain seed carried by a log block reference.
    pub fn seed(&self) -> ChainSeed {
        ChainSeed::from_words(self.checksum)
    }

    /// Same block, seeded for a (possibly different) chain position.
    pub fn with_seed(mut self, seed: ChainSeed) -> Self {
        self.kind = ChecksumKind::Embedded;
        self.checksum = seed.to_words();
        self
    }

    /// Record the content digest of `data` in this reference.
    pub fn seal_content(&mut self, data: &[u8]) {
        self.kind = ChecksumKind::Content;
        self.checksum = content_digest(data);
    }

    /// Verify `data` against the recorded content digest.
    ///
    /// Always true for `Embedded` references; those are validated by the chain codec.
    pub fn verify_content(&self, data: &[u8]) -> bool {
        match self.kind {
            ChecksumKind::Embedded => true,
            ChecksumKind::Content => self.checksum == content_digest(data),
        }
    }

    /// Encode into the first [`BLOCK_REF_SIZE`] bytes of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`BLOCK_REF_SIZE`].
    pub fn encode_into(&self, buf: &mut [u8]) {
        let buf = &mut buf[..BLOCK_REF_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.dva.device.0);
        LittleEndian::write_u32(&mut buf[4..8], self.size);
        LittleEndian::write_u64(&mut buf[8..16], self.dva.offset);
        LittleEndian::write_u64(&mut buf[16..24], self.birth);
        buf[24] = self.kind as u8;
        buf[25..32].fill(0);
        for (i, word) in self.checksum.iter().enumerate() {
            let at = 32 + i * 8;
            LittleEndian::write_u64(&mut buf[at..at + 8], *word);
        }
    }

    /// Encode into a fresh array.
    pub fn to_bytes(&self) -> [u8; BLOCK_REF_SIZE] {
        let mut out = [0u8; BLOCK_REF_SIZE];
        self.encode_into(&mut out);
        out
    }

    /// Decode from the first [`BLOCK_REF_SIZE`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < BLOCK_REF_SIZE {
            return Err(Error::Corruption(format!(
                "block ref needs {} bytes, have {}",
                BLOCK_REF_SIZE,
                buf.len()
            )));
        }
        let kind = ChecksumKind::from_u8(buf[24])
            .ok_or_else(|| Error::Corruption(format!("unknown checksum kind {}", buf[24])))?;
        let mut checksum = [0u64; 4];
        for (i, word) in checksum.iter_mut().enumerate() {
            let at = 32 + i * 8;
            *word = LittleEndian::read_u64(&buf[at..at + 8]);
        }
        Ok(BlockRef {
            dva: Dva {
                device: DeviceId(LittleEndian::read_u32(&buf[0..4])),
                offset: LittleEndian::read_u64(&buf[8..16]),
            },
            size: LittleEndian::read_u32(&buf[4..8]),
            birth: LittleEndian::read_u64(&buf[16..24]),
            kind,
            checksum,
        })
    }
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_hole() {
            return write!(f, "<hole>");
        }
        write!(f, "{} size={} birth={}", self.dva, self.size, self.birth)?;
        if self.kind == ChecksumKind::Embedded {
            write!(f, " seq={}", self.checksum[3])?;
        }
        Ok(())
    }
}

fn content_digest(data: &[u8]) -> [u64; 4] {
    let digest = xxh3_128(data);
    [digest as u64, (digest >> 64) as u64, data.len() as u64, 0]
}

/// Seed mixed into every log block checksum of one chain incarnation.
///
/// A block at chain position `n + 1` must carry `seed(n).successor()`. A fresh
/// seed is generated whenever a chain is created or re-seeded after destroy, so
/// stale blocks of an earlier incarnation never validate as successors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChainSeed {
    /// Random identity, first half
    pub guid0: u64,
    /// Random identity, second half
    pub guid1: u64,
    /// Dataset the chain belongs to
    pub objset_id: u64,
    /// Position in the chain, starting at 1
    pub seq: u64,
}

impl ChainSeed {
    /// Generate a new seed for a chain owned by `objset_id`.
    pub fn generate(objset_id: u64) -> Self {
        let (guid0, guid1) = Uuid::new_v4().as_u64_pair();
        ChainSeed {
            guid0,
            guid1,
            objset_id,
            seq: 1,
        }
    }

    /// Seed of the logically next block.
    pub fn successor(&self) -> Self {
        ChainSeed {
            seq: self.seq.wrapping_add(1),
            ..*self
        }
    }

    /// Checksum words carried in a [`BlockRef`].
    pub fn to_words(&self) -> [u64; 4] {
        [self.guid0, self.guid1, self.objset_id, self.seq]
    }

    /// Inverse of [`ChainSeed::to_words`].
    pub fn from_words(words: [u64; 4]) -> Self {
        ChainSeed {
            guid0: words[0],
            guid1: words[1],
            objset_id: words[2],
            seq: words[3],
        }
    }
}
