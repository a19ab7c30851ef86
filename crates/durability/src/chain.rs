//! Log block codec
//!
//! A log block is a fixed-capacity buffer of packed records followed by a trailer:
//!
//! ```text
//! +---------------------------+-----------+----------------------------------------+
//! | records (used_bytes)      | zero fill | trailer (TRAILER_SIZE bytes)           |
//! |                           |           | next_block | used | pad | eck[2]       |
//! +---------------------------+-----------+----------------------------------------+
//! ```
//!
//! `eck` is the embedded checksum: xxh3-128 over the whole block with the `eck`
//! field zeroed, followed by the seed words of the block's own reference. A block
//! validates only when read through a reference carrying the seed it was written
//! with, and only when its trailer links to a block seeded with the successor.
//! Any validation failure is a [`ChainEnd`]: the chain is valid up to the
//! previous block and ends here.

use byteorder::{ByteOrder, LittleEndian};
use intentlog_core::{
    BlockRef, ChainSeed, Error, LogRecord, Result, ZilConfig, BLOCK_REF_SIZE, TRAILER_SIZE,
};
use xxhash_rust::xxh3::Xxh3;

const USED_AT: usize = BLOCK_REF_SIZE;
const PAD_AT: usize = BLOCK_REF_SIZE + 4;
const ECK_AT: usize = BLOCK_REF_SIZE + 8;

/// Why a chain walk stopped at a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEndReason {
    /// Fewer bytes than a trailer
    ShortBlock,
    /// Embedded checksum does not match the expected seed
    ChecksumMismatch,
    /// Trailer could not be decoded
    BadTrailer,
    /// Trailer links to no block
    HoleSuccessor,
    /// Trailer links to a block that is not the logical successor
    SeedMismatch,
    /// Used byte count runs into the trailer
    UsedOverflow,
    /// Record framing is damaged
    BadRecord,
    /// The block store reported a checksum error
    Unreadable,
}

/// End of the valid chain, reached at `block`.
///
/// This is a control-flow outcome, not an error: every block before `block` is valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEnd {
    /// Block at which validation failed
    pub block: BlockRef,
    /// What failed
    pub reason: ChainEndReason,
}

impl ChainEnd {
    fn at(block: &BlockRef, reason: ChainEndReason) -> Self {
        ChainEnd {
            block: *block,
            reason,
        }
    }
}

impl std::fmt::Display for ChainEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chain ends at {}: {:?}", self.block, self.reason)
    }
}

/// A validated log block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlock {
    /// Records in write order
    pub records: Vec<LogRecord>,
    /// Logical successor
    pub next_block: BlockRef,
    /// Bytes of records
    pub used_bytes: u32,
}

fn embedded_checksum(block: &[u8], seed: &ChainSeed) -> [u64; 2] {
    let eck_at = block.len() - TRAILER_SIZE + ECK_AT;
    let mut hasher = Xxh3::new();
    hasher.update(&block[..eck_at]);
    hasher.update(&[0u8; 16]);
    hasher.update(&block[eck_at + 16..]);
    let mut seed_bytes = [0u8; 32];
    for (i, word) in seed.to_words().iter().enumerate() {
        LittleEndian::write_u64(&mut seed_bytes[i * 8..i * 8 + 8], *word);
    }
    hasher.update(&seed_bytes);
    let digest = hasher.digest128();
    [digest as u64, (digest >> 64) as u64]
}

/// Usable record space in a block of `capacity` bytes.
pub fn body_capacity(capacity: usize) -> usize {
    capacity.saturating_sub(TRAILER_SIZE)
}

/// Seal a pre-built record body into a block of `capacity` bytes.
///
/// `this_block` supplies the seed mixed into the checksum; `next_block` is the
/// logical successor (a hole when no successor could be allocated).
pub fn encode_block(
    body: &[u8],
    capacity: usize,
    this_block: &BlockRef,
    next_block: &BlockRef,
) -> Result<Vec<u8>> {
    let max = body_capacity(capacity);
    if capacity < TRAILER_SIZE || body.len() > max {
        return Err(Error::RecordTooLarge {
            size: body.len(),
            max,
        });
    }
    let mut block = vec![0u8; capacity];
    block[..body.len()].copy_from_slice(body);
    let trailer = capacity - TRAILER_SIZE;
    next_block.encode_into(&mut block[trailer..trailer + BLOCK_REF_SIZE]);
    LittleEndian::write_u32(&mut block[trailer + USED_AT..], body.len() as u32);
    LittleEndian::write_u32(&mut block[trailer + PAD_AT..], 0);
    let eck = embedded_checksum(&block, &this_block.seed());
    LittleEndian::write_u64(&mut block[trailer + ECK_AT..], eck[0]);
    LittleEndian::write_u64(&mut block[trailer + ECK_AT + 8..], eck[1]);
    Ok(block)
}

/// Pack `records` back to back and seal them into a block.
pub fn encode(
    records: &[LogRecord],
    capacity: usize,
    this_block: &BlockRef,
    next_block: &BlockRef,
) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(records.iter().map(LogRecord::encoded_len).sum());
    for record in records {
        record.encode_into(&mut body);
    }
    encode_block(&body, capacity, this_block, next_block)
}

/// Validate a block read through `block` and return its records and successor.
pub fn decode_and_validate(
    bytes: &[u8],
    block: &BlockRef,
) -> std::result::Result<DecodedBlock, ChainEnd> {
    if bytes.len() < TRAILER_SIZE {
        return Err(ChainEnd::at(block, ChainEndReason::ShortBlock));
    }
    let trailer = bytes.len() - TRAILER_SIZE;
    let stored = [
        LittleEndian::read_u64(&bytes[trailer + ECK_AT..]),
        LittleEndian::read_u64(&bytes[trailer + ECK_AT + 8..]),
    ];
    if stored != embedded_checksum(bytes, &block.seed()) {
        return Err(ChainEnd::at(block, ChainEndReason::ChecksumMismatch));
    }

    let next_block = BlockRef::decode(&bytes[trailer..trailer + BLOCK_REF_SIZE])
        .map_err(|_| ChainEnd::at(block, ChainEndReason::BadTrailer))?;
    if next_block.is_hole() {
        return Err(ChainEnd::at(block, ChainEndReason::HoleSuccessor));
    }
    if next_block.seed() != block.seed().successor() {
        return Err(ChainEnd::at(block, ChainEndReason::SeedMismatch));
    }

    let used_bytes = LittleEndian::read_u32(&bytes[trailer + USED_AT..]);
    if used_bytes as usize > trailer {
        return Err(ChainEnd::at(block, ChainEndReason::UsedOverflow));
    }
    let records = LogRecord::decode_all(&bytes[..used_bytes as usize])
        .map_err(|_| ChainEnd::at(block, ChainEndReason::BadRecord))?;

    Ok(DecodedBlock {
        records,
        next_block,
        used_bytes,
    })
}

/// Block size for `pending_bytes` of records: rounded up to the minimum block
/// size, capped at the maximum.
pub fn choose_block_size(pending_bytes: usize, config: &ZilConfig) -> u32 {
    let min = config.min_block_size as usize;
    let want = (pending_bytes + TRAILER_SIZE + min - 1) / min * min;
    want.clamp(min, config.max_block_size as usize) as u32
}

/// Block sizing that remembers recent choices.
///
/// The next block is at least as large as any of the last `prev_block_window`
/// choices, so a burst of large writes keeps blocks large for a while instead of
/// oscillating with every batch.
#[derive(Debug, Clone)]
pub struct SizeRotor {
    recent: Vec<u32>,
    next: usize,
}

impl SizeRotor {
    /// Rotor with the window from `config`
    pub fn new(config: &ZilConfig) -> Self {
        SizeRotor {
            recent: vec![0; config.prev_block_window.max(1)],
            next: 0,
        }
    }

    /// Pick the size of the next block.
    pub fn choose(&mut self, pending_bytes: usize, config: &ZilConfig) -> u32 {
        let size = choose_block_size(pending_bytes, config);
        self.recent[self.next] = size;
        self.next = (self.next + 1) & (self.recent.len() - 1);
        self.recent.iter().copied().max().unwrap_or(size)
    }
}
