//! Error types for the intent log
//!
//! Two layers:
//! - [`BlockError`]: what the block store reports for a single block operation
//! - [`Error`]: what the log surfaces to the mount path and to producers
//!
//! End-of-chain is deliberately absent from both: a successor checksum mismatch
//! while walking the chain is a control-flow outcome, not an error.

use crate::types::{DeviceId, Dva, Epoch};
use thiserror::Error;

/// Result type for intent log operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by a block store for a single block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    /// Contents did not match the checksum in the block reference
    #[error("checksum mismatch reading {dva}")]
    Checksum {
        /// Block address
        dva: Dva,
    },

    /// Device-level I/O failure
    #[error("I/O error on {dva}: {message}")]
    Io {
        /// Block address
        dva: Dva,
        /// Device error description
        message: String,
    },

    /// Allocation could not be satisfied
    #[error("no space for a {requested} byte block")]
    NoSpace {
        /// Requested size in bytes
        requested: u32,
    },

    /// Block was already reserved by an earlier claim pass
    #[error("block {dva} already claimed")]
    AlreadyClaimed {
        /// Block address
        dva: Dva,
    },

    /// Block is not allocated
    #[error("block {dva} is not allocated")]
    NotAllocated {
        /// Block address
        dva: Dva,
    },

    /// Device is unavailable
    #[error("device {device} is offline")]
    DeviceOffline {
        /// Device identifier
        device: DeviceId,
    },
}

impl BlockError {
    /// True for checksum mismatches.
    pub fn is_checksum(&self) -> bool {
        matches!(self, BlockError::Checksum { .. })
    }
}

/// Errors surfaced by the intent log.
#[derive(Debug, Error)]
pub enum Error {
    /// The log has been closed
    #[error("intent log is closed")]
    Closed,

    /// Operation cannot proceed in the current state (e.g. suspend with replay pending)
    #[error("busy: {0}")]
    Busy(String),

    /// Block store failure
    #[error("block error: {0}")]
    Block(#[from] BlockError),

    /// On-disk structure is damaged beyond end-of-chain semantics
    #[error("corruption: {0}")]
    Corruption(String),

    /// A record cannot be stored in a single log block
    #[error("record of {size} bytes exceeds maximum of {max}")]
    RecordTooLarge {
        /// Encoded record size
        size: usize,
        /// Largest record the configuration allows
        max: usize,
    },

    /// A record is malformed
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Claim was invoked twice for the same import
    #[error("log already claimed in epoch {epoch}")]
    ClaimTwice {
        /// Epoch of the existing claim
        epoch: Epoch,
    },

    /// Replay stopped at a record that could not be applied
    #[error("replay of record {seq} (txtype {txtype}) failed: {reason}")]
    Replay {
        /// Sequence number of the failing record
        seq: u64,
        /// Raw transaction type of the failing record
        txtype: u32,
        /// Reason reported by the handler or the log
        reason: String,
    },

    /// Configuration is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation is invalid for the current log state
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Check if this error may succeed on retry.
    ///
    /// `Busy` clears once the blocking condition (e.g. pending replay) is resolved.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Busy(_))
    }

    /// Check if the mount path must refuse the dataset (or fall back to read-only).
    pub fn is_fatal_for_mount(&self) -> bool {
        matches!(
            self,
            Error::Block(_) | Error::Corruption(_) | Error::Replay { .. }
        )
    }
}

/// Failure of a producer's payload fetch callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GetDataError {
    /// The data no longer exists (object removed); the record is dropped
    #[error("data no longer exists")]
    Gone,

    /// Reading the data failed; durability falls back to the checkpoint
    #[error("I/O error fetching data: {0}")]
    Io(String),
}
