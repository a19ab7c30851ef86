//! Core types for the intent log
//!
//! This crate defines the value types shared by every layer of the log:
//! - [`BlockRef`], [`Dva`], [`ChainSeed`]: physical block identity and chain seeding
//! - [`LogHeader`]: the persisted per-dataset header
//! - [`LogRecord`], [`WriteRecord`], [`TxType`]: on-disk record framing
//! - [`ZilConfig`]: tunables, loadable from TOML
//! - [`Error`], [`BlockError`]: the error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod header;
pub mod record;
pub mod types;

pub use config::{SyncPolicy, ZilConfig};
pub use error::{BlockError, Error, GetDataError, Result};
pub use header::{HeaderFlags, LogHeader, SharedHeader, HEADER_SIZE};
pub use record::{
    align8, LogRecord, TxType, WriteRecord, WriteState, LR_HEADER_SIZE, TX_MAX_TYPE,
    WRITE_RECORD_FIXED,
};
pub use types::{
    epoch_slot, BlockRef, ChainSeed, ChecksumKind, DeviceId, Dva, Epoch, BLOCK_REF_SIZE,
    EPOCH_SLOTS, TRAILER_SIZE,
};
