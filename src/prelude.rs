//! Convenient imports for intentlog.
//!
//! ```
//! use intentlog::prelude::*;
//! ```

// Entry point
pub use crate::builder::{IntentLog, IntentLogBuilder};

// Error handling
pub use intentlog_core::{Error, GetDataError, Result};

// Log
pub use intentlog_engine::{
    check_log_chain, claim, ClaimOutcome, FetchToken, GetData, HandlerResult, Itx, ReplayReport,
    ReplayTable, Zilog, ZilStatsSnapshot,
};

// Records and header
pub use intentlog_core::header::shared;
pub use intentlog_core::{
    BlockRef, ChecksumKind, Epoch, LogHeader, LogRecord, SharedHeader, SyncPolicy, TxType, WriteRecord,
    WriteState, ZilConfig,
};

// Storage
pub use intentlog_storage::{
    BlockStore, EpochManager, MemBlockStore, MemEpochManager, StoreStatsSnapshot,
};
