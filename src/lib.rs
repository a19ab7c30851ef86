//! # intentlog
//!
//! Chained-block intent log for a transactional storage pool.
//!
//! Synchronous operations are made durable by appending records to a chain of
//! log blocks instead of waiting for the next checkpoint. After a crash the
//! chain is claimed at import and replayed; once an epoch syncs, the blocks
//! whose records it covers are released.
//!
//! ## Quick Start
//!
//! ```
//! use intentlog::prelude::*;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemBlockStore::new());
//! let epochs = Arc::new(MemEpochManager::new());
//! let no_data = |_: FetchToken, _: &mut WriteRecord, _: Option<&mut [u8]>| {
//!     Err::<(), _>(GetDataError::Gone)
//! };
//! let zilog = IntentLog::builder()
//!     .objset(1)
//!     .open(store, epochs.clone(), Arc::new(no_data))?;
//!
//! // Queue a synchronous record and wait until it is durable.
//! let itx = Itx::new(TxType::Create, epochs.current_epoch(), 7, b"file".to_vec());
//! let seq = zilog.submit(itx.with_sync(true))?;
//! zilog.commit(seq, 7);
//!
//! zilog.close()?;
//! # Ok::<(), intentlog::Error>(())
//! ```
//!
//! ## Crates
//!
//! | Crate | Contents |
//! |-------|----------|
//! | `intentlog-core` | identifiers, block references, records, header, config, errors |
//! | `intentlog-storage` | block store and epoch manager interfaces, in-memory implementations |
//! | `intentlog-durability` | block codec, chain walker |
//! | `intentlog-concurrency` | group commit |
//! | `intentlog-engine` | the log itself |

#![warn(missing_docs)]

mod builder;

pub mod prelude;

pub use builder::{IntentLog, IntentLogBuilder};
pub use intentlog_core::{Error, Result};

pub use intentlog_concurrency;
pub use intentlog_core;
pub use intentlog_durability;
pub use intentlog_engine;
pub use intentlog_storage;
