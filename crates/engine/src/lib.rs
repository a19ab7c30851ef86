//! Intent log engine
//!
//! This crate ties the lower layers together into [`Zilog`], the per-dataset
//! intent log:
//! - `itx`: pending records and the [`GetData`] producer callback
//! - `lwb`: in-memory chain blocks and the staging buffer of the open block
//! - `commit`: group commit and the batch writer
//! - `sync`: the per-epoch callback that reclaims blocks and updates the header
//! - `lifecycle`: [`claim`], [`check_log_chain`] and `destroy`
//! - `replay`: [`ReplayTable`] dispatch of a claimed chain
//! - `suspend`: `suspend`/`resume`
//! - `stats`: counters
//!
//! # Example
//!
//! ```
//! use intentlog_core::{header::shared, LogHeader, TxType, ZilConfig};
//! use intentlog_engine::{FetchToken, Itx, Zilog};
//! use intentlog_core::{GetDataError, WriteRecord};
//! use intentlog_storage::{EpochManager, MemBlockStore, MemEpochManager};
//! use std::sync::Arc;
//!
//! let epochs = Arc::new(MemEpochManager::new());
//! let no_data = |_: FetchToken, _: &mut WriteRecord, _: Option<&mut [u8]>| {
//!     Err::<(), _>(GetDataError::Gone)
//! };
//! let zilog = Zilog::open(
//!     ZilConfig::default(),
//!     1,
//!     shared(LogHeader::default()),
//!     Arc::new(MemBlockStore::new()),
//!     epochs.clone(),
//!     Arc::new(no_data),
//! )?;
//!
//! let itx = Itx::new(TxType::Create, epochs.current_epoch(), 7, b"name".to_vec());
//! let seq = zilog.submit(itx.with_sync(true))?;
//! zilog.commit(seq, 7);
//! assert!(zilog.commit_seq() >= seq);
//! zilog.close()?;
//! # Ok::<(), intentlog_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod commit;
pub mod itx;
pub mod lifecycle;
mod lwb;
pub mod replay;
pub mod stats;
mod suspend;
mod sync;
mod zilog;

#[cfg(test)]
mod test_support;

pub use itx::{FetchToken, GetData, Itx};
pub use lifecycle::{check_log_chain, claim, ClaimOutcome};
pub use replay::{HandlerResult, ReplayHandler, ReplayReport, ReplayTable};
pub use stats::{ZilStats, ZilStatsSnapshot};
pub use zilog::Zilog;
