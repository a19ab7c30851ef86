//! Storage collaborators of the intent log
//!
//! The log does not own physical storage or checkpointing. It talks to two
//! external services through the traits defined here:
//! - [`BlockStore`]: allocate, write, read, free and claim blocks; flush device caches
//! - [`EpochManager`]: hold epochs open, wait for epochs to become durable,
//!   run per-epoch sync callbacks
//!
//! The [`memory`] module provides in-memory implementations of both with fault
//! injection and crash simulation, used by tests and benchmarks.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block_store;
pub mod epoch;
pub mod io;
pub mod memory;

pub use block_store::BlockStore;
pub use epoch::{CallbackId, EpochHold, EpochManager, SyncCallback};
pub use io::{IoCompleter, IoHandle};
pub use memory::{MemBlockStore, MemEpochManager, StoreStatsSnapshot};
