//! In-memory collaborators
//!
//! - [`MemBlockStore`]: block store with fault injection and crash simulation
//! - [`MemEpochManager`]: epoch manager whose epochs advance on demand

mod block_store;
mod epoch_manager;

pub use block_store::{MemBlockStore, StoreStatsSnapshot};
pub use epoch_manager::MemEpochManager;
