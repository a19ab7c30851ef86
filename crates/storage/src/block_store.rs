//! Block store interface
//!
//! The block store is the sole owner of physical block lifetime. The log asks it
//! to allocate blocks for the chain, write and read them, and release them; at
//! import time it asks the store to claim blocks referenced by an unreplayed log
//! so they cannot be handed out again before replay or destroy.

use crate::io::IoHandle;
use intentlog_core::{BlockError, BlockRef, DeviceId, Epoch};

/// Block allocator and storage engine.
///
/// Implementations must be safe to call from any thread. Frees and claims take
/// effect as part of the given epoch: they become durable when that epoch syncs.
pub trait BlockStore: Send + Sync {
    /// Allocate a block of at least `min_size` bytes, born in `epoch`.
    ///
    /// `prev_hint` is the previous block of the same chain; stores may use it to
    /// place the new block on the same device.
    fn alloc(
        &self,
        epoch: Epoch,
        min_size: u32,
        prev_hint: Option<&BlockRef>,
    ) -> Result<BlockRef, BlockError>;

    /// Start writing `data` (at most `block.size` bytes) to `block`.
    fn write_async(&self, block: &BlockRef, data: Vec<u8>) -> IoHandle;

    /// Read a block.
    ///
    /// `Content` references are verified against their digest and fail with
    /// [`BlockError::Checksum`]. `Embedded` references return raw contents; a
    /// block that was never written reads back as arbitrary bytes.
    fn read(&self, block: &BlockRef) -> Result<Vec<u8>, BlockError>;

    /// Release a block as part of `epoch`.
    fn free(&self, block: &BlockRef, epoch: Epoch);

    /// Reserve a block referenced by an unreplayed log.
    ///
    /// Returns [`BlockError::AlreadyClaimed`] if an earlier claim pass already
    /// reserved it; callers treat that as success.
    fn claim(&self, block: &BlockRef, epoch: Epoch) -> Result<(), BlockError>;

    /// Start flushing the volatile write cache of `device`.
    fn flush_device_cache(&self, device: DeviceId) -> IoHandle;
}
