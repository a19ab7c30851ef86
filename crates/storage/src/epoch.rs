//! Epoch manager interface
//!
//! Epochs are the global checkpoint intervals: once the epoch manager reports an
//! epoch as synced, every change made in it is durable. The log holds epochs open
//! while it has work in flight that must land in that epoch, and registers a
//! callback that runs once per epoch while the epoch is being synced.

use intentlog_core::Epoch;

/// Callback invoked once per epoch during that epoch's sync.
pub type SyncCallback = Box<dyn Fn(Epoch) + Send + Sync>;

/// Registration handle for a [`SyncCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

/// Token proving that an epoch is held open.
///
/// The epoch cannot finish syncing until the hold is returned with
/// [`EpochManager::release_to_quiesce`].
#[must_use = "an epoch hold must be released or the epoch never syncs"]
#[derive(Debug, PartialEq, Eq)]
pub struct EpochHold {
    epoch: Epoch,
}

impl EpochHold {
    /// Create a hold token; only epoch manager implementations call this.
    pub fn new(epoch: Epoch) -> Self {
        EpochHold { epoch }
    }

    /// Epoch being held open
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }
}

/// Checkpoint (transaction group) manager.
pub trait EpochManager: Send + Sync {
    /// Hold the currently open epoch open and return it.
    fn hold_epoch_open(&self) -> EpochHold;

    /// Return a hold so its epoch may quiesce and sync.
    fn release_to_quiesce(&self, hold: EpochHold);

    /// Block until `epoch` is durable. `0` means the epoch open at call time.
    ///
    /// Must not be called while the caller itself holds an epoch open.
    fn wait_until_synced(&self, epoch: Epoch);

    /// Register a callback run once per epoch during its sync.
    fn register_sync_callback(&self, callback: SyncCallback) -> CallbackId;

    /// Remove a callback; it is not invoked for epochs that start syncing later.
    fn unregister_sync_callback(&self, id: CallbackId);

    /// Epoch currently accepting new holds
    fn current_epoch(&self) -> Epoch;

    /// Most recent durable epoch
    fn last_synced_epoch(&self) -> Epoch;
}
