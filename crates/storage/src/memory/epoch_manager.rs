//! In-memory epoch manager
//!
//! Epochs advance only when someone waits for them: `wait_until_synced` drives
//! sync passes in the caller's thread, one epoch at a time. A pass
//!
//! 1. closes the open epoch (new holds land in the next one),
//! 2. waits for every hold on the closing epoch to be released,
//! 3. runs the registered sync callbacks in registration order,
//! 4. publishes the epoch as synced.
//!
//! Passes are serialized by a dedicated lock. Callbacks run without any internal
//! state lock held, so they may take holds or query epochs, but they must not
//! wait for an epoch to sync.

use crate::epoch::{CallbackId, EpochHold, EpochManager, SyncCallback};
use intentlog_core::Epoch;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

type SharedCallback = Arc<dyn Fn(Epoch) + Send + Sync>;

#[derive(Debug)]
struct EpochState {
    open: Epoch,
    last_synced: Epoch,
    holds: FxHashMap<Epoch, usize>,
}

/// In-memory [`EpochManager`].
pub struct MemEpochManager {
    state: Mutex<EpochState>,
    holds_released: Condvar,
    sync_lock: Mutex<()>,
    callbacks: Mutex<Vec<(CallbackId, SharedCallback)>>,
    next_callback: AtomicU64,
    passes: AtomicU64,
}

impl MemEpochManager {
    /// Fresh manager: epoch 1 is open, nothing has synced.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Manager resuming after `last_synced`, as after a pool reimport.
    pub fn starting_at(last_synced: Epoch) -> Self {
        MemEpochManager {
            state: Mutex::new(EpochState {
                open: last_synced + 1,
                last_synced,
                holds: FxHashMap::default(),
            }),
            holds_released: Condvar::new(),
            sync_lock: Mutex::new(()),
            callbacks: Mutex::new(Vec::new()),
            next_callback: AtomicU64::new(1),
            passes: AtomicU64::new(0),
        }
    }

    /// Sync the currently open epoch.
    pub fn sync_now(&self) {
        self.wait_until_synced(0);
    }

    /// Number of completed sync passes
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Outstanding holds on `epoch`
    pub fn holds_on(&self, epoch: Epoch) -> usize {
        self.state.lock().holds.get(&epoch).copied().unwrap_or(0)
    }

    fn sync_pass(&self, target: Epoch) {
        let _pass = self.sync_lock.lock();
        let epoch = {
            let mut state = self.state.lock();
            if state.last_synced >= target {
                return;
            }
            let epoch = state.open;
            state.open += 1;
            while state.holds.get(&epoch).copied().unwrap_or(0) > 0 {
                self.holds_released.wait(&mut state);
            }
            state.holds.remove(&epoch);
            epoch
        };

        let callbacks: Vec<SharedCallback> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(epoch);
        }

        self.state.lock().last_synced = epoch;
        self.passes.fetch_add(1, Ordering::Relaxed);
        trace!(epoch, "epoch synced");
    }
}

impl Default for MemEpochManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EpochManager for MemEpochManager {
    fn hold_epoch_open(&self) -> EpochHold {
        let mut state = self.state.lock();
        let epoch = state.open;
        *state.holds.entry(epoch).or_insert(0) += 1;
        EpochHold::new(epoch)
    }

    fn release_to_quiesce(&self, hold: EpochHold) {
        let mut state = self.state.lock();
        if let Some(count) = state.holds.get_mut(&hold.epoch()) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.holds_released.notify_all();
            }
        }
    }

    fn wait_until_synced(&self, epoch: Epoch) {
        let target = if epoch == 0 {
            self.state.lock().open
        } else {
            epoch
        };
        while self.state.lock().last_synced < target {
            self.sync_pass(target);
        }
    }

    fn register_sync_callback(&self, callback: SyncCallback) -> CallbackId {
        let id = CallbackId(self.next_callback.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().push((id, Arc::from(callback)));
        id
    }

    fn unregister_sync_callback(&self, id: CallbackId) {
        self.callbacks.lock().retain(|(cb_id, _)| *cb_id != id);
    }

    fn current_epoch(&self) -> Epoch {
        self.state.lock().open
    }

    fn last_synced_epoch(&self) -> Epoch {
        self.state.lock().last_synced
    }
}

impl std::fmt::Debug for MemEpochManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemEpochManager")
            .field("open", &state.open)
            .field("last_synced", &state.last_synced)
            .finish()
    }
}
