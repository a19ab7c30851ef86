//! One-shot I/O completion handles
//!
//! An [`IoHandle`] is returned by every asynchronous block store operation. The
//! store keeps the matching [`IoCompleter`] and signals it when the operation
//! finishes; the log waits on the handle.

use intentlog_core::{BlockError, Dva};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

type IoResult = std::result::Result<(), BlockError>;

struct IoSlot {
    result: Mutex<Option<IoResult>>,
    done: Condvar,
}

impl IoSlot {
    fn new(result: Option<IoResult>) -> Arc<Self> {
        Arc::new(IoSlot {
            result: Mutex::new(result),
            done: Condvar::new(),
        })
    }

    fn finish(&self, result: IoResult) {
        let mut slot = self.result.lock();
        if slot.is_none() {
            *slot = Some(result);
            self.done.notify_all();
        }
    }
}

/// Waitable result of an asynchronous block operation.
#[must_use = "an I/O handle must be waited on to observe the result"]
pub struct IoHandle {
    slot: Arc<IoSlot>,
}

impl IoHandle {
    /// Handle for an operation that already finished.
    pub fn ready(result: IoResult) -> Self {
        IoHandle {
            slot: IoSlot::new(Some(result)),
        }
    }

    /// Handle plus the completer that will finish it.
    pub fn pending() -> (IoHandle, IoCompleter) {
        let slot = IoSlot::new(None);
        (
            IoHandle { slot: slot.clone() },
            IoCompleter { slot: Some(slot) },
        )
    }

    /// True once the operation has finished.
    pub fn is_complete(&self) -> bool {
        self.slot.result.lock().is_some()
    }

    /// Block until the operation finishes and return its result.
    pub fn wait(self) -> IoResult {
        let mut slot = self.slot.result.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            self.slot.done.wait(&mut slot);
        }
    }
}

impl std::fmt::Debug for IoHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoHandle")
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Completion side of an [`IoHandle`].
///
/// Dropping a completer without calling [`IoCompleter::complete`] finishes the
/// handle with an I/O error, so a waiter can never hang on a lost completion.
pub struct IoCompleter {
    slot: Option<Arc<IoSlot>>,
}

impl IoCompleter {
    /// Finish the operation.
    pub fn complete(mut self, result: IoResult) {
        if let Some(slot) = self.slot.take() {
            slot.finish(result);
        }
    }
}

impl Drop for IoCompleter {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.finish(Err(BlockError::Io {
                dva: Dva::default(),
                message: "completion dropped".to_string(),
            }));
        }
    }
}
