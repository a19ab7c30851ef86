//! Suspend and resume
//!
//! A suspended log writes no blocks: commits are satisfied by checkpoints. The
//! first `suspend` commits what is pending and destroys the chain, so the
//! header references nothing while the dataset is, for example, being
//! snapshotted or rolled back. Suspends nest; each needs its own `resume`.

use crate::commit::Origin;
use crate::zilog::Zilog;
use intentlog_core::{Error, Result};
use intentlog_storage::EpochManager;
use tracing::{debug, info};

impl Zilog {
    /// Stop log writes and empty the chain.
    ///
    /// Fails with `Busy` while the header still holds records awaiting replay.
    /// A nested call waits for a suspend in progress to finish.
    pub fn suspend(&self) -> Result<()> {
        if self.header.lock().replay_needed() {
            return Err(Error::Busy("log has records awaiting replay".into()));
        }

        let head_is_hole = {
            let mut inner = self.inner.lock();
            if inner.suspend_count > 0 {
                inner.suspend_count += 1;
                while inner.suspending {
                    self.suspend_cv.wait(&mut inner);
                }
                debug!(count = inner.suspend_count, "nested suspend");
                return Ok(());
            }
            inner.suspend_count = 1;
            let head_is_hole = self.header.lock().head.is_hole();
            if !head_is_hole {
                inner.suspending = true;
            }
            head_is_hole
        };
        if head_is_hole {
            info!(objset = self.objset_id, "log suspended");
            return Ok(());
        }

        self.commit_impl(u64::MAX, 0, Origin::Suspend);
        let result = self.destroy(false);
        let destroy_epoch = self.inner.lock().destroy_epoch;
        if destroy_epoch != 0 {
            self.epochs.wait_until_synced(destroy_epoch);
        }

        {
            let mut inner = self.inner.lock();
            inner.suspending = false;
            self.suspend_cv.notify_all();
        }
        info!(objset = self.objset_id, "log suspended");
        result
    }

    /// Undo one `suspend`.
    pub fn resume(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.suspend_count == 0 {
            return Err(Error::InvalidState("resume without suspend".into()));
        }
        inner.suspend_count -= 1;
        if inner.suspend_count == 0 {
            info!(objset = self.objset_id, "log resumed");
        }
        Ok(())
    }

    /// True while at least one `suspend` is outstanding
    pub fn is_suspended(&self) -> bool {
        self.inner.lock().suspend_count > 0
    }
}
