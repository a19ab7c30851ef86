//! Commit engine
//!
//! `commit` blocks until the requested itxs are durable. Callers meet in a
//! [`GroupCommit`](intentlog_concurrency::GroupCommit): one leader writes a
//! batch covering everything pending, the others wait and usually find their
//! sequence already covered when it finishes.
//!
//! ## One batch
//!
//! ```text
//! take batch -> open staging -> append itxs (issuing full blocks) -> issue last
//!            -> wait writes -> flush devices -> publish watermark
//! ```
//!
//! Whenever the log cannot be written (successor allocation failed, a write or
//! flush failed, the log is suspended or still holds unreplayed records) the
//! batch falls back to waiting for a full checkpoint. That is slower but gives
//! the same guarantee, so `commit` itself never fails.

use crate::itx::{FetchToken, Itx, ItxBody};
use crate::lwb::{Lwb, LwbState, Staging};
use crate::stats::ZilStats;
use crate::zilog::{InFlight, Writer, Zilog};
use intentlog_concurrency::{LeaderGuard, Role};
use intentlog_core::{
    BlockError, BlockRef, ChainSeed, Epoch, GetDataError, LogRecord, SyncPolicy, WriteRecord,
    WriteState, LR_HEADER_SIZE, WRITE_RECORD_FIXED,
};
use intentlog_durability::encode_block;
use tracing::{debug, error, info, trace, warn};

/// Why a batch could not be written to the log.
#[derive(Debug)]
pub(crate) enum Fallback {
    /// Successor allocation failed; the chain ends at the last issued block
    Stalled,
    /// A block write or device flush failed
    Io(BlockError),
    /// The log may not be appended to right now
    Unwritable(&'static str),
}

impl From<BlockError> for Fallback {
    fn from(e: BlockError) -> Self {
        Fallback::Io(e)
    }
}

type Step<T> = std::result::Result<T, Fallback>;

/// Who asked for a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// A producer waiting on its own itxs
    Producer,
    /// The flush `suspend` runs before destroying the chain; the only commit
    /// allowed to write blocks once the log is suspended
    Suspend,
}

impl Zilog {
    /// Block until every itx with `seq <= up_to` in `scope` (0 = all objects)
    /// is durable.
    ///
    /// Synchronous itxs of other objects are written along with the scope.
    pub fn commit(&self, up_to: u64, scope: u64) {
        if self.config.sync == SyncPolicy::Disabled {
            return;
        }
        ZilStats::bump(&self.stats.commit_count);
        self.commit_impl(up_to, scope, Origin::Producer);
    }

    pub(crate) fn commit_impl(&self, up_to: u64, scope: u64, origin: Origin) {
        let target = up_to.min(self.inner.lock().itx_seq);
        let guard = match self.group.enter(target) {
            Role::Satisfied(_) => return,
            Role::Leader(guard) => guard,
        };

        let degraded = {
            let inner = self.inner.lock();
            if inner.suspend_count > 0 && origin != Origin::Suspend {
                Some("suspended")
            } else if inner.log_error {
                Some("previous write failed")
            } else {
                None
            }
        };
        match degraded {
            Some(reason) => self.checkpoint_commit(&guard, reason),
            None => self.commit_writer(&guard, scope, origin),
        }
    }

    /// Satisfy a commit through the checkpoint alone.
    fn checkpoint_commit(&self, guard: &LeaderGuard<'_>, reason: &'static str) {
        let covered = self.inner.lock().itx_seq;
        debug!(reason, covered, "commit waits for checkpoint");
        self.epochs.wait_until_synced(0);
        self.inner.lock().log_error = false;
        ZilStats::bump(&self.stats.fallback_syncs);
        guard.publish(covered);
    }

    fn commit_writer(&self, guard: &LeaderGuard<'_>, scope: u64, origin: Origin) {
        let mut writer = self.writer.lock();
        ZilStats::bump(&self.stats.commit_writer_count);

        let (target, batch) = self.take_batch(scope);
        let result = if batch.is_empty() {
            Ok(())
        } else {
            self.write_batch(&mut writer, batch, origin)
                .and_then(|()| self.complete(&mut writer))
        };

        match result {
            Ok(()) => guard.publish(self.watermark(target)),
            Err(fallback) => {
                if let Err(e) = self.drain(&mut writer) {
                    debug!(error = %e, "write failed while draining");
                }
                writer.flush_set.clear();
                match &fallback {
                    Fallback::Stalled => {
                        info!("log block allocation failed, waiting for checkpoint")
                    }
                    Fallback::Io(e) => {
                        warn!(error = %e, "log write failed, waiting for checkpoint");
                        self.inner.lock().log_error = true;
                    }
                    Fallback::Unwritable(reason) => debug!(reason, "log not writable"),
                }
                ZilStats::bump(&self.stats.fallback_syncs);
                self.epochs.wait_until_synced(0);
                guard.publish(target);
            }
        }
    }

    /// Remove the itxs this batch writes from the pending queue.
    fn take_batch(&self, scope: u64) -> (u64, Vec<Itx>) {
        let mut inner = self.inner.lock();
        let target = inner.itx_seq;
        let (batch, kept): (Vec<Itx>, Vec<Itx>) = inner
            .pending
            .drain(..)
            .partition(|itx| itx.sync || scope == 0 || itx.file_id == scope);
        inner.pending = kept.into();
        (target, batch)
    }

    /// Highest sequence such that nothing at or below it is still queued.
    fn watermark(&self, target: u64) -> u64 {
        let inner = self.inner.lock();
        inner
            .pending
            .iter()
            .map(|itx| itx.seq)
            .filter(|&seq| seq <= target)
            .min()
            .map_or(target, |seq| seq - 1)
    }

    fn write_batch(&self, writer: &mut Writer, batch: Vec<Itx>, origin: Origin) -> Step<()> {
        let mut staging = self.open_staging(origin)?;
        let mut remaining: usize = batch.iter().map(Itx::estimated_len).sum();

        for itx in batch {
            remaining = remaining.saturating_sub(itx.estimated_len());
            if itx.epoch <= self.epochs.last_synced_epoch() {
                trace!(seq = itx.seq, epoch = itx.epoch, "itx already checkpointed");
                continue;
            }
            let epoch = itx.epoch;
            staging = match itx.body {
                ItxBody::Record(record) => {
                    self.append_record(writer, staging, record, remaining)?
                }
                ItxBody::Deferred {
                    write,
                    state: WriteState::Indirect,
                    token,
                } => self.append_indirect(writer, staging, write, epoch, token, remaining)?,
                ItxBody::Deferred { write, token, .. } => {
                    self.append_copy(writer, staging, write, epoch, token, remaining)?
                }
            };
        }

        if !staging.is_empty() {
            self.issue(writer, staging, 0)?;
        }
        Ok(())
    }

    /// The open lwb at the chain tail, creating the chain if there is none.
    fn open_staging(&self, origin: Origin) -> Step<Staging> {
        let destroy_epoch = self.inner.lock().destroy_epoch;
        if destroy_epoch != 0 {
            self.epochs.wait_until_synced(destroy_epoch);
        }

        {
            let mut inner = self.inner.lock();
            if inner.suspend_count > 0 && origin != Origin::Suspend {
                return Err(Fallback::Unwritable("suspended"));
            }
            let header = *self.header.lock();
            if header.is_claimed() || header.replay_needed() {
                return Err(Fallback::Unwritable("unreplayed log"));
            }
            if let Some(tail) = inner.chain.back() {
                if tail.state == LwbState::Opened {
                    return Ok(Staging::new(tail.id, tail.block_ref));
                }
            }
            if inner.chain.is_empty() && !header.head.is_hole() {
                // Append point left by a previous open (or a keep-first destroy).
                let id = inner.alloc_lwb_id();
                inner.chain.push_back(Lwb::opened(id, header.head, 0));
                return Ok(Staging::new(id, header.head));
            }
            if !inner.chain.is_empty() {
                // Tail ended with a hole successor and is not reclaimed yet.
                return Err(Fallback::Stalled);
            }
        }
        self.create_chain()
    }

    /// Allocate the first block of a new chain and wait until the header
    /// points at it.
    fn create_chain(&self) -> Step<Staging> {
        let hold = self.epochs.hold_epoch_open();
        let epoch = hold.epoch();
        let block = match self.store.alloc(epoch, self.config.min_block_size, None) {
            Ok(block) => block.with_seed(ChainSeed::generate(self.objset_id)),
            Err(e) => {
                self.epochs.release_to_quiesce(hold);
                ZilStats::bump(&self.stats.lwb_alloc_failures);
                warn!(error = %e, "cannot allocate first log block");
                return Err(Fallback::Stalled);
            }
        };
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.alloc_lwb_id();
            inner.chain.push_back(Lwb::opened(id, block, epoch));
            id
        };
        self.epochs.release_to_quiesce(hold);
        info!(objset = self.objset_id, block = %block, epoch, "log chain created");
        self.epochs.wait_until_synced(epoch);
        Ok(Staging::new(id, block))
    }

    fn next_lr_seq(writer: &mut Writer) -> u64 {
        writer.lr_seq += 1;
        writer.lr_seq
    }

    fn append_record(
        &self,
        writer: &mut Writer,
        mut staging: Staging,
        mut record: LogRecord,
        remaining: usize,
    ) -> Step<Staging> {
        let len = record.encoded_len();
        if len > staging.free() {
            staging = self.issue(writer, staging, remaining + len)?;
            if len > staging.free() {
                error!(len, free = staging.free(), "record does not fit an empty block");
                return Err(Fallback::Unwritable("record larger than a log block"));
            }
        }
        record.seq = Self::next_lr_seq(writer);
        staging.push(&record);
        Ok(staging)
    }

    /// NeedCopy write: fetch the data into the block, splitting it into one
    /// record per block when it does not fit.
    fn append_copy(
        &self,
        writer: &mut Writer,
        mut staging: Staging,
        write: WriteRecord,
        epoch: Epoch,
        token: FetchToken,
        remaining: usize,
    ) -> Step<Staging> {
        let header_len = LR_HEADER_SIZE + WRITE_RECORD_FIXED;
        let mut done = 0u64;
        while done < write.length {
            let left = (write.length - done) as usize;
            if staging.free() < header_len + left.min(8) {
                staging = self.issue(writer, staging, remaining + header_len + left)?;
            }
            let chunk = (staging.free() - header_len)
                .min(self.config.max_log_data())
                .min(left);
            let mut piece = WriteRecord::deferred(write.file_id, write.offset + done, chunk as u64);
            let mut buf = vec![0u8; chunk];
            match self.get_data.get_data(token, &mut piece, Some(&mut buf)) {
                Ok(()) => {}
                Err(GetDataError::Gone) => {
                    debug!(file = write.file_id, "write data gone, record dropped");
                    return Ok(staging);
                }
                Err(GetDataError::Io(message)) => {
                    warn!(file = write.file_id, %message, "cannot fetch write data");
                    self.drain(writer)?;
                    self.epochs.wait_until_synced(epoch);
                    return Ok(staging);
                }
            }
            piece.data = buf;
            let mut record = piece.into_log_record(epoch);
            record.seq = Self::next_lr_seq(writer);
            staging.push(&record);
            done += chunk as u64;
        }
        Ok(staging)
    }

    /// Indirect write: log only the reference to the data block. The data must
    /// belong to a checkpointed epoch, so wait for it first if needed.
    fn append_indirect(
        &self,
        writer: &mut Writer,
        staging: Staging,
        write: WriteRecord,
        epoch: Epoch,
        token: FetchToken,
        remaining: usize,
    ) -> Step<Staging> {
        if epoch > self.epochs.last_synced_epoch() {
            self.drain(writer)?;
            self.epochs.wait_until_synced(epoch);
        }
        let mut record = WriteRecord::deferred(write.file_id, write.offset, write.length);
        match self.get_data.get_data(token, &mut record, None) {
            Ok(()) if !record.block_ref.is_hole() => {}
            Ok(()) | Err(GetDataError::Gone) => {
                debug!(file = write.file_id, "indirect data gone, record dropped");
                return Ok(staging);
            }
            Err(GetDataError::Io(message)) => {
                // The epoch is already synced, so the data is durable anyway.
                warn!(file = write.file_id, %message, "cannot write indirect data");
                return Ok(staging);
            }
        }
        writer.touch(record.block_ref.dva.device);
        self.append_record(writer, staging, record.into_log_record(epoch), remaining)
    }

    /// Seal the staged lwb, link it to a freshly allocated successor and start
    /// its write. Returns the successor's staging buffer.
    fn issue(&self, writer: &mut Writer, staging: Staging, pending_bytes: usize) -> Step<Staging> {
        let hold = self.epochs.hold_epoch_open();
        let epoch = hold.epoch();
        let size = writer.rotor.choose(pending_bytes, &self.config);
        let next = match self.store.alloc(epoch, size, Some(&staging.block)) {
            Ok(block) => block.with_seed(staging.block.seed().successor()),
            Err(e) => {
                ZilStats::bump(&self.stats.lwb_alloc_failures);
                warn!(error = %e, size, "cannot allocate next log block");
                BlockRef::HOLE
            }
        };

        let bytes = match encode_block(
            &staging.body,
            staging.block.size as usize,
            &staging.block,
            &next,
        ) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "cannot encode log block");
                if !next.is_hole() {
                    self.store.free(&next, epoch);
                }
                self.epochs.release_to_quiesce(hold);
                return Err(Fallback::Unwritable("log block encoding failed"));
            }
        };
        let handle = self.store.write_async(&staging.block, bytes);
        writer.touch(staging.block.dva.device);
        writer.in_flight.push(InFlight {
            lwb_id: staging.lwb_id,
            handle,
            hold,
        });
        ZilStats::bump(&self.stats.lwb_issued_count);
        trace!(
            block = %staging.block,
            records = staging.records,
            used = staging.body.len(),
            "log block issued"
        );

        let mut inner = self.inner.lock();
        if let Some(lwb) = inner.lwb_mut(staging.lwb_id) {
            lwb.state = LwbState::Issued;
            lwb.max_epoch = lwb.max_epoch.max(staging.max_epoch).max(epoch);
        }
        if next.is_hole() {
            return Err(Fallback::Stalled);
        }
        let id = inner.alloc_lwb_id();
        inner.chain.push_back(Lwb::opened(id, next, epoch));
        Ok(Staging::new(id, next))
    }

    /// Wait for every in-flight write, mark the lwbs done and release their
    /// epoch holds. Returns the first error.
    pub(crate) fn drain(&self, writer: &mut Writer) -> std::result::Result<(), BlockError> {
        let mut first_error = None;
        for flight in writer.in_flight.drain(..) {
            let result = flight.handle.wait();
            if let Some(lwb) = self.inner.lock().lwb_mut(flight.lwb_id) {
                lwb.state = LwbState::Done;
            }
            self.epochs.release_to_quiesce(flight.hold);
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Wait for the batch's writes, then flush every device they touched.
    fn complete(&self, writer: &mut Writer) -> Step<()> {
        self.drain(writer)?;
        let devices: Vec<_> = writer.flush_set.drain(..).collect();
        if self.config.no_cache_flush {
            return Ok(());
        }
        let handles: Vec<_> = devices
            .into_iter()
            .map(|device| {
                ZilStats::bump(&self.stats.device_flushes);
                self.store.flush_device_cache(device)
            })
            .collect();
        let mut first_error = None;
        for handle in handles {
            if let Err(e) = handle.wait() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(Fallback::Io(e)),
            None => Ok(()),
        }
    }
}
