//! Replay of a claimed chain
//!
//! After a crash the claimed chain holds the records of epochs that never
//! synced. [`Zilog::replay`] walks it within the claim bounds and hands each
//! record to the handler registered for its transaction type, one record per
//! held epoch. Progress is recorded per epoch and lands in the header's
//! `replay_seq` when that epoch syncs, so an interrupted replay resumes after
//! the last applied record instead of applying it twice.

use crate::zilog::Zilog;
use intentlog_core::{
    epoch_slot, Epoch, Error, LogHeader, LogRecord, Result, TxType, WriteRecord, TX_MAX_TYPE,
};
use intentlog_durability::ChainWalk;
use intentlog_storage::EpochManager;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one handler call; the error is a human-readable reason.
pub type HandlerResult = std::result::Result<(), String>;

/// Applies one record in the given (held) epoch.
pub type ReplayHandler = Box<dyn Fn(&LogRecord, Epoch) -> HandlerResult + Send + Sync>;

/// Replay handlers indexed by transaction type.
pub struct ReplayTable {
    handlers: Vec<Option<ReplayHandler>>,
}

impl ReplayTable {
    /// Table without handlers
    pub fn new() -> Self {
        ReplayTable {
            handlers: (0..TX_MAX_TYPE).map(|_| None).collect(),
        }
    }

    /// Set the handler of `txtype`, replacing any previous one.
    pub fn register<F>(&mut self, txtype: TxType, handler: F)
    where
        F: Fn(&LogRecord, Epoch) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers[txtype.as_u32() as usize] = Some(Box::new(handler));
    }

    /// Builder form of [`ReplayTable::register`].
    pub fn with<F>(mut self, txtype: TxType, handler: F) -> Self
    where
        F: Fn(&LogRecord, Epoch) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(txtype, handler);
        self
    }

    /// Handler for a raw transaction type
    pub fn get(&self, txtype: u32) -> Option<&ReplayHandler> {
        self.handlers.get(txtype as usize).and_then(Option::as_ref)
    }
}

impl Default for ReplayTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReplayTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered: Vec<usize> = self
            .handlers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_some())
            .map(|(i, _)| i)
            .collect();
        f.debug_struct("ReplayTable")
            .field("registered", &registered)
            .finish()
    }
}

/// What a replay did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Records applied by a handler
    pub records_replayed: u64,
    /// Records already replayed or already covered by a checkpoint
    pub records_skipped: u64,
    /// Indirect writes whose data block no longer verifies; a later record
    /// or the checkpoint carries the data
    pub superseded_reads: u64,
    /// Log blocks walked
    pub blocks: u64,
    /// Handler calls retried after a checkpoint
    pub retries: u64,
    /// Wall time spent
    pub elapsed_micros: u64,
}

impl ReplayReport {
    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "replayed {} records ({} skipped, {} superseded) from {} blocks in {}us, {} retries",
            self.records_replayed,
            self.records_skipped,
            self.superseded_reads,
            self.blocks,
            self.elapsed_micros,
            self.retries
        )
    }
}

impl Zilog {
    /// Apply the records of a claimed chain, then destroy it.
    ///
    /// A log that needs no replay, or whose configuration disables replay, is
    /// destroyed right away. On a handler failure the chain is left in place and
    /// the error names the failing record; records applied before it are not
    /// applied again by the next attempt.
    pub fn replay(&self, table: &ReplayTable) -> Result<ReplayReport> {
        let header = *self.header.lock();
        if self.config.replay_disabled {
            if header.replay_needed() {
                warn!(objset = self.objset_id, "log replay disabled, discarding records");
            }
            self.destroy(false)?;
            return Ok(ReplayReport::default());
        }
        if !header.replay_needed() {
            self.destroy(true)?;
            return Ok(ReplayReport::default());
        }

        self.epochs.wait_until_synced(0);
        self.inner.lock().replaying = true;
        let started = Instant::now();
        let mut report = ReplayReport::default();

        if let Err(e) = self.replay_chain(&header, table, &mut report) {
            self.epochs.wait_until_synced(0);
            self.inner.lock().replaying = false;
            warn!(objset = self.objset_id, error = %e, "log replay failed");
            return Err(e);
        }

        self.destroy(false)?;
        let destroy_epoch = self.inner.lock().destroy_epoch;
        if destroy_epoch != 0 {
            self.epochs.wait_until_synced(destroy_epoch);
        }
        self.inner.lock().replaying = false;

        report.elapsed_micros = started.elapsed().as_micros() as u64;
        info!(objset = self.objset_id, "{}", report.summary());
        Ok(report)
    }

    fn replay_chain(
        &self,
        header: &LogHeader,
        table: &ReplayTable,
        report: &mut ReplayReport,
    ) -> Result<()> {
        for block in ChainWalk::new(&*self.store, header) {
            let block = block?;
            report.blocks += 1;
            for record in block.records {
                if record.seq <= header.replay_seq || record.epoch < header.claim_epoch {
                    report.records_skipped += 1;
                    continue;
                }
                self.inner.lock().replaying_seq = record.seq;

                let handler = table.get(record.txtype).ok_or_else(|| Error::Replay {
                    seq: record.seq,
                    txtype: record.txtype,
                    reason: match record.tx_type() {
                        Some(t) => format!("no handler for {:?}", t),
                        None => "unknown transaction type".to_string(),
                    },
                })?;

                let record = match self.inline_write_data(record)? {
                    Some(record) => record,
                    None => {
                        report.superseded_reads += 1;
                        continue;
                    }
                };

                if let Err(reason) = self.dispatch(handler, &record) {
                    debug!(seq = record.seq, %reason, "replay failed, retrying after checkpoint");
                    self.epochs.wait_until_synced(0);
                    report.retries += 1;
                    self.dispatch(handler, &record)
                        .map_err(|reason| Error::Replay {
                            seq: record.seq,
                            txtype: record.txtype,
                            reason,
                        })?;
                }
                report.records_replayed += 1;
            }
        }
        Ok(())
    }

    /// Read the data of an indirect write into the record. `None` if the data
    /// block no longer verifies.
    fn inline_write_data(&self, record: LogRecord) -> Result<Option<LogRecord>> {
        if record.tx_type() != Some(TxType::Write) {
            return Ok(Some(record));
        }
        let write = WriteRecord::decode(&record.payload)?;
        if !write.is_indirect() {
            return Ok(Some(record));
        }
        let mut data = match self.store.read(&write.block_ref) {
            Ok(data) => data,
            Err(e) if e.is_checksum() => {
                debug!(seq = record.seq, data = %write.block_ref, "indirect data superseded");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        data.resize(write.length as usize, 0);
        let mut inlined =
            WriteRecord::inline(write.file_id, write.offset, data).into_log_record(record.epoch);
        inlined.seq = record.seq;
        Ok(Some(inlined))
    }

    /// Run one handler inside a held epoch and note the record as replayed in
    /// that epoch.
    fn dispatch(&self, handler: &ReplayHandler, record: &LogRecord) -> HandlerResult {
        let hold = self.epochs.hold_epoch_open();
        let epoch = hold.epoch();
        let result = handler(record, epoch);
        if result.is_ok() {
            self.inner.lock().replayed_seq[epoch_slot(epoch)] = record.seq;
        }
        self.epochs.release_to_quiesce(hold);
        result
    }
}
