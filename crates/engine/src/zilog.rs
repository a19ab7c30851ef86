//! The per-dataset intent log
//!
//! A [`Zilog`] is created by [`Zilog::open`] when a dataset is opened and lives
//! until [`Zilog::close`]. Its operations are spread over several modules:
//!
//! | Module | Operations |
//! |--------|------------|
//! | `zilog` | `open`, `submit`, `close`, accessors |
//! | `commit` | `commit` and the batch writer |
//! | `sync` | `sync` (per-epoch callback) |
//! | `lifecycle` | `check_log_chain`, `claim`, `destroy` |
//! | `replay` | `replay` |
//! | `suspend` | `suspend`, `resume` |
//!
//! ## Locking
//!
//! Three locks, always taken in this order:
//!
//! 1. `writer`: held by the one thread building and issuing blocks, and by
//!    `destroy`/`close`. May be held across epoch waits.
//! 2. `inner`: queue, chain list and counters. Never held across a wait.
//! 3. the shared header.
//!
//! The sync callback takes only `inner` and the header, so a writer waiting for
//! an epoch never blocks the epoch it waits for.

use crate::itx::{GetData, Itx, ItxBody};
use crate::lwb::{Lwb, LwbState};
use crate::stats::{ZilStats, ZilStatsSnapshot};
use intentlog_concurrency::GroupCommit;
use intentlog_core::{
    DeviceId, Epoch, Error, LogHeader, Result, SharedHeader, SyncPolicy, TxType, WriteState,
    ZilConfig, EPOCH_SLOTS,
};
use intentlog_durability::SizeRotor;
use intentlog_storage::{BlockStore, CallbackId, EpochHold, EpochManager, IoHandle};
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// State guarded by the main lock.
#[derive(Debug, Default)]
pub(crate) struct Inner {
    pub(crate) pending: VecDeque<Itx>,
    pub(crate) chain: VecDeque<Lwb>,
    pub(crate) next_lwb_id: u64,
    pub(crate) itx_seq: u64,
    pub(crate) replaying: bool,
    pub(crate) replaying_seq: u64,
    /// Last replayed record sequence per epoch slot, persisted by the sync
    pub(crate) replayed_seq: [u64; EPOCH_SLOTS],
    pub(crate) suspend_count: u32,
    pub(crate) suspending: bool,
    pub(crate) destroy_epoch: Epoch,
    pub(crate) keep_first: bool,
    /// Sticky write error, consumed by the next commit
    pub(crate) log_error: bool,
    pub(crate) dirty_max_epoch: Epoch,
    pub(crate) synced_epoch: Epoch,
    pub(crate) closed: bool,
}

impl Inner {
    pub(crate) fn alloc_lwb_id(&mut self) -> u64 {
        self.next_lwb_id += 1;
        self.next_lwb_id
    }

    pub(crate) fn lwb_mut(&mut self, id: u64) -> Option<&mut Lwb> {
        self.chain.iter_mut().find(|lwb| lwb.id == id)
    }
}

/// A write handed to the block store and not yet waited for.
pub(crate) struct InFlight {
    pub(crate) lwb_id: u64,
    pub(crate) handle: IoHandle,
    pub(crate) hold: EpochHold,
}

/// State owned by the batch writer.
pub(crate) struct Writer {
    pub(crate) rotor: SizeRotor,
    pub(crate) flush_set: SmallVec<[DeviceId; 4]>,
    pub(crate) in_flight: Vec<InFlight>,
    /// On-disk record sequence of the chain
    pub(crate) lr_seq: u64,
}

impl Writer {
    pub(crate) fn touch(&mut self, device: DeviceId) {
        if !self.flush_set.contains(&device) {
            self.flush_set.push(device);
        }
    }
}

/// Intent log of one dataset.
pub struct Zilog {
    pub(crate) config: ZilConfig,
    pub(crate) objset_id: u64,
    pub(crate) header: SharedHeader,
    pub(crate) store: Arc<dyn BlockStore>,
    pub(crate) epochs: Arc<dyn EpochManager>,
    pub(crate) get_data: Arc<dyn GetData>,
    pub(crate) inner: Mutex<Inner>,
    pub(crate) suspend_cv: Condvar,
    pub(crate) writer: Mutex<Writer>,
    pub(crate) group: GroupCommit,
    pub(crate) stats: ZilStats,
    callback: Mutex<Option<CallbackId>>,
}

impl Zilog {
    /// Open the log of dataset `objset_id` whose persisted header is `header`.
    ///
    /// Registers the per-epoch sync callback with `epochs`. The callback holds a
    /// weak reference, so dropping every `Arc<Zilog>` detaches the log even
    /// without `close`.
    pub fn open(
        config: ZilConfig,
        objset_id: u64,
        header: SharedHeader,
        store: Arc<dyn BlockStore>,
        epochs: Arc<dyn EpochManager>,
        get_data: Arc<dyn GetData>,
    ) -> Result<Arc<Zilog>> {
        config.validate()?;
        let snapshot = *header.lock();
        let inner = Inner {
            synced_epoch: epochs.last_synced_epoch(),
            ..Inner::default()
        };
        let zilog = Arc::new(Zilog {
            writer: Mutex::new(Writer {
                rotor: SizeRotor::new(&config),
                flush_set: SmallVec::new(),
                in_flight: Vec::new(),
                lr_seq: 0,
            }),
            config,
            objset_id,
            header,
            store,
            epochs,
            get_data,
            inner: Mutex::new(inner),
            suspend_cv: Condvar::new(),
            group: GroupCommit::new(),
            stats: ZilStats::default(),
            callback: Mutex::new(None),
        });

        let weak = Arc::downgrade(&zilog);
        let id = zilog.epochs.register_sync_callback(Box::new(move |epoch| {
            if let Some(zilog) = weak.upgrade() {
                zilog.sync(epoch);
            }
        }));
        *zilog.callback.lock() = Some(id);

        debug!(
            objset = objset_id,
            head = %snapshot.head,
            replay_needed = snapshot.replay_needed(),
            "intent log opened"
        );
        Ok(zilog)
    }

    /// Queue a record. Returns its sequence number; never blocks on I/O.
    pub fn submit(&self, mut itx: Itx) -> Result<u64> {
        if self.config.sync == SyncPolicy::Always {
            itx.sync = true;
        }
        match &itx.body {
            ItxBody::Record(record) => {
                let max = self.config.max_copied_data();
                if record.payload.len() > max {
                    return Err(Error::RecordTooLarge {
                        size: record.payload.len(),
                        max,
                    });
                }
            }
            ItxBody::Deferred { write, state, .. } => {
                if write.length == 0 {
                    return Err(Error::InvalidRecord(format!(
                        "empty {:?} write to object {}",
                        state, write.file_id
                    )));
                }
            }
        }

        let bytes = match &itx.body {
            ItxBody::Record(record) if record.tx_type() == Some(TxType::Write) => {
                record.payload.len() as u64
            }
            ItxBody::Deferred { write, .. } => write.length,
            ItxBody::Record(_) => 0,
        };
        match itx.write_state() {
            Some(WriteState::Copied) => {
                ZilStats::bump(&self.stats.itx_copied_count);
                ZilStats::add(&self.stats.itx_copied_bytes, bytes);
            }
            Some(WriteState::NeedCopy) => {
                ZilStats::bump(&self.stats.itx_needcopy_count);
                ZilStats::add(&self.stats.itx_needcopy_bytes, bytes);
            }
            Some(WriteState::Indirect) => {
                ZilStats::bump(&self.stats.itx_indirect_count);
                ZilStats::add(&self.stats.itx_indirect_bytes, bytes);
            }
            None => {}
        }
        ZilStats::bump(&self.stats.itx_count);

        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Closed);
        }
        inner.itx_seq += 1;
        itx.seq = inner.itx_seq;
        inner.dirty_max_epoch = inner.dirty_max_epoch.max(itx.epoch);
        let seq = itx.seq;
        inner.pending.push_back(itx);
        Ok(seq)
    }

    /// Make everything durable and detach from the epoch manager.
    ///
    /// The open tail block stays referenced by the header and becomes the append
    /// point of the next `open`.
    pub fn close(&self) -> Result<()> {
        if self.inner.lock().closed {
            return Ok(());
        }
        self.commit(u64::MAX, 0);

        let writer = self.writer.lock();
        let wait_for = {
            let inner = self.inner.lock();
            let lwb_max = inner
                .chain
                .iter()
                .filter(|lwb| lwb.state != LwbState::Opened)
                .map(|lwb| lwb.max_epoch)
                .max()
                .unwrap_or(0);
            inner
                .dirty_max_epoch
                .max(lwb_max)
                .max(inner.destroy_epoch)
        };
        if wait_for > 0 {
            self.epochs.wait_until_synced(wait_for);
        }

        {
            let mut inner = self.inner.lock();
            debug_assert!(inner
                .chain
                .iter()
                .all(|lwb| lwb.state == LwbState::Opened));
            inner.chain.clear();
            inner.pending.clear();
            inner.closed = true;
        }
        drop(writer);

        self.detach();
        info!(objset = self.objset_id, "intent log closed");
        Ok(())
    }

    /// Stop receiving sync callbacks.
    pub(crate) fn detach(&self) {
        if let Some(id) = self.callback.lock().take() {
            self.epochs.unregister_sync_callback(id);
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Highest itx sequence known durable
    pub fn commit_seq(&self) -> u64 {
        self.group.durable()
    }

    /// Highest itx sequence assigned
    pub fn itx_seq(&self) -> u64 {
        self.inner.lock().itx_seq
    }

    /// Number of itxs waiting for a commit or a checkpoint
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Copy of the current header
    pub fn header(&self) -> LogHeader {
        *self.header.lock()
    }

    /// Configuration the log was opened with
    pub fn config(&self) -> &ZilConfig {
        &self.config
    }

    /// Counter snapshot
    pub fn stats(&self) -> ZilStatsSnapshot {
        self.stats.snapshot()
    }

    /// True while `replay` runs
    pub fn is_replaying(&self) -> bool {
        self.inner.lock().replaying
    }

    /// Sequence of the record being replayed
    pub fn replaying_seq(&self) -> u64 {
        self.inner.lock().replaying_seq
    }

    /// True once `close` finished
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Blocks in the in-memory chain
    pub fn chain_len(&self) -> usize {
        self.inner.lock().chain.len()
    }
}

impl std::fmt::Debug for Zilog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Zilog")
            .field("objset_id", &self.objset_id)
            .field("itx_seq", &inner.itx_seq)
            .field("commit_seq", &self.group.durable())
            .field("pending", &inner.pending.len())
            .field("chain", &inner.chain.len())
            .finish()
    }
}
