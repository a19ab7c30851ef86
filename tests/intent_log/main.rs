//! Intent Log Integration Test Suite
//!
//! End-to-end scenarios through the public facade: a fake dataset produces
//! writes, the log makes them durable, and a simulated crash followed by an
//! import and replay must bring the dataset back to what was committed.
//!
//! ## Key Verification Points
//!
//! 1. A committed write survives a crash, through the chain or the checkpoint
//! 2. Blocks are freed only after the epoch covering their records syncs
//! 3. Claim, replay and destroy leave no block allocated and none freed twice
//! 4. Concurrent committers share block writes
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all intent log tests
//! cargo test --test intent_log
//!
//! # Run replay tests only
//! cargo test --test intent_log replay::
//! ```

use intentlog::prelude::*;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

// Test modules
pub mod alloc_failure;
pub mod basic;
pub mod config;
pub mod group_commit;
pub mod replay;

// =============================================================================
// SHARED TEST UTILITIES
// =============================================================================

/// Dataset identity used by every harness
pub const OBJSET: u64 = 21;

/// File contents by object id
pub type Files = FxHashMap<u64, Vec<u8>>;

struct DirtyWrite {
    epoch: Epoch,
    file_id: u64,
    offset: u64,
    data: Vec<u8>,
}

#[derive(Default)]
struct FileState {
    /// Contents as seen by readers, including unsynced changes
    live: Files,
    /// Changes waiting for their epoch to sync, in write order
    dirty: Vec<DirtyWrite>,
    /// Contents as of the last synced epoch
    durable: Files,
}

impl FileState {
    fn sync(&mut self, epoch: Epoch) {
        let (done, still_dirty): (Vec<_>, Vec<_>) =
            self.dirty.drain(..).partition(|w| w.epoch <= epoch);
        self.dirty = still_dirty;
        for w in done {
            apply(&mut self.durable, w.file_id, w.offset, &w.data);
        }
    }
}

fn apply(files: &mut Files, file_id: u64, offset: u64, data: &[u8]) {
    let file = files.entry(file_id).or_default();
    let end = offset as usize + data.len();
    if file.len() < end {
        file.resize(end, 0);
    }
    file[offset as usize..end].copy_from_slice(data);
}

/// Fake filesystem on top of the epoch manager.
///
/// Writes are visible at once and become durable when the epoch they were
/// made in syncs. It also serves as the log's data producer and as the
/// target of replayed writes.
pub struct MemDataset {
    store: Arc<MemBlockStore>,
    epochs: Arc<MemEpochManager>,
    state: Arc<Mutex<FileState>>,
}

impl MemDataset {
    /// Empty dataset whose durability follows `epochs`.
    pub fn new(store: Arc<MemBlockStore>, epochs: Arc<MemEpochManager>) -> Arc<Self> {
        Self::with_files(store, epochs, Files::default())
    }

    fn with_files(
        store: Arc<MemBlockStore>,
        epochs: Arc<MemEpochManager>,
        files: Files,
    ) -> Arc<Self> {
        let state = Arc::new(Mutex::new(FileState {
            live: files.clone(),
            dirty: Vec::new(),
            durable: files,
        }));
        let synced = Arc::clone(&state);
        epochs.register_sync_callback(Box::new(move |epoch| synced.lock().sync(epoch)));
        Arc::new(MemDataset {
            store,
            epochs,
            state,
        })
    }

    /// Write `data` and log it as a synchronous write. Returns the itx sequence.
    pub fn write(
        &self,
        zilog: &Zilog,
        file_id: u64,
        offset: u64,
        data: &[u8],
        how: WriteState,
    ) -> u64 {
        let hold = self.epochs.hold_epoch_open();
        let epoch = hold.epoch();
        {
            let mut state = self.state.lock();
            apply(&mut state.live, file_id, offset, data);
            state.dirty.push(DirtyWrite {
                epoch,
                file_id,
                offset,
                data: data.to_vec(),
            });
        }
        let record = match how {
            WriteState::Copied => WriteRecord::inline(file_id, offset, data.to_vec()),
            _ => WriteRecord::deferred(file_id, offset, data.len() as u64),
        };
        let itx = Itx::write(record, epoch, how, FetchToken(file_id)).with_sync(true);
        let seq = zilog.submit(itx);
        self.epochs.release_to_quiesce(hold);
        seq.unwrap()
    }

    /// Current contents of every file
    pub fn files(&self) -> Files {
        self.state.lock().live.clone()
    }

    /// Contents of every file as of the last synced epoch
    pub fn durable_files(&self) -> Files {
        self.state.lock().durable.clone()
    }

    /// Replay table that applies logged writes to this dataset.
    pub fn replay_table(self: &Arc<Self>) -> ReplayTable {
        let target = Arc::clone(self);
        ReplayTable::new().with(TxType::Write, move |record, epoch| {
            let write = WriteRecord::decode(&record.payload).map_err(|e| e.to_string())?;
            let mut state = target.state.lock();
            apply(&mut state.live, write.file_id, write.offset, &write.data);
            state.dirty.push(DirtyWrite {
                epoch,
                file_id: write.file_id,
                offset: write.offset,
                data: write.data,
            });
            Ok(())
        })
    }

    fn read(&self, file_id: u64, offset: u64, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        let mut out = vec![0u8; len];
        if let Some(file) = state.live.get(&file_id) {
            let start = (offset as usize).min(file.len());
            let end = (offset as usize + len).min(file.len());
            out[..end - start].copy_from_slice(&file[start..end]);
        }
        out
    }
}

impl GetData for MemDataset {
    fn get_data(
        &self,
        token: FetchToken,
        record: &mut WriteRecord,
        buf: Option<&mut [u8]>,
    ) -> std::result::Result<(), GetDataError> {
        let data = self.read(token.0, record.offset, record.length as usize);
        match buf {
            Some(buf) => buf.copy_from_slice(&data),
            None => {
                let mut block = self
                    .store
                    .alloc(self.epochs.current_epoch(), data.len() as u32, None)
                    .map_err(|e| GetDataError::Io(e.to_string()))?;
                block.seal_content(&data);
                self.store
                    .write_async(&block, data)
                    .wait()
                    .map_err(|e| GetDataError::Io(e.to_string()))?;
                record.block_ref = block;
            }
        }
        Ok(())
    }
}

/// One dataset with its log, store and epoch manager.
pub struct Harness {
    pub config: ZilConfig,
    pub store: Arc<MemBlockStore>,
    pub epochs: Arc<MemEpochManager>,
    pub header: SharedHeader,
    pub dataset: Arc<MemDataset>,
    pub zilog: Arc<Zilog>,
    /// Header as of the last synced epoch
    durable_header: Arc<Mutex<LogHeader>>,
}

/// Copy `header` into the returned slot every time an epoch syncs.
///
/// Register after the log is open, so the copy is taken once the log's own
/// callback has applied the epoch.
fn track_durable_header(
    epochs: &MemEpochManager,
    header: &SharedHeader,
    initial: LogHeader,
) -> Arc<Mutex<LogHeader>> {
    let durable = Arc::new(Mutex::new(initial));
    let (snapshot, live) = (Arc::clone(&durable), header.clone());
    epochs.register_sync_callback(Box::new(move |_| *snapshot.lock() = *live.lock()));
    durable
}

impl Harness {
    /// Fresh pool, empty dataset, empty log
    pub fn new(config: ZilConfig) -> Harness {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let store = Arc::new(MemBlockStore::new());
        let epochs = Arc::new(MemEpochManager::new());
        let dataset = MemDataset::new(Arc::clone(&store), Arc::clone(&epochs));
        let header = shared(LogHeader::default());
        let zilog = IntentLog::builder()
            .config(config.clone())
            .objset(OBJSET)
            .header(header.clone())
            .open(store.clone(), epochs.clone(), dataset.clone())
            .expect("open log");
        let durable_header = track_durable_header(&epochs, &header, LogHeader::default());
        Harness {
            config,
            store,
            epochs,
            header,
            dataset,
            zilog,
            durable_header,
        }
    }

    /// Create the chain and move past its epoch, so that later commits go
    /// straight to log blocks.
    pub fn warm_up(&self) {
        let itx = Itx::new(TxType::Create, self.epochs.current_epoch(), 0, b"root".to_vec());
        let seq = self.zilog.submit(itx.with_sync(true)).unwrap();
        self.zilog.commit(seq, 0);
        self.epochs.sync_now();
    }

    /// Synchronous copied write to `file_id`
    pub fn write(&self, file_id: u64, offset: u64, data: &[u8]) -> u64 {
        self.dataset
            .write(&self.zilog, file_id, offset, data, WriteState::Copied)
    }

    /// Synchronous write in the given state
    pub fn write_as(&self, file_id: u64, offset: u64, data: &[u8], how: WriteState) -> u64 {
        self.dataset.write(&self.zilog, file_id, offset, data, how)
    }

    /// Lose power. The pool keeps what reached a synced epoch.
    pub fn crash(self) -> Crashed {
        let last_synced = self.epochs.last_synced_epoch();
        let header = *self.durable_header.lock();
        let files = self.dataset.durable_files();
        // Never closed: the log and its callbacks die with the old epoch manager.
        self.store.simulate_crash(last_synced);
        Crashed {
            config: self.config,
            store: self.store,
            last_synced,
            header,
            files,
        }
    }
}

/// What is left of a pool after a crash
pub struct Crashed {
    pub config: ZilConfig,
    pub store: Arc<MemBlockStore>,
    pub last_synced: Epoch,
    pub header: LogHeader,
    pub files: Files,
}

impl Crashed {
    /// Import the pool: claim the log and open it. Replay is left to the caller.
    pub fn import(self) -> (Harness, ClaimOutcome) {
        let config = self.config.clone();
        self.import_with(config)
    }

    /// Import with a different configuration.
    pub fn import_with(self, config: ZilConfig) -> (Harness, ClaimOutcome) {
        let epochs = Arc::new(MemEpochManager::starting_at(self.last_synced));
        let dataset =
            MemDataset::with_files(Arc::clone(&self.store), Arc::clone(&epochs), self.files);
        let header = shared(self.header);
        let (zilog, outcome) = IntentLog::builder()
            .config(config.clone())
            .objset(OBJSET)
            .header(header.clone())
            .import(self.store.clone(), epochs.clone(), dataset.clone())
            .expect("import log");
        // The claim reaches disk with the import's first epoch.
        let durable_header = track_durable_header(&epochs, &header, self.header);
        let harness = Harness {
            config,
            store: self.store,
            epochs,
            header,
            dataset,
            zilog,
            durable_header,
        };
        (harness, outcome)
    }
}

/// Deterministic test data of length `len`
pub fn data(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// Expected file contents after applying `writes` in order
pub fn expected(writes: &[(u64, u64, Vec<u8>)]) -> Files {
    let mut files = Files::default();
    for (file_id, offset, data) in writes {
        apply(&mut files, *file_id, *offset, data);
    }
    files
}
