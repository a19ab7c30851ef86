//! Shared fixture for the engine's unit tests.

use crate::itx::{FetchToken, GetData, Itx};
use crate::lifecycle::claim;
use crate::zilog::Zilog;
use intentlog_core::header::shared;
use intentlog_core::{
    BlockRef, ChainSeed, Epoch, GetDataError, LogHeader, LogRecord, SharedHeader, TxType,
    WriteRecord, WriteState, ZilConfig,
};
use intentlog_durability::{encode, ChainWalk};
use intentlog_storage::{BlockStore, EpochManager, MemBlockStore, MemEpochManager};
use parking_lot::Mutex;
use std::sync::Arc;

pub(crate) const OBJSET: u64 = 54;

/// Epoch in which hand-built chains are written.
const RAW_EPOCH: Epoch = 5;

/// Producer whose object contents are a function of the offset.
struct PatternSource {
    store: Arc<MemBlockStore>,
    epochs: Arc<MemEpochManager>,
}

impl GetData for PatternSource {
    fn get_data(
        &self,
        _token: FetchToken,
        record: &mut WriteRecord,
        buf: Option<&mut [u8]>,
    ) -> Result<(), GetDataError> {
        let data = Fixture::pattern(record.offset, record.length as usize);
        match buf {
            Some(buf) => buf.copy_from_slice(&data),
            None => {
                record.block_ref =
                    Fixture::write_data_block(&self.store, self.epochs.current_epoch(), &data);
            }
        }
        Ok(())
    }
}

pub(crate) struct Fixture {
    pub(crate) config: ZilConfig,
    pub(crate) store: Arc<MemBlockStore>,
    pub(crate) epochs: Arc<MemEpochManager>,
    pub(crate) header: SharedHeader,
    pub(crate) zilog: Arc<Zilog>,
    /// Header as of the last synced epoch
    durable_header: Arc<Mutex<LogHeader>>,
}

impl Fixture {
    pub(crate) fn new(config: ZilConfig) -> Fixture {
        Self::open_with(
            config,
            Arc::new(MemBlockStore::new()),
            Arc::new(MemEpochManager::new()),
            shared(LogHeader::default()),
            LogHeader::default(),
        )
    }

    /// Open a log on `header`; `durable` is what a crash before the next
    /// sync leaves of it.
    fn open_with(
        config: ZilConfig,
        store: Arc<MemBlockStore>,
        epochs: Arc<MemEpochManager>,
        header: SharedHeader,
        durable: LogHeader,
    ) -> Fixture {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let source = Arc::new(PatternSource {
            store: Arc::clone(&store),
            epochs: Arc::clone(&epochs),
        });
        let zilog = Zilog::open(
            config.clone(),
            OBJSET,
            header.clone(),
            store.clone(),
            epochs.clone(),
            source,
        )
        .unwrap();

        // Registered after the log's own callback, so it sees the header
        // that epoch leaves behind.
        let durable_header = Arc::new(Mutex::new(durable));
        let (snapshot, live) = (Arc::clone(&durable_header), header.clone());
        epochs.register_sync_callback(Box::new(move |_| *snapshot.lock() = *live.lock()));

        Fixture {
            config,
            store,
            epochs,
            header,
            zilog,
            durable_header,
        }
    }

    /// Contents of every object at `offset..offset + len`.
    pub(crate) fn pattern(offset: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| ((offset + i) % 251) as u8)
            .collect()
    }

    pub(crate) fn write_data_block(store: &MemBlockStore, epoch: Epoch, data: &[u8]) -> BlockRef {
        let mut block = store.alloc(epoch, data.len() as u32, None).unwrap();
        block.seal_content(data);
        store.write_async(&block, data.to_vec()).wait().unwrap();
        block
    }

    /// Create the chain so later commits measure only their own blocks.
    pub(crate) fn warm_up(&self) {
        let seq = self.submit_record(0, b"warm-up");
        self.zilog.commit(seq, 0);
    }

    pub(crate) fn submit_record(&self, file_id: u64, payload: &[u8]) -> u64 {
        self.submit_record_to(&self.zilog, file_id, payload)
    }

    pub(crate) fn submit_record_to(&self, zilog: &Zilog, file_id: u64, payload: &[u8]) -> u64 {
        let itx = Itx::new(
            TxType::Create,
            self.epochs.current_epoch(),
            file_id,
            payload.to_vec(),
        );
        zilog.submit(itx.with_sync(true)).unwrap()
    }

    pub(crate) fn submit_async_record(&self, file_id: u64, payload: &[u8]) -> u64 {
        let itx = Itx::new(
            TxType::Create,
            self.epochs.current_epoch(),
            file_id,
            payload.to_vec(),
        );
        self.zilog.submit(itx).unwrap()
    }

    pub(crate) fn submit_write(&self, file_id: u64, offset: u64, data: &[u8]) -> u64 {
        let itx = Itx::write(
            WriteRecord::inline(file_id, offset, data.to_vec()),
            self.epochs.current_epoch(),
            WriteState::Copied,
            FetchToken::default(),
        );
        self.zilog.submit(itx.with_sync(true)).unwrap()
    }

    pub(crate) fn submit_needcopy(&self, file_id: u64, offset: u64, len: usize) -> u64 {
        self.submit_deferred(file_id, offset, len, WriteState::NeedCopy)
    }

    pub(crate) fn submit_indirect(&self, file_id: u64, offset: u64, len: usize) -> u64 {
        self.submit_deferred(file_id, offset, len, WriteState::Indirect)
    }

    fn submit_deferred(&self, file_id: u64, offset: u64, len: usize, state: WriteState) -> u64 {
        let itx = Itx::write(
            WriteRecord::deferred(file_id, offset, len as u64),
            self.epochs.current_epoch(),
            state,
            FetchToken(file_id),
        );
        self.zilog.submit(itx.with_sync(true)).unwrap()
    }

    /// Write records reachable from the current header, in chain order.
    pub(crate) fn logged_writes(&self) -> Vec<WriteRecord> {
        let head = self.header.lock().head;
        ChainWalk::unbounded(&*self.store, head)
            .flat_map(|block| block.unwrap().records)
            .filter(|record| record.tx_type() == Some(TxType::Write))
            .map(|record| WriteRecord::decode(&record.payload).unwrap())
            .collect()
    }

    /// Open a second log on the same header, store and epochs.
    pub(crate) fn reopen(&self) -> Arc<Zilog> {
        let source = Arc::new(PatternSource {
            store: Arc::clone(&self.store),
            epochs: Arc::clone(&self.epochs),
        });
        Zilog::open(
            self.config.clone(),
            OBJSET,
            self.header.clone(),
            self.store.clone(),
            self.epochs.clone(),
            source,
        )
        .unwrap()
    }

    /// Lose everything after the last synced epoch. Returns the durable header.
    pub(crate) fn crash(&self) -> LogHeader {
        self.zilog.detach();
        self.store.simulate_crash(self.epochs.last_synced_epoch());
        *self.durable_header.lock()
    }

    /// Crash, then import: claim the chain and open a fresh log on it.
    pub(crate) fn crash_and_import(&self) -> Fixture {
        self.crash_and_import_with(self.config.clone())
    }

    pub(crate) fn crash_and_import_with(&self, config: ZilConfig) -> Fixture {
        let durable = self.crash();
        let epochs = Arc::new(MemEpochManager::starting_at(
            self.epochs.last_synced_epoch(),
        ));
        let mut header = durable;
        claim(&*self.store, &mut header, epochs.current_epoch()).unwrap();
        Self::open_with(
            config,
            Arc::clone(&self.store),
            epochs,
            shared(header),
            durable,
        )
    }

    /// Claimed, imported log over a single hand-built block holding the
    /// records returned by `build`. Records are stamped with the import's
    /// first epoch so replay applies them.
    pub(crate) fn imported_chain<F>(config: ZilConfig, build: F) -> Fixture
    where
        F: FnOnce(&MemBlockStore, Epoch) -> Vec<LogRecord>,
    {
        let store = Arc::new(MemBlockStore::new());
        let epochs = Arc::new(MemEpochManager::starting_at(RAW_EPOCH - 1));
        let head = store
            .alloc(RAW_EPOCH - 1, config.min_block_size, None)
            .unwrap()
            .with_seed(ChainSeed::generate(OBJSET));
        let tail = store
            .alloc(RAW_EPOCH, config.min_block_size, Some(&head))
            .unwrap()
            .with_seed(head.seed().successor());

        let mut records = build(&store, RAW_EPOCH);
        for (i, record) in records.iter_mut().enumerate() {
            record.seq = i as u64 + 1;
        }
        let bytes = encode(&records, head.size as usize, &head, &tail).unwrap();
        store.write_async(&head, bytes).wait().unwrap();

        let durable = LogHeader {
            head,
            ..LogHeader::default()
        };
        let mut header = durable;
        claim(&*store, &mut header, epochs.current_epoch()).unwrap();
        Self::open_with(config, store, epochs, shared(header), durable)
    }
}
