//! Builder for opening or importing an intent log.
//!
//! Collects the configuration and the dataset identity, then either opens the
//! log on a header as found ([`IntentLogBuilder::open`]) or claims a header left
//! by a previous run first ([`IntentLogBuilder::import`]).

use intentlog_core::header::shared;
use intentlog_core::{LogHeader, Result, SharedHeader, SyncPolicy, ZilConfig};
use intentlog_engine::{claim, ClaimOutcome, GetData, Zilog};
use intentlog_storage::{BlockStore, EpochManager};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Builder for an intent log.
///
/// # Example
///
/// ```
/// use intentlog::prelude::*;
/// use std::sync::Arc;
///
/// let store = Arc::new(MemBlockStore::new());
/// let epochs = Arc::new(MemEpochManager::new());
/// let no_data = |_: FetchToken, _: &mut WriteRecord, _: Option<&mut [u8]>| {
///     Err::<(), _>(GetDataError::Gone)
/// };
///
/// let zilog = IntentLog::builder()
///     .small_blocks()
///     .objset(3)
///     .open(store, epochs, Arc::new(no_data))?;
/// assert_eq!(zilog.config().min_block_size, 1024);
/// # Ok::<(), intentlog::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct IntentLogBuilder {
    config: ZilConfig,
    objset_id: u64,
    header: Option<SharedHeader>,
}

impl IntentLogBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        IntentLogBuilder {
            config: ZilConfig::default(),
            objset_id: 0,
            header: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ZilConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the configuration from a TOML file.
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.config = ZilConfig::load(path.as_ref())?;
        Ok(self)
    }

    /// Small blocks, for tests and small datasets.
    pub fn small_blocks(mut self) -> Self {
        self.config = ZilConfig::small_blocks();
        self
    }

    /// Large blocks without per-batch cache flushes.
    pub fn throughput(mut self) -> Self {
        self.config = ZilConfig::throughput();
        self
    }

    /// Set the synchronous write policy.
    pub fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.config.sync = policy;
        self
    }

    /// Discard claimed records instead of replaying them.
    pub fn replay_disabled(mut self) -> Self {
        self.config.replay_disabled = true;
        self
    }

    /// Identity of the dataset the log belongs to (mixed into chain seeds).
    pub fn objset(mut self, objset_id: u64) -> Self {
        self.objset_id = objset_id;
        self
    }

    /// Use an existing persisted header. Without one, the log starts empty.
    pub fn header(mut self, header: SharedHeader) -> Self {
        self.header = Some(header);
        self
    }

    /// Open the log on the header as it is.
    pub fn open(
        self,
        store: Arc<dyn BlockStore>,
        epochs: Arc<dyn EpochManager>,
        get_data: Arc<dyn GetData>,
    ) -> Result<Arc<Zilog>> {
        let header = self
            .header
            .unwrap_or_else(|| shared(LogHeader::default()));
        Zilog::open(self.config, self.objset_id, header, store, epochs, get_data)
    }

    /// Claim the header's chain in the epoch manager's current epoch, then open
    /// the log on it. Call [`Zilog::replay`] next.
    pub fn import(
        self,
        store: Arc<dyn BlockStore>,
        epochs: Arc<dyn EpochManager>,
        get_data: Arc<dyn GetData>,
    ) -> Result<(Arc<Zilog>, ClaimOutcome)> {
        let header = self
            .header
            .clone()
            .unwrap_or_else(|| shared(LogHeader::default()));
        let outcome = {
            let mut guard = header.lock();
            claim(&*store, &mut guard, epochs.current_epoch())?
        };
        if outcome.claimed {
            info!(
                objset = self.objset_id,
                blocks = outcome.blocks,
                records = outcome.records,
                "log imported"
            );
        }
        let zilog = Zilog::open(self.config, self.objset_id, header, store, epochs, get_data)?;
        Ok((zilog, outcome))
    }
}

impl Default for IntentLogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point of the facade.
pub struct IntentLog;

impl IntentLog {
    /// Create a builder.
    pub fn builder() -> IntentLogBuilder {
        IntentLogBuilder::new()
    }
}
