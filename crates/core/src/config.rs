//! Intent log configuration
//!
//! [`ZilConfig`] carries the tunables of one open log. It deserializes from TOML
//! with every field optional:
//!
//! ```toml
//! min_block_size = 4096
//! max_block_size = 131072
//! sync = "standard"
//! no_cache_flush = false
//! ```

use crate::error::{Error, Result};
use crate::record::{LR_HEADER_SIZE, WRITE_RECORD_FIXED};
use crate::types::TRAILER_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Synchronous write policy of a dataset.
///
/// | Policy | Behavior |
/// |--------|----------|
/// | Standard | Only operations marked synchronous (or committed explicitly) hit the log |
/// | Always | Every submitted record is treated as synchronous |
/// | Disabled | `commit` returns immediately; durability comes from checkpoints only |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Honor per-record synchronous flags
    #[default]
    Standard,
    /// Treat every record as synchronous
    Always,
    /// Never write log blocks
    Disabled,
}

/// Tunables of one intent log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZilConfig {
    /// Allocation granularity and size of a chain's first block
    pub min_block_size: u32,
    /// Largest log block ever allocated
    pub max_block_size: u32,
    /// Number of recent block sizes the size chooser remembers (power of two)
    pub prev_block_window: usize,
    /// Skip device cache flushes after block writes
    pub no_cache_flush: bool,
    /// Discard instead of replaying claimed logs
    pub replay_disabled: bool,
    /// Synchronous write policy
    pub sync: SyncPolicy,
}

impl Default for ZilConfig {
    fn default() -> Self {
        ZilConfig {
            min_block_size: 4096,
            max_block_size: 128 * 1024,
            prev_block_window: 8,
            no_cache_flush: false,
            replay_disabled: false,
            sync: SyncPolicy::Standard,
        }
    }
}

impl ZilConfig {
    /// Small blocks so that modest workloads span several log blocks
    pub fn small_blocks() -> Self {
        ZilConfig {
            min_block_size: 1024,
            max_block_size: 4096,
            prev_block_window: 2,
            ..Default::default()
        }
    }

    /// Large blocks, no per-batch cache flush
    pub fn throughput() -> Self {
        ZilConfig {
            min_block_size: 8192,
            max_block_size: 1024 * 1024,
            no_cache_flush: true,
            ..Default::default()
        }
    }

    /// Parse from a TOML document and validate.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ZilConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Check the invariants the commit engine relies on.
    pub fn validate(&self) -> Result<()> {
        let min_usable = (TRAILER_SIZE + LR_HEADER_SIZE + WRITE_RECORD_FIXED + 8) as u32;
        if self.min_block_size < min_usable {
            return Err(Error::Config(format!(
                "min_block_size {} is below {}",
                self.min_block_size, min_usable
            )));
        }
        if !self.min_block_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "min_block_size {} is not a power of two",
                self.min_block_size
            )));
        }
        if self.max_block_size < self.min_block_size {
            return Err(Error::Config(format!(
                "max_block_size {} is below min_block_size {}",
                self.max_block_size, self.min_block_size
            )));
        }
        if self.prev_block_window == 0 || !self.prev_block_window.is_power_of_two() {
            return Err(Error::Config(format!(
                "prev_block_window {} is not a power of two",
                self.prev_block_window
            )));
        }
        Ok(())
    }

    /// Largest record (header plus payload) that fits in one block.
    pub fn max_record_size(&self) -> usize {
        self.max_block_size as usize - TRAILER_SIZE
    }

    /// Largest payload of a record copied at submission.
    pub fn max_copied_data(&self) -> usize {
        self.max_record_size() - LR_HEADER_SIZE
    }

    /// Largest inline data chunk a single write record can carry.
    pub fn max_log_data(&self) -> usize {
        self.max_record_size() - LR_HEADER_SIZE - WRITE_RECORD_FIXED
    }
}
