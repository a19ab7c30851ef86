//! Pending log records
//!
//! An [`Itx`] is what producers hand to [`Zilog::submit`](crate::Zilog::submit).
//! It stays in the pending queue until a commit batch copies it into a log
//! block, or until the checkpoint that covers its epoch makes it redundant.
//!
//! Write itxs come in three flavors (see [`WriteState`]). For `NeedCopy` and
//! `Indirect` the log calls back into the producer through [`GetData`] while it
//! builds the block.

use intentlog_core::{
    align8, Epoch, GetDataError, LogRecord, TxType, WriteRecord, WriteState, LR_HEADER_SIZE,
    WRITE_RECORD_FIXED,
};

/// Opaque producer cookie passed back to [`GetData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FetchToken(pub u64);

/// Producer callback that supplies write data at block-build time.
///
/// For `NeedCopy` itxs `buf` is `Some` and sized to `record.length`; the
/// callback copies the bytes at `(record.offset, record.length)` into it. For
/// `Indirect` itxs `buf` is `None` and the callback must set `record.block_ref`
/// to a content-checksummed block holding the data.
pub trait GetData: Send + Sync {
    /// Fill in the data of one write record.
    fn get_data(
        &self,
        token: FetchToken,
        record: &mut WriteRecord,
        buf: Option<&mut [u8]>,
    ) -> Result<(), GetDataError>;
}

impl<F> GetData for F
where
    F: Fn(FetchToken, &mut WriteRecord, Option<&mut [u8]>) -> Result<(), GetDataError>
        + Send
        + Sync,
{
    fn get_data(
        &self,
        token: FetchToken,
        record: &mut WriteRecord,
        buf: Option<&mut [u8]>,
    ) -> Result<(), GetDataError> {
        self(token, record, buf)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ItxBody {
    /// Fully formed record (non-write types and copied writes)
    Record(LogRecord),
    /// Write whose data is fetched at block-build time
    Deferred {
        write: WriteRecord,
        state: WriteState,
        token: FetchToken,
    },
}

/// In-memory pending log record.
#[derive(Debug, Clone)]
pub struct Itx {
    pub(crate) body: ItxBody,
    pub(crate) epoch: Epoch,
    pub(crate) file_id: u64,
    pub(crate) sync: bool,
    pub(crate) seq: u64,
}

impl Itx {
    /// Record of any type with a pre-encoded payload.
    pub fn new(txtype: TxType, epoch: Epoch, file_id: u64, payload: Vec<u8>) -> Self {
        Itx {
            body: ItxBody::Record(LogRecord::new(txtype, epoch, payload)),
            epoch,
            file_id,
            sync: false,
            seq: 0,
        }
    }

    /// Write record. `Copied` writes must carry their data; the other states
    /// fetch it through [`GetData`] with `token`.
    pub fn write(record: WriteRecord, epoch: Epoch, state: WriteState, token: FetchToken) -> Self {
        let file_id = record.file_id;
        let body = match state {
            WriteState::Copied => ItxBody::Record(record.into_log_record(epoch)),
            WriteState::NeedCopy | WriteState::Indirect => ItxBody::Deferred {
                write: WriteRecord {
                    data: Vec::new(),
                    ..record
                },
                state,
                token,
            },
        };
        Itx {
            body,
            epoch,
            file_id,
            sync: false,
            seq: 0,
        }
    }

    /// Mark the operation synchronous (or not).
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Sequence assigned at submission (0 before)
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Epoch the logged operation belongs to
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Object the operation applies to
    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    /// True if the operation must be durable before `commit` returns
    pub fn is_sync(&self) -> bool {
        self.sync
    }

    /// Raw transaction type
    pub fn txtype(&self) -> u32 {
        match &self.body {
            ItxBody::Record(record) => record.txtype,
            ItxBody::Deferred { .. } => TxType::Write.as_u32(),
        }
    }

    /// How the data of a write reaches the log (`None` for other records)
    pub fn write_state(&self) -> Option<WriteState> {
        match &self.body {
            ItxBody::Record(record) if record.tx_type() == Some(TxType::Write) => {
                Some(WriteState::Copied)
            }
            ItxBody::Record(_) => None,
            ItxBody::Deferred { state, .. } => Some(*state),
        }
    }

    /// Bytes this itx is expected to take in log blocks.
    pub(crate) fn estimated_len(&self) -> usize {
        match &self.body {
            ItxBody::Record(record) => record.encoded_len(),
            ItxBody::Deferred {
                write,
                state: WriteState::NeedCopy,
                ..
            } => LR_HEADER_SIZE + WRITE_RECORD_FIXED + align8(write.length as usize),
            ItxBody::Deferred { .. } => LR_HEADER_SIZE + WRITE_RECORD_FIXED,
        }
    }
}
