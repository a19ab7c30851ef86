//! Log record framing
//!
//! Every record starts with a fixed [`LR_HEADER_SIZE`] byte header:
//!
//! ```text
//! +---------+---------+---------+---------+----------------------+
//! | txtype  | reclen  |   seq   |  epoch  | payload (reclen-24)  |
//! | u32 LE  | u32 LE  | u64 LE  | u64 LE  | padded to 8 bytes    |
//! +---------+---------+---------+---------+----------------------+
//! ```
//!
//! `reclen` covers header plus payload, without the alignment padding. Records
//! are packed back to back, each starting on an 8-byte boundary.

use crate::error::{Error, Result};
use crate::types::{BlockRef, Epoch, BLOCK_REF_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Size of the common record header.
pub const LR_HEADER_SIZE: usize = 24;

/// One past the highest defined transaction type.
pub const TX_MAX_TYPE: u32 = 21;

/// Fixed part of a write payload: file id, offset, length, block reference.
pub const WRITE_RECORD_FIXED: usize = 3 * 8 + BLOCK_REF_SIZE;

/// Round `len` up to the record alignment.
#[inline]
pub fn align8(len: usize) -> usize {
    (len + 7) & !7
}

/// Intent log transaction types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum TxType {
    /// Create file
    Create = 1,
    /// Make directory
    Mkdir = 2,
    /// Make extended attribute directory
    MkXattr = 3,
    /// Create symbolic link
    Symlink = 4,
    /// Remove file
    Remove = 5,
    /// Remove directory
    Rmdir = 6,
    /// Create hard link
    Link = 7,
    /// Rename
    Rename = 8,
    /// File write
    Write = 9,
    /// Truncate file
    Truncate = 10,
    /// Set attributes
    SetAttr = 11,
    /// Set ACL, old format
    AclV0 = 12,
    /// Set ACL
    Acl = 13,
    /// Create with ACL
    CreateAcl = 14,
    /// Create with attributes
    CreateAttr = 15,
    /// Create with ACL and attributes
    CreateAclAttr = 16,
    /// Mkdir with ACL
    MkdirAcl = 17,
    /// Mkdir with attributes
    MkdirAttr = 18,
    /// Mkdir with ACL and attributes
    MkdirAclAttr = 19,
    /// Write whose block was already synced by the checkpoint
    Write2 = 20,
}

impl TxType {
    /// Map a raw on-disk value to a transaction type.
    pub fn from_u32(raw: u32) -> Option<Self> {
        use TxType::*;
        let t = match raw {
            1 => Create,
            2 => Mkdir,
            3 => MkXattr,
            4 => Symlink,
            5 => Remove,
            6 => Rmdir,
            7 => Link,
            8 => Rename,
            9 => Write,
            10 => Truncate,
            11 => SetAttr,
            12 => AclV0,
            13 => Acl,
            14 => CreateAcl,
            15 => CreateAttr,
            16 => CreateAclAttr,
            17 => MkdirAcl,
            18 => MkdirAttr,
            19 => MkdirAclAttr,
            20 => Write2,
            _ => return None,
        };
        Some(t)
    }

    /// Raw on-disk value
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Types that may be logged out of order relative to other files.
    pub fn is_out_of_order(self) -> bool {
        matches!(
            self,
            TxType::Write
                | TxType::Truncate
                | TxType::SetAttr
                | TxType::AclV0
                | TxType::Acl
                | TxType::Write2
        )
    }

    /// True for the write record types.
    pub fn is_write(self) -> bool {
        matches!(self, TxType::Write | TxType::Write2)
    }
}

/// A single log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Raw transaction type (see [`TxType`])
    pub txtype: u32,
    /// Header plus payload length, without padding
    pub reclen: u32,
    /// Record sequence number within the chain
    pub seq: u64,
    /// Epoch in which the logged operation was performed
    pub epoch: Epoch,
    /// Type-specific payload
    pub payload: Vec<u8>,
}

impl LogRecord {
    /// Create a record; `seq` is assigned when the record is written into a block.
    pub fn new(txtype: TxType, epoch: Epoch, payload: Vec<u8>) -> Self {
        LogRecord {
            txtype: txtype.as_u32(),
            reclen: (LR_HEADER_SIZE + payload.len()) as u32,
            seq: 0,
            epoch,
            payload,
        }
    }

    /// Known transaction type, if any
    pub fn tx_type(&self) -> Option<TxType> {
        TxType::from_u32(self.txtype)
    }

    /// Bytes this record occupies in a block, including padding.
    pub fn encoded_len(&self) -> usize {
        align8(self.reclen as usize)
    }

    /// Append the encoded record to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + self.encoded_len(), 0);
        let buf = &mut out[start..];
        LittleEndian::write_u32(&mut buf[0..4], self.txtype);
        LittleEndian::write_u32(&mut buf[4..8], self.reclen);
        LittleEndian::write_u64(&mut buf[8..16], self.seq);
        LittleEndian::write_u64(&mut buf[16..24], self.epoch);
        buf[LR_HEADER_SIZE..LR_HEADER_SIZE + self.payload.len()].copy_from_slice(&self.payload);
    }

    /// Decode the records packed in a block body.
    ///
    /// Fails on any framing violation; callers treat that as the end of the
    /// trustworthy part of the chain.
    pub fn decode_all(body: &[u8]) -> Result<Vec<LogRecord>> {
        let mut records = Vec::new();
        let mut pos = 0;
        while pos < body.len() {
            let rest = &body[pos..];
            if rest.len() < LR_HEADER_SIZE {
                return Err(Error::Corruption(format!(
                    "truncated record header at {} ({} bytes left)",
                    pos,
                    rest.len()
                )));
            }
            let txtype = LittleEndian::read_u32(&rest[0..4]);
            let reclen = LittleEndian::read_u32(&rest[4..8]) as usize;
            if reclen < LR_HEADER_SIZE || align8(reclen) > rest.len() {
                return Err(Error::Corruption(format!(
                    "record at {} has bad length {} ({} bytes left)",
                    pos,
                    reclen,
                    rest.len()
                )));
            }
            records.push(LogRecord {
                txtype,
                reclen: reclen as u32,
                seq: LittleEndian::read_u64(&rest[8..16]),
                epoch: LittleEndian::read_u64(&rest[16..24]),
                payload: rest[LR_HEADER_SIZE..reclen].to_vec(),
            });
            pos += align8(reclen);
        }
        Ok(records)
    }
}

/// How a write record's data reaches the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteState {
    /// Data was copied into the record at submission
    Copied,
    /// Data is fetched through the producer callback while the block is built
    NeedCopy,
    /// Only a reference to an already-written data block is logged
    Indirect,
}

/// Payload of a [`TxType::Write`] record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteRecord {
    /// Object being written
    pub file_id: u64,
    /// Byte offset within the object
    pub offset: u64,
    /// Number of bytes written
    pub length: u64,
    /// Data block for indirect writes, hole when the data is inline
    pub block_ref: BlockRef,
    /// Inline data (empty for indirect writes)
    pub data: Vec<u8>,
}

impl WriteRecord {
    /// Write record carrying its data inline
    pub fn inline(file_id: u64, offset: u64, data: Vec<u8>) -> Self {
        WriteRecord {
            file_id,
            offset,
            length: data.len() as u64,
            block_ref: BlockRef::HOLE,
            data,
        }
    }

    /// Write record whose data is supplied later (fetch callback or block reference)
    pub fn deferred(file_id: u64, offset: u64, length: u64) -> Self {
        WriteRecord {
            file_id,
            offset,
            length,
            block_ref: BlockRef::HOLE,
            data: Vec::new(),
        }
    }

    /// True if the data lives in a separate block
    pub fn is_indirect(&self) -> bool {
        !self.block_ref.is_hole()
    }

    /// Encoded payload length
    pub fn payload_len(&self) -> usize {
        WRITE_RECORD_FIXED + self.data.len()
    }

    /// Encode as a record payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.payload_len()];
        LittleEndian::write_u64(&mut out[0..8], self.file_id);
        LittleEndian::write_u64(&mut out[8..16], self.offset);
        LittleEndian::write_u64(&mut out[16..24], self.length);
        self.block_ref.encode_into(&mut out[24..WRITE_RECORD_FIXED]);
        out[WRITE_RECORD_FIXED..].copy_from_slice(&self.data);
        out
    }

    /// Decode a record payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < WRITE_RECORD_FIXED {
            return Err(Error::InvalidRecord(format!(
                "write payload needs {} bytes, have {}",
                WRITE_RECORD_FIXED,
                payload.len()
            )));
        }
        let length = LittleEndian::read_u64(&payload[16..24]);
        let block_ref = BlockRef::decode(&payload[24..WRITE_RECORD_FIXED])?;
        let rest = &payload[WRITE_RECORD_FIXED..];
        let data = if block_ref.is_hole() {
            if (rest.len() as u64) < length {
                return Err(Error::InvalidRecord(format!(
                    "write of {} bytes carries only {} inline",
                    length,
                    rest.len()
                )));
            }
            rest[..length as usize].to_vec()
        } else {
            Vec::new()
        };
        Ok(WriteRecord {
            file_id: LittleEndian::read_u64(&payload[0..8]),
            offset: LittleEndian::read_u64(&payload[8..16]),
            length,
            block_ref,
            data,
        })
    }

    /// Wrap into a log record.
    pub fn into_log_record(self, epoch: Epoch) -> LogRecord {
        LogRecord::new(TxType::Write, epoch, self.encode())
    }
}
