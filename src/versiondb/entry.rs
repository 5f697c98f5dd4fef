//! Version and transaction records as the handler stores them

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TxError};
use crate::types::{get_i64, Record, Timestamp, TxnId};

/// Opaque per-entry blob a handler may attach to versions and transactions
pub type Extension = Option<Bytes>;

pub const DEFAULT_BEGIN_TS: Timestamp = -1;
pub const DEFAULT_END_TS: Timestamp = -1;
pub const MAX_TIMESTAMP: Timestamp = i64::MAX;
pub const DEFAULT_VERSION: i64 = -1;
pub const FIRST_VERSION: i64 = 0;
pub const EMPTY_TX_ID: TxnId = -1;
pub const DEFAULT_COMMIT_TS: Timestamp = -1;

/// One version of a key's value.
///
/// `begin_ts`/`end_ts` bound the window in which the version is visible;
/// `end_ts == MAX_TIMESTAMP` marks the newest committed version. `tx_id`
/// names the writer while the version (or its successor) is still in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    pub version: i64,
    pub tx_id: TxnId,
    pub begin_ts: Timestamp,
    pub end_ts: Timestamp,
    /// High-water mark of commit timestamps that have read this version
    pub max_commit_ts: Timestamp,
    pub is_deleted: bool,
    pub record: Option<Record>,
    pub extension: Extension,
}

impl Default for VersionEntry {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION,
            tx_id: EMPTY_TX_ID,
            begin_ts: DEFAULT_BEGIN_TS,
            end_ts: DEFAULT_END_TS,
            max_commit_ts: DEFAULT_COMMIT_TS,
            is_deleted: true,
            record: None,
            extension: None,
        }
    }
}

impl VersionEntry {
    /// The placeholder a version list starts with before any write:
    /// version 0, deleted, visible over the whole timeline.
    pub fn pseudo() -> Self {
        Self {
            version: FIRST_VERSION,
            tx_id: EMPTY_TX_ID,
            begin_ts: 0,
            end_ts: MAX_TIMESTAMP,
            max_commit_ts: 0,
            is_deleted: true,
            record: None,
            extension: None,
        }
    }

    /// True once the writer has finalized the version
    pub fn is_committed(&self) -> bool {
        self.end_ts != DEFAULT_END_TS
    }

    /// Append the encoded entry to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i64_le(self.version);
        buf.put_i64_le(self.tx_id);
        buf.put_i64_le(self.begin_ts);
        buf.put_i64_le(self.end_ts);
        buf.put_i64_le(self.max_commit_ts);
        buf.put_u8(self.is_deleted as u8);
        match &self.record {
            Some(record) => {
                buf.put_u8(1);
                record.encode(buf);
            }
            None => buf.put_u8(0),
        }
        match &self.extension {
            Some(ext) => {
                buf.put_u8(1);
                buf.put_u32_le(ext.len() as u32);
                buf.put_slice(ext);
            }
            None => buf.put_u8(0),
        }
    }

    /// Decode one entry from the front of `buf`
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        let version = get_i64(buf)?;
        let tx_id = get_i64(buf)?;
        let begin_ts = get_i64(buf)?;
        let end_ts = get_i64(buf)?;
        let max_commit_ts = get_i64(buf)?;
        let is_deleted = get_flag(buf)?;
        let record = if get_flag(buf)? {
            Some(Record::decode(buf)?)
        } else {
            None
        };
        let extension = if get_flag(buf)? {
            if buf.remaining() < 4 {
                return Err(TxError::Codec("truncated extension length".to_string()));
            }
            let len = buf.get_u32_le() as usize;
            if buf.remaining() < len {
                return Err(TxError::Codec(format!(
                    "extension of {} bytes exceeds {} remaining",
                    len,
                    buf.remaining()
                )));
            }
            Some(buf.copy_to_bytes(len))
        } else {
            None
        };
        Ok(Self {
            version,
            tx_id,
            begin_ts,
            end_ts,
            max_commit_ts,
            is_deleted,
            record,
            extension,
        })
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        self.encode(&mut buf);
        buf.freeze()
    }
}

fn get_flag(buf: &mut impl Buf) -> Result<bool> {
    if !buf.has_remaining() {
        return Err(TxError::Codec("truncated flag".to_string()));
    }
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(TxError::Codec(format!("invalid flag byte {}", other))),
    }
}

/// Transaction state as seen by the handler and the executing slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnStatus {
    Ongoing,
    Committed,
    /// A fan-out child hit a conflict; abort once all siblings are done
    WaitForAborting,
    Aborting,
    Aborted,
}

/// Transaction metadata mirrored at the handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnEntry {
    pub tx_id: TxnId,
    pub status: TxnStatus,
    pub commit_ts: Timestamp,
    /// Floor on the eventual commit timestamp, raised by conflicting readers
    pub commit_lower_bound: Timestamp,
    pub extension: Extension,
}

impl Default for TxnEntry {
    fn default() -> Self {
        Self {
            tx_id: EMPTY_TX_ID,
            status: TxnStatus::Ongoing,
            commit_ts: DEFAULT_COMMIT_TS,
            commit_lower_bound: 0,
            extension: None,
        }
    }
}

impl TxnEntry {
    pub fn new(tx_id: TxnId, lower_bound: Timestamp) -> Self {
        let mut entry = Self::default();
        entry.reset(tx_id, lower_bound);
        entry
    }

    /// Reuse the entry for a fresh transaction
    pub fn reset(&mut self, tx_id: TxnId, lower_bound: Timestamp) {
        self.tx_id = tx_id;
        self.status = TxnStatus::Ongoing;
        self.commit_ts = DEFAULT_COMMIT_TS;
        self.commit_lower_bound = lower_bound;
        self.extension = None;
    }

    pub fn reset_lower_bound(&mut self, lower_bound: Timestamp) {
        self.commit_lower_bound = lower_bound;
    }

    /// Whether a commit timestamp has been fixed for this transaction
    pub fn has_commit_ts(&self) -> bool {
        self.commit_ts != DEFAULT_COMMIT_TS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_entry_defaults() {
        let entry = VersionEntry::default();
        assert_eq!(entry.version, DEFAULT_VERSION);
        assert_eq!(entry.tx_id, EMPTY_TX_ID);
        assert_eq!(entry.begin_ts, DEFAULT_BEGIN_TS);
        assert!(entry.is_deleted);
        assert!(!entry.is_committed());
        assert!(VersionEntry::pseudo().is_committed());
    }

    #[test]
    fn test_version_entry_rejects_bad_flag() {
        let mut raw = BytesMut::new();
        for _ in 0..5 {
            raw.put_i64_le(0);
        }
        raw.put_u8(7);
        assert!(VersionEntry::decode(&mut raw.freeze()).is_err());
    }

    #[test]
    fn test_txn_entry_reset() {
        let mut entry = TxnEntry::new(5, 100);
        entry.status = TxnStatus::Committed;
        entry.commit_ts = 150;
        entry.reset(6, 200);
        assert_eq!(entry.tx_id, 6);
        assert_eq!(entry.status, TxnStatus::Ongoing);
        assert!(!entry.has_commit_ts());
        assert_eq!(entry.commit_lower_bound, 200);
    }
}
