//! Transaction log record structures and framing
//!
//! Each record is bincode-encoded behind a 4-byte little-endian length prefix.

use std::fs::File;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Key, Record, TableName, Timestamp, TxnId};

/// Log sequence number
pub type Lsn = u64;

/// One committed mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedWrite {
    pub table: TableName,
    pub key: Key,
    pub version: i64,
    pub is_deleted: bool,
    pub record: Option<Record>,
}

/// The write set of one committing transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLogRecord {
    pub lsn: Lsn,
    pub executor_id: usize,
    pub txn_id: TxnId,
    pub commit_ts: Timestamp,
    pub writes: Vec<LoggedWrite>,
}

/// Frame one record: length prefix followed by the bincode payload
pub(crate) fn encode_frame(record: &TxLogRecord) -> Result<Vec<u8>> {
    let encoded = bincode::serialize(record)?;
    let mut frame = Vec::with_capacity(4 + encoded.len());
    frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
    frame.extend_from_slice(&encoded);
    Ok(frame)
}

/// Write a batch of records WITHOUT fsync. Returns the number of bytes written.
pub(crate) fn write_records_no_sync(file: &mut File, records: &[TxLogRecord]) -> Result<usize> {
    let mut total_bytes = 0;
    for record in records {
        let frame = encode_frame(record)?;
        file.write_all(&frame)?;
        total_bytes += frame.len();
    }
    // Flush to kernel buffer (but don't fsync to disk)
    file.flush()?;
    Ok(total_bytes)
}
