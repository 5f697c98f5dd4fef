//! Reading the transaction log back

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::datastore::DataStore;
use crate::error::Result;
use crate::types::{Key, TableName};

use super::record::{LoggedWrite, TxLogRecord};

/// Read every intact record of the log at `path`, in file order.
///
/// A torn record at the tail (crash during append) ends the scan; an
/// undecodable record in the middle is skipped.
pub fn read_log(path: &Path) -> Result<Vec<TxLogRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut record_buf = vec![0u8; len];
        match reader.read_exact(&mut record_buf) {
            Ok(_) => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                log::warn!("Ignoring torn transaction log tail ({} bytes expected)", len);
                break;
            }
            Err(e) => return Err(e.into()),
        }

        match bincode::deserialize::<TxLogRecord>(&record_buf) {
            Ok(record) => records.push(record),
            Err(e) => log::warn!("Skipping malformed transaction log record: {}", e),
        }
    }

    Ok(records)
}

/// Newest logged write per key, by commit timestamp
pub fn latest_writes(records: &[TxLogRecord]) -> HashMap<(TableName, Key), LoggedWrite> {
    let mut ordered: Vec<&TxLogRecord> = records.iter().collect();
    ordered.sort_by_key(|r| (r.commit_ts, r.lsn));

    let mut latest = HashMap::new();
    for record in ordered {
        for write in &record.writes {
            latest.insert((write.table.clone(), write.key.clone()), write.clone());
        }
    }
    latest
}

/// Redo the log into a cold-storage driver. Returns the number of keys applied.
pub fn replay_into(path: &Path, store: &dyn DataStore) -> Result<usize> {
    let records = read_log(path)?;
    log::info!("Replaying {} transaction log records", records.len());

    let latest = latest_writes(&records);
    for ((table, key), write) in &latest {
        match (&write.record, write.is_deleted) {
            (Some(record), false) => store.upsert(table, key, record.clone())?,
            _ => {
                store.delete(table, key)?;
            }
        }
    }
    Ok(latest.len())
}
