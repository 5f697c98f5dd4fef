//! Durability log for committed write sets
//!
//! ## Log Format
//! Each record is binary-encoded (bincode):
//! - 4-byte length prefix
//! - Serialized [`TxLogRecord`]: LSN, executor, transaction id, commit
//!   timestamp and the write set

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::{latest_writes, read_log, replay_into};
pub use record::{LoggedWrite, Lsn, TxLogRecord};
pub use writer::{FileTxLog, FsyncState, TxLogConfig};

use crate::error::Result;
use crate::types::Timestamp;
use crate::versiondb::{HandlerResult, TxnEntry};

/// Append-only log of committing transactions, shared by all executors
pub trait TxLog: Send + Sync {
    /// Append and block until the record is written (and fsynced if `sync`)
    fn append(&self, executor_id: usize, writes: &[LoggedWrite], txn: &TxnEntry, sync: bool) -> Result<()>;

    /// Append without blocking; `done` completes once the record is written
    /// (and fsynced if `sync`) or fails if it never will be.
    ///
    /// An `Err` means nothing was queued and `done` is untouched.
    /// [`TxError::LogBusy`](crate::error::TxError::LogBusy) asks the caller
    /// to try again later.
    fn append_async(
        &self,
        executor_id: usize,
        writes: Vec<LoggedWrite>,
        txn: &TxnEntry,
        done: HandlerResult<()>,
        sync: bool,
    ) -> Result<()>;

    /// Forget records of transactions committed before `timestamp`
    fn clean_before(&self, timestamp: Timestamp) -> Result<()>;

    /// Flush, fsync and stop accepting appends
    fn close(&self) -> Result<()>;
}
