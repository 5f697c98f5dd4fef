use crate::error::Result;
use crate::types::{Key, Record, Timestamp, TxnId};

use super::entry::{Extension, TxnEntry, TxnStatus, VersionEntry};
use super::result::HandlerResult;

/// Final values written into an uploaded version when its writer commits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionCommit {
    pub version: i64,
    /// The version must still be tagged with this writer
    pub expect_tx_id: TxnId,
    pub begin_ts: Timestamp,
    pub end_ts: Timestamp,
    pub tx_id: TxnId,
}

/// Trait defining the version store the execution core talks to.
///
/// Every call is asynchronous: the handler completes (or fails) the supplied
/// `HandlerResult`, possibly from another thread, and the caller polls it.
/// Implementations are shared by all executors and synchronize internally.
pub trait Handler: Send + Sync {
    /// Add an uncommitted version. Completes with the `max_commit_ts` of the
    /// version it supersedes; fails on a write-write conflict.
    fn upload_version(
        &self,
        table: &str,
        key: &Key,
        entry: &VersionEntry,
        read_extension: &Extension,
        result: HandlerResult<Timestamp>,
    );

    /// Drop an uploaded version that will never commit
    fn delete_version(
        &self,
        table: &str,
        key: &Key,
        version: i64,
        extension: &Extension,
        result: HandlerResult<()>,
    );

    /// Create the version list if absent. Completes with whether it was created.
    fn init_version_list(
        &self,
        table: &str,
        key: &Key,
        entry: &VersionEntry,
        result: HandlerResult<bool>,
    );

    /// Finalize an uploaded version with its commit window and payload
    fn commit_version(
        &self,
        table: &str,
        key: &Key,
        commit: &VersionCommit,
        record: Option<&Record>,
        extension: &Extension,
        result: HandlerResult<()>,
    );

    /// Raise the version's `max_commit_ts`, drop one read counter and return
    /// the version as it is now. A missing version comes back as the default
    /// sentinel rather than an error.
    fn update_max_commit_ts_and_reread(
        &self,
        table: &str,
        key: &Key,
        version: i64,
        max_commit_ts: Timestamp,
        extension: &Extension,
        result: HandlerResult<VersionEntry>,
    );

    fn release_read_counter(
        &self,
        table: &str,
        key: &Key,
        version: i64,
        extension: &Extension,
        result: HandlerResult<()>,
    );

    /// The two newest versions of the key, newest first. Bumps the read
    /// counter of the visible one and creates the list on first access.
    fn get_version_list(
        &self,
        table: &str,
        key: &Key,
        time: Timestamp,
        result: HandlerResult<[VersionEntry; 2]>,
    );

    fn get_txn(&self, txn_id: TxnId, result: HandlerResult<TxnEntry>);

    /// Register a transaction. Fails when the id is held by a live transaction.
    fn new_txn(
        &self,
        entry: &TxnEntry,
        local_time: Timestamp,
        max_exec_time_ms: i64,
        result: HandlerResult<()>,
    );

    /// Fix the commit timestamp. Completes with the adopted value, which may
    /// exceed `proposed`, or a negative value when the transaction may not commit.
    fn set_commit_timestamp(
        &self,
        txn_id: TxnId,
        proposed: Timestamp,
        extension: &Extension,
        result: HandlerResult<Timestamp>,
    );

    /// Raise the commit lower bound and return the transaction as it is now
    fn update_commit_lower_bound(
        &self,
        txn_id: TxnId,
        lower_bound: Timestamp,
        result: HandlerResult<TxnEntry>,
    );

    fn update_txn_status(
        &self,
        txn_id: TxnId,
        status: TxnStatus,
        extension: &Extension,
        result: HandlerResult<()>,
    );

    /// Remove committed versions that stopped being visible before `end_ts`.
    /// Completes with the number removed.
    fn clean_stale_version(&self, table: &str, end_ts: Timestamp, result: HandlerResult<usize>);

    /// Remove finished transactions older than `end_ts`
    fn clean_stale_txn(&self, end_ts: Timestamp, result: HandlerResult<usize>);

    /// Keys whose newest committed version is live, for checkpoint and kickout scans
    fn current_keys(&self, _table: &str) -> Result<Vec<Key>> {
        Ok(Vec::new())
    }

    /// Flush hint, called by executors once per scheduling pass
    fn send_batch(&self) {}
}
