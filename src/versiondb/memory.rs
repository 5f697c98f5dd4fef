//! In-process version store
//!
//! `MemoryHandler` keeps every version list and transaction record in one
//! mutex-protected map. It backs the benchmark driver and the test suites,
//! and it can hold work back until the next `send_batch()` so that several
//! transactions genuinely interleave between scheduler passes.
//!
//! ## Locking model
//!
//! Uploading version `v + 1` tags version `v` with the writer's id. The tag
//! is cleared when the writer commits (which also closes `v` at the commit
//! timestamp) or aborts (which deletes `v + 1`). A validating reader that
//! finds the tag pushes the writer's commit lower bound.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::error::Result;
use crate::types::{Key, Record, TableName, Timestamp, TxnId};

use super::entry::{
    Extension, TxnEntry, TxnStatus, VersionEntry, DEFAULT_COMMIT_TS, EMPTY_TX_ID, FIRST_VERSION,
    MAX_TIMESTAMP,
};
use super::handler::{Handler, VersionCommit};
use super::pick_visible_version;
use super::result::HandlerResult;

/// When the handler completes the results it is handed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Inside the call
    Immediate,
    /// On the next `send_batch()`
    Deferred,
}

/// Handler entry points, used for fault injection and call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HandlerCall {
    UploadVersion,
    DeleteVersion,
    InitVersionList,
    CommitVersion,
    UpdateMaxCommitTs,
    ReleaseReadCounter,
    GetVersionList,
    GetTxn,
    NewTxn,
    SetCommitTimestamp,
    UpdateCommitLowerBound,
    UpdateTxnStatus,
    CleanStaleVersion,
    CleanStaleTxn,
}

struct StoredVersion {
    entry: VersionEntry,
    read_count: u32,
}

struct StoredTxn {
    entry: TxnEntry,
    started_at: Timestamp,
    max_exec_time_ms: i64,
}

type VersionKey = (TableName, Key);

#[derive(Default)]
struct Store {
    /// Ascending by version number
    versions: HashMap<VersionKey, Vec<StoredVersion>>,
    txns: HashMap<TxnId, StoredTxn>,
}

type Job = Box<dyn FnOnce(&mut Store) + Send>;

/// Thread-safe in-memory implementation of [`Handler`]
pub struct MemoryHandler {
    store: Mutex<Store>,
    mode: CompletionMode,
    pending: Mutex<Vec<Job>>,
    faults: Mutex<HashMap<HandlerCall, usize>>,
    calls: Mutex<HashMap<HandlerCall, u64>>,
}

impl Default for MemoryHandler {
    fn default() -> Self {
        Self::new(CompletionMode::Immediate)
    }
}

impl MemoryHandler {
    pub fn new(mode: CompletionMode) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            mode,
            pending: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn deferred() -> Self {
        Self::new(CompletionMode::Deferred)
    }

    pub fn mode(&self) -> CompletionMode {
        self.mode
    }

    /// Make the next `call` fail with a hard error
    pub fn fail_next(&self, call: HandlerCall) {
        *lock(&self.faults).entry(call).or_insert(0) += 1;
    }

    /// How many times `call` was issued
    pub fn call_count(&self, call: HandlerCall) -> u64 {
        lock(&self.calls).get(&call).copied().unwrap_or(0)
    }

    /// Work queued for the next `send_batch()`
    pub fn pending_calls(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Copy of the key's version list, oldest first
    pub fn version_list(&self, table: &str, key: &Key) -> Vec<VersionEntry> {
        let store = lock(&self.store);
        store
            .versions
            .get(&(table.to_string(), key.clone()))
            .map(|list| list.iter().map(|v| v.entry.clone()).collect())
            .unwrap_or_default()
    }

    /// Payload of the newest committed version, unless it is a tombstone
    pub fn committed_record(&self, table: &str, key: &Key) -> Option<Record> {
        let store = lock(&self.store);
        let list = store.versions.get(&(table.to_string(), key.clone()))?;
        let latest = list.iter().rev().find(|v| v.entry.is_committed())?;
        if latest.entry.is_deleted {
            None
        } else {
            latest.entry.record.clone()
        }
    }

    /// Outstanding read counter of one version
    pub fn read_count(&self, table: &str, key: &Key, version: i64) -> Option<u32> {
        let store = lock(&self.store);
        store
            .versions
            .get(&(table.to_string(), key.clone()))?
            .iter()
            .find(|v| v.entry.version == version)
            .map(|v| v.read_count)
    }

    /// Sum of all outstanding read counters
    pub fn total_read_count(&self) -> u64 {
        let store = lock(&self.store);
        store
            .versions
            .values()
            .flat_map(|list| list.iter())
            .map(|v| v.read_count as u64)
            .sum()
    }

    pub fn txn(&self, txn_id: TxnId) -> Option<TxnEntry> {
        lock(&self.store).txns.get(&txn_id).map(|t| t.entry.clone())
    }

    fn take_fault(&self, call: HandlerCall) -> bool {
        let mut faults = lock(&self.faults);
        match faults.get_mut(&call) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    /// Run `job` against the store now or on the next batch, completing `result`
    fn submit<T, F>(&self, call: HandlerCall, result: HandlerResult<T>, job: F)
    where
        T: Send + 'static,
        F: FnOnce(&mut Store) -> std::result::Result<T, String> + Send + 'static,
    {
        *lock(&self.calls).entry(call).or_insert(0) += 1;
        let injected = self.take_fault(call);
        let run = move |store: &mut Store| {
            if injected {
                result.fail(format!("injected failure in {:?}", call));
                return;
            }
            match job(store) {
                Ok(value) => result.complete(value),
                Err(reason) => result.fail(reason),
            }
        };
        match self.mode {
            CompletionMode::Immediate => {
                let mut store = lock(&self.store);
                run(&mut store);
            }
            CompletionMode::Deferred => lock(&self.pending).push(Box::new(run)),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Store {
    fn list_mut(&mut self, table: &str, key: &Key) -> Option<&mut Vec<StoredVersion>> {
        self.versions.get_mut(&(table.to_string(), key.clone()))
    }

    fn list_or_init(&mut self, table: &str, key: &Key) -> &mut Vec<StoredVersion> {
        self.versions
            .entry((table.to_string(), key.clone()))
            .or_insert_with(|| {
                vec![StoredVersion {
                    entry: VersionEntry::pseudo(),
                    read_count: 0,
                }]
            })
    }

    fn txn_mut(&mut self, txn_id: TxnId) -> std::result::Result<&mut StoredTxn, String> {
        self.txns
            .get_mut(&txn_id)
            .ok_or_else(|| format!("transaction {} not found", txn_id))
    }
}

fn find_version(list: &mut [StoredVersion], version: i64) -> Option<&mut StoredVersion> {
    list.iter_mut().find(|v| v.entry.version == version)
}

impl Handler for MemoryHandler {
    fn upload_version(
        &self,
        table: &str,
        key: &Key,
        entry: &VersionEntry,
        _read_extension: &Extension,
        result: HandlerResult<Timestamp>,
    ) {
        let (table, key, entry) = (table.to_string(), key.clone(), entry.clone());
        self.submit(HandlerCall::UploadVersion, result, move |store| {
            let list = store.list_or_init(&table, &key);
            let latest = list
                .last_mut()
                .ok_or_else(|| format!("empty version list for {}", key))?;
            if latest.entry.version + 1 != entry.version {
                return Err(format!(
                    "version {} of {}.{} already taken (latest {})",
                    entry.version, table, key, latest.entry.version
                ));
            }
            latest.entry.tx_id = entry.tx_id;
            let superseded_max = latest.entry.max_commit_ts;
            list.push(StoredVersion {
                entry,
                read_count: 0,
            });
            Ok(superseded_max)
        });
    }

    fn delete_version(
        &self,
        table: &str,
        key: &Key,
        version: i64,
        _extension: &Extension,
        result: HandlerResult<()>,
    ) {
        let (table, key) = (table.to_string(), key.clone());
        self.submit(HandlerCall::DeleteVersion, result, move |store| {
            let list = store
                .list_mut(&table, &key)
                .ok_or_else(|| format!("no version list for {}.{}", table, key))?;
            let pos = list
                .iter()
                .position(|v| v.entry.version == version)
                .ok_or_else(|| format!("version {} of {}.{} not found", version, table, key))?;
            let removed = list.remove(pos);
            if let Some(prev) = find_version(list, version - 1) {
                if prev.entry.tx_id == removed.entry.tx_id {
                    prev.entry.tx_id = EMPTY_TX_ID;
                }
            }
            Ok(())
        });
    }

    fn init_version_list(
        &self,
        table: &str,
        key: &Key,
        entry: &VersionEntry,
        result: HandlerResult<bool>,
    ) {
        let (table, key, entry) = (table.to_string(), key.clone(), entry.clone());
        self.submit(HandlerCall::InitVersionList, result, move |store| {
            let slot = (table, key);
            if store.versions.contains_key(&slot) {
                return Ok(false);
            }
            store.versions.insert(
                slot,
                vec![StoredVersion {
                    entry,
                    read_count: 0,
                }],
            );
            Ok(true)
        });
    }

    fn commit_version(
        &self,
        table: &str,
        key: &Key,
        commit: &VersionCommit,
        record: Option<&Record>,
        _extension: &Extension,
        result: HandlerResult<()>,
    ) {
        let (table, key, commit, record) =
            (table.to_string(), key.clone(), *commit, record.cloned());
        self.submit(HandlerCall::CommitVersion, result, move |store| {
            let list = store
                .list_mut(&table, &key)
                .ok_or_else(|| format!("no version list for {}.{}", table, key))?;
            let target = find_version(list, commit.version).ok_or_else(|| {
                format!("version {} of {}.{} not found", commit.version, table, key)
            })?;
            if target.entry.tx_id != commit.expect_tx_id {
                return Err(format!(
                    "version {} of {}.{} is owned by txn {}, not {}",
                    commit.version, table, key, target.entry.tx_id, commit.expect_tx_id
                ));
            }
            target.entry.begin_ts = commit.begin_ts;
            target.entry.end_ts = commit.end_ts;
            target.entry.tx_id = commit.tx_id;
            target.entry.record = record;
            if let Some(prev) = find_version(list, commit.version - 1) {
                prev.entry.end_ts = commit.begin_ts;
                // the writer's read of the superseded version ends here
                prev.read_count = prev.read_count.saturating_sub(1);
                if prev.entry.tx_id == commit.expect_tx_id {
                    prev.entry.tx_id = EMPTY_TX_ID;
                }
            }
            Ok(())
        });
    }

    fn update_max_commit_ts_and_reread(
        &self,
        table: &str,
        key: &Key,
        version: i64,
        max_commit_ts: Timestamp,
        _extension: &Extension,
        result: HandlerResult<VersionEntry>,
    ) {
        let (table, key) = (table.to_string(), key.clone());
        self.submit(HandlerCall::UpdateMaxCommitTs, result, move |store| {
            let found = store
                .list_mut(&table, &key)
                .and_then(|list| find_version(list, version));
            match found {
                Some(stored) => {
                    stored.entry.max_commit_ts = stored.entry.max_commit_ts.max(max_commit_ts);
                    stored.read_count = stored.read_count.saturating_sub(1);
                    Ok(stored.entry.clone())
                }
                None => Ok(VersionEntry::default()),
            }
        });
    }

    fn release_read_counter(
        &self,
        table: &str,
        key: &Key,
        version: i64,
        _extension: &Extension,
        result: HandlerResult<()>,
    ) {
        let (table, key) = (table.to_string(), key.clone());
        self.submit(HandlerCall::ReleaseReadCounter, result, move |store| {
            if let Some(stored) = store
                .list_mut(&table, &key)
                .and_then(|list| find_version(list, version))
            {
                stored.read_count = stored.read_count.saturating_sub(1);
            }
            Ok(())
        });
    }

    fn get_version_list(
        &self,
        table: &str,
        key: &Key,
        _time: Timestamp,
        result: HandlerResult<[VersionEntry; 2]>,
    ) {
        let (table, key) = (table.to_string(), key.clone());
        self.submit(HandlerCall::GetVersionList, result, move |store| {
            let list = store.list_or_init(&table, &key);
            let len = list.len();
            let newest = list[len - 1].entry.clone();
            let previous = if len > 1 {
                list[len - 2].entry.clone()
            } else {
                VersionEntry::default()
            };
            let pair = [newest, previous];
            if let Some(visible) = pick_visible_version(&pair) {
                let visible_version = visible.version;
                if let Some(stored) = find_version(list, visible_version) {
                    stored.read_count += 1;
                }
            } else if let Some(stored) = find_version(list, FIRST_VERSION) {
                // not-found reads hold the placeholder
                stored.read_count += 1;
            }
            Ok(pair)
        });
    }

    fn get_txn(&self, txn_id: TxnId, result: HandlerResult<TxnEntry>) {
        self.submit(HandlerCall::GetTxn, result, move |store| {
            Ok(store.txn_mut(txn_id)?.entry.clone())
        });
    }

    fn new_txn(
        &self,
        entry: &TxnEntry,
        local_time: Timestamp,
        max_exec_time_ms: i64,
        result: HandlerResult<()>,
    ) {
        let entry = entry.clone();
        self.submit(HandlerCall::NewTxn, result, move |store| {
            if let Some(existing) = store.txns.get(&entry.tx_id) {
                let deadline = existing
                    .started_at
                    .saturating_add(existing.max_exec_time_ms.saturating_mul(1000));
                if existing.entry.status == TxnStatus::Ongoing && local_time < deadline {
                    return Err(format!("transaction id {} already in use", entry.tx_id));
                }
            }
            let mut fresh = entry;
            fresh.status = TxnStatus::Ongoing;
            fresh.commit_ts = DEFAULT_COMMIT_TS;
            store.txns.insert(
                fresh.tx_id,
                StoredTxn {
                    entry: fresh,
                    started_at: local_time,
                    max_exec_time_ms,
                },
            );
            Ok(())
        });
    }

    fn set_commit_timestamp(
        &self,
        txn_id: TxnId,
        proposed: Timestamp,
        _extension: &Extension,
        result: HandlerResult<Timestamp>,
    ) {
        self.submit(HandlerCall::SetCommitTimestamp, result, move |store| {
            let txn = &mut store.txn_mut(txn_id)?.entry;
            if txn.status != TxnStatus::Ongoing {
                return Ok(-1);
            }
            if !txn.has_commit_ts() {
                txn.commit_ts = proposed.max(txn.commit_lower_bound);
            }
            Ok(txn.commit_ts)
        });
    }

    fn update_commit_lower_bound(
        &self,
        txn_id: TxnId,
        lower_bound: Timestamp,
        result: HandlerResult<TxnEntry>,
    ) {
        self.submit(HandlerCall::UpdateCommitLowerBound, result, move |store| {
            let txn = &mut store.txn_mut(txn_id)?.entry;
            if txn.status == TxnStatus::Ongoing && !txn.has_commit_ts() {
                txn.commit_lower_bound = txn.commit_lower_bound.max(lower_bound);
            }
            Ok(txn.clone())
        });
    }

    fn update_txn_status(
        &self,
        txn_id: TxnId,
        status: TxnStatus,
        _extension: &Extension,
        result: HandlerResult<()>,
    ) {
        self.submit(HandlerCall::UpdateTxnStatus, result, move |store| {
            store.txn_mut(txn_id)?.entry.status = status;
            Ok(())
        });
    }

    fn clean_stale_version(&self, table: &str, end_ts: Timestamp, result: HandlerResult<usize>) {
        let table = table.to_string();
        self.submit(HandlerCall::CleanStaleVersion, result, move |store| {
            let mut removed = 0;
            for ((list_table, _), list) in store.versions.iter_mut() {
                if *list_table != table {
                    continue;
                }
                let before = list.len();
                let newest = list.last().map(|v| v.entry.version);
                list.retain(|v| {
                    let e = &v.entry;
                    let stale = Some(e.version) != newest
                        && e.tx_id == EMPTY_TX_ID
                        && e.is_committed()
                        && e.end_ts != MAX_TIMESTAMP
                        && e.end_ts < end_ts
                        && v.read_count == 0;
                    !stale
                });
                removed += before - list.len();
            }
            Ok(removed)
        });
    }

    fn clean_stale_txn(&self, end_ts: Timestamp, result: HandlerResult<usize>) {
        self.submit(HandlerCall::CleanStaleTxn, result, move |store| {
            let before = store.txns.len();
            store.txns.retain(|_, txn| {
                let finished = matches!(txn.entry.status, TxnStatus::Committed | TxnStatus::Aborted);
                let last_ts = if txn.entry.has_commit_ts() {
                    txn.entry.commit_ts
                } else {
                    txn.started_at
                };
                !(finished && last_ts < end_ts)
            });
            Ok(before - store.txns.len())
        });
    }

    fn current_keys(&self, table: &str) -> Result<Vec<Key>> {
        let store = lock(&self.store);
        let mut keys: Vec<Key> = store
            .versions
            .iter()
            .filter(|((list_table, _), _)| list_table == table)
            .filter(|(_, list)| {
                list.iter()
                    .rev()
                    .find(|v| v.entry.is_committed())
                    .map(|v| !v.entry.is_deleted)
                    .unwrap_or(false)
            })
            .map(|((_, key), _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn send_batch(&self) {
        let jobs: Vec<Job> = std::mem::take(&mut *lock(&self.pending));
        if jobs.is_empty() {
            return;
        }
        let mut store = lock(&self.store);
        for job in jobs {
            job(&mut store);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get<T: Clone>(result: &HandlerResult<T>) -> T {
        assert!(result.is_finished());
        assert!(!result.is_error(), "{:?}", result.error_message());
        result.get().unwrap()
    }

    #[test]
    fn test_first_read_creates_placeholder() {
        let handler = MemoryHandler::default();
        let key = Key::Int(1);
        let result = HandlerResult::new();
        handler.get_version_list("t", &key, 10, result.clone());
        let pair = get(&result);
        assert_eq!(pair[0], VersionEntry::pseudo());
        assert_eq!(pair[1].version, -1);
        assert!(pick_visible_version(&pair).is_none());
        assert_eq!(handler.read_count("t", &key, 0), Some(1));
    }

    #[test]
    fn test_upload_conflict_on_taken_version() {
        let handler = MemoryHandler::default();
        let key = Key::Int(1);
        let mut entry = VersionEntry::default();
        entry.version = 1;
        entry.tx_id = 10;

        let first = HandlerResult::new();
        handler.upload_version("t", &key, &entry, &None, first.clone());
        assert_eq!(get(&first), 0);

        entry.tx_id = 11;
        let second = HandlerResult::new();
        handler.upload_version("t", &key, &entry, &None, second.clone());
        assert!(second.is_error());

        // the placeholder is tagged with the first writer
        assert_eq!(handler.version_list("t", &key)[0].tx_id, 10);
    }

    #[test]
    fn test_commit_closes_previous_version() {
        let handler = MemoryHandler::default();
        let key = Key::from("k");
        let mut entry = VersionEntry::default();
        entry.version = 1;
        entry.tx_id = 3;
        entry.is_deleted = false;
        handler.upload_version("t", &key, &entry, &None, HandlerResult::new());

        let commit = VersionCommit {
            version: 1,
            expect_tx_id: 3,
            begin_ts: 500,
            end_ts: MAX_TIMESTAMP,
            tx_id: EMPTY_TX_ID,
        };
        let result = HandlerResult::new();
        handler.commit_version("t", &key, &commit, Some(&Record::Int(8)), &None, result.clone());
        get(&result);

        let list = handler.version_list("t", &key);
        assert_eq!(list[0].end_ts, 500);
        assert_eq!(list[0].tx_id, EMPTY_TX_ID);
        assert_eq!(list[1].begin_ts, 500);
        assert_eq!(handler.committed_record("t", &key), Some(Record::Int(8)));
        assert_eq!(handler.current_keys("t").unwrap(), vec![key]);
    }

    #[test]
    fn test_delete_version_unlocks_previous() {
        let handler = MemoryHandler::default();
        let key = Key::Int(2);
        let mut entry = VersionEntry::default();
        entry.version = 1;
        entry.tx_id = 4;
        handler.upload_version("t", &key, &entry, &None, HandlerResult::new());

        let result = HandlerResult::new();
        handler.delete_version("t", &key, 1, &None, result.clone());
        get(&result);
        let list = handler.version_list("t", &key);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].tx_id, EMPTY_TX_ID);

        let missing = HandlerResult::new();
        handler.delete_version("t", &key, 1, &None, missing.clone());
        assert!(missing.is_error());
    }

    #[test]
    fn test_commit_timestamp_honours_lower_bound() {
        let handler = MemoryHandler::default();
        handler.new_txn(&TxnEntry::new(1, 100), 100, 1000, HandlerResult::new());

        let pushed = HandlerResult::new();
        handler.update_commit_lower_bound(1, 400, pushed.clone());
        assert_eq!(get(&pushed).commit_lower_bound, 400);

        let adopted = HandlerResult::new();
        handler.set_commit_timestamp(1, 250, &None, adopted.clone());
        assert_eq!(get(&adopted), 400);

        // fixed timestamps can no longer be pushed
        let late = HandlerResult::new();
        handler.update_commit_lower_bound(1, 900, late.clone());
        assert_eq!(get(&late).commit_ts, 400);
    }

    #[test]
    fn test_new_txn_rejects_live_id() {
        let handler = MemoryHandler::default();
        let first = HandlerResult::new();
        handler.new_txn(&TxnEntry::new(7, 0), 0, 1000, first.clone());
        get(&first);

        let clash = HandlerResult::new();
        handler.new_txn(&TxnEntry::new(7, 0), 10, 1000, clash.clone());
        assert!(clash.is_error());

        let status = HandlerResult::new();
        handler.update_txn_status(7, TxnStatus::Aborted, &None, status.clone());
        get(&status);
        let reuse = HandlerResult::new();
        handler.new_txn(&TxnEntry::new(7, 0), 20, 1000, reuse.clone());
        get(&reuse);
    }

    #[test]
    fn test_deferred_mode_waits_for_batch() {
        let handler = MemoryHandler::deferred();
        let result = HandlerResult::new();
        handler.get_version_list("t", &Key::Int(1), 0, result.clone());
        assert!(!result.is_finished());
        assert_eq!(handler.pending_calls(), 1);
        handler.send_batch();
        assert!(result.is_finished());
        assert_eq!(handler.pending_calls(), 0);
    }

    #[test]
    fn test_injected_fault_is_one_shot() {
        let handler = MemoryHandler::default();
        handler.fail_next(HandlerCall::GetTxn);
        handler.new_txn(&TxnEntry::new(1, 0), 0, 1000, HandlerResult::new());

        let failed = HandlerResult::new();
        handler.get_txn(1, failed.clone());
        assert!(failed.is_error());

        let ok = HandlerResult::new();
        handler.get_txn(1, ok.clone());
        assert_eq!(get(&ok).tx_id, 1);
        assert_eq!(handler.call_count(HandlerCall::GetTxn), 2);
    }

    #[test]
    fn test_clean_stale_versions_and_txns() {
        let handler = MemoryHandler::default();
        let key = Key::Int(5);
        for (version, ts) in [(1, 100), (2, 200)] {
            let mut entry = VersionEntry::default();
            entry.version = version;
            entry.tx_id = version;
            entry.is_deleted = false;
            handler.upload_version("t", &key, &entry, &None, HandlerResult::new());
            let commit = VersionCommit {
                version,
                expect_tx_id: version,
                begin_ts: ts,
                end_ts: MAX_TIMESTAMP,
                tx_id: EMPTY_TX_ID,
            };
            handler.commit_version("t", &key, &commit, Some(&Record::Int(version)), &None, HandlerResult::new());
        }
        let removed = HandlerResult::new();
        handler.clean_stale_version("t", 150, removed.clone());
        // only the placeholder closed at 100 is old enough
        assert_eq!(get(&removed), 1);
        assert_eq!(handler.version_list("t", &key).len(), 2);

        handler.new_txn(&TxnEntry::new(9, 0), 0, 1000, HandlerResult::new());
        handler.update_txn_status(9, TxnStatus::Aborted, &None, HandlerResult::new());
        let cleaned = HandlerResult::new();
        handler.clean_stale_txn(10, cleaned.clone());
        assert_eq!(get(&cleaned), 1);
        assert!(handler.txn(9).is_none());
    }
}
