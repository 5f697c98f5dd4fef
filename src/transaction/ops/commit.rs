//! Commit protocol: upload, commit timestamp, validation, log, finalize
//!
//! ```text
//! Upload ─► SetCommitTs ─► Validate ─► WriteToLog ─► CommitStatus ─► CommitPostProcess
//!   │            │            │             │
//!   └────────────┴────────────┴─────────────┴──► abort path
//! ```

use crate::error::{Result, TxError};
use crate::transaction::context::ExecutorContext;
use crate::transaction::execution::TransactionExecution;
use crate::txlog::LoggedWrite;
use crate::types::Timestamp;
use crate::versiondb::{
    TxnStatus, VersionCommit, VersionEntry, DEFAULT_BEGIN_TS, DEFAULT_END_TS, DEFAULT_VERSION,
    EMPTY_TX_ID, MAX_TIMESTAMP,
};

use super::{grow, OpKind};

impl TransactionExecution {
    pub(super) fn call_upload(&mut self, ctx: &mut ExecutorContext) {
        let count = self.local_state.write_set_size();
        let targets = &mut self.nodes.upload.targets;
        targets.clear();
        targets.extend(0..count);
        grow(&mut self.nodes.upload_entries, count);
        for i in 0..count {
            self.invoke(OpKind::UploadEntry(i), ctx);
        }
    }

    pub(super) fn next_upload(&mut self) -> Option<OpKind> {
        if self.status == TxnStatus::WaitForAborting {
            self.abort_now();
            return None;
        }
        Some(OpKind::SetCommitTs)
    }

    pub(super) fn call_upload_entry(&mut self, i: usize, ctx: &mut ExecutorContext) {
        let index = self.nodes.upload.targets[i];
        let done = &mut self.nodes.upload_entries[i].state;
        done.reset();

        let Some(key) = self.local_state.write_key(index) else {
            done.fail("write entry without a key");
            return;
        };
        let write = self.local_state.write(index);
        let entry = VersionEntry {
            version: write.version,
            tx_id: self.txn_id,
            begin_ts: DEFAULT_BEGIN_TS,
            end_ts: DEFAULT_END_TS,
            max_commit_ts: 0,
            is_deleted: write.is_deleted,
            record: None,
            extension: write.extension.clone(),
        };
        let read_extension = write
            .read_entry
            .and_then(|read| self.local_state.read(read).extension.clone());
        ctx.handler
            .upload_version(&key.table, &key.key, &entry, &read_extension, done.clone());
    }

    pub(super) fn next_upload_entry(&mut self, i: usize) -> Option<OpKind> {
        let index = self.nodes.upload.targets[i];
        let done = &self.nodes.upload_entries[i].state;
        if done.is_error() {
            log::debug!(
                "Transaction {}: write-write conflict: {}",
                self.txn_id,
                done.error_message().unwrap_or_default()
            );
            self.prepare_abort();
            return None;
        }
        self.local_state.write_mut(index).need_post_processing = true;
        if let Some(max_commit_ts) = done.take() {
            self.max_commit_ts_of_writers = self.max_commit_ts_of_writers.max(max_commit_ts);
        }
        None
    }

    /// Smallest timestamp this transaction may commit at: after every
    /// version it overwrites was read, and not before any version it read
    /// began. A key read and written must commit strictly after the read.
    fn propose_commit_ts(&self) -> Timestamp {
        let mut proposed = (self.max_commit_ts_of_writers + 1).max(self.commit_ts_local);
        for (i, read) in self.local_state.reads().iter() {
            let written = self
                .local_state
                .read_key(i)
                .map_or(false, |k| self.local_state.find_in_write_set(&k.table, &k.key).is_some());
            let floor = if written { read.begin_ts + 1 } else { read.begin_ts };
            proposed = proposed.max(floor);
        }
        proposed
    }

    pub(super) fn call_set_commit_ts(&mut self, ctx: &mut ExecutorContext) {
        self.reset_time(ctx);
        let proposed = self.propose_commit_ts();
        self.set_commit_ts(proposed, ctx);

        let done = &mut self.nodes.set_commit_ts.state;
        done.reset();
        ctx.handler
            .set_commit_timestamp(self.txn_id, proposed, &self.txn_entry.extension, done.clone());
    }

    pub(super) fn next_set_commit_ts(&mut self, ctx: &mut ExecutorContext) -> Option<OpKind> {
        let done = &self.nodes.set_commit_ts.state;
        let adopted = if done.is_error() { None } else { done.take() };
        match adopted {
            Some(commit_ts) if commit_ts >= 0 => {
                self.set_commit_ts(commit_ts, ctx);
                Some(OpKind::Validate)
            }
            _ => {
                log::debug!("Transaction {}: commit timestamp refused", self.txn_id);
                self.abort_now();
                None
            }
        }
    }

    pub(super) fn call_validate(&mut self, ctx: &mut ExecutorContext) {
        let targets = &mut self.nodes.validate.targets;
        targets.clear();
        targets.extend(
            self.local_state
                .reads()
                .iter()
                .filter(|(_, read)| !read.is_updated)
                .map(|(i, _)| i),
        );
        let count = targets.len();
        grow(&mut self.nodes.validate_entries, count);
        grow(&mut self.nodes.push_lower_bound, count);
        for i in 0..count {
            self.invoke(OpKind::ValidateEntry(i), ctx);
        }
    }

    pub(super) fn next_validate(&mut self) -> Option<OpKind> {
        if self.status == TxnStatus::WaitForAborting {
            self.abort_now();
            return None;
        }
        Some(OpKind::WriteToLog)
    }

    pub(super) fn call_validate_entry(&mut self, i: usize, ctx: &mut ExecutorContext) {
        let index = self.nodes.validate.targets[i];
        let done = &mut self.nodes.validate_entries[i].state;
        done.reset();

        let Some(key) = self.local_state.read_key(index) else {
            done.fail("read entry without a key");
            return;
        };
        let read = self.local_state.read(index);
        ctx.handler.update_max_commit_ts_and_reread(
            &key.table,
            &key.key,
            read.version,
            self.commit_ts,
            &read.extension,
            done.clone(),
        );
    }

    pub(super) fn next_validate_entry(&mut self, i: usize) -> Option<OpKind> {
        let index = self.nodes.validate.targets[i];
        let done = &self.nodes.validate_entries[i].state;
        if done.is_error() {
            self.prepare_abort();
            return None;
        }
        // the reread dropped this transaction's read counter
        self.local_state.read_mut(index).need_release = false;

        let version = done.take().unwrap_or_default();
        if version.version == DEFAULT_VERSION {
            log::debug!("Transaction {}: read version vanished", self.txn_id);
            self.prepare_abort();
            return None;
        }
        if self.commit_ts > version.end_ts {
            log::debug!(
                "Transaction {}: read version {} was overwritten at {} before {}",
                self.txn_id,
                version.version,
                version.end_ts,
                self.commit_ts
            );
            self.prepare_abort();
            return None;
        }
        if version.tx_id != EMPTY_TX_ID && version.tx_id != self.txn_id {
            self.nodes.push_lower_bound[i].state.conflict_txn = version.tx_id;
            return Some(OpKind::PushLowerBound(i));
        }
        None
    }

    pub(super) fn call_push_lower_bound(&mut self, i: usize, ctx: &mut ExecutorContext) {
        let state = &mut self.nodes.push_lower_bound[i].state;
        state.done.reset();
        ctx.handler
            .update_commit_lower_bound(state.conflict_txn, self.commit_ts + 1, state.done.clone());
    }

    pub(super) fn next_push_lower_bound(&mut self, i: usize) -> Option<OpKind> {
        let state = &self.nodes.push_lower_bound[i].state;
        let Some(conflict) = state.done.take() else {
            self.prepare_abort();
            return None;
        };
        let settled_before_us = conflict.has_commit_ts() && conflict.commit_ts <= self.commit_ts;
        let too_late = match conflict.status {
            TxnStatus::Committed | TxnStatus::Ongoing => settled_before_us,
            _ => false,
        };
        if too_late {
            log::debug!(
                "Transaction {}: writer {} fixed its commit at {} before {}",
                self.txn_id,
                conflict.tx_id,
                conflict.commit_ts,
                self.commit_ts
            );
            self.prepare_abort();
        }
        None
    }

    fn logged_writes(&self) -> Vec<LoggedWrite> {
        self.local_state
            .writes()
            .iter()
            .filter_map(|(i, write)| {
                let key = self.local_state.write_key(i)?;
                Some(LoggedWrite {
                    table: key.table.clone(),
                    key: key.key.clone(),
                    version: write.version,
                    is_deleted: write.is_deleted,
                    record: write.record.clone(),
                })
            })
            .collect()
    }

    pub(super) fn call_write_to_log(&mut self, ctx: &mut ExecutorContext) {
        let state = &mut self.nodes.write_to_log.state;
        state.busy = false;
        state.done.reset();
        let done = state.done.clone();
        let Some(tx_log) = ctx.active_log() else {
            done.complete(());
            return;
        };
        if self.local_state.write_set_size() == 0 {
            done.complete(());
            return;
        }

        self.txn_entry.commit_ts = self.commit_ts;
        let writes = self.logged_writes();
        match tx_log.append_async(ctx.executor_id, writes, &self.txn_entry, done.clone(), true) {
            Ok(()) => {}
            Err(TxError::LogBusy) => {
                log::trace!("Transaction {}: log busy, retrying append", self.txn_id);
                self.nodes.write_to_log.state.busy = true;
                done.complete(());
            }
            Err(e) => done.fail(e.to_string()),
        }
    }

    pub(super) fn next_write_to_log(&mut self) -> Option<OpKind> {
        let state = &self.nodes.write_to_log.state;
        if state.done.is_error() {
            log::error!(
                "Transaction {}: log append failed, aborting: {}",
                self.txn_id,
                state.done.error_message().unwrap_or_default()
            );
            self.abort_now();
            return None;
        }
        if state.busy {
            return Some(OpKind::WriteToLog);
        }
        Some(OpKind::CommitStatus)
    }

    pub(super) fn call_commit_status(&mut self, ctx: &mut ExecutorContext) {
        let done = &mut self.nodes.commit_status.state;
        done.reset();
        ctx.handler.update_txn_status(
            self.txn_id,
            TxnStatus::Committed,
            &self.txn_entry.extension,
            done.clone(),
        );
    }

    pub(super) fn next_commit_status(&mut self) -> Result<Option<OpKind>> {
        if self.nodes.commit_status.state.is_error() {
            return Err(self.recover("update txn status to committed failed"));
        }
        let commit_ts = self.commit_ts;
        self.stage(|r| {
            r.set_status(TxnStatus::Committed);
            r.commit_ts = Some(commit_ts);
        });
        Ok(Some(OpKind::CommitPostProcess))
    }

    pub(super) fn call_commit_post_process(&mut self, ctx: &mut ExecutorContext) {
        let targets = &mut self.nodes.commit_post.targets;
        targets.clear();
        targets.extend(
            self.local_state
                .writes()
                .iter()
                .filter(|(_, write)| write.need_post_processing)
                .map(|(i, _)| i),
        );
        let count = targets.len();
        grow(&mut self.nodes.commit_entries, count);
        for i in 0..count {
            self.invoke(OpKind::CommitEntry(i), ctx);
        }
    }

    pub(super) fn next_commit_post_process(&mut self) -> Option<OpKind> {
        self.status = TxnStatus::Committed;
        self.finished = true;
        let commit_ts = self.commit_ts;
        log::debug!("Transaction {} committed at {}", self.txn_id, commit_ts);
        self.deliver(|r| {
            r.set_status(TxnStatus::Committed);
            r.commit_ts = Some(commit_ts);
        });
        None
    }

    pub(super) fn call_commit_entry(&mut self, i: usize, ctx: &mut ExecutorContext) {
        let index = self.nodes.commit_post.targets[i];
        let done = &mut self.nodes.commit_entries[i].state;
        done.reset();

        let Some(key) = self.local_state.write_key(index) else {
            done.fail("write entry without a key");
            return;
        };
        let write = self.local_state.write(index);
        let commit = VersionCommit {
            version: write.version,
            expect_tx_id: self.txn_id,
            begin_ts: self.commit_ts,
            end_ts: MAX_TIMESTAMP,
            tx_id: EMPTY_TX_ID,
        };
        ctx.handler.commit_version(
            &key.table,
            &key.key,
            &commit,
            write.record.as_ref(),
            &write.extension,
            done.clone(),
        );
    }

    pub(super) fn next_commit_entry(&mut self, i: usize) -> Result<Option<OpKind>> {
        let index = self.nodes.commit_post.targets[i];
        if self.nodes.commit_entries[i].state.is_error() {
            return Err(self.recover("commit version failed"));
        }
        if let Some(read) = self.local_state.write(index).read_entry {
            self.local_state.read_mut(read).need_release = false;
        }
        Ok(None)
    }
}
