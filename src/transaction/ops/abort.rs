//! Abort path: drop uploaded versions, release read counters, report

use crate::error::Result;
use crate::transaction::context::ExecutorContext;
use crate::transaction::execution::TransactionExecution;
use crate::versiondb::TxnStatus;

use super::{grow, OpKind};

impl TransactionExecution {
    pub(super) fn call_abort_post_process(&mut self, ctx: &mut ExecutorContext) {
        let targets = &mut self.nodes.abort_post.targets;
        targets.clear();
        targets.extend(
            self.local_state
                .writes()
                .iter()
                .filter(|(_, write)| write.need_post_processing)
                .map(|(i, _)| i),
        );
        let count = targets.len();
        grow(&mut self.nodes.abort_entries, count);
        for i in 0..count {
            self.invoke(OpKind::AbortEntry(i), ctx);
        }
    }

    pub(super) fn call_abort_entry(&mut self, i: usize, ctx: &mut ExecutorContext) {
        let index = self.nodes.abort_post.targets[i];
        let done = &mut self.nodes.abort_entries[i].state;
        done.reset();

        let Some(key) = self.local_state.write_key(index) else {
            done.fail("write entry without a key");
            return;
        };
        let write = self.local_state.write(index);
        ctx.handler
            .delete_version(&key.table, &key.key, write.version, &write.extension, done.clone());
    }

    pub(super) fn next_abort_entry(&mut self, i: usize) -> Result<Option<OpKind>> {
        let index = self.nodes.abort_post.targets[i];
        if self.nodes.abort_entries[i].state.is_error() {
            return Err(self.recover("delete version failed"));
        }
        if let Some(read) = self.local_state.write(index).read_entry {
            let read = self.local_state.read_mut(read);
            if read.need_post_processing {
                read.need_release = false;
            }
        }
        Ok(None)
    }

    pub(super) fn call_release_read_counters(&mut self, ctx: &mut ExecutorContext) {
        let targets = &mut self.nodes.release.targets;
        targets.clear();
        targets.extend(
            self.local_state
                .reads()
                .iter()
                .filter(|(_, read)| read.need_release)
                .map(|(i, _)| i),
        );
        let count = targets.len();
        grow(&mut self.nodes.release_entries, count);
        for i in 0..count {
            self.invoke(OpKind::ReleaseEntry(i), ctx);
        }
    }

    pub(super) fn next_release_read_counters(&mut self, ctx: &mut ExecutorContext) -> Option<OpKind> {
        self.status = TxnStatus::Aborted;
        self.finished = true;
        log::debug!("Transaction {} aborted", self.txn_id);
        self.deliver(|r| r.set_status(TxnStatus::Aborted));

        let status = &mut self.nodes.abort_status;
        status.reported = false;
        status.done.reset();
        ctx.handler.update_txn_status(
            self.txn_id,
            TxnStatus::Aborted,
            &self.txn_entry.extension,
            status.done.clone(),
        );
        self.check_abort_status();
        None
    }

    /// Warn once if the handler refused the Aborted status; its copy of the
    /// transaction stays Ongoing.
    pub(crate) fn check_abort_status(&mut self) {
        let status = &mut self.nodes.abort_status;
        if status.reported || !status.done.is_error() {
            return;
        }
        status.reported = true;
        log::warn!(
            "Transaction {}: Aborted status update failed: {}",
            self.txn_id,
            status.done.error_message().unwrap_or_default()
        );
    }

    pub(super) fn call_release_entry(&mut self, i: usize, ctx: &mut ExecutorContext) {
        let index = self.nodes.release.targets[i];
        let done = &mut self.nodes.release_entries[i].state;
        done.reset();

        let Some(key) = self.local_state.read_key(index) else {
            done.complete(());
            return;
        };
        let read = self.local_state.read(index);
        ctx.handler
            .release_read_counter(&key.table, &key.key, read.version, &read.extension, done.clone());
    }

    pub(super) fn next_release_entry(&mut self, i: usize) -> Result<Option<OpKind>> {
        let index = self.nodes.release.targets[i];
        if self.nodes.release_entries[i].state.is_error() {
            return Err(self.recover("release read counter failed"));
        }
        self.local_state.read_mut(index).need_release = false;
        Ok(None)
    }
}
