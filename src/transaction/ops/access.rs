//! Begin, reads and buffered writes

use crate::transaction::context::ExecutorContext;
use crate::transaction::execution::TransactionExecution;
use crate::versiondb::{pick_visible_version, TxnStatus, EMPTY_TX_ID, FIRST_VERSION, MAX_TIMESTAMP};

use super::OpKind;

impl TransactionExecution {
    pub(super) fn call_init_txn(&mut self, ctx: &mut ExecutorContext) {
        let done = &mut self.nodes.init_txn.state;
        done.reset();
        ctx.handler.new_txn(
            &self.txn_entry,
            self.commit_ts_local,
            ctx.config.max_txn_execution_time_ms,
            done.clone(),
        );
    }

    pub(super) fn next_init_txn(&mut self, ctx: &mut ExecutorContext) -> Option<OpKind> {
        if self.nodes.init_txn.state.is_error() {
            log::debug!("Transaction id {} is taken, drawing a new one", self.txn_id);
            self.reset_txn_id_and_time(ctx);
            return Some(OpKind::InitTxn);
        }
        log::debug!("Transaction {} started at {}", self.txn_id, self.commit_ts_local);
        self.deliver(|r| r.set_status(TxnStatus::Ongoing));
        None
    }

    /// Claim a read set slot for the read about to be issued
    pub(crate) fn start_read_outside(&mut self, deliver: bool) {
        let slot = self.local_state.insert_read_set();
        let state = &mut self.nodes.read_outside.state;
        state.slot = slot;
        state.deliver = deliver;
    }

    pub(super) fn call_read_outside(&mut self, ctx: &mut ExecutorContext) {
        let done = &mut self.nodes.read_outside.state.done;
        done.reset();
        match &self.args.key {
            Some(key) => ctx.handler.get_version_list(
                &self.args.table,
                key,
                self.commit_ts_local,
                done.clone(),
            ),
            None => done.fail("read without a key"),
        }
    }

    pub(super) fn next_read_outside(&mut self) -> Option<OpKind> {
        let state = &self.nodes.read_outside.state;
        let (slot, deliver) = (state.slot, state.deliver);

        if state.done.is_error() {
            log::debug!(
                "Read of {}.{:?} failed: {}",
                self.args.table,
                self.args.key,
                state.done.error_message().unwrap_or_default()
            );
            self.local_state.release_read_set();
            self.update_result(deliver, |r| r.set_error());
            return None;
        }

        let pair = state.done.take().unwrap_or_default();
        let entry = self.local_state.read_mut(slot);
        match pick_visible_version(&pair) {
            Some(visible) => {
                entry.version = visible.version;
                entry.tx_id = visible.tx_id;
                entry.begin_ts = visible.begin_ts;
                entry.end_ts = visible.end_ts;
                entry.is_deleted = visible.is_deleted;
                entry.record = visible.record.clone();
                entry.extension = visible.extension.clone();

                if visible.is_deleted {
                    self.update_result(deliver, |r| r.set_deleted());
                } else {
                    let record = visible.record.clone();
                    self.update_result(deliver, |r| r.set_record(record));
                }
            }
            None => {
                // nothing visible: the widest window over the placeholder version
                entry.version = FIRST_VERSION;
                entry.tx_id = EMPTY_TX_ID;
                entry.begin_ts = 0;
                entry.end_ts = MAX_TIMESTAMP;
                entry.is_deleted = true;
                entry.record = None;
                entry.extension = pair[0].extension.clone();
                self.update_result(deliver, |r| r.set_null());
            }
        }
        if let Some(key) = &self.args.key {
            self.local_state.set_read_key(slot, &self.args.table, key);
        }
        None
    }

    pub(super) fn call_read_datastore(&mut self, ctx: &mut ExecutorContext) {
        let state = &mut self.nodes.read_datastore.state;
        state.done.reset();
        state.from_cache = false;

        let default = self.args.record.clone();
        let (Some(store), Some(key)) = (ctx.active_datastore().cloned(), &self.args.key) else {
            state.done.complete(default);
            return;
        };
        if !state.need_to_read {
            state.done.complete(default);
            return;
        }
        if ctx.config.enable_volatile_cache {
            if let Some(record) = ctx.cache.get(&self.args.table, key) {
                state.from_cache = true;
                state.done.complete(Some(record));
                return;
            }
        }
        store.read_record(&self.args.table, key, state.done.clone());
    }

    pub(super) fn next_read_datastore(&mut self, ctx: &mut ExecutorContext) -> Option<OpKind> {
        let state = &self.nodes.read_datastore.state;
        if state.done.is_error() {
            self.deliver(|r| r.set_error());
            return None;
        }
        match state.done.take().flatten() {
            Some(record) => {
                if ctx.config.enable_volatile_cache && !state.from_cache {
                    if let Some(key) = &self.args.key {
                        ctx.cache.insert(&self.args.table, key, record.clone());
                    }
                }
                self.deliver(|r| r.set_record(Some(record)));
            }
            None => self.deliver(|r| r.set_null()),
        }
        None
    }

    /// Newest pending write to the target key, if any
    fn pending_write(&self) -> Option<usize> {
        let key = self.args.key.as_ref()?;
        self.local_state.find_in_write_set(&self.args.table, key)
    }

    /// Newest read of the target key, if any
    fn prior_read(&self) -> Option<usize> {
        let key = self.args.key.as_ref()?;
        self.local_state.find_in_read_set(&self.args.table, key)
    }

    /// Stage a write superseding read entry `read`
    fn stage_write(&mut self, read: usize, is_deleted: bool) {
        let Some(key) = self.args.key.clone() else {
            return;
        };
        let read_entry = self.local_state.read_mut(read);
        read_entry.is_updated = true;
        let version = read_entry.version + 1;
        let record = if is_deleted {
            None
        } else {
            self.args.record.clone()
        };
        self.local_state.insert_write_set(
            &self.args.table,
            &key,
            version,
            is_deleted,
            record,
            Some(read),
            false,
        );
    }

    fn reject(&self, reason: &str) {
        log::warn!(
            "Transaction {}: {} on {}.{:?}",
            self.txn_id,
            reason,
            self.args.table,
            self.args.key
        );
        self.deliver(|r| r.set_error());
    }

    /// Resolve Insert/Upsert against an earlier write to the same key.
    /// Returns false when there is none and the key has to be read.
    fn rewrite_pending(&mut self, must_be_deleted: bool) -> bool {
        let Some(index) = self.pending_write() else {
            return false;
        };
        if must_be_deleted && !self.local_state.write(index).is_deleted {
            self.reject("insert of an existing key");
            return true;
        }
        let entry = self.local_state.write_mut(index);
        entry.is_deleted = false;
        entry.record = self.args.record.clone();
        self.deliver(|_| {});
        true
    }

    pub(super) fn call_insert(&mut self, ctx: &mut ExecutorContext) {
        self.nodes.insert.state = self.rewrite_pending(true);
        if !self.nodes.insert.state {
            self.start_read_outside(false);
            self.invoke(OpKind::ReadOutside, ctx);
        }
    }

    pub(super) fn next_insert(&mut self) -> Option<OpKind> {
        if self.nodes.insert.state {
            return None;
        }
        if self.nodes.read_outside.state.done.is_error() {
            self.deliver(|_| {});
            return None;
        }
        match self.prior_read() {
            Some(read) if self.local_state.read(read).is_deleted => {
                self.stage_write(read, false);
                self.deliver(|_| {});
            }
            _ => self.reject("insert of an existing key"),
        }
        None
    }

    pub(super) fn call_upsert(&mut self, ctx: &mut ExecutorContext) {
        self.nodes.upsert.state = self.rewrite_pending(false);
        if !self.nodes.upsert.state {
            self.start_read_outside(false);
            self.invoke(OpKind::ReadOutside, ctx);
        }
    }

    pub(super) fn next_upsert(&mut self) -> Option<OpKind> {
        if self.nodes.upsert.state {
            return None;
        }
        if self.nodes.read_outside.state.done.is_error() {
            self.deliver(|_| {});
            return None;
        }
        match self.prior_read() {
            Some(read) => {
                self.stage_write(read, false);
                self.deliver(|_| {});
            }
            None => self.reject("upsert without a read"),
        }
        None
    }

    pub(super) fn call_update(&mut self) {
        if let Some(index) = self.pending_write() {
            if self.local_state.write(index).is_deleted {
                self.reject("update of a deleted key");
            } else {
                self.local_state.write_mut(index).record = self.args.record.clone();
                self.deliver(|_| {});
            }
            return;
        }
        match self.prior_read() {
            Some(read) => {
                let entry = self.local_state.read(read);
                if entry.is_deleted && entry.version > FIRST_VERSION {
                    self.reject("update of a deleted key");
                } else {
                    self.stage_write(read, false);
                    self.deliver(|_| {});
                }
            }
            None => self.reject("update without a prior read"),
        }
    }

    pub(super) fn call_delete(&mut self) {
        if let Some(index) = self.pending_write() {
            let entry = self.local_state.write_mut(index);
            if entry.is_deleted {
                self.reject("delete of a deleted key");
            } else {
                entry.is_deleted = true;
                entry.record = None;
                self.deliver(|_| {});
            }
            return;
        }
        match self.prior_read() {
            Some(read) if !self.local_state.read(read).is_deleted => {
                self.stage_write(read, true);
                self.deliver(|_| {});
            }
            Some(_) => self.reject("delete of a deleted key"),
            None => self.reject("delete without a prior read"),
        }
    }
}
