//! One transaction slot: local state, step state and the call stack
//!
//! ## Scheduling
//!
//! Client operations (`begin`, `read`, `insert`, ..., `commit`) push their
//! first step and call it. The executor then calls [`move_forward`] once
//! per tick. A pass walks the stack top-down; every finished step is asked
//! for its successor, which takes over its slot and is called right away,
//! so steps that resolve locally chain within one pass. Handler and log
//! calls are the only suspension points.
//!
//! A fan-out child that hits a conflict marks the transaction
//! `WaitForAborting`; its parent turns that into `Aborting` once all
//! siblings are done, and the pass then switches to the abort path.
//!
//! [`move_forward`]: TransactionExecution::move_forward

use std::sync::Arc;

use crate::error::{Result, TxError};
use crate::types::{Key, Record, Timestamp, TxnId};
use crate::versiondb::{TxnEntry, TxnStatus};

use super::context::ExecutorContext;
use super::local_state::LocalState;
use super::ops::{OpArgs, OpKind, OperationNodes};
use super::request::{OpResult, OperationRequest};

pub struct TransactionExecution {
    pub(crate) txn_id: TxnId,
    pub(crate) txn_entry: TxnEntry,
    pub(crate) txn_type: i32,
    /// Local clock reading reads are served at
    pub(crate) commit_ts_local: Timestamp,
    pub(crate) commit_ts: Timestamp,
    /// Highest `max_commit_ts` among the versions this transaction overwrites
    pub(crate) max_commit_ts_of_writers: Timestamp,
    pub(crate) status: TxnStatus,
    pub(crate) finished: bool,
    pub(crate) local_state: LocalState,
    pub(crate) nodes: OperationNodes,
    pub(crate) stack: Vec<Option<OpKind>>,
    pub(crate) current_request: Option<Arc<OperationRequest>>,
    pub(crate) args: OpArgs,
}

impl TransactionExecution {
    pub fn new(local_state_capacity: usize) -> Self {
        Self {
            txn_id: 0,
            txn_entry: TxnEntry::default(),
            txn_type: 0,
            commit_ts_local: 0,
            commit_ts: -1,
            max_commit_ts_of_writers: -1,
            status: TxnStatus::Ongoing,
            finished: false,
            local_state: LocalState::new(local_state_capacity),
            nodes: OperationNodes::default(),
            stack: Vec::new(),
            current_request: None,
            args: OpArgs::default(),
        }
    }

    /// Prepare the slot for a new transaction: fresh id and clock reading,
    /// empty read/write sets. Pools and step state are kept for reuse.
    pub fn reset(&mut self, ctx: &mut ExecutorContext) {
        self.check_abort_status();
        self.local_state.reset();
        self.stack.clear();
        self.current_request = None;
        self.finished = false;
        self.status = TxnStatus::Ongoing;
        self.commit_ts = -1;
        self.max_commit_ts_of_writers = -1;
        self.txn_type = 0;
        self.reset_txn_id_and_time(ctx);
    }

    pub(crate) fn reset_txn_id_and_time(&mut self, ctx: &mut ExecutorContext) {
        self.txn_id = ctx.id_generator.generate_id();
        self.commit_ts_local = ctx.time_provider.get_time();
        self.txn_entry.reset(self.txn_id, self.commit_ts_local);
    }

    /// Refresh the local clock reading before proposing a commit timestamp
    pub(crate) fn reset_time(&mut self, ctx: &mut ExecutorContext) {
        self.commit_ts_local = ctx.time_provider.get_time();
        self.txn_entry.reset_lower_bound(self.commit_ts_local);
    }

    pub(crate) fn set_commit_ts(&mut self, commit_ts: Timestamp, ctx: &mut ExecutorContext) {
        self.commit_ts = commit_ts;
        ctx.time_provider.set_time(commit_ts);
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn txn_type(&self) -> i32 {
        self.txn_type
    }

    pub fn status(&self) -> TxnStatus {
        self.status
    }

    /// Commit timestamp, -1 until one is proposed
    pub fn commit_ts(&self) -> Timestamp {
        self.commit_ts
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// No step in flight; the next client operation can be dispatched
    pub fn is_idle(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn local_state(&self) -> &LocalState {
        &self.local_state
    }

    pub fn current_request(&self) -> Option<&Arc<OperationRequest>> {
        self.current_request.as_ref()
    }

    pub fn set_current_request(&mut self, request: Arc<OperationRequest>) {
        self.current_request = Some(request);
    }

    fn set_args(&mut self, table: &str, key: &Key, record: Option<Record>) {
        self.args.table.clear();
        self.args.table.push_str(table);
        self.args.key = Some(key.clone());
        self.args.record = record;
    }

    pub fn begin(&mut self, ctx: &mut ExecutorContext, txn_type: i32) {
        self.txn_type = txn_type;
        self.invoke(OpKind::InitTxn, ctx);
    }

    /// Read the visible version of a key and deliver it
    pub fn read(&mut self, ctx: &mut ExecutorContext, table: &str, key: &Key) {
        self.set_args(table, key, None);
        self.start_read_outside(true);
        self.invoke(OpKind::ReadOutside, ctx);
    }

    /// Read a key from cold storage. `default` is delivered unchanged when
    /// `need_to_read` is false or cold storage is off.
    pub fn read_datastore(
        &mut self,
        ctx: &mut ExecutorContext,
        table: &str,
        key: &Key,
        default: Option<Record>,
        need_to_read: bool,
    ) {
        self.set_args(table, key, default);
        self.nodes.read_datastore.state.need_to_read = need_to_read;
        self.invoke(OpKind::ReadDataStore, ctx);
    }

    pub fn insert(&mut self, ctx: &mut ExecutorContext, table: &str, key: &Key, record: Record) {
        self.set_args(table, key, Some(record));
        self.invoke(OpKind::Insert, ctx);
    }

    pub fn upsert(&mut self, ctx: &mut ExecutorContext, table: &str, key: &Key, record: Record) {
        self.set_args(table, key, Some(record));
        self.invoke(OpKind::Upsert, ctx);
    }

    pub fn update(&mut self, ctx: &mut ExecutorContext, table: &str, key: &Key, record: Record) {
        self.set_args(table, key, Some(record));
        self.invoke(OpKind::Update, ctx);
    }

    pub fn delete(&mut self, ctx: &mut ExecutorContext, table: &str, key: &Key) {
        self.set_args(table, key, None);
        self.invoke(OpKind::Delete, ctx);
    }

    pub fn commit(&mut self, ctx: &mut ExecutorContext) {
        self.invoke(OpKind::Upload, ctx);
    }

    /// Drop whatever is in flight and run the abort path
    pub fn abort(&mut self, ctx: &mut ExecutorContext) {
        self.stack.clear();
        self.invoke(OpKind::AbortPostProcess, ctx);
    }

    /// A fan-out child failed; abort once its siblings are done
    pub(crate) fn prepare_abort(&mut self) {
        self.status = TxnStatus::WaitForAborting;
    }

    /// Abort at the end of the current pass
    pub(crate) fn abort_now(&mut self) {
        self.status = TxnStatus::Aborting;
    }

    /// Local and handler state may now disagree. Fails the request so no
    /// caller waits forever and builds the error to surface.
    pub(crate) fn recover(&self, reason: &str) -> TxError {
        log::error!("Transaction {} needs manual recovery: {}", self.txn_id, reason);
        self.deliver(|r| r.set_error());
        TxError::needs_recovery(self.txn_id, reason)
    }

    /// Update the current request's result without notifying
    pub(crate) fn stage(&self, update: impl FnOnce(&mut OpResult)) {
        if let Some(request) = &self.current_request {
            request.stage(update);
        }
    }

    /// Update the current request's result and notify its caller
    pub(crate) fn deliver(&self, update: impl FnOnce(&mut OpResult)) {
        if let Some(request) = &self.current_request {
            request.finish(update);
        }
    }

    pub(crate) fn update_result(&self, notify: bool, update: impl FnOnce(&mut OpResult)) {
        if notify {
            self.deliver(update);
        } else {
            self.stage(update);
        }
    }

    /// Advance every finished step by one transition.
    ///
    /// Returns whether the stack is empty afterwards, i.e. the transaction
    /// is waiting for its next client operation or is finished. Fails only
    /// when the transaction needs manual recovery.
    pub fn move_forward(&mut self, ctx: &mut ExecutorContext) -> Result<bool> {
        if self.stack.is_empty() {
            return Ok(true);
        }

        let mut i = self.stack.len();
        while i > 0 {
            i -= 1;
            let Some(op) = self.stack[i] else {
                continue;
            };
            if !self.is_op_finished(op) {
                continue;
            }
            match self.next_op(op, ctx)? {
                Some(next) => {
                    self.stack[i] = Some(next);
                    self.call(next, ctx);
                }
                None => {
                    self.stack[i] = None;
                    if self.status == TxnStatus::Aborting {
                        break;
                    }
                }
            }
        }

        if self.status == TxnStatus::Aborting {
            log::debug!("Transaction {} switching to abort", self.txn_id);
            self.status = TxnStatus::Aborted;
            self.abort(ctx);
        } else {
            while matches!(self.stack.last(), Some(None)) {
                self.stack.pop();
            }
        }
        Ok(self.stack.is_empty())
    }
}
