//! Reusable executor slot: one execution plus its session's request queue

use std::sync::Arc;

use crate::error::Result;
use crate::types::SessionId;

use super::context::ExecutorContext;
use super::execution::TransactionExecution;
use super::request::{OperationRequest, OperationType, TransactionRequest};

pub struct TransactionTask {
    execution: TransactionExecution,
    requests: TransactionRequest,
    session_id: Option<SessionId>,
}

impl TransactionTask {
    pub fn new(local_state_capacity: usize) -> Self {
        Self {
            execution: TransactionExecution::new(local_state_capacity),
            requests: TransactionRequest::default(),
            session_id: None,
        }
    }

    /// Bind the free slot to a session and start a fresh transaction
    pub fn bind(&mut self, session_id: SessionId, ctx: &mut ExecutorContext) {
        self.execution.reset(ctx);
        self.requests.reset();
        self.session_id = Some(session_id);
    }

    /// Return the slot to the free pool. Requests the transaction never
    /// got to are failed.
    pub fn release(&mut self) {
        while let Some(request) = self.requests.next_request() {
            log::warn!(
                "Dropping {:?} of session {:?}: its transaction already finished",
                request.operation(),
                self.session_id
            );
            request.finish(|r| r.set_error());
        }
        self.requests.reset();
        self.session_id = None;
    }

    pub fn in_use(&self) -> bool {
        self.session_id.is_some()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn execution(&self) -> &TransactionExecution {
        &self.execution
    }

    pub fn push_request(&mut self, request: Arc<OperationRequest>) {
        self.requests.push(request);
    }

    pub fn has_pending(&self) -> bool {
        self.requests.has_pending()
    }

    /// Bound, nothing in flight, nothing queued: waiting on the client
    pub fn is_waiting(&self) -> bool {
        self.in_use()
            && self.execution.is_idle()
            && !self.execution.is_finished()
            && !self.requests.has_pending()
    }

    /// One scheduling tick: move the state machine, then hand it the next
    /// request if it is idle
    pub fn advance(&mut self, ctx: &mut ExecutorContext) -> Result<()> {
        let idle = self.execution.move_forward(ctx)?;
        if idle && !self.execution.is_finished() {
            if let Some(request) = self.requests.next_request() {
                dispatch(&mut self.execution, request, ctx);
            }
        }
        Ok(())
    }

    /// Abort a transaction left waiting on its client
    pub fn abort_waiting(&mut self, ctx: &mut ExecutorContext) {
        self.execution.current_request = None;
        self.execution.abort(ctx);
    }
}

/// Route a request to the matching execution entry point
pub(crate) fn dispatch(
    execution: &mut TransactionExecution,
    request: Arc<OperationRequest>,
    ctx: &mut ExecutorContext,
) {
    request.set_up();
    let input = request.input();
    execution.set_current_request(Arc::clone(&request));

    let table = input.table.as_str();
    match (request.operation(), input.key.as_ref(), input.record) {
        (OperationType::Begin, _, _) => execution.begin(ctx, request.txn_type()),
        (OperationType::Commit, _, _) => execution.commit(ctx),
        (OperationType::Abort, _, _) => execution.abort(ctx),
        (OperationType::Read | OperationType::ReadOutside, Some(key), _) => {
            execution.read(ctx, table, key)
        }
        (OperationType::ReadDataStore, Some(key), record) => {
            execution.read_datastore(ctx, table, key, record, request.need_to_read())
        }
        (OperationType::Insert, Some(key), Some(record)) => execution.insert(ctx, table, key, record),
        (OperationType::Upsert, Some(key), Some(record)) => execution.upsert(ctx, table, key, record),
        (OperationType::Update, Some(key), Some(record)) => execution.update(ctx, table, key, record),
        (OperationType::Delete, Some(key), _) => execution.delete(ctx, table, key),
        (operation, _, _) => {
            log::warn!(
                "Malformed {:?} for session {}: missing key or record",
                operation,
                request.session_id()
            );
            request.finish(|r| r.set_error());
        }
    }
}
