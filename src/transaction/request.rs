//! Client-issued operations and their results
//!
//! A client thread builds an [`OperationRequest`], hands an `Arc` of it to
//! an executor and either polls [`OperationRequest::is_finished`] or blocks
//! in [`OperationRequest::wait`]. The executor thread fills in the result
//! and notifies.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::types::{Key, Record, SessionId, TableName, Timestamp};
use crate::versiondb::TxnStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperationType {
    Begin,
    Insert,
    Update,
    Upsert,
    Delete,
    Read,
    ReadOutside,
    ReadDataStore,
    Commit,
    Abort,
}

impl OperationType {
    /// Last request of a session
    pub fn ends_transaction(&self) -> bool {
        matches!(self, OperationType::Commit | OperationType::Abort)
    }
}

/// Outcome of one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpResult {
    pub record: Option<Record>,
    pub is_deleted: bool,
    /// The key has no visible version
    pub is_null: bool,
    pub is_error: bool,
    /// Transaction status, for Begin/Commit/Abort
    pub status: Option<TxnStatus>,
    /// Adopted commit timestamp of a committed transaction
    pub commit_ts: Option<Timestamp>,
}

impl OpResult {
    pub fn set_record(&mut self, record: Option<Record>) {
        self.record = record;
        self.is_deleted = false;
        self.is_null = false;
    }

    pub fn set_deleted(&mut self) {
        self.record = None;
        self.is_deleted = true;
        self.is_null = false;
    }

    pub fn set_null(&mut self) {
        self.record = None;
        self.is_deleted = false;
        self.is_null = true;
    }

    pub fn set_error(&mut self) {
        self.is_error = true;
    }

    pub fn set_status(&mut self, status: TxnStatus) {
        self.status = Some(status);
    }

    pub fn is_committed(&self) -> bool {
        self.status == Some(TxnStatus::Committed)
    }

    pub fn is_aborted(&self) -> bool {
        self.status == Some(TxnStatus::Aborted)
    }
}

/// The rewritable part of a request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestInput {
    pub table: TableName,
    pub key: Option<Key>,
    pub record: Option<Record>,
}

/// Hook run right before a request is dispatched. It may rewrite the
/// input from the results of the requests this one depends on.
pub trait RequestProcessor: Send + Sync {
    fn process(&self, input: &mut RequestInput, dependencies: &[Arc<OperationRequest>]);
}

impl<F> RequestProcessor for F
where
    F: Fn(&mut RequestInput, &[Arc<OperationRequest>]) + Send + Sync,
{
    fn process(&self, input: &mut RequestInput, dependencies: &[Arc<OperationRequest>]) {
        self(input, dependencies)
    }
}

/// One step of a client session
pub struct OperationRequest {
    session_id: SessionId,
    operation: OperationType,
    /// Cold-storage reads only go to the driver when set
    need_to_read: bool,
    txn_type: i32,
    input: Mutex<RequestInput>,
    processor: Option<Box<dyn RequestProcessor>>,
    dependencies: Vec<Arc<OperationRequest>>,
    result: Mutex<OpResult>,
    finished: Mutex<bool>,
    notify: Condvar,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl OperationRequest {
    pub fn new(session_id: SessionId, operation: OperationType, input: RequestInput) -> Self {
        Self {
            session_id,
            operation,
            need_to_read: false,
            txn_type: 0,
            input: Mutex::new(input),
            processor: None,
            dependencies: Vec::new(),
            result: Mutex::new(OpResult::default()),
            finished: Mutex::new(false),
            notify: Condvar::new(),
        }
    }

    fn keyed(session_id: SessionId, operation: OperationType, table: &str, key: Key) -> Self {
        Self::new(
            session_id,
            operation,
            RequestInput {
                table: table.to_string(),
                key: Some(key),
                record: None,
            },
        )
    }

    pub fn begin(session_id: SessionId) -> Self {
        Self::new(session_id, OperationType::Begin, RequestInput::default())
    }

    pub fn commit(session_id: SessionId) -> Self {
        Self::new(session_id, OperationType::Commit, RequestInput::default())
    }

    pub fn abort(session_id: SessionId) -> Self {
        Self::new(session_id, OperationType::Abort, RequestInput::default())
    }

    pub fn read(session_id: SessionId, table: &str, key: impl Into<Key>) -> Self {
        Self::keyed(session_id, OperationType::Read, table, key.into())
    }

    pub fn read_outside(session_id: SessionId, table: &str, key: impl Into<Key>) -> Self {
        Self::keyed(session_id, OperationType::ReadOutside, table, key.into())
    }

    /// Read from cold storage. `default` is returned as-is when
    /// `need_to_read` is false or no driver is configured.
    pub fn read_datastore(
        session_id: SessionId,
        table: &str,
        key: impl Into<Key>,
        default: Option<Record>,
        need_to_read: bool,
    ) -> Self {
        let mut request = Self::keyed(session_id, OperationType::ReadDataStore, table, key.into());
        request.need_to_read = need_to_read;
        lock(&request.input).record = default;
        request
    }

    pub fn insert(session_id: SessionId, table: &str, key: impl Into<Key>, record: impl Into<Record>) -> Self {
        Self::write(session_id, OperationType::Insert, table, key.into(), record.into())
    }

    pub fn update(session_id: SessionId, table: &str, key: impl Into<Key>, record: impl Into<Record>) -> Self {
        Self::write(session_id, OperationType::Update, table, key.into(), record.into())
    }

    pub fn upsert(session_id: SessionId, table: &str, key: impl Into<Key>, record: impl Into<Record>) -> Self {
        Self::write(session_id, OperationType::Upsert, table, key.into(), record.into())
    }

    pub fn delete(session_id: SessionId, table: &str, key: impl Into<Key>) -> Self {
        Self::keyed(session_id, OperationType::Delete, table, key.into())
    }

    fn write(session_id: SessionId, operation: OperationType, table: &str, key: Key, record: Record) -> Self {
        let request = Self::keyed(session_id, operation, table, key);
        lock(&request.input).record = Some(record);
        request
    }

    pub fn with_processor(mut self, processor: impl RequestProcessor + 'static) -> Self {
        self.processor = Some(Box::new(processor));
        self
    }

    pub fn with_dependency(mut self, dependency: Arc<OperationRequest>) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_txn_type(mut self, txn_type: i32) -> Self {
        self.txn_type = txn_type;
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn operation(&self) -> OperationType {
        self.operation
    }

    pub fn need_to_read(&self) -> bool {
        self.need_to_read
    }

    pub fn txn_type(&self) -> i32 {
        self.txn_type
    }

    pub fn input(&self) -> RequestInput {
        lock(&self.input).clone()
    }

    /// Run the pre-processing hook, if any, against the dependencies' results
    pub fn set_up(&self) {
        if let Some(processor) = &self.processor {
            let mut input = lock(&self.input);
            processor.process(&mut input, &self.dependencies);
        }
    }

    /// Snapshot of the result
    pub fn result(&self) -> OpResult {
        lock(&self.result).clone()
    }

    pub fn is_finished(&self) -> bool {
        *lock(&self.finished)
    }

    /// Block until the result is delivered
    pub fn wait(&self) -> OpResult {
        let mut finished = lock(&self.finished);
        while !*finished {
            finished = self
                .notify
                .wait(finished)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(finished);
        self.result()
    }

    /// Block for at most `timeout`. `None` if the result is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<OpResult> {
        let finished = lock(&self.finished);
        let (finished, _) = self
            .notify
            .wait_timeout_while(finished, timeout, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
        if !*finished {
            return None;
        }
        drop(finished);
        Some(self.result())
    }

    /// Update the result without waking the caller
    pub(crate) fn stage(&self, update: impl FnOnce(&mut OpResult)) {
        update(&mut lock(&self.result));
    }

    /// Update the result and wake the caller
    pub(crate) fn finish(&self, update: impl FnOnce(&mut OpResult)) {
        self.stage(update);
        *lock(&self.finished) = true;
        self.notify.notify_all();
    }
}

impl fmt::Debug for OperationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRequest")
            .field("session_id", &self.session_id)
            .field("operation", &self.operation)
            .field("input", &*lock(&self.input))
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Requests queued for one bound transaction, consumed in order
#[derive(Debug, Default)]
pub struct TransactionRequest {
    requests: Vec<Arc<OperationRequest>>,
    cursor: usize,
}

impl TransactionRequest {
    pub fn push(&mut self, request: Arc<OperationRequest>) {
        self.requests.push(request);
    }

    /// Next unconsumed request
    pub fn next_request(&mut self) -> Option<Arc<OperationRequest>> {
        let request = self.requests.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(request)
    }

    pub fn has_pending(&self) -> bool {
        self.cursor < self.requests.len()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn reset(&mut self) {
        self.requests.clear();
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_returns_delivered_result() {
        let request = Arc::new(OperationRequest::read(1, "t", 5));
        let waiter = {
            let request = Arc::clone(&request);
            thread::spawn(move || request.wait())
        };
        request.stage(|r| r.set_record(Some(Record::Int(9))));
        assert!(!request.is_finished());
        request.finish(|r| r.set_status(TxnStatus::Ongoing));

        let result = waiter.join().unwrap();
        assert_eq!(result.record, Some(Record::Int(9)));
        assert_eq!(result.status, Some(TxnStatus::Ongoing));
    }

    #[test]
    fn test_wait_timeout_on_pending() {
        let request = OperationRequest::begin(1);
        assert!(request.wait_timeout(Duration::from_millis(5)).is_none());
        request.finish(|_| {});
        assert!(request.wait_timeout(Duration::from_millis(5)).is_some());
    }

    #[test]
    fn test_processor_reads_dependencies() {
        let read = Arc::new(OperationRequest::read(1, "acct", 1));
        read.finish(|r| r.set_record(Some(Record::Int(40))));

        let update = OperationRequest::update(1, "acct", 1, 0)
            .with_dependency(Arc::clone(&read))
            .with_processor(|input: &mut RequestInput, deps: &[Arc<OperationRequest>]| {
                let balance = deps[0].result().record.and_then(|r| r.as_int()).unwrap_or(0);
                input.record = Some(Record::Int(balance + 2));
            });
        update.set_up();
        assert_eq!(update.input().record, Some(Record::Int(42)));
    }

    #[test]
    fn test_transaction_request_cursor() {
        let mut queue = TransactionRequest::default();
        queue.push(Arc::new(OperationRequest::begin(3)));
        queue.push(Arc::new(OperationRequest::commit(3)));
        assert_eq!(queue.next_request().unwrap().operation(), OperationType::Begin);
        assert!(queue.has_pending());
        assert_eq!(queue.next_request().unwrap().operation(), OperationType::Commit);
        assert!(queue.next_request().is_none());
        queue.reset();
        assert!(queue.is_empty());
    }
}
