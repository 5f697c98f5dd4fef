//! Transaction execution: per-transaction state machines and the executors
//! that schedule them
//!
//! A [`TransactionExecution`] runs one transaction as a chain of small
//! steps that suspend on handler calls. A [`TransactionTask`] binds an
//! execution to a client session. Executors own a fixed pool of tasks and
//! advance all of them in round-robin passes:
//!
//! - [`BatchExecutor`] consumes a whole pre-built request buffer
//! - [`StreamingExecutor`] pulls requests from a bounded queue as they arrive

pub mod context;
pub mod execution;
pub mod executor;
pub mod local_state;
mod ops;
pub mod request;
pub mod task;
pub mod time_provider;
pub mod txn_id;

pub use context::{ExecutorContext, VolatileCache};
pub use execution::TransactionExecution;
pub use executor::{BatchExecutor, ExecutorStats, RequestSubmitter, StreamingExecutor, TransactionExecutor};
pub use local_state::{LocalState, ReadSetEntry, WriteSetEntry};
pub use request::{
    OpResult, OperationRequest, OperationType, RequestInput, RequestProcessor, TransactionRequest,
};
pub use task::TransactionTask;
pub use time_provider::{LocalTimeProvider, TimeProvider};
pub use txn_id::{SimpleTxnIdGenerator, SimpleTxnIdGeneratorFactory, TxnIdGenerator};
