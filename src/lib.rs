//! txengine - execution core of a multi-version OCC transaction engine
//!
//! Transactions run optimistically against a multi-version store reached
//! through the [`versiondb::Handler`] trait. Each transaction is a small
//! state machine that suspends on handler calls, so one executor thread can
//! interleave many of them:
//!
//! ```text
//!   clients ──► executor (N slots) ──► Handler (version store)
//!                  │                     │
//!                  ├──► TxLog (write-ahead journal)
//!                  └──► DataStore (cold-storage fallback)
//! ```
//!
//! Commit follows upload → commit timestamp → validation → log →
//! status → finalize. Conflicts abort the transaction; they are reported in
//! the request's [`OpResult`], never as an `Err`.

pub mod config;
pub mod datastore;
pub mod engine;
pub mod error;
pub mod transaction;
pub mod txlog;
pub mod types;
pub mod versiondb;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Result, TxError};
pub use transaction::{
    BatchExecutor, ExecutorStats, OpResult, OperationRequest, OperationType, RequestSubmitter,
    StreamingExecutor, TransactionExecutor,
};
pub use types::{Key, Record, SessionId, TableName, Timestamp, TxnId};
pub use versiondb::{Handler, HandlerResult, MemoryHandler, TxnStatus};
