//! Error types for txengine
//!
//! Conflicts between transactions are not errors: they end in an aborted
//! transaction and are reported through the request's result. The variants
//! below cover what escapes to the caller of an executor or a collaborator.

use std::fmt;
use std::io;

/// Unified error type for txengine operations
#[derive(Debug)]
pub enum TxError {
    /// I/O error (log file, datastore snapshots)
    Io(io::Error),
    /// Malformed bytes handed to a decoder
    Codec(String),
    /// Transaction log failure (writer gone, append rejected)
    Log(String),
    /// The log writer is backed up; the append was not queued
    LogBusy,
    /// Failure reported by a version handler outside the transaction path
    Handler(String),
    /// Local and remote state may disagree; an operator has to intervene
    NeedsRecovery { txn_id: i64, reason: String },
    /// Every transaction slot of the executor is bound
    NoFreeSlot,
    /// A request arrived for a session that has no bound transaction
    SessionNotFound(u64),
    /// The executor's request queue is full
    QueueFull,
    /// Request ordering contract violated (missing Begin, interleaving, ...)
    Contract(String),
    /// The batch buffer ran out before a bound transaction saw Commit/Abort
    Stalled(Vec<u64>),
    /// JSON encoding/decoding failure
    Json(String),
    /// Generic internal error
    Internal(String),
}

impl TxError {
    /// Build the fatal "needs manual recovery" error for a transaction
    pub fn needs_recovery(txn_id: i64, reason: impl Into<String>) -> Self {
        TxError::NeedsRecovery {
            txn_id,
            reason: reason.into(),
        }
    }

    /// True for failures that leave the store in an undefined state
    pub fn is_fatal(&self) -> bool {
        matches!(self, TxError::NeedsRecovery { .. })
    }
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxError::Io(e) => write!(f, "I/O error: {}", e),
            TxError::Codec(msg) => write!(f, "codec error: {}", msg),
            TxError::Log(msg) => write!(f, "transaction log error: {}", msg),
            TxError::LogBusy => write!(f, "transaction log busy"),
            TxError::Handler(msg) => write!(f, "handler error: {}", msg),
            TxError::NeedsRecovery { txn_id, reason } => {
                write!(f, "transaction {} needs manual recovery: {}", txn_id, reason)
            }
            TxError::NoFreeSlot => write!(f, "no empty txn task"),
            TxError::SessionNotFound(session) => {
                write!(f, "no session task for session {}", session)
            }
            TxError::QueueFull => write!(f, "request queue is full"),
            TxError::Contract(msg) => write!(f, "request contract violated: {}", msg),
            TxError::Stalled(sessions) => write!(
                f,
                "request buffer exhausted before commit/abort for sessions {:?}",
                sessions
            ),
            TxError::Json(msg) => write!(f, "{}", msg),
            TxError::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TxError {}

impl From<io::Error> for TxError {
    fn from(e: io::Error) -> Self {
        TxError::Io(e)
    }
}

impl From<bincode::Error> for TxError {
    fn from(e: bincode::Error) -> Self {
        TxError::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for TxError {
    fn from(e: serde_json::Error) -> Self {
        TxError::Json(e.to_string())
    }
}

/// Result type alias for txengine operations
pub type Result<T> = std::result::Result<T, TxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_error_is_fatal() {
        let err = TxError::needs_recovery(7, "commit status update failed");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("transaction 7"));
        assert!(!TxError::NoFreeSlot.is_fatal());
    }

    #[test]
    fn test_io_conversion() {
        let err: TxError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, TxError::Io(_)));
    }
}
