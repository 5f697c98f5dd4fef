//! Executors: schedule many transactions over a fixed pool of slots
//!
//! Both strategies run the same pass: every bound slot is advanced once,
//! then the handler is told to flush whatever the pass batched up. They
//! differ only in where requests come from.

mod batch;
mod streaming;

pub use batch::BatchExecutor;
pub use streaming::{RequestSubmitter, StreamingExecutor};

use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::types::SessionId;
use crate::versiondb::TxnStatus;

use super::context::ExecutorContext;
use super::request::OperationRequest;
use super::task::TransactionTask;

/// Commit/abort counters of one executor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub commits: u64,
    pub aborts: u64,
}

impl ExecutorStats {
    pub fn total(&self) -> u64 {
        self.commits + self.aborts
    }

    pub fn merge(&mut self, other: ExecutorStats) {
        self.commits += other.commits;
        self.aborts += other.aborts;
    }

    fn record(&mut self, status: TxnStatus) {
        match status {
            TxnStatus::Committed => self.commits += 1,
            TxnStatus::Aborted => self.aborts += 1,
            _ => {}
        }
    }
}

/// Scheduler over a pool of transaction slots
pub trait TransactionExecutor {
    /// Hand a request to the executor
    fn add_request(&mut self, request: Arc<OperationRequest>) -> Result<()>;

    /// Schedule until nothing can make progress without new requests
    fn run(&mut self) -> Result<()>;

    /// No request left and no transaction bound
    fn is_finished(&self) -> bool;

    fn statistics(&self) -> ExecutorStats;

    /// Abort transactions still waiting on their client, then drain
    fn shutdown(&mut self) -> Result<()>;
}

/// Advance one bound slot. Returns true when its transaction finished and
/// the slot was released.
pub(crate) fn advance_task(
    task: &mut TransactionTask,
    ctx: &mut ExecutorContext,
    stats: &mut ExecutorStats,
) -> Result<bool> {
    task.advance(ctx)?;
    if !task.execution().is_finished() {
        return Ok(false);
    }
    stats.record(task.execution().status());
    task.release();
    Ok(true)
}

/// One scheduling pass over every bound slot. Returns how many slots were
/// released.
pub(crate) fn advance_all(
    tasks: &mut [TransactionTask],
    ctx: &mut ExecutorContext,
    stats: &mut ExecutorStats,
) -> Result<usize> {
    let mut released = 0;
    for task in tasks.iter_mut().filter(|t| t.in_use()) {
        if advance_task(task, ctx, stats)? {
            released += 1;
        }
    }
    ctx.handler.send_batch();
    Ok(released)
}

pub(crate) fn first_free(tasks: &[TransactionTask]) -> Option<usize> {
    tasks.iter().position(|t| !t.in_use())
}

pub(crate) fn bound_slot(tasks: &[TransactionTask], session_id: SessionId) -> Option<usize> {
    tasks.iter().position(|t| t.session_id() == Some(session_id))
}

/// Sessions whose transaction waits on a request that is not there
pub(crate) fn waiting_sessions(tasks: &[TransactionTask]) -> Vec<SessionId> {
    tasks
        .iter()
        .filter(|t| t.is_waiting())
        .filter_map(TransactionTask::session_id)
        .collect()
}

pub(crate) fn all_waiting(tasks: &[TransactionTask]) -> bool {
    tasks.iter().filter(|t| t.in_use()).all(TransactionTask::is_waiting)
}

/// Abort every transaction left waiting on its client and drive the pool
/// until every slot is free. Returns how many slots were released.
pub(crate) fn wind_down(
    tasks: &mut [TransactionTask],
    ctx: &mut ExecutorContext,
    stats: &mut ExecutorStats,
) -> Result<usize> {
    let mut released = 0;
    while tasks.iter().any(TransactionTask::in_use) {
        for task in tasks.iter_mut().filter(|t| t.is_waiting()) {
            log::warn!(
                "Aborting transaction {} of session {:?}: executor shutting down",
                task.execution().txn_id(),
                task.session_id()
            );
            task.abort_waiting(ctx);
        }
        released += advance_all(tasks, ctx, stats)?;
    }
    Ok(released)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_record_final_status_only() {
        let mut stats = ExecutorStats::default();
        stats.record(TxnStatus::Committed);
        stats.record(TxnStatus::Aborted);
        stats.record(TxnStatus::Ongoing);
        assert_eq!(stats, ExecutorStats { commits: 1, aborts: 1 });

        let mut total = ExecutorStats::default();
        total.merge(stats);
        total.merge(stats);
        assert_eq!(total.total(), 4);
        assert_eq!(serde_json::to_string(&total).unwrap(), r#"{"commits":2,"aborts":2}"#);
    }
}
