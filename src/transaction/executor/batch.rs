//! Executor over a pre-built request buffer
//!
//! Requests of one session must be contiguous and start with `Begin`. When
//! a slot frees up, the next session's run of requests (up to its `Commit`
//! or `Abort`) is bound to it in one go. A run cut off by the end of the
//! buffer is completed by requests added later.

use std::sync::Arc;

use crate::error::{Result, TxError};
use crate::transaction::context::ExecutorContext;
use crate::transaction::request::{OperationRequest, OperationType};
use crate::transaction::task::TransactionTask;

use super::{
    advance_all, all_waiting, bound_slot, first_free, waiting_sessions, wind_down, ExecutorStats,
    TransactionExecutor,
};

pub struct BatchExecutor {
    ctx: ExecutorContext,
    tasks: Vec<TransactionTask>,
    buffer: Vec<Arc<OperationRequest>>,
    /// First buffered request not yet handed to a slot
    pop_index: usize,
    active: usize,
    stats: ExecutorStats,
}

impl BatchExecutor {
    pub fn new(ctx: ExecutorContext) -> Self {
        let slots = ctx.config.concurrent_txn_count.max(1);
        let capacity = ctx.config.local_state_capacity;
        Self {
            ctx,
            tasks: (0..slots).map(|_| TransactionTask::new(capacity)).collect(),
            buffer: Vec::new(),
            pop_index: 0,
            active: 0,
            stats: ExecutorStats::default(),
        }
    }

    pub fn context(&self) -> &ExecutorContext {
        &self.ctx
    }

    /// Transactions currently bound to a slot
    pub fn active(&self) -> usize {
        self.active
    }

    /// Hand buffered requests to slots. Returns how many were consumed.
    fn launch_requests(&mut self) -> Result<usize> {
        let start = self.pop_index;
        while self.pop_index < self.buffer.len() {
            let request = Arc::clone(&self.buffer[self.pop_index]);
            let session = request.session_id();

            if request.operation() != OperationType::Begin {
                let Some(slot) = bound_slot(&self.tasks, session) else {
                    log::error!(
                        "Session {} sent {:?} without an open transaction",
                        session,
                        request.operation()
                    );
                    request.finish(|r| r.set_error());
                    return Err(TxError::Contract(format!(
                        "session {} does not start with Begin",
                        session
                    )));
                };
                self.tasks[slot].push_request(request);
                self.pop_index += 1;
                continue;
            }

            if self.active >= self.tasks.len() {
                break;
            }
            if bound_slot(&self.tasks, session).is_some() {
                request.finish(|r| r.set_error());
                return Err(TxError::Contract(format!(
                    "session {} began a transaction while one is open",
                    session
                )));
            }
            let slot = first_free(&self.tasks).ok_or(TxError::NoFreeSlot)?;
            self.tasks[slot].bind(session, &mut self.ctx);
            self.tasks[slot].push_request(request);
            self.active += 1;
            self.pop_index += 1;

            // the rest of the session's run
            while let Some(next) = self.buffer.get(self.pop_index) {
                if next.session_id() != session || next.operation() == OperationType::Begin {
                    break;
                }
                let ends = next.operation().ends_transaction();
                self.tasks[slot].push_request(Arc::clone(next));
                self.pop_index += 1;
                if ends {
                    break;
                }
            }
        }
        Ok(self.pop_index - start)
    }

    /// Pass over the slots until one frees up or every bound transaction
    /// waits on a request that is not buffered. Returns false in the
    /// latter case.
    fn advance(&mut self) -> Result<bool> {
        loop {
            let released = advance_all(&mut self.tasks, &mut self.ctx, &mut self.stats)?;
            self.active -= released;
            if released > 0 || self.active == 0 {
                return Ok(true);
            }
            if all_waiting(&self.tasks) {
                return Ok(false);
            }
        }
    }
}

impl TransactionExecutor for BatchExecutor {
    fn add_request(&mut self, request: Arc<OperationRequest>) -> Result<()> {
        self.buffer.push(request);
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        while self.pop_index < self.buffer.len() || self.active > 0 {
            let launched = self.launch_requests()?;
            let progressed = self.advance()?;
            if launched == 0 && !progressed {
                let sessions = waiting_sessions(&self.tasks);
                log::error!("Request buffer exhausted, sessions {:?} never finished", sessions);
                return Err(TxError::Stalled(sessions));
            }
        }
        self.buffer.clear();
        self.pop_index = 0;
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.pop_index >= self.buffer.len() && self.active == 0
    }

    fn statistics(&self) -> ExecutorStats {
        self.stats
    }

    fn shutdown(&mut self) -> Result<()> {
        match self.run() {
            Ok(()) | Err(TxError::Stalled(_)) => {}
            Err(e) => return Err(e),
        }
        let released = wind_down(&mut self.tasks, &mut self.ctx, &mut self.stats)?;
        self.active -= released;
        log::info!(
            "Batch executor {} stopped: {} commits, {} aborts",
            self.ctx.executor_id,
            self.stats.commits,
            self.stats.aborts
        );
        Ok(())
    }
}
