//! Executor fed through a bounded queue while it runs
//!
//! Clients push requests through a [`RequestSubmitter`]. A `Begin` that
//! finds every slot bound is parked, and so is every later request of the
//! same session, until a slot frees up. Requests of sessions that are
//! already bound keep flowing past the parked ones.

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;

use crate::error::{Result, TxError};
use crate::transaction::context::ExecutorContext;
use crate::transaction::request::{OperationRequest, OperationType};
use crate::transaction::task::TransactionTask;

use super::{
    advance_all, all_waiting, bound_slot, first_free, wind_down, ExecutorStats, TransactionExecutor,
};

type RequestQueue = ArrayQueue<Arc<OperationRequest>>;

/// Cloneable handle for feeding a [`StreamingExecutor`] from other threads
#[derive(Clone)]
pub struct RequestSubmitter {
    queue: Arc<RequestQueue>,
}

impl RequestSubmitter {
    /// Enqueue a request. Fails with [`TxError::QueueFull`] at capacity.
    pub fn submit(&self, request: Arc<OperationRequest>) -> Result<()> {
        self.queue.push(request).map_err(|_| TxError::QueueFull)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

pub struct StreamingExecutor {
    ctx: ExecutorContext,
    tasks: Vec<TransactionTask>,
    queue: Arc<RequestQueue>,
    /// Requests of sessions waiting for a free slot, in arrival order
    parked: VecDeque<Arc<OperationRequest>>,
    active: usize,
    stats: ExecutorStats,
}

impl StreamingExecutor {
    pub fn new(ctx: ExecutorContext) -> Self {
        let slots = ctx.config.concurrent_txn_count.max(1);
        let capacity = ctx.config.local_state_capacity;
        let queue = Arc::new(ArrayQueue::new(ctx.config.request_queue_capacity.max(1)));
        Self {
            ctx,
            tasks: (0..slots).map(|_| TransactionTask::new(capacity)).collect(),
            queue,
            parked: VecDeque::new(),
            active: 0,
            stats: ExecutorStats::default(),
        }
    }

    pub fn submitter(&self) -> RequestSubmitter {
        RequestSubmitter {
            queue: Arc::clone(&self.queue),
        }
    }

    pub fn context(&self) -> &ExecutorContext {
        &self.ctx
    }

    pub fn active(&self) -> usize {
        self.active
    }

    /// Requests held back until their session gets a slot
    pub fn parked(&self) -> usize {
        self.parked.len()
    }

    fn route(&mut self, request: Arc<OperationRequest>) -> Result<()> {
        let session = request.session_id();
        if self.parked.iter().any(|r| r.session_id() == session) {
            self.parked.push_back(request);
            return Ok(());
        }

        if request.operation() == OperationType::Begin {
            if bound_slot(&self.tasks, session).is_some() {
                request.finish(|r| r.set_error());
                return Err(TxError::Contract(format!(
                    "session {} began a transaction while one is open",
                    session
                )));
            }
            match first_free(&self.tasks) {
                Some(slot) => {
                    self.tasks[slot].bind(session, &mut self.ctx);
                    self.tasks[slot].push_request(request);
                    self.active += 1;
                }
                None => {
                    log::trace!("No free slot for session {}, parking", session);
                    self.parked.push_back(request);
                }
            }
            return Ok(());
        }

        match bound_slot(&self.tasks, session) {
            Some(slot) => {
                self.tasks[slot].push_request(request);
                Ok(())
            }
            None => {
                log::error!(
                    "Session {} sent {:?} without an open transaction",
                    session,
                    request.operation()
                );
                request.finish(|r| r.set_error());
                Err(TxError::SessionNotFound(session))
            }
        }
    }

    fn launch_requests(&mut self) -> Result<()> {
        if self.active < self.tasks.len() && !self.parked.is_empty() {
            let parked = std::mem::take(&mut self.parked);
            for request in parked {
                self.route(request)?;
            }
        }
        // parked requests are bounded like the queue
        while self.parked.len() < self.queue.capacity() {
            let Some(request) = self.queue.pop() else {
                break;
            };
            self.route(request)?;
        }
        Ok(())
    }

    /// One scheduling pass. Returns whether anything is left that can
    /// progress without new requests.
    pub fn run_once(&mut self) -> Result<bool> {
        self.launch_requests()?;
        let released = advance_all(&mut self.tasks, &mut self.ctx, &mut self.stats)?;
        self.active -= released;

        let can_launch = !self.parked.is_empty() && self.active < self.tasks.len();
        let can_pop = !self.queue.is_empty() && self.parked.len() < self.queue.capacity();
        Ok(can_launch || can_pop || !all_waiting(&self.tasks))
    }
}

impl TransactionExecutor for StreamingExecutor {
    fn add_request(&mut self, request: Arc<OperationRequest>) -> Result<()> {
        self.queue.push(request).map_err(|_| TxError::QueueFull)
    }

    /// Returns once every bound transaction waits on its client and no
    /// request can be started
    fn run(&mut self) -> Result<()> {
        while self.run_once()? {}
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.queue.is_empty() && self.parked.is_empty() && self.active == 0
    }

    fn statistics(&self) -> ExecutorStats {
        self.stats
    }

    fn shutdown(&mut self) -> Result<()> {
        self.run()?;
        let released = wind_down(&mut self.tasks, &mut self.ctx, &mut self.stats)?;
        self.active -= released;

        // sessions that never got a slot
        while let Some(request) = self.parked.pop_front().or_else(|| self.queue.pop()) {
            request.finish(|r| r.set_error());
        }
        log::info!(
            "Streaming executor {} stopped: {} commits, {} aborts",
            self.ctx.executor_id,
            self.stats.commits,
            self.stats.aborts
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::{Key, Record};
    use crate::versiondb::{Handler, MemoryHandler};

    fn executor(slots: usize, queue: usize) -> (Arc<MemoryHandler>, StreamingExecutor) {
        let handler = Arc::new(MemoryHandler::default());
        let shared: Arc<dyn Handler> = handler.clone();
        let mut config = EngineConfig::in_memory().slots(slots);
        config.request_queue_capacity = queue;
        (handler, StreamingExecutor::new(ExecutorContext::new(config, shared)))
    }

    fn submit(submitter: &RequestSubmitter, request: OperationRequest) -> Arc<OperationRequest> {
        let request = Arc::new(request);
        submitter.submit(Arc::clone(&request)).unwrap();
        request
    }

    #[test]
    fn test_queue_capacity_is_enforced() {
        let (_, exec) = executor(1, 2);
        let submitter = exec.submitter();
        submit(&submitter, OperationRequest::begin(1));
        submit(&submitter, OperationRequest::commit(1));
        let err = submitter
            .submit(Arc::new(OperationRequest::begin(2)))
            .unwrap_err();
        assert!(matches!(err, TxError::QueueFull));
        assert_eq!(submitter.len(), 2);
    }

    #[test]
    fn test_begin_waits_for_free_slot() {
        let (handler, mut exec) = executor(1, 16);
        let submitter = exec.submitter();
        submit(&submitter, OperationRequest::begin(1));
        submit(&submitter, OperationRequest::begin(2));
        let insert = submit(&submitter, OperationRequest::insert(2, "t", 2, 2));
        submit(&submitter, OperationRequest::insert(1, "t", 1, 1));

        exec.run().unwrap();
        assert_eq!(exec.active(), 1);
        assert_eq!(exec.parked(), 2);
        assert!(!insert.is_finished());

        submit(&submitter, OperationRequest::commit(1));
        let commit = submit(&submitter, OperationRequest::commit(2));
        exec.run().unwrap();

        assert!(commit.result().is_committed());
        assert!(exec.is_finished());
        assert_eq!(exec.statistics().commits, 2);
        assert_eq!(handler.committed_record("t", &Key::Int(2)), Some(Record::Int(2)));
    }

    #[test]
    fn test_unknown_session_is_rejected() {
        let (_, mut exec) = executor(2, 4);
        let stray = submit(&exec.submitter(), OperationRequest::read(5, "t", 1));
        assert!(matches!(exec.run(), Err(TxError::SessionNotFound(5))));
        assert!(stray.result().is_error);
    }

    #[test]
    fn test_shutdown_fails_parked_requests() {
        let (_, mut exec) = executor(1, 8);
        let submitter = exec.submitter();
        submit(&submitter, OperationRequest::begin(1));
        let parked = submit(&submitter, OperationRequest::begin(2));
        exec.run().unwrap();

        exec.shutdown().unwrap();
        assert!(exec.is_finished());
        assert_eq!(exec.statistics().aborts, 1);
        assert!(parked.result().is_error);
    }
}
