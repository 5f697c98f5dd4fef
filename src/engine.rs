//! Engine facade: one shared version store, log and cold storage, many
//! executors
//!
//! Every executor gets its own [`ExecutorContext`] with a disjoint range of
//! transaction ids and its own clock. The handler, the transaction log and
//! the datastore are shared.

use std::path::Path;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::datastore::DataStore;
use crate::error::{Result, TxError};
use crate::transaction::{
    BatchExecutor, ExecutorContext, SimpleTxnIdGeneratorFactory, StreamingExecutor,
};
use crate::txlog::{FileTxLog, TxLog, TxLogConfig};
use crate::types::Timestamp;
use crate::versiondb::{Handler, HandlerResult};

pub struct Engine {
    config: EngineConfig,
    handler: Arc<dyn Handler>,
    tx_log: Option<Arc<dyn TxLog>>,
    datastore: Option<Arc<dyn DataStore>>,
    ids: SimpleTxnIdGeneratorFactory,
    executor_count: usize,
}

impl Engine {
    /// Engine for `executor_count` executors over `handler`
    pub fn new(config: EngineConfig, handler: Arc<dyn Handler>, executor_count: usize) -> Self {
        let executor_count = executor_count.max(1);
        log::info!(
            "Engine: {} executors x {} slots, log {}, datastore {}",
            executor_count,
            config.concurrent_txn_count,
            if config.enable_log { "on" } else { "off" },
            if config.use_datastore { "on" } else { "off" }
        );
        Self {
            config,
            handler,
            tx_log: None,
            datastore: None,
            ids: SimpleTxnIdGeneratorFactory::new(executor_count),
            executor_count,
        }
    }

    /// Open (or create) a file log at `path` and journal commits to it
    pub fn open_log(mut self, path: &Path, log_config: TxLogConfig) -> Result<Self> {
        let log = FileTxLog::open(path, log_config)?;
        self.config.enable_log = true;
        self.tx_log = Some(Arc::new(log));
        Ok(self)
    }

    pub fn with_tx_log(mut self, tx_log: Arc<dyn TxLog>) -> Self {
        self.tx_log = Some(tx_log);
        self
    }

    pub fn with_datastore(mut self, datastore: Arc<dyn DataStore>) -> Self {
        self.datastore = Some(datastore);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn tx_log(&self) -> Option<&Arc<dyn TxLog>> {
        self.tx_log.as_ref()
    }

    pub fn executor_count(&self) -> usize {
        self.executor_count
    }

    /// Context for executor `executor_id`
    pub fn context(&self, executor_id: usize) -> Result<ExecutorContext> {
        if executor_id >= self.executor_count {
            return Err(TxError::Internal(format!(
                "executor {} out of range (engine has {})",
                executor_id, self.executor_count
            )));
        }
        let mut ctx = ExecutorContext::for_executor(
            executor_id,
            self.ids.create(executor_id),
            self.config.clone(),
            Arc::clone(&self.handler),
        );
        if let Some(log) = &self.tx_log {
            ctx = ctx.with_tx_log(Arc::clone(log));
        }
        if let Some(store) = &self.datastore {
            ctx = ctx.with_datastore(Arc::clone(store));
        }
        Ok(ctx)
    }

    pub fn batch_executor(&self, executor_id: usize) -> Result<BatchExecutor> {
        Ok(BatchExecutor::new(self.context(executor_id)?))
    }

    pub fn streaming_executor(&self, executor_id: usize) -> Result<StreamingExecutor> {
        Ok(StreamingExecutor::new(self.context(executor_id)?))
    }

    /// Drop committed versions of `tables` that ended before `before`, and
    /// finished transaction records older than it. Returns how many
    /// versions and transactions were removed.
    pub fn clean_stale(&self, tables: &[&str], before: Timestamp) -> Result<(usize, usize)> {
        let version_results: Vec<HandlerResult<usize>> = tables
            .iter()
            .map(|table| {
                let result = HandlerResult::new();
                self.handler.clean_stale_version(table, before, result.clone());
                result
            })
            .collect();
        let txn_result = HandlerResult::new();
        self.handler.clean_stale_txn(before, txn_result.clone());
        self.handler.send_batch();

        let mut versions = 0;
        for result in &version_results {
            versions += settled(result, "clean stale versions")?;
        }
        let txns = settled(&txn_result, "clean stale transactions")?;
        if let Some(log) = &self.tx_log {
            log.clean_before(before)?;
        }
        log::info!("Cleaned {} versions and {} transactions before {}", versions, txns, before);
        Ok((versions, txns))
    }

    /// Flush and close the transaction log
    pub fn close(&self) -> Result<()> {
        if let Some(log) = &self.tx_log {
            log.close()?;
        }
        Ok(())
    }
}

fn settled(result: &HandlerResult<usize>, what: &str) -> Result<usize> {
    if !result.is_finished() {
        return Err(TxError::Handler(format!("{}: still pending", what)));
    }
    if result.is_error() {
        return Err(TxError::Handler(format!(
            "{}: {}",
            what,
            result.error_message().unwrap_or_default()
        )));
    }
    Ok(result.take().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{OperationRequest, TransactionExecutor};
    use crate::types::Key;
    use crate::versiondb::MemoryHandler;

    #[test]
    fn test_executors_get_disjoint_id_ranges() {
        let handler: Arc<dyn Handler> = Arc::new(MemoryHandler::default());
        let engine = Engine::new(EngineConfig::in_memory(), handler, 3);
        let mut first = engine.context(0).unwrap();
        let mut last = engine.context(2).unwrap();
        assert!(first.id_generator.generate_id() < last.id_generator.generate_id());
        assert!(engine.context(3).is_err());
    }

    #[test]
    fn test_clean_stale_drops_superseded_versions() {
        let memory = Arc::new(MemoryHandler::default());
        let handler: Arc<dyn Handler> = memory.clone();
        let engine = Engine::new(EngineConfig::in_memory().slots(1), handler, 1);
        let mut exec = engine.batch_executor(0).unwrap();
        for (session, value) in [(1u64, 10), (2, 20)] {
            exec.add_request(Arc::new(OperationRequest::begin(session))).unwrap();
            exec.add_request(Arc::new(OperationRequest::upsert(session, "t", 1, value))).unwrap();
            exec.add_request(Arc::new(OperationRequest::commit(session))).unwrap();
        }
        exec.run().unwrap();
        assert_eq!(memory.version_list("t", &Key::Int(1)).len(), 3);

        let (versions, txns) = engine.clean_stale(&["t"], Timestamp::MAX - 1).unwrap();
        assert_eq!(versions, 2);
        assert_eq!(txns, 2);
        assert_eq!(memory.version_list("t", &Key::Int(1)).len(), 1);
    }
}
