//! Resources one executor shares between its transaction slots

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::datastore::DataStore;
use crate::txlog::TxLog;
use crate::types::{Key, Record, TableName};
use crate::versiondb::Handler;

use super::time_provider::{LocalTimeProvider, TimeProvider};
use super::txn_id::{SimpleTxnIdGenerator, SimpleTxnIdGeneratorFactory, TxnIdGenerator};

/// Records fetched from cold storage by this executor
#[derive(Debug, Default)]
pub struct VolatileCache {
    records: HashMap<(TableName, Key), Record>,
    hits: u64,
}

impl VolatileCache {
    pub fn get(&mut self, table: &str, key: &Key) -> Option<Record> {
        let found = self.records.get(&(table.to_string(), key.clone())).cloned();
        if found.is_some() {
            self.hits += 1;
        }
        found
    }

    pub fn insert(&mut self, table: &str, key: &Key, record: Record) {
        self.records.insert((table.to_string(), key.clone()), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }
}

/// Everything a [`super::TransactionExecution`] needs besides its own state.
/// Owned by the executor and lent to one slot at a time.
pub struct ExecutorContext {
    pub executor_id: usize,
    pub config: EngineConfig,
    pub handler: Arc<dyn Handler>,
    pub tx_log: Option<Arc<dyn TxLog>>,
    pub datastore: Option<Arc<dyn DataStore>>,
    pub time_provider: Box<dyn TimeProvider>,
    pub id_generator: Box<dyn TxnIdGenerator>,
    pub cache: VolatileCache,
}

impl ExecutorContext {
    /// Context for a lone executor owning the whole id space
    pub fn new(config: EngineConfig, handler: Arc<dyn Handler>) -> Self {
        Self::for_executor(0, SimpleTxnIdGeneratorFactory::new(1).create(0), config, handler)
    }

    pub fn for_executor(
        executor_id: usize,
        ids: SimpleTxnIdGenerator,
        config: EngineConfig,
        handler: Arc<dyn Handler>,
    ) -> Self {
        let time_provider = LocalTimeProvider::new(config.time_provider_interval);
        Self {
            executor_id,
            config,
            handler,
            tx_log: None,
            datastore: None,
            time_provider: Box::new(time_provider),
            id_generator: Box::new(ids),
            cache: VolatileCache::default(),
        }
    }

    pub fn with_tx_log(mut self, tx_log: Arc<dyn TxLog>) -> Self {
        self.tx_log = Some(tx_log);
        self
    }

    pub fn with_datastore(mut self, datastore: Arc<dyn DataStore>) -> Self {
        self.datastore = Some(datastore);
        self
    }

    pub fn with_time_provider(mut self, time_provider: Box<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    pub fn with_id_generator(mut self, id_generator: Box<dyn TxnIdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// The log to journal commits to, when journaling is on
    pub fn active_log(&self) -> Option<&Arc<dyn TxLog>> {
        if self.config.enable_log {
            self.tx_log.as_ref()
        } else {
            None
        }
    }

    /// The cold-storage driver, when fallback reads are on
    pub fn active_datastore(&self) -> Option<&Arc<dyn DataStore>> {
        if self.config.use_datastore {
            self.datastore.as_ref()
        } else {
            None
        }
    }
}
