//! Configuration for transaction executors

/// Configuration shared by every executor an [`crate::Engine`] builds.
///
/// # Presets
///
/// - [`EngineConfig::default()`] - Everything in memory, no journaling
/// - [`EngineConfig::durable()`] - Write sets are journaled before commit
/// - [`EngineConfig::with_datastore()`] - Cold-storage fallback reads, cached
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of transaction slots per executor
    pub concurrent_txn_count: usize,
    /// Bound of the streaming executor's request queue
    pub request_queue_capacity: usize,
    /// Initial size of each read/write-set pool
    pub local_state_capacity: usize,
    /// Execution time budget handed to the handler when a transaction starts
    pub max_txn_execution_time_ms: i64,
    /// Logical ticks handed out between two wall-clock reads
    pub time_provider_interval: u32,
    /// Journal write sets to the transaction log before commit
    pub enable_log: bool,
    /// Consult a per-executor record cache before the cold-storage driver
    pub enable_volatile_cache: bool,
    /// Fall back to the cold-storage driver for keys absent from the version store
    pub use_datastore: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrent_txn_count: 64,
            request_queue_capacity: 4096,
            local_state_capacity: 10,
            max_txn_execution_time_ms: 100_000,
            time_provider_interval: 1000,
            enable_log: false,
            enable_volatile_cache: false,
            use_datastore: false,
        }
    }
}

impl EngineConfig {
    /// Nothing leaves memory
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Every committing write set goes through the transaction log first
    pub fn durable() -> Self {
        Self {
            enable_log: true,
            ..Default::default()
        }
    }

    /// Reads of keys missing from the version store go to cold storage
    pub fn with_datastore() -> Self {
        Self {
            use_datastore: true,
            enable_volatile_cache: true,
            ..Default::default()
        }
    }

    /// Override the number of slots per executor
    pub fn slots(mut self, count: usize) -> Self {
        self.concurrent_txn_count = count.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.concurrent_txn_count, 64);
        assert_eq!(config.local_state_capacity, 10);
        assert_eq!(config.max_txn_execution_time_ms, 100_000);
        assert_eq!(config.time_provider_interval, 1000);
        assert!(!config.enable_log);
        assert!(!config.enable_volatile_cache);
        assert!(!config.use_datastore);
    }

    #[test]
    fn test_engine_config_presets() {
        assert!(EngineConfig::durable().enable_log);
        let cold = EngineConfig::with_datastore();
        assert!(cold.use_datastore && cold.enable_volatile_cache);
        assert_eq!(EngineConfig::in_memory().slots(0).concurrent_txn_count, 1);
    }
}
