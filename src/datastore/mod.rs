//! Cold-storage fallback for keys the version store has never seen

pub mod memory;

pub use memory::MemoryDataStore;

use crate::error::Result;
use crate::types::{Key, Record};
use crate::versiondb::HandlerResult;

/// Point access to cold storage, keyed by (table, key)
pub trait DataStore: Send + Sync {
    /// Completes with the stored record, or `None` when the key is absent
    fn read_record(&self, table: &str, key: &Key, result: HandlerResult<Option<Record>>);

    /// Replace an existing record. Returns whether the key existed.
    fn update(&self, table: &str, key: &Key, record: Record) -> Result<bool>;

    /// Add a record. Returns false when the key already existed.
    fn insert(&self, table: &str, key: &Key, record: Record) -> Result<bool>;

    /// Remove a record. Returns whether the key existed.
    fn delete(&self, table: &str, key: &Key) -> Result<bool>;

    fn upsert(&self, table: &str, key: &Key, record: Record) -> Result<()> {
        if !self.update(table, key, record.clone())? {
            self.insert(table, key, record)?;
        }
        Ok(())
    }
}
