//! In-memory cold storage with JSONL snapshots
//!
//! ### Snapshot Format
//! One `<table>.jsonl` file per table, one row per line, sorted by key:
//! ```json
//! {"key":{"Int":1},"record":{"String":"alice"}}
//! {"key":{"Int":2},"record":{"Int":42}}
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TxError};
use crate::types::{Key, Record, TableName};
use crate::versiondb::HandlerResult;

use super::DataStore;

#[derive(Debug, Serialize, Deserialize)]
struct Row {
    key: Key,
    record: Record,
}

/// Thread-safe map-backed [`DataStore`]
#[derive(Default)]
pub struct MemoryDataStore {
    tables: RwLock<HashMap<TableName, BTreeMap<Key, Record>>>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &str, key: &Key) -> Option<Record> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(table)?.get(key).cloned()
    }

    pub fn len(&self, table: &str) -> usize {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(table).map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.values().all(|rows| rows.is_empty())
    }

    /// Write every table to `<dir>/<table>.jsonl` (full rewrite)
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        for (name, rows) in tables.iter() {
            let path = dir.join(format!("{}.jsonl", name));
            let temp_path = path.with_extension("jsonl.tmp");

            let mut writer = BufWriter::new(File::create(&temp_path)?);
            for (key, record) in rows {
                let row = Row {
                    key: key.clone(),
                    record: record.clone(),
                };
                writeln!(writer, "{}", serde_json::to_string(&row)?)?;
            }
            writer.flush()?;
            fs::rename(temp_path, path)?;
        }
        log::debug!("Saved {} tables to {}", tables.len(), dir.display());
        Ok(())
    }

    /// Load every `*.jsonl` snapshot found in `dir`
    pub fn load_from(dir: &Path) -> Result<Self> {
        let store = Self::new();
        if !dir.exists() {
            return Ok(store);
        }
        {
            let mut tables = store.tables.write().unwrap_or_else(PoisonError::into_inner);
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                    continue;
                }
                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let rows = tables.entry(name.to_string()).or_default();
                let reader = BufReader::new(File::open(&path)?);
                for (idx, line) in reader.lines().enumerate() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let row: Row = serde_json::from_str(&line).map_err(|e| {
                        TxError::Json(format!(
                            "Failed to parse row in '{}', line {}: {}",
                            path.display(),
                            idx + 1,
                            e
                        ))
                    })?;
                    rows.insert(row.key, row.record);
                }
            }
        }
        Ok(store)
    }
}

impl DataStore for MemoryDataStore {
    fn read_record(&self, table: &str, key: &Key, result: HandlerResult<Option<Record>>) {
        result.complete(self.get(table, key));
    }

    fn update(&self, table: &str, key: &Key, record: Record) -> Result<bool> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        match tables.get_mut(table).and_then(|rows| rows.get_mut(key)) {
            Some(slot) => {
                *slot = record;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn insert(&self, table: &str, key: &Key, record: Record) -> Result<bool> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let rows = tables.entry(table.to_string()).or_default();
        if rows.contains_key(key) {
            return Ok(false);
        }
        rows.insert(key.clone(), record);
        Ok(true)
    }

    fn delete(&self, table: &str, key: &Key) -> Result<bool> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .get_mut(table)
            .map(|rows| rows.remove(key).is_some())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_operations() {
        let store = MemoryDataStore::new();
        let key = Key::Int(1);
        assert!(store.insert("users", &key, Record::from("alice")).unwrap());
        assert!(!store.insert("users", &key, Record::from("bob")).unwrap());
        assert!(store.update("users", &key, Record::from("carol")).unwrap());
        assert_eq!(store.get("users", &key), Some(Record::from("carol")));

        let result = HandlerResult::new();
        store.read_record("users", &key, result.clone());
        assert_eq!(result.get(), Some(Some(Record::from("carol"))));

        assert!(store.delete("users", &key).unwrap());
        assert!(!store.delete("users", &key).unwrap());
        assert!(!store.update("users", &key, Record::Int(1)).unwrap());
    }

    #[test]
    fn test_upsert() {
        let store = MemoryDataStore::new();
        let key = Key::from("k");
        store.upsert("t", &key, Record::Int(1)).unwrap();
        store.upsert("t", &key, Record::Int(2)).unwrap();
        assert_eq!(store.get("t", &key), Some(Record::Int(2)));
        assert_eq!(store.len("t"), 1);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = MemoryDataStore::new();
        store.insert("users", &Key::Int(1), Record::from("alice")).unwrap();
        store.insert("users", &Key::Int(2), Record::Int(42)).unwrap();
        store.insert("orders", &Key::from("o-1"), Record::Int(7)).unwrap();
        store.save_to(temp_dir.path()).unwrap();

        let loaded = MemoryDataStore::load_from(temp_dir.path()).unwrap();
        assert_eq!(loaded.len("users"), 2);
        assert_eq!(loaded.get("users", &Key::Int(2)), Some(Record::Int(42)));
        assert_eq!(loaded.get("orders", &Key::from("o-1")), Some(Record::Int(7)));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("bad.jsonl"), "not json\n").unwrap();
        assert!(MemoryDataStore::load_from(temp_dir.path()).is_err());
    }
}
