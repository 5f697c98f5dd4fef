//! Per-transaction read and write sets
//!
//! Both sets live in pools of reusable slots. A pool grows by one slot when
//! it runs out, never shrinks, and is reset to zero length between
//! transactions without dropping its slots. Write entries point at the read
//! entry they supersede by index into the read pool.

use crate::types::{Key, Record, TableName, Timestamp, TxnId};
use crate::versiondb::{
    Extension, DEFAULT_BEGIN_TS, DEFAULT_END_TS, DEFAULT_VERSION, EMPTY_TX_ID,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SetKey {
    pub table: TableName,
    pub key: Key,
}

impl SetKey {
    fn matches(&self, table: &str, key: &Key) -> bool {
        self.table == table && self.key == *key
    }
}

/// What this transaction observed for a key
#[derive(Debug, Clone, PartialEq)]
pub struct ReadSetEntry {
    pub version: i64,
    pub tx_id: TxnId,
    pub begin_ts: Timestamp,
    pub end_ts: Timestamp,
    pub is_deleted: bool,
    /// A write in this transaction supersedes the read
    pub is_updated: bool,
    pub need_post_processing: bool,
    /// The handler still counts this read against the version
    pub need_release: bool,
    pub record: Option<Record>,
    pub extension: Extension,
}

impl Default for ReadSetEntry {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION,
            tx_id: EMPTY_TX_ID,
            begin_ts: DEFAULT_BEGIN_TS,
            end_ts: DEFAULT_END_TS,
            is_deleted: true,
            is_updated: false,
            need_post_processing: false,
            need_release: true,
            record: None,
            extension: None,
        }
    }
}

/// A pending mutation of a key
#[derive(Debug, Clone, PartialEq)]
pub struct WriteSetEntry {
    /// Version to create: the superseded version + 1
    pub version: i64,
    pub is_deleted: bool,
    pub record: Option<Record>,
    /// Index of the superseded read in the read set
    pub read_entry: Option<usize>,
    /// Uploaded to the handler, so commit or abort has to finalize it
    pub need_post_processing: bool,
    pub extension: Extension,
}

impl Default for WriteSetEntry {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION,
            is_deleted: false,
            record: None,
            read_entry: None,
            need_post_processing: false,
            extension: None,
        }
    }
}

#[derive(Debug, Default)]
struct Slot<E> {
    key: Option<SetKey>,
    entry: E,
}

/// Growable pool of reusable entry slots with stack discipline
#[derive(Debug)]
pub struct EntryPool<E> {
    slots: Vec<Slot<E>>,
    len: usize,
}

impl<E: Default> EntryPool<E> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        Self { slots, len: 0 }
    }

    /// Claim the next slot, reset to defaults. Returns its index.
    pub fn push(&mut self) -> usize {
        if self.len == self.slots.len() {
            self.slots.push(Slot::default());
        }
        let slot = &mut self.slots[self.len];
        slot.key = None;
        slot.entry = E::default();
        self.len += 1;
        self.len - 1
    }
}

impl<E> EntryPool<E> {
    /// Give back the most recently claimed slot
    pub fn pop(&mut self) {
        self.len = self.len.saturating_sub(1);
    }

    pub fn reset(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slots allocated, live or not
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Newest live entry for the key
    pub fn find(&self, table: &str, key: &Key) -> Option<usize> {
        self.slots[..self.len]
            .iter()
            .rposition(|slot| slot.key.as_ref().map_or(false, |k| k.matches(table, key)))
    }

    pub fn get(&self, index: usize) -> &E {
        &self.slots[index].entry
    }

    pub fn get_mut(&mut self, index: usize) -> &mut E {
        &mut self.slots[index].entry
    }

    pub fn key(&self, index: usize) -> Option<&SetKey> {
        self.slots[index].key.as_ref()
    }

    pub fn set_key(&mut self, index: usize, table: &str, key: &Key) {
        self.slots[index].key = Some(SetKey {
            table: table.to_string(),
            key: key.clone(),
        });
    }

    /// Live entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &E)> {
        self.slots[..self.len]
            .iter()
            .enumerate()
            .map(|(i, slot)| (i, &slot.entry))
    }
}

/// Read and write sets of one transaction
#[derive(Debug)]
pub struct LocalState {
    reads: EntryPool<ReadSetEntry>,
    writes: EntryPool<WriteSetEntry>,
}

impl LocalState {
    pub fn new(capacity: usize) -> Self {
        Self {
            reads: EntryPool::with_capacity(capacity),
            writes: EntryPool::with_capacity(capacity),
        }
    }

    /// Claim a fresh read entry; its key is set once the read resolves
    pub fn insert_read_set(&mut self) -> usize {
        self.reads.push()
    }

    pub fn set_read_key(&mut self, index: usize, table: &str, key: &Key) {
        self.reads.set_key(index, table, key);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_write_set(
        &mut self,
        table: &str,
        key: &Key,
        version: i64,
        is_deleted: bool,
        record: Option<Record>,
        read_entry: Option<usize>,
        need_post_processing: bool,
    ) -> usize {
        let index = self.writes.push();
        self.writes.set_key(index, table, key);
        let entry = self.writes.get_mut(index);
        entry.version = version;
        entry.is_deleted = is_deleted;
        entry.record = record;
        entry.read_entry = read_entry;
        entry.need_post_processing = need_post_processing;
        index
    }

    pub fn find_in_read_set(&self, table: &str, key: &Key) -> Option<usize> {
        self.reads.find(table, key)
    }

    pub fn find_in_write_set(&self, table: &str, key: &Key) -> Option<usize> {
        self.writes.find(table, key)
    }

    pub fn release_read_set(&mut self) {
        self.reads.pop();
    }

    pub fn release_write_set(&mut self) {
        self.writes.pop();
    }

    pub fn reset(&mut self) {
        self.reads.reset();
        self.writes.reset();
    }

    pub fn read(&self, index: usize) -> &ReadSetEntry {
        self.reads.get(index)
    }

    pub fn read_mut(&mut self, index: usize) -> &mut ReadSetEntry {
        self.reads.get_mut(index)
    }

    pub fn write(&self, index: usize) -> &WriteSetEntry {
        self.writes.get(index)
    }

    pub fn write_mut(&mut self, index: usize) -> &mut WriteSetEntry {
        self.writes.get_mut(index)
    }

    pub fn read_key(&self, index: usize) -> Option<&SetKey> {
        self.reads.key(index)
    }

    pub fn write_key(&self, index: usize) -> Option<&SetKey> {
        self.writes.key(index)
    }

    pub fn reads(&self) -> &EntryPool<ReadSetEntry> {
        &self.reads
    }

    pub fn writes(&self) -> &EntryPool<WriteSetEntry> {
        &self.writes
    }

    pub fn read_set_size(&self) -> usize {
        self.reads.len()
    }

    pub fn write_set_size(&self) -> usize {
        self.writes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_grows_by_one_and_keeps_slots() {
        let mut state = LocalState::new(2);
        for _ in 0..3 {
            state.insert_read_set();
        }
        assert_eq!(state.reads().capacity(), 3);
        state.reset();
        assert_eq!(state.read_set_size(), 0);
        assert_eq!(state.reads().capacity(), 3);
    }

    #[test]
    fn test_find_prefers_newest() {
        let mut state = LocalState::new(4);
        let key = Key::Int(1);
        let first = state.insert_read_set();
        state.set_read_key(first, "t", &key);
        let other = state.insert_read_set();
        state.set_read_key(other, "t", &Key::Int(2));
        let second = state.insert_read_set();
        state.set_read_key(second, "t", &key);

        assert_eq!(state.find_in_read_set("t", &key), Some(second));
        assert_eq!(state.find_in_read_set("u", &key), None);

        state.release_read_set();
        assert_eq!(state.find_in_read_set("t", &key), Some(first));
    }

    #[test]
    fn test_release_pops_last_write() {
        let mut state = LocalState::new(1);
        let key = Key::Int(7);
        state.insert_write_set("t", &key, 1, false, Some(Record::Int(1)), None, false);
        state.insert_write_set("t", &key, 1, false, Some(Record::Int(2)), None, false);
        assert_eq!(state.write_set_size(), 2);

        state.release_write_set();
        assert_eq!(state.write_set_size(), 1);
        let remaining = state.find_in_write_set("t", &key).unwrap();
        assert_eq!(state.write(remaining).record, Some(Record::Int(1)));
    }

    #[test]
    fn test_unresolved_read_is_invisible() {
        let mut state = LocalState::new(1);
        state.insert_read_set();
        assert_eq!(state.find_in_read_set("t", &Key::Int(1)), None);
    }

    #[test]
    fn test_reused_slot_is_reset() {
        let mut state = LocalState::new(1);
        let w = state.insert_write_set("t", &Key::Int(1), 4, true, None, Some(0), true);
        state.write_mut(w).extension = Some(bytes::Bytes::from_static(b"x"));
        state.reset();

        let read = state.insert_read_set();
        assert_eq!(*state.read(read), ReadSetEntry::default());
        let w = state.insert_write_set("t", &Key::Int(2), 1, false, Some(Record::Int(3)), None, false);
        let entry = state.write(w);
        assert_eq!(entry.extension, None);
        assert_eq!(entry.read_entry, None);
        assert_eq!(state.find_in_write_set("t", &Key::Int(1)), None);
        assert_eq!(state.write_key(w).unwrap().key, Key::Int(2));
    }
}
