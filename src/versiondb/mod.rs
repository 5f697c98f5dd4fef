//! Version store interface
//!
//! The execution core never owns versions. It reaches the multi-version
//! store through the [`Handler`] trait, whose calls complete asynchronously
//! through [`HandlerResult`] slots.

pub mod entry;
pub mod handler;
pub mod memory;
pub mod result;

pub use entry::{
    Extension, TxnEntry, TxnStatus, VersionEntry, DEFAULT_BEGIN_TS, DEFAULT_COMMIT_TS,
    DEFAULT_END_TS, DEFAULT_VERSION, EMPTY_TX_ID, FIRST_VERSION, MAX_TIMESTAMP,
};
pub use handler::{Handler, VersionCommit};
pub use memory::{CompletionMode, HandlerCall, MemoryHandler};
pub use result::HandlerResult;

use std::cmp::Ordering;

/// Pick the version a reader sees out of the two newest versions of a key.
///
/// The newer version wins once its writer has closed it; otherwise the older
/// one is used unless it is the unset sentinel. A deleted version 0 is the
/// placeholder of a key that never existed and counts as nothing visible.
pub fn pick_visible_version(pair: &[VersionEntry; 2]) -> Option<&VersionEntry> {
    let (newer, older) = match pair[0].version.cmp(&pair[1].version) {
        Ordering::Greater => (&pair[0], &pair[1]),
        Ordering::Less => (&pair[1], &pair[0]),
        Ordering::Equal => return None,
    };
    let candidate = if newer.end_ts != DEFAULT_END_TS {
        newer
    } else if older.version != DEFAULT_VERSION {
        older
    } else {
        return None;
    };
    if !candidate.is_deleted || candidate.version > FIRST_VERSION {
        Some(candidate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Record;

    fn committed(version: i64, begin: i64, end: i64) -> VersionEntry {
        VersionEntry {
            version,
            begin_ts: begin,
            end_ts: end,
            is_deleted: false,
            record: Some(Record::Int(version)),
            ..Default::default()
        }
    }

    fn uploaded(version: i64, tx_id: i64) -> VersionEntry {
        VersionEntry {
            version,
            tx_id,
            is_deleted: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_newer_committed_wins() {
        let pair = [committed(2, 20, MAX_TIMESTAMP), committed(1, 10, 20)];
        assert_eq!(pick_visible_version(&pair).unwrap().version, 2);
        let swapped = [committed(1, 10, 20), committed(2, 20, MAX_TIMESTAMP)];
        assert_eq!(pick_visible_version(&swapped).unwrap().version, 2);
    }

    #[test]
    fn test_uncommitted_newer_falls_back() {
        let pair = [uploaded(3, 77), committed(2, 20, MAX_TIMESTAMP)];
        assert_eq!(pick_visible_version(&pair).unwrap().version, 2);
    }

    #[test]
    fn test_nothing_visible() {
        let sentinel = [VersionEntry::default(), VersionEntry::default()];
        assert!(pick_visible_version(&sentinel).is_none());

        let placeholder = [VersionEntry::pseudo(), VersionEntry::default()];
        assert!(pick_visible_version(&placeholder).is_none());

        let first_upload = [uploaded(1, 5), VersionEntry::default()];
        assert!(pick_visible_version(&first_upload).is_none());
    }

    #[test]
    fn test_tombstone_is_visible() {
        let mut tombstone = committed(2, 20, MAX_TIMESTAMP);
        tombstone.is_deleted = true;
        let pair = [tombstone, committed(1, 10, 20)];
        let picked = pick_visible_version(&pair).unwrap();
        assert!(picked.is_deleted);
        assert_eq!(picked.version, 2);
    }
}
