use std::sync::Arc;

use tempfile::TempDir;
use txengine::datastore::{DataStore, MemoryDataStore};
use txengine::txlog::{latest_writes, read_log, replay_into, FileTxLog, LoggedWrite, TxLog, TxLogConfig};
use txengine::versiondb::TxnEntry;
use txengine::{Engine, EngineConfig, Handler, Key, MemoryHandler, OperationRequest, Record, TransactionExecutor};

fn write(key: i64, value: Option<i64>) -> LoggedWrite {
    LoggedWrite {
        table: "accounts".to_string(),
        key: Key::Int(key),
        version: 1,
        is_deleted: value.is_none(),
        record: value.map(Record::Int),
    }
}

fn committed(tx_id: i64, commit_ts: i64) -> TxnEntry {
    let mut txn = TxnEntry::new(tx_id, 0);
    txn.commit_ts = commit_ts;
    txn
}

#[test]
fn test_append_and_read_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tx.log");
    let log = FileTxLog::open(&path, TxLogConfig::synchronous()).unwrap();

    log.append(0, &[write(1, Some(10))], &committed(7, 100), true).unwrap();
    log.append(1, &[write(2, Some(20)), write(3, None)], &committed(8, 101), true).unwrap();
    assert_eq!(log.last_lsn(), 2);
    assert_eq!(log.durable_lsn(), 2);
    log.close().unwrap();

    let records = read_log(&path).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].lsn, 1);
    assert_eq!(records[0].txn_id, 7);
    assert_eq!(records[1].executor_id, 1);
    assert_eq!(records[1].commit_ts, 101);
    assert_eq!(records[1].writes[1], write(3, None));
}

#[test]
fn test_reopen_continues_lsn() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tx.log");

    {
        let log = FileTxLog::open(&path, TxLogConfig::default()).unwrap();
        log.append(0, &[write(1, Some(1))], &committed(1, 10), false).unwrap();
        log.append(0, &[write(1, Some(2))], &committed(2, 11), false).unwrap();
        log.close().unwrap();
    }

    let log = FileTxLog::open(&path, TxLogConfig::default()).unwrap();
    assert_eq!(log.last_lsn(), 2);
    log.append(0, &[write(1, Some(3))], &committed(3, 12), false).unwrap();
    let durable = log.force_sync().unwrap();
    assert_eq!(durable, 3);
    log.close().unwrap();

    let lsns: Vec<_> = read_log(&path).unwrap().iter().map(|r| r.lsn).collect();
    assert_eq!(lsns, vec![1, 2, 3]);
}

#[test]
fn test_concurrent_appends_keep_lsn_order_in_file() {
    const THREADS: i64 = 4;
    const APPENDS: i64 = 50;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tx.log");
    let log = Arc::new(FileTxLog::open(&path, TxLogConfig::default()).unwrap());

    let writers: Vec<_> = (0..THREADS)
        .map(|executor| {
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                for i in 0..APPENDS {
                    let tx_id = executor * APPENDS + i + 1;
                    log.append(executor as usize, &[write(i, Some(tx_id))], &committed(tx_id, tx_id), false)
                        .unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    log.close().unwrap();

    // file order is LSN order, without gaps
    let lsns: Vec<_> = read_log(&path).unwrap().iter().map(|r| r.lsn).collect();
    let expected: Vec<_> = (1..=(THREADS * APPENDS) as u64).collect();
    assert_eq!(lsns, expected);
}

#[test]
fn test_appends_after_close_fail() {
    let dir = TempDir::new().unwrap();
    let log = FileTxLog::open(dir.path().join("tx.log"), TxLogConfig::default()).unwrap();
    log.close().unwrap();
    assert!(log.append(0, &[write(1, Some(1))], &committed(1, 1), true).is_err());
    // second close is a no-op
    log.close().unwrap();
}

#[test]
fn test_clean_before_drops_old_records() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tx.log");
    let log = FileTxLog::open(&path, TxLogConfig::synchronous()).unwrap();
    for (tx_id, ts) in [(1, 10), (2, 20), (3, 30)] {
        log.append(0, &[write(tx_id, Some(ts))], &committed(tx_id, ts), true).unwrap();
    }

    log.clean_before(20).unwrap();
    log.append(0, &[write(4, Some(40))], &committed(4, 40), true).unwrap();
    log.close().unwrap();

    let records = read_log(&path).unwrap();
    let commits: Vec<_> = records.iter().map(|r| r.commit_ts).collect();
    assert_eq!(commits, vec![20, 30, 40]);
    assert_eq!(records.last().unwrap().lsn, 4);
}

#[test]
fn test_replay_applies_newest_write_per_key() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tx.log");
    let log = FileTxLog::open(&path, TxLogConfig::synchronous()).unwrap();

    // appended out of commit order
    log.append(0, &[write(1, Some(2)), write(2, Some(5))], &committed(2, 20), true).unwrap();
    log.append(1, &[write(1, Some(1))], &committed(1, 10), true).unwrap();
    log.append(1, &[write(2, None)], &committed(3, 30), true).unwrap();
    log.close().unwrap();

    let latest = latest_writes(&read_log(&path).unwrap());
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[&("accounts".to_string(), Key::Int(1))].record, Some(Record::Int(2)));

    let store = MemoryDataStore::new();
    store.insert("accounts", &Key::Int(2), Record::Int(99)).unwrap();
    assert_eq!(replay_into(&path, &store).unwrap(), 2);
    assert_eq!(store.get("accounts", &Key::Int(1)), Some(Record::Int(2)));
    assert_eq!(store.get("accounts", &Key::Int(2)), None);
}

#[test]
fn test_torn_tail_is_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tx.log");
    let log = FileTxLog::open(&path, TxLogConfig::synchronous()).unwrap();
    log.append(0, &[write(1, Some(1))], &committed(1, 10), true).unwrap();
    log.close().unwrap();

    // length prefix promising more bytes than follow
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.extend_from_slice(&64u32.to_le_bytes());
    bytes.extend_from_slice(&[0xAB; 10]);
    std::fs::write(&path, bytes).unwrap();

    assert_eq!(read_log(&path).unwrap().len(), 1);
}

#[test]
fn test_durable_engine_journals_commits() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.log");
    let handler: Arc<dyn Handler> = Arc::new(MemoryHandler::default());
    let engine = Engine::new(EngineConfig::in_memory(), handler, 1)
        .open_log(&path, TxLogConfig::synchronous())
        .unwrap();
    let mut exec = engine.batch_executor(0).unwrap();

    // one writer, one reader; only the writer reaches the log
    exec.add_request(Arc::new(OperationRequest::begin(1))).unwrap();
    exec.add_request(Arc::new(OperationRequest::insert(1, "accounts", "alice", 100))).unwrap();
    let commit = Arc::new(OperationRequest::commit(1));
    exec.add_request(Arc::clone(&commit)).unwrap();
    exec.run().unwrap();
    assert!(commit.result().is_committed());
    let commit_ts = commit.result().commit_ts.unwrap();

    exec.add_request(Arc::new(OperationRequest::begin(2))).unwrap();
    exec.add_request(Arc::new(OperationRequest::read(2, "accounts", "alice"))).unwrap();
    exec.add_request(Arc::new(OperationRequest::commit(2))).unwrap();
    exec.run().unwrap();
    engine.close().unwrap();

    let records = read_log(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].commit_ts, commit_ts);
    assert_eq!(records[0].writes.len(), 1);
    assert_eq!(records[0].writes[0].key, Key::from("alice"));
    assert_eq!(records[0].writes[0].record, Some(Record::Int(100)));

    let restored = MemoryDataStore::new();
    replay_into(&path, &restored).unwrap();
    assert_eq!(restored.get("accounts", &Key::from("alice")), Some(Record::Int(100)));
}
