use std::sync::Arc;

use bytes::BytesMut;
use txengine::transaction::ExecutorContext;
use txengine::versiondb::{HandlerCall, VersionEntry};
use txengine::{
    BatchExecutor, EngineConfig, Handler, Key, MemoryHandler, OperationRequest, Record,
    StreamingExecutor, TransactionExecutor,
};

const T: &str = "items";

fn setup(slots: usize) -> (Arc<MemoryHandler>, BatchExecutor) {
    let memory = Arc::new(MemoryHandler::deferred());
    let handler: Arc<dyn Handler> = memory.clone();
    let ctx = ExecutorContext::new(EngineConfig::in_memory().slots(slots), handler);
    (memory, BatchExecutor::new(ctx))
}

fn add(exec: &mut BatchExecutor, request: OperationRequest) -> Arc<OperationRequest> {
    let request = Arc::new(request);
    exec.add_request(Arc::clone(&request)).unwrap();
    request
}

#[test]
fn test_committed_insert_visible_to_later_transaction() {
    let (_memory, mut exec) = setup(4);

    add(&mut exec, OperationRequest::begin(1));
    add(&mut exec, OperationRequest::insert(1, T, "apple", 3));
    let commit = add(&mut exec, OperationRequest::commit(1));
    exec.run().unwrap();
    assert!(commit.result().is_committed());

    add(&mut exec, OperationRequest::begin(2));
    let read = add(&mut exec, OperationRequest::read(2, T, "apple"));
    add(&mut exec, OperationRequest::commit(2));
    exec.run().unwrap();

    let result = read.result();
    assert_eq!(result.record, Some(Record::Int(3)));
    assert!(!result.is_deleted);
    assert!(!result.is_null);
}

#[test]
fn test_second_insert_rejected_upsert_accepted() {
    let (memory, mut exec) = setup(4);

    add(&mut exec, OperationRequest::begin(1));
    let first = add(&mut exec, OperationRequest::insert(1, T, 1, "a"));
    let second = add(&mut exec, OperationRequest::insert(1, T, 1, "b"));
    let upsert = add(&mut exec, OperationRequest::upsert(1, T, 1, "c"));
    let commit = add(&mut exec, OperationRequest::commit(1));
    exec.run().unwrap();

    assert!(!first.result().is_error);
    assert!(second.result().is_error);
    assert!(!upsert.result().is_error);
    assert!(commit.result().is_committed());
    assert_eq!(memory.committed_record(T, &Key::Int(1)), Some(Record::from("c")));
}

#[test]
fn test_concurrent_writers_second_aborts() {
    let (memory, mut exec) = setup(4);
    add(&mut exec, OperationRequest::begin(0));
    add(&mut exec, OperationRequest::insert(0, T, 7, 0));
    add(&mut exec, OperationRequest::commit(0));
    exec.run().unwrap();

    // both read version 1, both write version 2
    let mut commits = Vec::new();
    for (session, value) in [(1u64, 100), (2, 200)] {
        add(&mut exec, OperationRequest::begin(session));
        add(&mut exec, OperationRequest::read(session, T, 7));
        add(&mut exec, OperationRequest::update(session, T, 7, value));
        commits.push(add(&mut exec, OperationRequest::commit(session)));
    }
    exec.run().unwrap();

    assert!(commits[0].result().is_committed());
    assert!(commits[1].result().is_aborted());
    assert_eq!(memory.committed_record(T, &Key::Int(7)), Some(Record::Int(100)));
    assert_eq!(memory.total_read_count(), 0);
}

#[test]
fn test_commit_ts_ordering_against_reads() {
    let (memory, mut exec) = setup(4);
    add(&mut exec, OperationRequest::begin(0));
    add(&mut exec, OperationRequest::insert(0, T, 1, 1));
    add(&mut exec, OperationRequest::insert(0, T, 2, 2));
    add(&mut exec, OperationRequest::commit(0));
    exec.run().unwrap();
    let begin_ts = memory.version_list(T, &Key::Int(1))[1].begin_ts;

    // read and write the same key: strictly after the read version
    add(&mut exec, OperationRequest::begin(1));
    add(&mut exec, OperationRequest::read(1, T, 1));
    add(&mut exec, OperationRequest::update(1, T, 1, 10));
    let writer = add(&mut exec, OperationRequest::commit(1));

    // read only: not before the read version
    add(&mut exec, OperationRequest::begin(2));
    add(&mut exec, OperationRequest::read(2, T, 2));
    let reader = add(&mut exec, OperationRequest::commit(2));
    exec.run().unwrap();

    let writer = writer.result();
    assert!(writer.is_committed());
    assert!(writer.commit_ts.unwrap() > begin_ts);

    let reader = reader.result();
    assert!(reader.is_committed());
    assert!(reader.commit_ts.unwrap() >= begin_ts);
}

#[test]
fn test_abort_cleans_each_entry_once() {
    let (memory, mut exec) = setup(4);
    add(&mut exec, OperationRequest::begin(0));
    add(&mut exec, OperationRequest::insert(0, T, 1, 1));
    add(&mut exec, OperationRequest::insert(0, T, 3, 3));
    add(&mut exec, OperationRequest::commit(0));
    exec.run().unwrap();
    let deletes_before = memory.call_count(HandlerCall::DeleteVersion);
    let releases_before = memory.call_count(HandlerCall::ReleaseReadCounter);

    // both read key 3 in the same pass; session 1 uploads first
    add(&mut exec, OperationRequest::begin(1));
    add(&mut exec, OperationRequest::read(1, T, 3));
    add(&mut exec, OperationRequest::update(1, T, 3, 30));
    let winner = add(&mut exec, OperationRequest::commit(1));

    // session 2 uploads key 2 next to its losing key 3
    add(&mut exec, OperationRequest::begin(2));
    add(&mut exec, OperationRequest::read(2, T, 3));
    add(&mut exec, OperationRequest::read(2, T, 1));
    add(&mut exec, OperationRequest::insert(2, T, 2, 2));
    add(&mut exec, OperationRequest::update(2, T, 3, 31));
    let loser = add(&mut exec, OperationRequest::commit(2));
    exec.run().unwrap();

    assert!(winner.result().is_committed());
    assert!(loser.result().is_aborted());

    // one uploaded version removed, three reads (3, 1, placeholder of 2) released
    assert_eq!(memory.call_count(HandlerCall::DeleteVersion) - deletes_before, 1);
    assert_eq!(memory.call_count(HandlerCall::ReleaseReadCounter) - releases_before, 3);
    assert_eq!(memory.total_read_count(), 0);
    assert_eq!(memory.committed_record(T, &Key::Int(2)), None);
    assert_eq!(memory.version_list(T, &Key::Int(2)).len(), 1);
}

#[test]
fn test_streaming_begin_beyond_capacity_waits() {
    let memory = Arc::new(MemoryHandler::default());
    let handler: Arc<dyn Handler> = memory.clone();
    let mut exec = StreamingExecutor::new(ExecutorContext::new(EngineConfig::in_memory().slots(2), handler));
    let submitter = exec.submitter();

    let begins: Vec<_> = (1..=3u64)
        .map(|session| {
            let request = Arc::new(OperationRequest::begin(session));
            submitter.submit(Arc::clone(&request)).unwrap();
            request
        })
        .collect();
    exec.run().unwrap();

    assert!(begins[0].is_finished());
    assert!(begins[1].is_finished());
    assert!(!begins[2].is_finished());
    assert_eq!(exec.active(), 2);

    submitter.submit(Arc::new(OperationRequest::commit(1))).unwrap();
    exec.run().unwrap();
    assert!(begins[2].is_finished());
    assert_eq!(exec.statistics().commits, 1);
}

#[test]
fn test_codec_reconstructs_values() {
    for key in [Key::Int(-42), Key::from("ключ")] {
        let mut buf = key.to_bytes();
        assert_eq!(Key::decode(&mut buf).unwrap(), key);
    }
    for record in [Record::Int(i64::MAX), Record::from("payload")] {
        let mut buf = record.to_bytes();
        assert_eq!(Record::decode(&mut buf).unwrap(), record);
    }

    let entry = VersionEntry {
        version: 3,
        tx_id: 9,
        begin_ts: 100,
        end_ts: 200,
        max_commit_ts: 150,
        is_deleted: false,
        record: Some(Record::from("v3")),
        extension: Some(bytes::Bytes::from_static(b"ext")),
    };
    let mut raw = BytesMut::new();
    entry.encode(&mut raw);
    let encoded = raw.freeze();
    let decoded = VersionEntry::decode(&mut encoded.clone()).unwrap();
    assert_eq!(decoded, entry);
    assert_eq!(decoded.to_bytes(), encoded);
}
