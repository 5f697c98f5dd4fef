//! txbench - read-modify-write workload driver for txengine
//!
//! Loads `keys` counters, then runs `clients` sessions per executor. Every
//! transaction reads two distinct counters and writes each back incremented
//! by one. When all clients are done the counters must add up to twice the
//! number of committed transactions; anything else is a lost update.
//!
//! ```text
//!   client sessions ──► RequestSubmitter ──► StreamingExecutor ─┐
//!   (blocking tasks)                        (one per executor)  ├──► MemoryHandler
//!   client sessions ──► RequestSubmitter ──► StreamingExecutor ─┘
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use rand::seq::index::sample;
use rand::Rng;
use serde::Serialize;

use txengine::transaction::RequestInput;
use txengine::txlog::TxLogConfig;
use txengine::{
    Engine, EngineConfig, ExecutorStats, Handler, Key, MemoryHandler, OperationRequest, Record,
    RequestSubmitter, SessionId, TransactionExecutor, TxError,
};

const TABLE: &str = "counters";

struct Options {
    executors: usize,
    slots: usize,
    clients: usize,
    txns: usize,
    keys: usize,
    deferred: bool,
    log_path: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            executors: 2,
            slots: 16,
            clients: 8,
            txns: 1000,
            keys: 100,
            deferred: false,
            log_path: None,
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct Report {
    executors: usize,
    slots: usize,
    clients: usize,
    committed: u64,
    aborted: u64,
    client_commits: u64,
    elapsed_ms: u128,
    txns_per_sec: f64,
    counter_sum: i64,
    consistent: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let mut options = Options::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--executors" | "-e" => {
                if i + 1 < args.len() {
                    options.executors = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--slots" | "-s" => {
                if i + 1 < args.len() {
                    options.slots = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--clients" | "-c" => {
                if i + 1 < args.len() {
                    options.clients = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--txns" | "-n" => {
                if i + 1 < args.len() {
                    options.txns = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--keys" | "-k" => {
                if i + 1 < args.len() {
                    options.keys = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--log" | "-l" => {
                if i + 1 < args.len() {
                    options.log_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--deferred" => options.deferred = true,
            "--help" | "-h" => {
                println!("txbench - read-modify-write workload for txengine");
                println!();
                println!("Usage: txbench [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -e, --executors N   Executors (default: 2)");
                println!("  -s, --slots N       Transaction slots per executor (default: 16)");
                println!("  -c, --clients N     Client sessions per executor (default: 8)");
                println!("  -n, --txns N        Transactions per client (default: 1000)");
                println!("  -k, --keys N        Counters in the table (default: 100)");
                println!("  -l, --log PATH      Journal commits to a transaction log file");
                println!("      --deferred      Complete handler calls in batches");
                println!("  -h, --help          Show this help");
                return Ok(());
            }
            other => warn!("Ignoring unknown argument {}", other),
        }
        i += 1;
    }
    options.keys = options.keys.max(2);

    let memory = Arc::new(if options.deferred {
        MemoryHandler::deferred()
    } else {
        MemoryHandler::default()
    });
    let handler: Arc<dyn Handler> = memory.clone();
    let config = EngineConfig::in_memory().slots(options.slots);
    let mut engine = Engine::new(config, handler, options.executors);
    if let Some(path) = &options.log_path {
        engine = engine.open_log(path, TxLogConfig::default())?;
        info!("Journaling commits to {:?}", path);
    }
    let engine = Arc::new(engine);

    load(&engine, options.keys)?;
    info!("Loaded {} counters", options.keys);

    let started = Instant::now();
    let stop = Arc::new(AtomicBool::new(false));
    let mut executors = Vec::new();
    let mut clients = Vec::new();

    for executor_id in 0..engine.executor_count() {
        let mut executor = engine.streaming_executor(executor_id)?;
        let submitter = executor.submitter();
        let stop_flag = Arc::clone(&stop);
        executors.push(tokio::task::spawn_blocking(move || -> txengine::Result<ExecutorStats> {
            while !stop_flag.load(Ordering::Acquire) {
                if !executor.run_once()? {
                    std::thread::sleep(Duration::from_micros(50));
                }
            }
            executor.shutdown()?;
            Ok(executor.statistics())
        }));

        for client in 0..options.clients {
            let session = (executor_id * options.clients + client) as SessionId;
            let submitter = submitter.clone();
            let (txns, keys) = (options.txns, options.keys);
            clients.push(tokio::task::spawn_blocking(move || run_client(&submitter, session, txns, keys)));
        }
    }

    let mut client_commits = 0;
    for client in clients {
        client_commits += client.await??;
    }
    stop.store(true, Ordering::Release);

    let mut stats = ExecutorStats::default();
    for executor in executors {
        stats.merge(executor.await??);
    }
    let elapsed = started.elapsed();
    engine.close()?;

    let counter_sum: i64 = (0..options.keys)
        .filter_map(|k| memory.committed_record(TABLE, &Key::Int(k as i64)))
        .filter_map(|r| r.as_int())
        .sum();
    let report = Report {
        executors: engine.executor_count(),
        slots: options.slots,
        clients: options.clients,
        committed: stats.commits,
        aborted: stats.aborts,
        client_commits,
        elapsed_ms: elapsed.as_millis(),
        txns_per_sec: stats.total() as f64 / elapsed.as_secs_f64().max(1e-9),
        counter_sum,
        consistent: counter_sum == 2 * client_commits as i64,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.consistent {
        return Err(TxError::Internal(format!(
            "lost update: counters sum to {}, expected {}",
            counter_sum,
            2 * client_commits
        ))
        .into());
    }
    Ok(())
}

/// Insert every counter at zero
fn load(engine: &Engine, keys: usize) -> txengine::Result<()> {
    let mut executor = engine.batch_executor(0)?;
    for key in 0..keys {
        let session = key as SessionId;
        executor.add_request(Arc::new(OperationRequest::begin(session)))?;
        executor.add_request(Arc::new(OperationRequest::insert(session, TABLE, key as i64, 0i64)))?;
        executor.add_request(Arc::new(OperationRequest::commit(session)))?;
    }
    executor.run()?;
    let stats = executor.statistics();
    if stats.aborts > 0 {
        return Err(TxError::Internal(format!("{} loader transactions aborted", stats.aborts)));
    }
    Ok(())
}

fn submit(submitter: &RequestSubmitter, request: &Arc<OperationRequest>) -> txengine::Result<()> {
    loop {
        match submitter.submit(Arc::clone(request)) {
            Ok(()) => return Ok(()),
            Err(TxError::QueueFull) => std::thread::yield_now(),
            Err(e) => return Err(e),
        }
    }
}

/// Increment the counter read by the request this one depends on
fn increment(input: &mut RequestInput, dependencies: &[Arc<OperationRequest>]) {
    let current = dependencies
        .first()
        .and_then(|read| read.result().record)
        .and_then(|record| record.as_int())
        .unwrap_or(0);
    input.record = Some(Record::Int(current + 1));
}

/// Run `txns` transactions on one session. Returns how many committed.
fn run_client(submitter: &RequestSubmitter, session: SessionId, txns: usize, keys: usize) -> txengine::Result<u64> {
    let mut rng = rand::thread_rng();
    let mut commits = 0;

    for _ in 0..txns {
        let picked = sample(&mut rng, keys, 2);
        submit(submitter, &Arc::new(OperationRequest::begin(session).with_txn_type(rng.gen_range(0..4))))?;
        for key in picked.iter() {
            let read = Arc::new(OperationRequest::read(session, TABLE, key as i64));
            submit(submitter, &read)?;
            let update = OperationRequest::update(session, TABLE, key as i64, 0i64)
                .with_dependency(read)
                .with_processor(increment);
            submit(submitter, &Arc::new(update))?;
        }
        let commit = Arc::new(OperationRequest::commit(session));
        submit(submitter, &commit)?;

        let Some(result) = commit.wait_timeout(Duration::from_secs(30)) else {
            return Err(TxError::Internal(format!("session {} timed out waiting for commit", session)));
        };
        if result.is_committed() {
            commits += 1;
        }
    }
    Ok(commits)
}
