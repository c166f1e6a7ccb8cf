// ===============================
// src/main.rs
// ===============================
//
// trade_pipeline_rust — async trade-event pipeline & position engine
//
// Accepts trade orders over HTTP, turns them into durable events on a
// partitioned at-least-once broker, folds them into a per-symbol position
// store and an append-only trade log, and serves daily analytics computed
// back from the log. Prometheus metrics on a separate port.
//
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use trade_pipeline_rust::broker::Broker;
use trade_pipeline_rust::domain::DeadLetter;
use trade_pipeline_rust::store::PositionStore;
use trade_pipeline_rust::tradelog::TradeLog;
use trade_pipeline_rust::{aggregator, api, config, deadletter, metrics};

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---- Load config & limits ----
    let (args, limits) = config::load();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    info!(
        api_port = args.api_port,
        partitions = args.partitions,
        queue_depth = limits.queue_depth,
        max_attempts = limits.max_attempts,
        trade_log = %args.trade_log_file,
        dead_letters = %args.dead_letter_file,
        "startup config"
    );
    metrics::CONFIG_PARTITIONS.set(args.partitions as i64);

    // ---- Dead-letter sink ----
    let (dead_tx, dead_rx) = mpsc::channel::<DeadLetter>(1024);
    tokio::spawn(deadletter::run(dead_rx, args.dead_letter_file.clone()));

    // ---- Trade log (replay) + position store (refold) ----
    let log = match TradeLog::open(&args.trade_log_file).await {
        Ok(log) => Arc::new(log),
        Err(e) => {
            error!(error = %e, path = %args.trade_log_file, "trade log open failed");
            std::process::exit(1);
        }
    };
    let store = Arc::new(PositionStore::new());
    let refolded = store.rebuild_from(log.all_records().await.iter());
    if refolded > 0 {
        info!(records = refolded, "position store rebuilt from trade log");
    }

    // ---- Broker + one aggregator worker per partition ----
    let broker = Arc::new(Broker::new(
        args.partitions,
        limits.queue_depth,
        limits.max_attempts,
        dead_tx,
    ));
    for partition in 0..broker.partition_count() {
        tokio::spawn(aggregator::run(
            broker.consumer(partition),
            Arc::clone(&store),
            Arc::clone(&log),
            limits.nack_backoff_ms,
        ));
    }

    // ---- REST API ----
    let state = api::AppState {
        broker: Arc::clone(&broker),
        store: Arc::clone(&store),
        log: Arc::clone(&log),
    };
    tokio::spawn(api::serve(state, args.api_port));

    // ---- Heartbeat ----
    loop {
        tokio::time::sleep(Duration::from_secs(10)).await;
        info!(
            trades = log.len().await,
            symbols = store.list_all().len(),
            "heartbeat"
        );
    }
}
