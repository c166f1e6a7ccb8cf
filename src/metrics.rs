// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Ingestion / broker --------
pub static EVENTS_PUBLISHED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("events_published_total", "trade events accepted by the broker").unwrap());

pub static PUBLISH_REJECTED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("publish_rejected_total", "publishes refused at admission (queue full)").unwrap());

pub static REDELIVERIES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("redeliveries_total", "events requeued after a nack").unwrap());

pub static DEAD_LETTERS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("dead_letters_total", "events routed to the dead-letter path").unwrap());

// -------- Aggregator --------
pub static EVENTS_APPLIED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("events_applied_total", "trade events applied per symbol"),
        &["symbol"],
    )
    .unwrap()
});

pub static DUPLICATES_SKIPPED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("duplicates_skipped_total", "redelivered events already applied").unwrap());

// Latency from producer timestamp -> applied (milliseconds)
pub static APPLY_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(HistogramOpts::new(
        "apply_latency_ms",
        "Latency from event timestamp to position apply (ms)",
    ))
    .unwrap()
});

// -------- Trade log --------
pub static TRADE_RECORDS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("trade_records_total", "records appended to the trade log").unwrap());

// -------- Positions --------
pub static POSITION_QTY: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("position_net_quantity", "net quantity per symbol"),
        &["symbol"],
    )
    .unwrap()
});

pub static POSITION_PNL: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("position_pnl", "PnL per symbol"), &["symbol"]).unwrap()
});

// -------- HTTP --------
pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "API requests (labels: route, status)"),
        &["route", "status"],
    )
    .unwrap()
});

// ---- Config visibility ----
pub static CONFIG_PARTITIONS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("config_broker_partitions", "configured broker partitions").unwrap());

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(EVENTS_PUBLISHED.clone())),
        REGISTRY.register(Box::new(PUBLISH_REJECTED.clone())),
        REGISTRY.register(Box::new(REDELIVERIES.clone())),
        REGISTRY.register(Box::new(DEAD_LETTERS.clone())),
        REGISTRY.register(Box::new(EVENTS_APPLIED.clone())),
        REGISTRY.register(Box::new(DUPLICATES_SKIPPED.clone())),
        REGISTRY.register(Box::new(APPLY_LATENCY_MS.clone())),
        REGISTRY.register(Box::new(TRADE_RECORDS.clone())),
        REGISTRY.register(Box::new(POSITION_QTY.clone())),
        REGISTRY.register(Box::new(POSITION_PNL.clone())),
        REGISTRY.register(Box::new(HTTP_REQUESTS.clone())),
        REGISTRY.register(Box::new(CONFIG_PARTITIONS.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr)
            .unwrap_or_else(|e| panic!("metrics bind {} failed: {}", addr, e));
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {}", e),
            }
        }
    });
}
