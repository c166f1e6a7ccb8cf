// ===============================
// src/config.rs
// ===============================
use std::env;
use dotenvy::dotenv;

#[derive(Clone, Debug)]
pub struct Args {
    // network
    pub api_port: u16,
    pub metrics_port: u16,

    // broker topology
    pub partitions: usize,

    // durable files
    pub trade_log_file: String,
    pub dead_letter_file: String,
}

/// Delivery-side knobs: queue admission and the redelivery budget that
/// bounds how long a failing event stays in the retry cycle.
#[derive(Clone, Debug)]
pub struct DeliveryLimits {
    pub queue_depth: usize,
    pub max_attempts: u32,
    pub nack_backoff_ms: u64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

pub fn load() -> (Args, DeliveryLimits) {
    // .env first so API_PORT, TRADE_LOG_FILE, etc. are picked up
    let _ = dotenv();

    let api_port = env_parse("API_PORT", 8080);
    let metrics_port = env_parse("METRICS_PORT", 9898);

    // One partition per worker; a symbol always hashes to one partition.
    let partitions = env_parse::<usize>("BROKER_PARTITIONS", 4).max(1);

    let trade_log_file =
        env::var("TRADE_LOG_FILE").unwrap_or_else(|_| "data/trades.jsonl".to_string());
    let dead_letter_file =
        env::var("DEAD_LETTER_FILE").unwrap_or_else(|_| "data/deadletter.jsonl".to_string());

    let args = Args {
        api_port,
        metrics_port,
        partitions,
        trade_log_file,
        dead_letter_file,
    };

    let limits = DeliveryLimits {
        queue_depth: env_parse::<usize>("BROKER_QUEUE_DEPTH", 1024).max(1),
        max_attempts: env_parse::<u32>("MAX_DELIVERY_ATTEMPTS", 5).max(1),
        nack_backoff_ms: env_parse("NACK_BACKOFF_MS", 100),
    };

    (args, limits)
}
