// ===============================
// src/aggregator.rs
// ===============================
//
// Consumer side of the pipeline. One worker per partition; a symbol lives
// on exactly one partition, so same-symbol events apply in delivered order.
//
// Per delivery: parse -> idempotency check -> durable log append ->
// position upsert -> ack. The log append is the claim on the trade id:
// a duplicate means the event was already applied, and the delivery is
// acked without touching the store. Transient log errors are nacked after
// a jittered pause and come back via redelivery until the attempt budget
// dead-letters them. Unparseable payloads go straight to the dead-letter
// path so they never block the partition.
//
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::broker::PartitionConsumer;
use crate::domain::{signed_delta, TradeEvent, TradeRecord};
use crate::metrics::{APPLY_LATENCY_MS, DUPLICATES_SKIPPED, EVENTS_APPLIED};
use crate::store::PositionStore;
use crate::tradelog::{TradeLog, TradeLogError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Fresh,
    Duplicate,
}

pub async fn run(
    consumer: PartitionConsumer,
    store: Arc<PositionStore>,
    log: Arc<TradeLog>,
    nack_backoff_ms: u64,
) {
    info!(partition = consumer.id(), "aggregator worker started");

    loop {
        let delivery = consumer.next().await;

        let event = match serde_json::from_slice::<TradeEvent>(delivery.payload()) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(
                    partition = delivery.partition(),
                    error = %e,
                    "malformed trade payload, dead-lettering"
                );
                delivery.reject("malformed payload").await;
                continue;
            }
        };

        match apply(&event, &store, &log).await {
            Ok(Applied::Fresh) => {
                EVENTS_APPLIED.with_label_values(&[&event.symbol]).inc();
                let age_ms = (Utc::now().timestamp_millis() - event.timestamp).max(0);
                APPLY_LATENCY_MS.observe(age_ms as f64);
                debug!(trade_id = %event.trade_id, symbol = %event.symbol, "trade applied");
                delivery.ack();
            }
            Ok(Applied::Duplicate) => {
                DUPLICATES_SKIPPED.inc();
                info!(trade_id = %event.trade_id, "duplicate delivery, already applied");
                delivery.ack();
            }
            Err(e) => {
                warn!(
                    trade_id = %event.trade_id,
                    attempt = delivery.attempt(),
                    error = %e,
                    "apply failed, redelivering"
                );
                // jittered pause keeps a broken log from spinning the loop hot
                let jitter = rand::thread_rng().gen_range(0..=250);
                sleep(Duration::from_millis(nack_backoff_ms + jitter)).await;
                delivery.nack().await;
            }
        }
    }
}

/// Apply one event at most once. The trade log append doubles as the
/// idempotency index: whoever logs the id first wins; every later delivery
/// of the same id is a no-op. The log goes first so a crash between the
/// two writes is healed by the startup refold of the log into the store.
pub async fn apply(
    event: &TradeEvent,
    store: &PositionStore,
    log: &TradeLog,
) -> Result<Applied, TradeLogError> {
    if log.exists(&event.trade_id).await {
        return Ok(Applied::Duplicate);
    }

    let record = TradeRecord::from_event(event);
    match log.append(&record).await {
        Ok(()) => {}
        Err(TradeLogError::DuplicateTrade(_)) => return Ok(Applied::Duplicate),
        Err(e) => return Err(e),
    }

    let (qty_delta, pnl_delta) = signed_delta(event.side, event.quantity, event.price);
    store.upsert(&event.symbol, qty_delta, pnl_delta);
    Ok(Applied::Fresh)
}
