// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side { Buy, Sell }

impl Side {
    /// Booking convention: BUY draws inventory and PnL down, SELL books
    /// them up. Every quantity/PnL delta in the system goes through this
    /// sign, on both the write and the read side.
    pub fn sign(&self) -> i64 { match self { Side::Buy => -1, Side::Sell => 1 } }
}

/// Immutable queue payload. Identity is `trade_id`; the producer assigns
/// the timestamp (epoch millis) once and the event is never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeEvent {
    pub trade_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub timestamp: i64,
}

/// Durable counterpart of a TradeEvent; source of truth for analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub trade_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub trade_time: DateTime<Utc>,
}

impl TradeRecord {
    pub fn from_event(ev: &TradeEvent) -> Self {
        let trade_time = Utc
            .timestamp_millis_opt(ev.timestamp)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            trade_id: ev.trade_id,
            symbol: ev.symbol.clone(),
            side: ev.side,
            quantity: ev.quantity,
            price: ev.price,
            trade_time,
        }
    }
}

/// Net state for one symbol. An unseen symbol reads as the zero position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub net_quantity: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub pnl: Decimal,
}

/// Per-symbol daily aggregate. Derived per query, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolTotals {
    pub total_quantity: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_pnl: Decimal,
}

/// An event pulled out of the retry cycle: malformed payload or retry
/// budget exhausted. Payload is kept lossy so the entry always serializes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub partition: usize,
    pub attempt: u32,
    pub reason: String,
    pub payload: String,
    pub ts_ms: i64,
}

/// The quantity and PnL contribution of one trade. Single shared
/// implementation so the aggregator and the analytics engine cannot drift.
pub fn signed_delta(side: Side, quantity: i64, price: Decimal) -> (i64, Decimal) {
    let qty = side.sign() * quantity;
    (qty, Decimal::from(qty) * price)
}
