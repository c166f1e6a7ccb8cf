// ===============================
// src/ingest.rs (trade entry point)
// ===============================
//
// Validates an order request, constructs the immutable TradeEvent and
// publishes it. The caller gets the constructed event back without waiting
// for downstream processing; a failed publish is surfaced as an explicit,
// retryable error rather than dropped.
//
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::broker::{Broker, PublishError};
use crate::domain::{Side, TradeEvent};

/// Inbound order request. Fields are optional so a partial body still
/// yields per-field messages instead of one opaque deserialization error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRequest {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

fn validate(req: &TradeRequest) -> Result<(String, Side, i64, Decimal), Vec<FieldError>> {
    let mut errors = Vec::new();

    let symbol = match req.symbol.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Some(s.to_string()),
        _ => {
            errors.push(FieldError { field: "symbol", message: "symbol is required".into() });
            None
        }
    };

    let side = match req.side.as_deref() {
        Some(s) => match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => {
                errors.push(FieldError {
                    field: "side",
                    message: format!("side must be BUY or SELL, got {s:?}"),
                });
                None
            }
        },
        None => {
            errors.push(FieldError { field: "side", message: "side is required (BUY or SELL)".into() });
            None
        }
    };

    let quantity = match req.quantity {
        Some(q) if q > 0 => Some(q),
        Some(q) => {
            errors.push(FieldError {
                field: "quantity",
                message: format!("quantity must be positive, got {q}"),
            });
            None
        }
        None => {
            errors.push(FieldError { field: "quantity", message: "quantity is required".into() });
            None
        }
    };

    let price = match req.price {
        Some(p) if p > Decimal::ZERO => Some(p),
        Some(p) => {
            errors.push(FieldError {
                field: "price",
                message: format!("price must be positive, got {p}"),
            });
            None
        }
        None => {
            errors.push(FieldError { field: "price", message: "price is required".into() });
            None
        }
    };

    match (symbol, side, quantity, price) {
        (Some(symbol), Some(side), Some(quantity), Some(price)) if errors.is_empty() => {
            Ok((symbol, side, quantity, price))
        }
        _ => Err(errors),
    }
}

/// Validate, build, publish. No event is constructed for an invalid
/// request.
pub fn place_trade(broker: &Broker, req: TradeRequest) -> Result<TradeEvent, IngestError> {
    let (symbol, side, quantity, price) = validate(&req).map_err(IngestError::Validation)?;

    let event = TradeEvent {
        trade_id: Uuid::new_v4(),
        symbol,
        side,
        quantity,
        price,
        timestamp: Utc::now().timestamp_millis(),
    };
    broker.publish(&event)?;
    info!(trade_id = %event.trade_id, symbol = %event.symbol, side = ?event.side, "trade accepted");
    Ok(event)
}
