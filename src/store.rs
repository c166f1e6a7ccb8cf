// ===============================
// src/store.rs (keyed position store)
// ===============================
//
// symbol -> Position with atomic per-key read-modify-write. Entry locking
// serializes concurrent updates to one symbol while distinct symbols
// proceed in parallel; there is no global lock. The map is in-memory and
// refolded from the trade log at startup, so it always converges back to
// the durable history.
//
use ahash::AHashMap as HashMap;
use dashmap::DashMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::domain::{signed_delta, Position, TradeRecord};
use crate::metrics::{POSITION_PNL, POSITION_QTY};

#[derive(Default)]
pub struct PositionStore {
    positions: DashMap<String, Position>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self { positions: DashMap::new() }
    }

    /// An unseen symbol reads as the flat zero position, never an error.
    pub fn get(&self, symbol: &str) -> Position {
        self.positions
            .get(symbol)
            .map(|p| p.value().clone())
            .unwrap_or_default()
    }

    /// Atomic per-key upsert. Returns the updated position.
    pub fn upsert(&self, symbol: &str, qty_delta: i64, pnl_delta: Decimal) -> Position {
        let mut entry = self.positions.entry(symbol.to_string()).or_default();
        entry.net_quantity += qty_delta;
        entry.pnl += pnl_delta;
        let updated = entry.value().clone();
        drop(entry);

        POSITION_QTY
            .with_label_values(&[symbol])
            .set(updated.net_quantity);
        POSITION_PNL
            .with_label_values(&[symbol])
            .set(updated.pnl.to_f64().unwrap_or(0.0));
        updated
    }

    /// Snapshot of every position. Per-key consistent; not linearizable
    /// across the whole map.
    pub fn list_all(&self) -> HashMap<String, Position> {
        self.positions
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Refold logged trades into the store (startup recovery). Returns the
    /// number of records applied.
    pub fn rebuild_from<'a, I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = &'a TradeRecord>,
    {
        let mut applied = 0;
        for rec in records {
            let (qty_delta, pnl_delta) = signed_delta(rec.side, rec.quantity, rec.price);
            self.upsert(&rec.symbol, qty_delta, pnl_delta);
            applied += 1;
        }
        applied
    }
}
