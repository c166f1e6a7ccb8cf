// ===============================
// src/analytics.rs
// ===============================
//
// Read side. Everything here is recomputed from the trade log per query,
// through the same signed_delta as the aggregator, so the daily totals for
// a quiet day match the position store fold for that day's trades. No
// transactional link to the store: a query racing an in-flight apply may
// transiently trail it.
//
use ahash::AHashMap as HashMap;
use chrono::NaiveDate;

use crate::domain::{signed_delta, SymbolTotals, TradeRecord};
use crate::tradelog::TradeLog;

/// Per-symbol quantity and PnL totals for one calendar date (UTC).
pub async fn daily_totals(log: &TradeLog, date: NaiveDate) -> HashMap<String, SymbolTotals> {
    let mut totals: HashMap<String, SymbolTotals> = HashMap::new();
    for rec in log.records_for_date(date).await {
        let (qty_delta, pnl_delta) = signed_delta(rec.side, rec.quantity, rec.price);
        let entry = totals.entry(rec.symbol.clone()).or_default();
        entry.total_quantity += qty_delta;
        entry.total_pnl += pnl_delta;
    }
    totals
}

/// All records for one date, ordered by trade time descending.
pub async fn trades_for_date(log: &TradeLog, date: NaiveDate) -> Vec<TradeRecord> {
    log.records_for_date(date).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use crate::store::PositionStore;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn record(symbol: &str, side: Side, quantity: i64, price: Decimal, minutes_ago: i64) -> TradeRecord {
        TradeRecord {
            trade_id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            quantity,
            price,
            trade_time: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    async fn seeded_log(dir: &std::path::Path, records: &[TradeRecord]) -> TradeLog {
        let log = TradeLog::open(dir.join("trades.jsonl")).await.unwrap();
        for rec in records {
            log.append(rec).await.unwrap();
        }
        log
    }

    #[tokio::test]
    async fn daily_totals_group_by_symbol() {
        let dir = tempdir().unwrap();
        let records = [
            record("XYZ", Side::Buy, 10, dec!(100.0), 10),
            record("XYZ", Side::Sell, 5, dec!(110.0), 5),
            record("ABC", Side::Buy, 3, dec!(50.0), 1),
        ];
        let log = seeded_log(dir.path(), &records).await;

        let totals = daily_totals(&log, Utc::now().date_naive()).await;
        assert_eq!(totals.len(), 2);
        assert_eq!(totals["XYZ"], SymbolTotals { total_quantity: -5, total_pnl: dec!(-450.0) });
        assert_eq!(totals["ABC"], SymbolTotals { total_quantity: -3, total_pnl: dec!(-150.0) });
    }

    #[tokio::test]
    async fn totals_agree_with_the_position_store_fold() {
        let dir = tempdir().unwrap();
        let records = [
            record("XYZ", Side::Buy, 4, dec!(25.0), 8),
            record("XYZ", Side::Sell, 9, dec!(26.5), 6),
            record("ABC", Side::Sell, 2, dec!(300.0), 4),
        ];
        let log = seeded_log(dir.path(), &records).await;

        let store = PositionStore::new();
        store.rebuild_from(records.iter());

        let totals = daily_totals(&log, Utc::now().date_naive()).await;
        for (symbol, t) in totals {
            let pos = store.get(&symbol);
            assert_eq!(t.total_quantity, pos.net_quantity);
            assert_eq!(t.total_pnl, pos.pnl);
        }
    }

    #[tokio::test]
    async fn trades_for_date_are_newest_first_and_day_scoped() {
        let dir = tempdir().unwrap();
        let records = [
            record("XYZ", Side::Sell, 1, dec!(10.0), 45),
            record("XYZ", Side::Sell, 1, dec!(10.0), 2),
        ];
        let log = seeded_log(dir.path(), &records).await;

        let today = trades_for_date(&log, Utc::now().date_naive()).await;
        assert_eq!(today.len(), 2);
        assert!(today[0].trade_time >= today[1].trade_time);

        let tomorrow = Utc::now().date_naive() + Duration::days(1);
        assert!(trades_for_date(&log, tomorrow).await.is_empty());
    }
}
