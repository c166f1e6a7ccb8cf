// ===============================
// src/tradelog.rs
// ===============================
//
// Append-only trade log: one JSON record per line, flushed before the
// caller sees Ok. The file is the source of truth; the id index (for
// idempotency checks) and the per-day index (for analytics queries) are
// rebuilt by replaying it on open. A torn trailing line from an unclean
// shutdown is skipped with a warning, not treated as fatal.
//
use std::collections::BTreeMap;
use std::path::Path;

use ahash::AHashSet;
use chrono::NaiveDate;
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::TradeRecord;
use crate::metrics::TRADE_RECORDS;

#[derive(Debug, Error)]
pub enum TradeLogError {
    /// Expected, non-fatal: the id was appended before. Consumers treat
    /// this as "already applied".
    #[error("trade {0} already logged")]
    DuplicateTrade(Uuid),
    #[error("trade log io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Default)]
struct Index {
    ids: AHashSet<Uuid>,
    by_day: BTreeMap<NaiveDate, Vec<TradeRecord>>,
}

impl Index {
    fn insert(&mut self, record: TradeRecord) -> bool {
        if !self.ids.insert(record.trade_id) {
            return false;
        }
        self.by_day
            .entry(record.trade_time.date_naive())
            .or_default()
            .push(record);
        true
    }
}

pub struct TradeLog {
    writer: Mutex<BufWriter<File>>,
    index: RwLock<Index>,
}

impl TradeLog {
    /// Open (creating parents as needed) and replay the log file into the
    /// in-memory indexes. An unreadable file is an explicit error, never an
    /// empty log.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, TradeLogError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut index = Index::default();
        match File::open(path).await {
            Ok(file) => {
                let mut lines = BufReader::new(file).lines();
                while let Some(line) = lines.next_line().await? {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<TradeRecord>(&line) {
                        Ok(rec) => {
                            index.insert(rec);
                        }
                        Err(e) => {
                            warn!(error = %e, "trade log: skipping unreadable line");
                        }
                    }
                }
                if !index.ids.is_empty() {
                    info!(records = index.ids.len(), path = %path.display(), "trade log replayed");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            index: RwLock::new(index),
        })
    }

    /// Append one record. The writer lock is held across the duplicate
    /// check, the write and the index update, so claiming a trade id is
    /// atomic. The record is flushed before Ok is returned.
    pub async fn append(&self, record: &TradeRecord) -> Result<(), TradeLogError> {
        let mut writer = self.writer.lock().await;
        if self.index.read().await.ids.contains(&record.trade_id) {
            return Err(TradeLogError::DuplicateTrade(record.trade_id));
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;

        self.index.write().await.insert(record.clone());
        TRADE_RECORDS.inc();
        Ok(())
    }

    pub async fn exists(&self, trade_id: &Uuid) -> bool {
        self.index.read().await.ids.contains(trade_id)
    }

    /// All records whose trade time falls on `date`, newest first.
    pub async fn records_for_date(&self, date: NaiveDate) -> Vec<TradeRecord> {
        let index = self.index.read().await;
        let mut out = index.by_day.get(&date).cloned().unwrap_or_default();
        out.sort_by(|a, b| b.trade_time.cmp(&a.trade_time));
        out
    }

    /// Every logged record, oldest day first (startup refold).
    pub async fn all_records(&self) -> Vec<TradeRecord> {
        let index = self.index.read().await;
        index.by_day.values().flat_map(|v| v.iter().cloned()).collect()
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.ids.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
