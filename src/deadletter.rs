// ===============================
// src/deadletter.rs
// ===============================
//
// Dead-letter sink: events pulled out of the retry cycle (malformed
// payload, retry budget exhausted) are appended here as JSONL so an
// operator can inspect and replay them. Every entry matters, so each one
// is flushed; a failed write gets one reopen-and-retry before the entry is
// dropped with an error.
//
use std::path::Path;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
};
use tracing::{error, info, warn};

use crate::domain::DeadLetter;

async fn open_writer(path: &str) -> std::io::Result<BufWriter<File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<File>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

pub async fn run(mut rx: mpsc::Receiver<DeadLetter>, path: String) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(?e, %path, "dead letter sink: open failed, entries will be dropped");
            // drain so senders never block on a dead sink
            while rx.recv().await.is_some() {}
            return;
        }
    };
    info!(%path, "dead letter sink started");

    while let Some(entry) = rx.recv().await {
        warn!(
            partition = entry.partition,
            attempt = entry.attempt,
            reason = %entry.reason,
            "dead-lettered event"
        );
        let line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                error!(?e, "dead letter sink: serialize error, entry dropped");
                continue;
            }
        };
        if let Err(e) = write_line(&mut writer, &line).await {
            warn!(?e, "dead letter sink: write failed, attempting reopen");
            match open_writer(&path).await {
                Ok(w) => {
                    writer = w;
                    if let Err(e2) = write_line(&mut writer, &line).await {
                        error!(?e2, "dead letter sink: write failed after reopen, entry dropped");
                    }
                }
                Err(e2) => error!(?e2, "dead letter sink: reopen failed, entry dropped"),
            }
        }
    }

    let _ = writer.flush().await;
    info!("dead letter sink: channel closed, stopped");
}
