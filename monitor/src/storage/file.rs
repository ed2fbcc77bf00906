//! JSON-lines file stores.
//!
//! Each store owns one append-only file with one JSON record per line. A write
//! holds the writer lock until the line has been written and `sync_data` has
//! returned; only then does the record become visible to readers through the
//! in-memory index. The file is replayed into the index on open. A torn last
//! line (crash mid-write) is skipped with a warning.
//!
//! A failed write or sync is truncated back to the last good length. If that
//! truncation also fails, or the file has grown past the length the writer
//! knows about, the next record is preceded by a newline so it never shares a
//! line with partial bytes.

use super::{sort_newest_first, AlertStore, MetricStore};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use txpulse_shared::{AlertId, AlertRecord, AnomalyFinding, Category, EventId, MetricEvent};

const METRICS_FILE: &str = "metrics.jsonl";
const ALERTS_FILE: &str = "alerts.jsonl";

/// Write end of a log. `len` is the length up to the last durable record.
#[derive(Debug)]
struct LogWriter {
    file: File,
    len: u64,
    torn: bool,
}

impl LogWriter {
    /// Append `buf` and sync it. On failure the file is cut back to its
    /// previous length so no partial record remains.
    async fn write_durable(&mut self, path: &Path, buf: &[u8]) -> Result<(), StoreError> {
        let on_disk = self.file.metadata().await?.len();
        if self.torn || on_disk != self.len {
            tracing::warn!(
                path = %path.display(),
                expected = self.len,
                actual = on_disk,
                "Log tail is not a record boundary, starting a new line"
            );
            self.file.write_all(b"\n").await?;
            self.len = on_disk + 1;
            self.torn = false;
        }

        let start = self.len;
        let result = async {
            self.file.write_all(buf).await?;
            self.file.sync_data().await
        }
        .await;

        match result {
            Ok(()) => {
                self.len = start + buf.len() as u64;
                Ok(())
            }
            Err(e) => {
                tracing::error!(path = %path.display(), "Append failed: {}", e);
                if let Err(te) = self.file.set_len(start).await {
                    tracing::error!(path = %path.display(), "Rollback of failed append failed: {}", te);
                    self.torn = true;
                }
                Err(e.into())
            }
        }
    }
}

/// Append-only JSON-lines file.
#[derive(Debug)]
struct JsonLinesLog {
    path: PathBuf,
    writer: AsyncMutex<LogWriter>,
}

impl JsonLinesLog {
    /// Open (creating if needed) and replay all decodable records.
    async fn open<T: DeserializeOwned>(path: PathBuf) -> Result<(Self, Vec<T>), StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (records, torn_tail) = Self::replay(&path).await?;
        if torn_tail {
            // Terminate the torn line so the next record starts on its own line.
            file.write_all(b"\n").await?;
            file.sync_data().await?;
        }
        let len = file.metadata().await?.len();
        Ok((
            Self {
                path,
                writer: AsyncMutex::new(LogWriter {
                    file,
                    len,
                    torn: false,
                }),
            },
            records,
        ))
    }

    /// Decode every line. Also reports whether the file ends without a newline.
    async fn replay<T: DeserializeOwned>(path: &Path) -> Result<(Vec<T>, bool), StoreError> {
        let contents = tokio::fs::read_to_string(path).await?;
        let torn_tail = !contents.is_empty() && !contents.ends_with('\n');
        let mut records = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    line = idx + 1,
                    "Skipping undecodable record: {}",
                    e
                ),
            }
        }
        Ok((records, torn_tail))
    }

    /// Write records and flush them to disk. `publish` runs while the writer
    /// lock is still held, after the data is durable.
    async fn append<T, F, R>(&self, records: &[T], publish: F) -> Result<R, StoreError>
    where
        T: Serialize,
        F: FnOnce() -> Result<R, StoreError>,
    {
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let mut writer = self.writer.lock().await;
        writer.write_durable(&self.path, &buf).await?;
        publish()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::IoFailure(format!("lock poisoned: {}", e))
}

/// Metric table backed by `<dir>/metrics.jsonl`.
#[derive(Debug)]
pub struct FileMetricStore {
    log: JsonLinesLog,
    events: RwLock<Vec<MetricEvent>>,
}

impl FileMetricStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let (log, events) = JsonLinesLog::open(dir.as_ref().join(METRICS_FILE)).await?;
        tracing::info!(
            path = %log.path.display(),
            events = events.len(),
            "Opened metric log"
        );
        Ok(Self {
            log,
            events: RwLock::new(events),
        })
    }
}

#[async_trait]
impl MetricStore for FileMetricStore {
    async fn append(&self, event: MetricEvent) -> Result<EventId, StoreError> {
        let id = self
            .log
            .append(std::slice::from_ref(&event), || {
                let mut events = self.events.write().map_err(poisoned)?;
                events.push(event.clone());
                Ok(events.len() as EventId)
            })
            .await?;
        crate::metrics::STORE_APPENDS.inc();
        Ok(id)
    }

    async fn append_batch(&self, batch: Vec<MetricEvent>) -> Result<usize, StoreError> {
        let count = batch.len();
        self.log
            .append(&batch, || {
                let mut events = self.events.write().map_err(poisoned)?;
                events.extend(batch.iter().cloned());
                Ok(())
            })
            .await?;
        crate::metrics::STORE_APPENDS.inc_by(count as f64);
        Ok(count)
    }

    async fn query_window(
        &self,
        category: Category,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricEvent>, StoreError> {
        let events = self.events.read().map_err(poisoned)?;
        Ok(events
            .iter()
            .filter(|e| e.category == category && e.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn event_count(&self) -> Result<u64, StoreError> {
        Ok(self.events.read().map_err(poisoned)?.len() as u64)
    }
}

/// Alert log backed by `<dir>/alerts.jsonl`.
#[derive(Debug)]
pub struct FileAlertStore {
    log: JsonLinesLog,
    records: RwLock<Vec<AlertRecord>>,
    /// Never reused, even when a write fails after reaching the disk.
    next_id: AtomicU64,
}

impl FileAlertStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let (log, records) =
            JsonLinesLog::open::<AlertRecord>(dir.as_ref().join(ALERTS_FILE)).await?;
        tracing::info!(
            path = %log.path.display(),
            alerts = records.len(),
            "Opened alert log"
        );
        let next_id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        Ok(Self {
            log,
            records: RwLock::new(records),
            next_id: AtomicU64::new(next_id),
        })
    }
}

#[async_trait]
impl AlertStore for FileAlertStore {
    async fn record(&self, finding: AnomalyFinding) -> Result<AlertId, StoreError> {
        // Ids are assigned under the writer lock so they stay monotonic in file order.
        let mut writer = self.log.writer.lock().await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = AlertRecord { id, finding };

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        writer.write_durable(&self.log.path, &line).await?;

        self.records.write().map_err(poisoned)?.push(record);
        Ok(id)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>, StoreError> {
        let mut records = self.records.read().map_err(poisoned)?.clone();
        sort_newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }

    async fn alert_count(&self) -> Result<u64, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.len() as u64)
    }
}
