//! Startup seeding of the metric store.
//!
//! Seed files are JSON-lines dumps of `MetricEvent`s. Each file is read and
//! decoded on its own task; the loader waits for every task before touching
//! the store, shifts the timestamps so the seed data looks current, appends
//! it, and only then marks the service ready.

use crate::storage::MetricStore;
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use txpulse_shared::{Category, MetricEvent};

/// Set once the initial data load has finished.
#[derive(Debug, Default)]
pub struct Readiness {
    ready: AtomicBool,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Already ready, for deployments without seed data.
    pub fn ready() -> Self {
        Self {
            ready: AtomicBool::new(true),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub files_loaded: usize,
    pub files_failed: usize,
    /// Undecodable lines skipped across all files
    pub lines_skipped: usize,
    pub events_loaded: usize,
}

struct SeedFile {
    path: PathBuf,
    events: Vec<MetricEvent>,
    skipped: usize,
}

async fn read_seed_file(path: PathBuf) -> anyhow::Result<SeedFile> {
    let contents = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Read {}", path.display()))?;
    let mut events = Vec::new();
    let mut skipped = 0;
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<MetricEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => {
                skipped += 1;
                tracing::warn!(path = %path.display(), line = idx + 1, "Skipping seed line: {}", e);
            }
        }
    }
    Ok(SeedFile {
        path,
        events,
        skipped,
    })
}

/// Offset per category that moves its newest event to `now`. Data already
/// newer than `now` is left where it is.
pub fn alignment_offsets<'a>(
    events: impl IntoIterator<Item = &'a MetricEvent>,
    now: DateTime<Utc>,
) -> HashMap<Category, Duration> {
    let mut newest: HashMap<Category, DateTime<Utc>> = HashMap::new();
    for event in events {
        newest
            .entry(event.category)
            .and_modify(|ts| *ts = (*ts).max(event.timestamp))
            .or_insert(event.timestamp);
    }
    newest
        .into_iter()
        .map(|(category, ts)| (category, (now - ts).max(Duration::zero())))
        .collect()
}

pub struct SeedLoader {
    store: Arc<dyn MetricStore>,
    files: Vec<PathBuf>,
    readiness: Arc<Readiness>,
    started: AtomicBool,
}

impl SeedLoader {
    pub fn new(store: Arc<dyn MetricStore>, files: Vec<PathBuf>, readiness: Arc<Readiness>) -> Self {
        Self {
            store,
            files,
            readiness,
            started: AtomicBool::new(false),
        }
    }

    pub async fn load(&self) -> LoadReport {
        self.load_at(Utc::now()).await
    }

    /// Load every seed file, aligning timestamps to `now`. Failed files are
    /// logged and skipped; readiness is set regardless. Only the first call
    /// does any work.
    pub async fn load_at(&self, now: DateTime<Utc>) -> LoadReport {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::warn!("Seed load already ran, ignoring");
            return LoadReport::default();
        }

        let mut tasks = JoinSet::new();
        for path in &self.files {
            tasks.spawn(read_seed_file(path.clone()));
        }

        let mut report = LoadReport::default();
        let mut loaded = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(file)) => loaded.push(file),
                Ok(Err(e)) => {
                    report.files_failed += 1;
                    tracing::error!("Failed to read seed file: {:#}", e);
                }
                Err(e) => {
                    report.files_failed += 1;
                    tracing::error!("Seed loading task failed: {}", e);
                }
            }
        }
        // All reads are done past this point.

        loaded.sort_by(|a, b| a.path.cmp(&b.path));
        let offsets = alignment_offsets(loaded.iter().flat_map(|f| f.events.iter()), now);

        for file in loaded {
            let count = file.events.len();
            let events: Vec<MetricEvent> = file
                .events
                .into_iter()
                .map(|mut event| {
                    if let Some(offset) = offsets.get(&event.category) {
                        event.timestamp = event.timestamp + *offset;
                    }
                    event
                })
                .collect();

            match self.store.append_batch(events).await {
                Ok(_) => {
                    report.files_loaded += 1;
                    report.events_loaded += count;
                    report.lines_skipped += file.skipped;
                    tracing::info!(path = %file.path.display(), events = count, "Loaded seed file");
                }
                Err(e) => {
                    report.files_failed += 1;
                    tracing::error!(path = %file.path.display(), "Failed to store seed events: {}", e);
                }
            }
        }

        self.readiness.mark_ready();
        tracing::info!(
            files = report.files_loaded,
            failed = report.files_failed,
            events = report.events_loaded,
            "Seed data loaded, service ready"
        );
        report
    }
}

/// Write events as a JSON-lines seed file.
pub async fn write_seed_file(path: &Path, events: &[MetricEvent]) -> anyhow::Result<()> {
    let mut out = String::new();
    for event in events {
        out.push_str(&serde_json::to_string(event)?);
        out.push('\n');
    }
    tokio::fs::write(path, out).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryMetricStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 14, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_alignment_offsets_per_category() {
        let old = Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap();
        let events = vec![
            MetricEvent::transaction(old, "approved", 1),
            MetricEvent::transaction(old + Duration::hours(2), "failed", 1),
            MetricEvent::checkout(old - Duration::days(1), "08h", 3),
        ];
        let offsets = alignment_offsets(&events, now());
        assert_eq!(
            old + Duration::hours(2) + offsets[&Category::TransactionStatus],
            now()
        );
        assert_eq!(old - Duration::days(1) + offsets[&Category::CheckoutVolume], now());
    }

    #[test]
    fn test_future_dated_seed_is_not_shifted_back() {
        let ahead = now() + Duration::hours(3);
        let events = vec![MetricEvent::transaction(ahead, "approved", 1)];
        let offsets = alignment_offsets(&events, now());
        assert_eq!(offsets[&Category::TransactionStatus], Duration::zero());
    }

    #[tokio::test]
    async fn test_load_shifts_and_marks_ready() {
        let dir = tempfile::tempdir().unwrap();
        let old = Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap();
        let a = dir.path().join("transactions.jsonl");
        let b = dir.path().join("transactions_auth_codes.jsonl");
        write_seed_file(
            &a,
            &[
                MetricEvent::transaction(old, "approved", 10),
                MetricEvent::transaction(old + Duration::minutes(1), "failed", 1),
            ],
        )
        .await
        .unwrap();
        write_seed_file(&b, &[MetricEvent::transaction(old - Duration::minutes(1), "denied", 2)])
            .await
            .unwrap();

        let store = Arc::new(InMemoryMetricStore::new());
        let readiness = Arc::new(Readiness::new());
        let loader = SeedLoader::new(store.clone(), vec![a, b], readiness.clone());

        assert!(!readiness.is_ready());
        let report = loader.load_at(now()).await;
        assert!(readiness.is_ready());
        assert_eq!(report.files_loaded, 2);
        assert_eq!(report.events_loaded, 3);

        let recent = store
            .query_window(Category::TransactionStatus, now() - Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent.iter().any(|e| e.timestamp == now() && e.dimension == "failed"));
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("checkouts.jsonl");
        write_seed_file(&good, &[MetricEvent::checkout(now(), "12h", 4)])
            .await
            .unwrap();
        let store = Arc::new(InMemoryMetricStore::new());
        let readiness = Arc::new(Readiness::new());
        let loader = SeedLoader::new(
            store.clone(),
            vec![dir.path().join("missing.jsonl"), good],
            readiness.clone(),
        );

        let report = loader.load_at(now()).await;
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.files_loaded, 1);
        assert!(readiness.is_ready());
        assert_eq!(store.event_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bad_lines_are_counted_and_load_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.jsonl");
        let line = serde_json::to_string(&MetricEvent::transaction(now(), "approved", 5)).unwrap();
        tokio::fs::write(&path, format!("{}\nnot json\n", line)).await.unwrap();

        let store = Arc::new(InMemoryMetricStore::new());
        let loader = SeedLoader::new(store.clone(), vec![path], Arc::new(Readiness::new()));
        let report = loader.load_at(now()).await;
        assert_eq!(report.events_loaded, 1);
        assert_eq!(report.lines_skipped, 1);

        assert_eq!(loader.load_at(now()).await, LoadReport::default());
        assert_eq!(store.event_count().await.unwrap(), 1);
    }
}
