//! Storage backends for metric events and raised alerts.
//!
//! Both stores are append-only. Every backend finishes its write (and, for the
//! durable ones, flushes it to the medium) before `append`/`record` returns, and
//! readers never observe a half-written record.

#[cfg(feature = "clickhouse-storage")]
pub mod clickhouse;
pub mod file;
pub mod memory;

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use txpulse_shared::{AlertId, AlertRecord, AnomalyFinding, Category, EventId, MetricEvent};

/// Append-only table of observed metric events.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Persist one event. Never rejects on value range, only on storage failure.
    async fn append(&self, event: MetricEvent) -> Result<EventId, StoreError>;

    /// Persist several events. Default appends them one by one.
    async fn append_batch(&self, events: Vec<MetricEvent>) -> Result<usize, StoreError> {
        let count = events.len();
        for event in events {
            self.append(event).await?;
        }
        Ok(count)
    }

    /// Events of `category` with `timestamp >= since`, in no particular order.
    async fn query_window(
        &self,
        category: Category,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricEvent>, StoreError>;

    /// Total number of stored events.
    async fn event_count(&self) -> Result<u64, StoreError>;
}

/// Append-only log of raised alerts.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persist one finding and return its store-assigned id.
    async fn record(&self, finding: AnomalyFinding) -> Result<AlertId, StoreError>;

    /// Up to `limit` alerts, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>, StoreError>;

    /// Total number of recorded alerts.
    async fn alert_count(&self) -> Result<u64, StoreError>;
}

/// Order alerts newest first: detection time descending, ties by id descending.
pub fn sort_newest_first(records: &mut [AlertRecord]) {
    records.sort_by(|a, b| {
        b.finding
            .detected_at
            .cmp(&a.finding.detected_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
