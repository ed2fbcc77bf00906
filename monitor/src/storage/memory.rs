//! In-memory stores. Thread-safe; contents are lost on restart.

use super::{sort_newest_first, AlertStore, MetricStore};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, RwLock};
use txpulse_shared::{AlertId, AlertRecord, AnomalyFinding, Category, EventId, MetricEvent};

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::IoFailure(format!("lock poisoned: {}", e))
}

/// In-memory metric table.
#[derive(Debug, Default)]
pub struct InMemoryMetricStore {
    events: RwLock<Vec<MetricEvent>>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn append(&self, event: MetricEvent) -> Result<EventId, StoreError> {
        let mut events = self.events.write().map_err(poisoned)?;
        events.push(event);
        crate::metrics::STORE_APPENDS.inc();
        Ok(events.len() as EventId)
    }

    async fn append_batch(&self, batch: Vec<MetricEvent>) -> Result<usize, StoreError> {
        let count = batch.len();
        let mut events = self.events.write().map_err(poisoned)?;
        events.extend(batch);
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
        let events = self.events.read().map_err(poisoned)?;
        Ok(events.len() as u64)
    }
}

/// In-memory alert log.
#[derive(Debug)]
pub struct InMemoryAlertStore {
    inner: Mutex<AlertLog>,
}

#[derive(Debug)]
struct AlertLog {
    records: Vec<AlertRecord>,
    next_id: AlertId,
}

impl Default for InMemoryAlertStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AlertLog {
                records: Vec::new(),
                next_id: 1,
            }),
        }
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn record(&self, finding: AnomalyFinding) -> Result<AlertId, StoreError> {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.records.push(AlertRecord { id, finding });
        Ok(id)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>, StoreError> {
        let mut records = self.inner.lock().map_err(poisoned)?.records.clone();
        sort_newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }

    async fn alert_count(&self) -> Result<u64, StoreError> {
        Ok(self.inner.lock().map_err(poisoned)?.records.len() as u64)
    }
}
