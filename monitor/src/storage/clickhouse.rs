//! ClickHouse storage backend
//!
//! Persists metric events and alerts in two MergeTree tables. Every append is
//! its own INSERT, awaited to completion, so a successful return means the
//! server acknowledged the row.

use super::{sort_newest_first, AlertStore, MetricStore};
use crate::error::StoreError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex as AsyncMutex;
use txpulse_shared::utils::time::{from_millis, to_millis};
use txpulse_shared::{AlertId, AlertRecord, AnomalyFinding, Category, EventId, MetricEvent};

const METRICS_TABLE: &str = "txpulse_metrics";
const ALERTS_TABLE: &str = "txpulse_alerts";

const METRICS_ENGINE: &str = "\
MergeTree() \
PARTITION BY toYYYYMM(fromUnixTimestamp64Milli(ts_ms)) \
ORDER BY (category, ts_ms, id) \
SETTINGS index_granularity = 8192";

const ALERTS_ENGINE: &str = "\
MergeTree() \
ORDER BY (detected_at_ms, id) \
SETTINGS index_granularity = 8192";

/// One row in the metrics table.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct MetricRow {
    pub id: u64,
    /// Milliseconds since Unix epoch.
    pub ts_ms: i64,
    pub category: String,
    pub dimension: String,
    pub value: u64,
}

/// One row in the alerts table. The finding is kept as JSON.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct AlertRow {
    pub id: u64,
    pub detected_at_ms: i64,
    pub payload: String,
}

fn io_failure(e: impl std::fmt::Display) -> StoreError {
    StoreError::IoFailure(e.to_string())
}

/// ClickHouse-backed metric and alert store.
pub struct ClickHouseStore {
    client: Client,
    next_event_id: AtomicU64,
    /// Serializes alert inserts so ids stay monotonic.
    alert_writer: AsyncMutex<AlertId>,
}

impl ClickHouseStore {
    pub async fn new(endpoint: &str, database: &str) -> Result<Self> {
        let mut client = Client::default()
            .with_url(endpoint)
            .with_database(database)
            .with_option("connect_timeout", "10")
            .with_option("receive_timeout", "30");
        if let Ok(password) = std::env::var("TXPULSE_CLICKHOUSE_PASSWORD") {
            client = client.with_user("default").with_password(password);
        }

        Self::ensure_tables(&client).await?;
        let max_event = Self::max_id(&client, METRICS_TABLE).await?;
        let max_alert = Self::max_id(&client, ALERTS_TABLE).await?;

        Ok(Self {
            client,
            next_event_id: AtomicU64::new(max_event + 1),
            alert_writer: AsyncMutex::new(max_alert + 1),
        })
    }

    async fn ensure_tables(client: &Client) -> Result<()> {
        let metrics_ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id UInt64,
                ts_ms Int64,
                category String,
                dimension String,
                value UInt64
            ) ENGINE = {}",
            METRICS_TABLE, METRICS_ENGINE
        );
        client
            .query(&metrics_ddl)
            .execute()
            .await
            .context("Create ClickHouse metrics table")?;

        let alerts_ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id UInt64,
                detected_at_ms Int64,
                payload String
            ) ENGINE = {}",
            ALERTS_TABLE, ALERTS_ENGINE
        );
        client
            .query(&alerts_ddl)
            .execute()
            .await
            .context("Create ClickHouse alerts table")?;
        Ok(())
    }

    async fn max_id(client: &Client, table: &str) -> Result<u64> {
        let sql = format!("SELECT max(id) FROM {}", table);
        let max = client
            .query(&sql)
            .fetch_one::<u64>()
            .await
            .with_context(|| format!("Read max id from {}", table))?;
        Ok(max)
    }

    async fn insert_metrics(&self, rows: &[MetricRow]) -> Result<(), StoreError> {
        let mut insert = self.client.insert(METRICS_TABLE).map_err(io_failure)?;
        for row in rows {
            insert.write(row).await.map_err(io_failure)?;
        }
        insert.end().await.map_err(io_failure)
    }

    fn to_row(&self, event: &MetricEvent) -> MetricRow {
        MetricRow {
            id: self.next_event_id.fetch_add(1, Ordering::SeqCst),
            ts_ms: to_millis(&event.timestamp),
            category: event.category.as_str().to_string(),
            dimension: event.dimension.clone(),
            value: event.value,
        }
    }
}

#[async_trait]
impl MetricStore for ClickHouseStore {
    async fn append(&self, event: MetricEvent) -> Result<EventId, StoreError> {
        let row = self.to_row(&event);
        let id = row.id;
        self.insert_metrics(std::slice::from_ref(&row)).await?;
        crate::metrics::STORE_APPENDS.inc();
        Ok(id)
    }

    async fn append_batch(&self, events: Vec<MetricEvent>) -> Result<usize, StoreError> {
        let rows: Vec<MetricRow> = events.iter().map(|e| self.to_row(e)).collect();
        self.insert_metrics(&rows).await?;
        crate::metrics::STORE_APPENDS.inc_by(rows.len() as f64);
        Ok(rows.len())
    }

    async fn query_window(
        &self,
        category: Category,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricEvent>, StoreError> {
        let sql = format!(
            "SELECT ?fields FROM {} WHERE category = ? AND ts_ms >= ?",
            METRICS_TABLE
        );
        let rows = self
            .client
            .query(&sql)
            .bind(category.as_str())
            .bind(to_millis(&since))
            .fetch_all::<MetricRow>()
            .await
            .map_err(io_failure)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let timestamp = from_millis(row.ts_ms)?;
                Some(MetricEvent::new(timestamp, category, row.dimension, row.value))
            })
            .collect())
    }

    async fn event_count(&self) -> Result<u64, StoreError> {
        let sql = format!("SELECT count() FROM {}", METRICS_TABLE);
        self.client
            .query(&sql)
            .fetch_one::<u64>()
            .await
            .map_err(io_failure)
    }
}

#[async_trait]
impl AlertStore for ClickHouseStore {
    async fn record(&self, finding: AnomalyFinding) -> Result<AlertId, StoreError> {
        let mut next_id = self.alert_writer.lock().await;
        let id = *next_id;
        let row = AlertRow {
            id,
            detected_at_ms: to_millis(&finding.detected_at),
            payload: serde_json::to_string(&finding)?,
        };

        let mut insert = self.client.insert(ALERTS_TABLE).map_err(io_failure)?;
        insert.write(&row).await.map_err(io_failure)?;
        insert.end().await.map_err(io_failure)?;

        *next_id += 1;
        Ok(id)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>, StoreError> {
        let sql = format!(
            "SELECT ?fields FROM {} ORDER BY detected_at_ms DESC, id DESC LIMIT ?",
            ALERTS_TABLE
        );
        let rows = self
            .client
            .query(&sql)
            .bind(limit as u64)
            .fetch_all::<AlertRow>()
            .await
            .map_err(io_failure)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let finding: AnomalyFinding = serde_json::from_str(&row.payload)?;
            records.push(AlertRecord { id: row.id, finding });
        }
        // Millisecond column loses sub-millisecond ordering; re-sort on the decoded timestamps.
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn alert_count(&self) -> Result<u64, StoreError> {
        let sql = format!("SELECT count() FROM {}", ALERTS_TABLE);
        self.client
            .query(&sql)
            .fetch_one::<u64>()
            .await
            .map_err(io_failure)
    }
}
