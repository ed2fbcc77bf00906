//! Shared service state and store wiring.

use crate::broadcast::Broadcaster;
use crate::config::{MonitorConfig, StorageConfig};
use crate::loader::Readiness;
use crate::pipeline::EvaluationPipeline;
use crate::queries::QueryService;
use crate::rules::RuleEngine;
use crate::storage::file::{FileAlertStore, FileMetricStore};
use crate::storage::memory::{InMemoryAlertStore, InMemoryMetricStore};
use crate::storage::{AlertStore, MetricStore};
use anyhow::{Context, Result};
use std::sync::Arc;

/// Everything request handlers and background tasks share.
pub struct AppState {
    pub metrics_store: Arc<dyn MetricStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub pipeline: Arc<EvaluationPipeline>,
    pub queries: QueryService,
    pub readiness: Arc<Readiness>,
    pub auth_token: Option<String>,
}

impl AppState {
    pub fn new(
        config: &MonitorConfig,
        metrics_store: Arc<dyn MetricStore>,
        alerts: Arc<dyn AlertStore>,
        readiness: Arc<Readiness>,
    ) -> Self {
        let broadcaster = Arc::new(Broadcaster::new(config.subscriber_queue_capacity));
        let pipeline = Arc::new(
            EvaluationPipeline::new(
                metrics_store.clone(),
                alerts.clone(),
                broadcaster.clone(),
                RuleEngine::new(config.rules.clone()),
            )
            .with_dedup_window(config.dedup_window()),
        );
        Self {
            queries: QueryService::new(metrics_store.clone(), config.default_window_hours),
            metrics_store,
            alerts,
            broadcaster,
            pipeline,
            readiness,
            auth_token: config.auth_token.clone(),
        }
    }
}

/// Open the configured metric and alert stores.
pub async fn open_stores(storage: &StorageConfig) -> Result<(Arc<dyn MetricStore>, Arc<dyn AlertStore>)> {
    match storage {
        StorageConfig::InMemory => {
            tracing::info!("Using in-memory storage");
            let metrics: Arc<dyn MetricStore> = Arc::new(InMemoryMetricStore::new());
            let alerts: Arc<dyn AlertStore> = Arc::new(InMemoryAlertStore::new());
            Ok((metrics, alerts))
        }
        StorageConfig::File { dir } => {
            let metrics = FileMetricStore::open(dir)
                .await
                .with_context(|| format!("Open metric log in {}", dir.display()))?;
            let alerts = FileAlertStore::open(dir)
                .await
                .with_context(|| format!("Open alert log in {}", dir.display()))?;
            tracing::info!("File storage enabled: {}", dir.display());
            let metrics: Arc<dyn MetricStore> = Arc::new(metrics);
            let alerts: Arc<dyn AlertStore> = Arc::new(alerts);
            Ok((metrics, alerts))
        }
        #[cfg(feature = "clickhouse-storage")]
        StorageConfig::ClickHouse { endpoint, database } => {
            let store = Arc::new(
                crate::storage::clickhouse::ClickHouseStore::new(endpoint, database)
                    .await
                    .context("ClickHouse connection failed")?,
            );
            tracing::info!("ClickHouse storage enabled: {} / {}", endpoint, database);
            let metrics: Arc<dyn MetricStore> = store.clone();
            let alerts: Arc<dyn AlertStore> = store;
            Ok((metrics, alerts))
        }
        #[cfg(not(feature = "clickhouse-storage"))]
        StorageConfig::ClickHouse { .. } => {
            anyhow::bail!("ClickHouse storage requires the `clickhouse-storage` feature")
        }
    }
}
