//! Evaluate-and-broadcast pipeline shared by ingestion, the scheduler and
//! manual runs.
//!
//! One run: summarize the stored data, run the rule engine, record every new
//! finding in the alert store and publish it to live clients. Runs are
//! serialized by one async mutex that also guards the duplicate filter, so a
//! scheduled tick racing an ingestion request cannot record or broadcast the
//! same finding twice.

use crate::broadcast::Broadcaster;
use crate::error::StoreError;
use crate::metrics;
use crate::rules::RuleEngine;
use crate::storage::{AlertStore, MetricStore};
use crate::summarizer::{Summarizer, CURRENT_WINDOW_HOURS};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use txpulse_shared::{AlertRecord, AnomalyFinding, Category, FindingKind, LiveEvent, Severity};

pub const DEFAULT_DEDUP_WINDOW_SECS: i64 = 60;

/// What started a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A metric of this category was just ingested
    Ingestion(Category),
    /// Periodic scheduler tick
    Scheduled,
    /// Explicit request (POST /api/evaluate)
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Ingestion(_) => "ingestion",
            Trigger::Scheduled => "scheduled",
            Trigger::Manual => "manual",
        }
    }

    fn categories(&self) -> &'static [Category] {
        match self {
            Trigger::Ingestion(Category::TransactionStatus) => &[Category::TransactionStatus],
            Trigger::Ingestion(Category::CheckoutVolume) => &[Category::CheckoutVolume],
            Trigger::Scheduled | Trigger::Manual => &Category::ALL,
        }
    }

    fn live_event(&self, finding: &AnomalyFinding) -> LiveEvent {
        match self {
            Trigger::Scheduled => LiveEvent::scheduled_alert(finding),
            Trigger::Ingestion(_) | Trigger::Manual => LiveEvent::alert(finding),
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub trigger: Trigger,
    /// Everything the rule engine reported, duplicates included
    pub findings: Vec<AnomalyFinding>,
    /// Findings written to the alert store in this run
    pub recorded: Vec<AlertRecord>,
    /// Findings skipped as duplicates of a recent alert
    pub suppressed: usize,
}

impl EvaluationReport {
    pub fn has_anomalies(&self) -> bool {
        !self.findings.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Fingerprint {
    kind: FindingKind,
    category: Category,
    dimension: String,
    severity: Severity,
    observed_bits: u64,
}

impl Fingerprint {
    fn of(finding: &AnomalyFinding) -> Self {
        Self {
            kind: finding.kind,
            category: finding.category,
            dimension: finding.dimension.clone(),
            severity: finding.severity,
            observed_bits: finding.observed_value.to_bits(),
        }
    }
}

/// Fingerprints of recently recorded findings.
#[derive(Debug, Default)]
struct RecentFindings {
    last_recorded: HashMap<Fingerprint, DateTime<Utc>>,
}

impl RecentFindings {
    fn expire(&mut self, now: DateTime<Utc>, window: Duration) {
        self.last_recorded.retain(|_, at| now - *at < window);
    }

    fn contains(&self, key: &Fingerprint) -> bool {
        self.last_recorded.contains_key(key)
    }

    fn remember(&mut self, key: Fingerprint, now: DateTime<Utc>) {
        self.last_recorded.insert(key, now);
    }
}

pub struct EvaluationPipeline {
    summarizer: Summarizer,
    engine: RuleEngine,
    alerts: Arc<dyn AlertStore>,
    broadcaster: Arc<Broadcaster>,
    status_window: Duration,
    dedup_window: Duration,
    recent: AsyncMutex<RecentFindings>,
}

impl EvaluationPipeline {
    pub fn new(
        metrics_store: Arc<dyn MetricStore>,
        alerts: Arc<dyn AlertStore>,
        broadcaster: Arc<Broadcaster>,
        engine: RuleEngine,
    ) -> Self {
        Self {
            summarizer: Summarizer::new(metrics_store),
            engine,
            alerts,
            broadcaster,
            status_window: Duration::hours(CURRENT_WINDOW_HOURS),
            dedup_window: Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS),
            recent: AsyncMutex::new(RecentFindings::default()),
        }
    }

    pub fn with_dedup_window(mut self, window: std::time::Duration) -> Self {
        self.dedup_window =
            Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS));
        self
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    pub async fn run(&self, trigger: Trigger) -> Result<EvaluationReport, StoreError> {
        self.run_at(trigger, Utc::now()).await
    }

    /// Run with an explicit evaluation time.
    pub async fn run_at(&self, trigger: Trigger, now: DateTime<Utc>) -> Result<EvaluationReport, StoreError> {
        let timer = metrics::EVAL_DURATION.start_timer();
        let mut recent = self.recent.lock().await;

        let summaries = self
            .summarizer
            .window_summaries(trigger.categories(), self.status_window, now)
            .await?;
        let findings = self.engine.evaluate(&summaries, now);

        recent.expire(now, self.dedup_window);
        let mut recorded = Vec::new();
        let mut suppressed = 0;

        for finding in &findings {
            let key = Fingerprint::of(finding);
            if recent.contains(&key) {
                suppressed += 1;
                metrics::DUPLICATES_SUPPRESSED.inc();
                tracing::debug!(
                    kind = finding.kind.as_str(),
                    dimension = %finding.dimension,
                    "Suppressed duplicate finding"
                );
                continue;
            }

            let id = self.alerts.record(finding.clone()).await?;
            recent.remember(key, now);
            metrics::ALERTS_RECORDED.inc();

            let delivery = self.broadcaster.publish(&trigger.live_event(finding));
            tracing::info!(
                alert_id = id,
                trigger = trigger.as_str(),
                kind = finding.kind.as_str(),
                severity = finding.severity.as_str(),
                dimension = %finding.dimension,
                delivered = delivery.delivered,
                "{}",
                finding.message
            );
            recorded.push(AlertRecord {
                id,
                finding: finding.clone(),
            });
        }

        drop(recent);
        timer.observe_duration();

        Ok(EvaluationReport {
            trigger,
            findings,
            recorded,
            suppressed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{InMemoryAlertStore, InMemoryMetricStore};
    use chrono::TimeZone;
    use txpulse_shared::{LiveEventKind, MetricEvent};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 14, 12, 0, 0).unwrap()
    }

    struct Fixture {
        metrics: Arc<InMemoryMetricStore>,
        alerts: Arc<InMemoryAlertStore>,
        broadcaster: Arc<Broadcaster>,
        pipeline: EvaluationPipeline,
    }

    fn fixture() -> Fixture {
        let metrics = Arc::new(InMemoryMetricStore::new());
        let alerts = Arc::new(InMemoryAlertStore::new());
        let broadcaster = Arc::new(Broadcaster::new(16));
        let pipeline = EvaluationPipeline::new(
            metrics.clone(),
            alerts.clone(),
            broadcaster.clone(),
            RuleEngine::default(),
        );
        Fixture {
            metrics,
            alerts,
            broadcaster,
            pipeline,
        }
    }

    async fn seed_failures(metrics: &InMemoryMetricStore) {
        metrics
            .append(MetricEvent::transaction(now() - Duration::minutes(2), "approved", 94))
            .await
            .unwrap();
        metrics
            .append(MetricEvent::transaction(now() - Duration::minutes(1), "failed", 6))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_records_and_publishes() {
        let f = fixture();
        seed_failures(&f.metrics).await;
        let mut sub = f.broadcaster.subscribe();

        let report = f
            .pipeline
            .run_at(Trigger::Ingestion(Category::TransactionStatus), now())
            .await
            .unwrap();

        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.recorded.len(), 1);
        assert_eq!(f.alerts.alert_count().await.unwrap(), 1);

        let frame = sub.receiver.try_recv().unwrap();
        let event: LiveEvent = serde_json::from_str(&frame).unwrap();
        assert_eq!(event.kind, LiveEventKind::Alert);
        assert_eq!(event.data["dimension"], "failure_rate");
    }

    #[tokio::test]
    async fn test_repeat_run_suppresses_duplicates() {
        let f = fixture();
        seed_failures(&f.metrics).await;

        let first = f.pipeline.run_at(Trigger::Manual, now()).await.unwrap();
        let second = f
            .pipeline
            .run_at(Trigger::Scheduled, now() + Duration::seconds(30))
            .await
            .unwrap();

        assert_eq!(first.findings.len(), second.findings.len());
        assert!(first
            .findings
            .iter()
            .zip(&second.findings)
            .all(|(a, b)| a.same_anomaly(b)));
        assert!(second.recorded.is_empty());
        assert_eq!(second.suppressed, first.findings.len());
        assert_eq!(f.alerts.alert_count().await.unwrap(), first.recorded.len() as u64);
    }

    #[tokio::test]
    async fn test_duplicates_are_recorded_again_after_window() {
        let f = fixture();
        seed_failures(&f.metrics).await;

        f.pipeline.run_at(Trigger::Manual, now()).await.unwrap();
        let later = f
            .pipeline
            .run_at(Trigger::Scheduled, now() + Duration::seconds(61))
            .await
            .unwrap();
        assert_eq!(later.recorded.len(), 1);
        assert_eq!(f.alerts.alert_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_scheduled_findings_use_scheduled_alert_type() {
        let f = fixture();
        seed_failures(&f.metrics).await;
        let mut sub = f.broadcaster.subscribe();

        f.pipeline.run_at(Trigger::Scheduled, now()).await.unwrap();
        let event: LiveEvent = serde_json::from_str(&sub.receiver.try_recv().unwrap()).unwrap();
        assert_eq!(event.kind, LiveEventKind::ScheduledAlert);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_record_once() {
        let f = fixture();
        seed_failures(&f.metrics).await;
        let pipeline = Arc::new(f.pipeline);

        let a = {
            let p = pipeline.clone();
            tokio::spawn(async move { p.run_at(Trigger::Scheduled, now()).await })
        };
        let b = {
            let p = pipeline.clone();
            tokio::spawn(async move {
                p.run_at(Trigger::Ingestion(Category::TransactionStatus), now()).await
            })
        };
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert_eq!(a.recorded.len() + b.recorded.len(), 1);
        assert_eq!(f.alerts.alert_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_checkout_ingestion_only_evaluates_checkouts() {
        let f = fixture();
        seed_failures(&f.metrics).await;
        f.metrics
            .append(MetricEvent::checkout(now() - Duration::hours(1), "11h", 30))
            .await
            .unwrap();
        f.metrics
            .append(MetricEvent::checkout(now() - Duration::days(2), "11h", 70))
            .await
            .unwrap();

        let report = f
            .pipeline
            .run_at(Trigger::Ingestion(Category::CheckoutVolume), now())
            .await
            .unwrap();
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].kind, FindingKind::HighVolume);
    }
}
