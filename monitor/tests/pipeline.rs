//! Seed load through scheduled evaluation, alert storage and live delivery.

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use txpulse_monitor::app::AppState;
use txpulse_monitor::config::MonitorConfig;
use txpulse_monitor::loader::{write_seed_file, Readiness, SeedLoader};
use txpulse_monitor::scheduler::{Scheduler, TickOutcome};
use txpulse_monitor::storage::memory::{InMemoryAlertStore, InMemoryMetricStore};
use txpulse_monitor::storage::{AlertStore, MetricStore};
use txpulse_shared::{FindingKind, LiveEvent, LiveEventKind, MetricEvent};

#[tokio::test]
async fn test_seeded_history_raises_scheduled_alert() {
    let dir = tempfile::tempdir().unwrap();
    let seed = dir.path().join("transactions.jsonl");
    // A week-old capture; the loader shifts it so the newest row lands at now.
    let captured = Utc.with_ymd_and_hms(2025, 7, 14, 12, 0, 0).unwrap();
    write_seed_file(
        &seed,
        &[
            MetricEvent::transaction(captured - Duration::minutes(2), "approved", 90),
            MetricEvent::transaction(captured - Duration::minutes(1), "denied", 2),
            MetricEvent::transaction(captured, "reversed", 8),
        ],
    )
    .await
    .unwrap();

    let metrics_store = Arc::new(InMemoryMetricStore::new());
    let readiness = Arc::new(Readiness::new());
    let state = AppState::new(
        &MonitorConfig::default(),
        metrics_store.clone(),
        Arc::new(InMemoryAlertStore::new()),
        readiness.clone(),
    );
    let mut subscription = state.broadcaster.subscribe();
    let scheduler = Scheduler::new(
        state.pipeline.clone(),
        readiness.clone(),
        std::time::Duration::from_secs(300),
    );

    assert_eq!(scheduler.tick().await, TickOutcome::NotReady);

    let loader = SeedLoader::new(metrics_store.clone(), vec![seed], readiness.clone());
    let report = loader.load().await;
    assert_eq!(report.events_loaded, 3);
    assert!(readiness.is_ready());
    assert_eq!(metrics_store.event_count().await.unwrap(), 3);

    // Reversal rate 8% is over the 3% critical threshold.
    assert_eq!(scheduler.tick().await, TickOutcome::Completed { recorded: 1 });
    let alerts = state.alerts.recent(10).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].finding.kind, FindingKind::RateAnomaly);
    assert_eq!(alerts[0].finding.dimension, "reversal_rate");

    let frame = subscription.receiver.recv().await.unwrap();
    let event: LiveEvent = serde_json::from_str(&frame).unwrap();
    assert_eq!(event.kind, LiveEventKind::ScheduledAlert);
    assert_eq!(event.data["dimension"], "reversal_rate");

    // Same data on the next tick is a duplicate.
    assert_eq!(scheduler.tick().await, TickOutcome::Completed { recorded: 0 });
    assert_eq!(state.alerts.alert_count().await.unwrap(), 1);
}
