//! Prometheus metrics for the monitor service

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};

// ── Ingestion ────────────────────────────────────────────────────────────────

pub static INGEST_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "txpulse_ingest_total",
        "Metric submissions received on the ingestion endpoint",
        &["result"]
    )
    .unwrap()
});

pub static STORE_APPENDS: Lazy<Counter> = Lazy::new(|| {
    register_counter!("txpulse_store_appends_total", "Metric events appended to the store").unwrap()
});

// ── Evaluation ───────────────────────────────────────────────────────────────

pub static EVAL_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "txpulse_evaluation_duration_seconds",
        "Pipeline run latency (summarize, evaluate, record, publish)",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .unwrap()
});

pub static FINDINGS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "txpulse_findings_total",
        "Anomaly findings produced by the rule engine",
        &["kind"]
    )
    .unwrap()
});

pub static ALERTS_RECORDED: Lazy<Counter> = Lazy::new(|| {
    register_counter!("txpulse_alerts_recorded_total", "Findings written to the alert store").unwrap()
});

pub static DUPLICATES_SUPPRESSED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "txpulse_duplicate_findings_total",
        "Findings dropped because an identical one was recorded recently"
    )
    .unwrap()
});

// ── Live channel ─────────────────────────────────────────────────────────────

pub static LIVE_SUBSCRIBERS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("txpulse_live_subscribers", "Currently connected live clients").unwrap()
});

pub static LIVE_DELIVERIES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "txpulse_live_deliveries_total",
        "Per-subscriber delivery outcomes of published live events",
        &["outcome"]
    )
    .unwrap()
});

// ── Scheduler ────────────────────────────────────────────────────────────────

pub static SCHEDULER_TICKS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "txpulse_scheduler_ticks_total",
        "Scheduled evaluation ticks by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_registered_families() {
        STORE_APPENDS.inc();
        SCHEDULER_TICKS.with_label_values(&["completed"]).inc();
        let text = encode_metrics();
        assert!(text.contains("txpulse_store_appends_total"));
        assert!(text.contains("txpulse_scheduler_ticks_total"));
    }
}
