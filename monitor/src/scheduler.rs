//! Periodic re-evaluation of recent data.

use crate::loader::Readiness;
use crate::metrics;
use crate::pipeline::{EvaluationPipeline, Trigger};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Initial load still running; nothing evaluated
    NotReady,
    /// Previous tick still running
    Skipped,
    /// Pipeline ran; number of alerts recorded
    Completed { recorded: usize },
    /// Pipeline failed; logged and swallowed
    Failed,
}

impl TickOutcome {
    fn label(&self) -> &'static str {
        match self {
            TickOutcome::NotReady => "not_ready",
            TickOutcome::Skipped => "skipped",
            TickOutcome::Completed { .. } => "completed",
            TickOutcome::Failed => "failed",
        }
    }
}

/// Clears the running flag when a tick ends, including by panic.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    pipeline: Arc<EvaluationPipeline>,
    readiness: Arc<Readiness>,
    interval: Duration,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(pipeline: Arc<EvaluationPipeline>, readiness: Arc<Readiness>, interval: Duration) -> Self {
        Self {
            pipeline,
            readiness,
            interval,
            running: AtomicBool::new(false),
        }
    }

    /// One scheduled evaluation. Never returns an error.
    pub async fn tick(&self) -> TickOutcome {
        let outcome = self.tick_inner().await;
        metrics::SCHEDULER_TICKS
            .with_label_values(&[outcome.label()])
            .inc();
        outcome
    }

    async fn tick_inner(&self) -> TickOutcome {
        if !self.readiness.is_ready() {
            tracing::info!("Scheduled evaluation skipped: data not loaded yet");
            return TickOutcome::NotReady;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Scheduled evaluation skipped: previous tick still running");
            return TickOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        match self.pipeline.run(Trigger::Scheduled).await {
            Ok(report) => {
                tracing::info!(
                    findings = report.findings.len(),
                    recorded = report.recorded.len(),
                    suppressed = report.suppressed,
                    "Scheduled evaluation complete"
                );
                TickOutcome::Completed {
                    recorded: report.recorded.len(),
                }
            }
            Err(e) => {
                tracing::error!("Scheduled evaluation failed: {}", e);
                TickOutcome::Failed
            }
        }
    }

    /// Tick every `interval` until `cancel` fires. Each tick runs on its own
    /// task so a slow evaluation does not delay the timer; overlapping ticks
    /// are skipped by the running guard.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut timer = interval_at(Instant::now() + self.interval, self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = self.interval.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        scheduler.tick().await;
                    });
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler stopped");
                    break;
                }
            }
        }
    }
}
