//! Windowed statistics over stored metric events.
//!
//! Summaries are recomputed from the store on every call; nothing is cached
//! because the underlying table changes continuously.

use crate::error::StoreError;
use crate::storage::MetricStore;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use txpulse_shared::{Category, MetricEvent};

/// Dimension label used when a summary spans every dimension of a category.
pub const ALL_DIMENSIONS: &str = "*";

/// Length of the "current" checkout window.
pub const CURRENT_WINDOW_HOURS: i64 = 24;
/// Days averaged for the week baseline.
pub const WEEK_BASELINE_DAYS: i64 = 7;
/// Days averaged for the month baseline.
pub const MONTH_BASELINE_DAYS: i64 = 30;

/// Aggregate statistics of one dimension over one window.
///
/// `mean`, `max` and `min` are `None` when the window holds no observations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSummary {
    pub category: Category,
    pub dimension: String,
    pub count: u64,
    pub mean: Option<f64>,
    pub max: Option<u64>,
    pub min: Option<u64>,
    pub sum: u64,
}

impl WindowSummary {
    pub fn empty(category: Category, dimension: impl Into<String>) -> Self {
        Self {
            category,
            dimension: dimension.into(),
            count: 0,
            mean: None,
            max: None,
            min: None,
            sum: 0,
        }
    }

    /// Summarize a sequence of observed values.
    pub fn from_values(
        category: Category,
        dimension: impl Into<String>,
        values: impl IntoIterator<Item = u64>,
    ) -> Self {
        let mut summary = Self::empty(category, dimension);
        for value in values {
            summary.observe(value);
        }
        summary
    }

    fn observe(&mut self, value: u64) {
        self.count += 1;
        self.sum += value;
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.mean = Some(self.sum as f64 / self.count as f64);
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }

    /// Sum spread over `days` days, `None` without observations.
    pub fn daily_average(&self, days: i64) -> Option<f64> {
        if !self.has_data() || days <= 0 {
            return None;
        }
        Some(self.sum as f64 / days as f64)
    }
}

/// Current value and historical baselines of one checkout dimension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeSummary {
    pub dimension: String,
    /// Last 24 hours
    pub current: WindowSummary,
    /// The 7 full days before the current window
    pub week: WindowSummary,
    /// The 30 full days before the current window
    pub month: WindowSummary,
}

impl VolumeSummary {
    /// Current value, `None` without observations in the current window.
    pub fn current_value(&self) -> Option<f64> {
        self.current.has_data().then_some(self.current.sum as f64)
    }

    pub fn week_average(&self) -> Option<f64> {
        self.week.daily_average(WEEK_BASELINE_DAYS)
    }

    pub fn month_average(&self) -> Option<f64> {
        self.month.daily_average(MONTH_BASELINE_DAYS)
    }
}

/// Everything the rule engine looks at in one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowSummaries {
    /// Per-status summaries over the status window
    pub statuses: Vec<WindowSummary>,
    /// Per-hour checkout summaries with baselines
    pub volumes: Vec<VolumeSummary>,
}

/// Group events in `[since, until)` by dimension.
pub fn summaries_by_dimension<'a>(
    category: Category,
    events: impl IntoIterator<Item = &'a MetricEvent>,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> BTreeMap<String, WindowSummary> {
    let mut out: BTreeMap<String, WindowSummary> = BTreeMap::new();
    for event in events {
        if event.category != category || event.timestamp < since || event.timestamp >= until {
            continue;
        }
        out.entry(event.dimension.clone())
            .or_insert_with(|| WindowSummary::empty(category, event.dimension.clone()))
            .observe(event.value);
    }
    out
}

/// Computes window summaries from a metric store.
#[derive(Clone)]
pub struct Summarizer {
    store: Arc<dyn MetricStore>,
}

impl Summarizer {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }

    /// Summary of `category` over the trailing `window` ending now.
    /// `dimension` restricts it to one dimension; `None` summarizes them all together.
    pub async fn summarize(
        &self,
        category: Category,
        dimension: Option<&str>,
        window: Duration,
    ) -> Result<WindowSummary, StoreError> {
        let now = Utc::now();
        self.summarize_range(category, dimension, now - window, now + Duration::seconds(1))
            .await
    }

    /// Summary over the half-open range `[since, until)`.
    pub async fn summarize_range(
        &self,
        category: Category,
        dimension: Option<&str>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<WindowSummary, StoreError> {
        let events = self.store.query_window(category, since).await?;
        let values = events
            .iter()
            .filter(|e| e.timestamp < until)
            .filter(|e| dimension.map_or(true, |d| e.dimension == d))
            .map(|e| e.value);
        Ok(WindowSummary::from_values(
            category,
            dimension.unwrap_or(ALL_DIMENSIONS),
            values,
        ))
    }

    /// One summary per dimension seen in `[now - window, now]`, ordered by dimension.
    pub async fn summarize_all(
        &self,
        category: Category,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<WindowSummary>, StoreError> {
        let since = now - window;
        let events = self.store.query_window(category, since).await?;
        let until = now + Duration::seconds(1);
        Ok(summaries_by_dimension(category, &events, since, until)
            .into_values()
            .collect())
    }

    /// Current window and week/month baselines for every checkout dimension
    /// observed in the current window.
    pub async fn volume_summaries(&self, now: DateTime<Utc>) -> Result<Vec<VolumeSummary>, StoreError> {
        let current_start = now - Duration::hours(CURRENT_WINDOW_HOURS);
        let week_start = current_start - Duration::days(WEEK_BASELINE_DAYS);
        let month_start = current_start - Duration::days(MONTH_BASELINE_DAYS);
        let events = self
            .store
            .query_window(Category::CheckoutVolume, month_start)
            .await?;

        let category = Category::CheckoutVolume;
        let current = summaries_by_dimension(category, &events, current_start, now + Duration::seconds(1));
        let mut week = summaries_by_dimension(category, &events, week_start, current_start);
        let mut month = summaries_by_dimension(category, &events, month_start, current_start);

        Ok(current
            .into_iter()
            .map(|(dimension, current)| VolumeSummary {
                week: week
                    .remove(&dimension)
                    .unwrap_or_else(|| WindowSummary::empty(category, dimension.clone())),
                month: month
                    .remove(&dimension)
                    .unwrap_or_else(|| WindowSummary::empty(category, dimension.clone())),
                current,
                dimension,
            })
            .collect())
    }

    /// Inputs for one rule-engine pass over `categories`.
    pub async fn window_summaries(
        &self,
        categories: &[Category],
        status_window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowSummaries, StoreError> {
        let mut out = WindowSummaries::default();
        for category in categories {
            match category {
                Category::TransactionStatus => {
                    out.statuses = self.summarize_all(*category, status_window, now).await?;
                }
                Category::CheckoutVolume => {
                    out.volumes = self.volume_summaries(now).await?;
                }
            }
        }
        Ok(out)
    }
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
    fn test_from_values() {
        let s = WindowSummary::from_values(Category::TransactionStatus, "failed", [4, 10, 1]);
        assert_eq!(s.count, 3);
        assert_eq!(s.sum, 15);
        assert_eq!(s.max, Some(10));
        assert_eq!(s.min, Some(1));
        assert_eq!(s.mean, Some(5.0));
    }

    #[test]
    fn test_empty_summary_has_no_statistics() {
        let s = WindowSummary::from_values(Category::TransactionStatus, "failed", []);
        assert_eq!(s.count, 0);
        assert_eq!(s.mean, None);
        assert_eq!(s.max, None);
        assert_eq!(s.daily_average(7), None);
    }

    #[tokio::test]
    async fn test_summarize_all_groups_by_dimension() {
        let store = Arc::new(InMemoryMetricStore::new());
        for (minutes_ago, status, count) in [(5, "approved", 100), (10, "approved", 80), (3, "failed", 6)] {
            store
                .append(MetricEvent::transaction(now() - Duration::minutes(minutes_ago), status, count))
                .await
                .unwrap();
        }
        store
            .append(MetricEvent::transaction(now() - Duration::hours(25), "failed", 50))
            .await
            .unwrap();

        let summarizer = Summarizer::new(store);
        let summaries = summarizer
            .summarize_all(Category::TransactionStatus, Duration::hours(24), now())
            .await
            .unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].dimension, "approved");
        assert_eq!(summaries[0].sum, 180);
        assert_eq!(summaries[1].dimension, "failed");
        assert_eq!(summaries[1].sum, 6);
    }

    #[tokio::test]
    async fn test_summarize_range_with_dimension_filter() {
        let store = Arc::new(InMemoryMetricStore::new());
        store.append(MetricEvent::transaction(now(), "denied", 7)).await.unwrap();
        store.append(MetricEvent::transaction(now(), "approved", 70)).await.unwrap();

        let summarizer = Summarizer::new(store);
        let denied = summarizer
            .summarize_range(
                Category::TransactionStatus,
                Some("denied"),
                now() - Duration::hours(1),
                now() + Duration::seconds(1),
            )
            .await
            .unwrap();
        assert_eq!(denied.sum, 7);

        let all = summarizer
            .summarize_range(
                Category::TransactionStatus,
                None,
                now() - Duration::hours(1),
                now() + Duration::seconds(1),
            )
            .await
            .unwrap();
        assert_eq!(all.dimension, ALL_DIMENSIONS);
        assert_eq!(all.sum, 77);
    }

    #[tokio::test]
    async fn test_volume_baselines() {
        let store = Arc::new(InMemoryMetricStore::new());
        store
            .append(MetricEvent::checkout(now() - Duration::hours(1), "11h", 30))
            .await
            .unwrap();
        // Two days of history inside the week window, 70 checkouts in total.
        store
            .append(MetricEvent::checkout(now() - Duration::days(2), "11h", 40))
            .await
            .unwrap();
        store
            .append(MetricEvent::checkout(now() - Duration::days(3), "11h", 30))
            .await
            .unwrap();
        // Month-only history.
        store
            .append(MetricEvent::checkout(now() - Duration::days(20), "11h", 170))
            .await
            .unwrap();

        let summarizer = Summarizer::new(store);
        let volumes = summarizer.volume_summaries(now()).await.unwrap();
        assert_eq!(volumes.len(), 1);

        let v = &volumes[0];
        assert_eq!(v.current_value(), Some(30.0));
        assert_eq!(v.week_average(), Some(10.0));
        assert_eq!(v.month_average(), Some(8.0));
    }

    #[tokio::test]
    async fn test_volume_dimension_without_history_has_no_baseline() {
        let store = Arc::new(InMemoryMetricStore::new());
        store.append(MetricEvent::checkout(now(), "12h", 5)).await.unwrap();

        let volumes = Summarizer::new(store).volume_summaries(now()).await.unwrap();
        assert_eq!(volumes[0].week_average(), None);
        assert_eq!(volumes[0].month_average(), None);
    }
}
