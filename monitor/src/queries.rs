//! Read-only dashboard queries: status statistics, time series and the
//! checkout snapshot.
//!
//! Windowed queries that come back empty are retried over the default window
//! (24h unless configured) so the dashboard never renders a blank chart just
//! because the requested window is too narrow.

use crate::error::StoreError;
use crate::storage::MetricStore;
use crate::summarizer::{
    summaries_by_dimension, WindowSummary, CURRENT_WINDOW_HOURS, MONTH_BASELINE_DAYS,
    WEEK_BASELINE_DAYS,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use txpulse_shared::utils::time::format_timestamp;
use txpulse_shared::{Category, CheckoutDimension, MetricEvent};

/// Largest accepted `hours` parameter (ten years).
pub const MAX_WINDOW_HOURS: i64 = 24 * 365 * 10;

/// Rows returned by the time-series fallback.
pub const TIMESERIES_FALLBACK_LIMIT: usize = 100;

/// Series name used for checkout dimensions without a prefix.
pub const DEFAULT_CHECKOUT_SERIES: &str = "checkout";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusStats {
    pub status: String,
    /// Number of stored observations
    pub total: u64,
    pub avg_count: f64,
    pub max_count: u64,
    pub min_count: u64,
    pub sum_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeseriesPoint {
    pub time: String,
    pub status: String,
    pub total_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutSnapshot {
    pub time: String,
    pub dataset: String,
    pub today: u64,
    pub yesterday: u64,
    pub same_day_last_week: u64,
    pub avg_last_week: f64,
    pub avg_last_month: f64,
}

/// Interpret an `hours` parameter: absent, zero or negative means all data.
pub fn window_hours(hours: Option<i64>) -> Option<i64> {
    hours.filter(|h| *h > 0).map(|h| h.min(MAX_WINDOW_HOURS))
}

#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn MetricStore>,
    default_window_hours: i64,
}

impl QueryService {
    pub fn new(store: Arc<dyn MetricStore>, default_window_hours: i64) -> Self {
        Self {
            store,
            default_window_hours: default_window_hours.clamp(1, MAX_WINDOW_HOURS),
        }
    }

    async fn transactions_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<MetricEvent>, StoreError> {
        let since = since.unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.store.query_window(Category::TransactionStatus, since).await
    }

    fn since(now: DateTime<Utc>, hours: Option<i64>) -> Option<DateTime<Utc>> {
        window_hours(hours).map(|h| now - Duration::hours(h))
    }

    /// Per-status statistics ordered by sum descending.
    pub async fn stats(&self, hours: Option<i64>, now: DateTime<Utc>) -> Result<Vec<StatusStats>, StoreError> {
        let rows = self.stats_since(Self::since(now, hours), now).await?;
        if rows.is_empty() && window_hours(hours).is_some() {
            let fallback = now - Duration::hours(self.default_window_hours);
            return self.stats_since(Some(fallback), now).await;
        }
        Ok(rows)
    }

    async fn stats_since(
        &self,
        since: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<StatusStats>, StoreError> {
        let events = self.transactions_since(since).await?;
        let lower = since.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let upper = now.max(events.iter().map(|e| e.timestamp).max().unwrap_or(now)) + Duration::seconds(1);

        let mut rows: Vec<StatusStats> =
            summaries_by_dimension(Category::TransactionStatus, &events, lower, upper)
                .into_values()
                .map(|s| StatusStats {
                    avg_count: s.mean.unwrap_or(0.0),
                    max_count: s.max.unwrap_or(0),
                    min_count: s.min.unwrap_or(0),
                    total: s.count,
                    sum_count: s.sum,
                    status: s.dimension,
                })
                .collect();
        rows.sort_by(|a, b| b.sum_count.cmp(&a.sum_count).then_with(|| a.status.cmp(&b.status)));
        Ok(rows)
    }

    /// Counts summed per (timestamp, status), oldest first. When the requested
    /// window is empty, returns the newest rows of the default window instead,
    /// newest first.
    pub async fn timeseries(&self, hours: Option<i64>, now: DateTime<Utc>) -> Result<Vec<TimeseriesPoint>, StoreError> {
        let events = self.transactions_since(Self::since(now, hours)).await?;
        let points = group_points(&events);
        if !points.is_empty() || window_hours(hours).is_none() {
            return Ok(points);
        }

        let fallback = now - Duration::hours(self.default_window_hours);
        let events = self.transactions_since(Some(fallback)).await?;
        let mut points = group_points(&events);
        points.reverse();
        points.truncate(TIMESERIES_FALLBACK_LIMIT);
        Ok(points)
    }

    /// Checkout counts per dimension with day-over-day and baseline context,
    /// ordered by hour then dataset.
    pub async fn checkout_snapshot(&self, now: DateTime<Utc>) -> Result<Vec<CheckoutSnapshot>, StoreError> {
        let today_start = now - Duration::hours(CURRENT_WINDOW_HOURS);
        let yesterday_start = today_start - Duration::hours(CURRENT_WINDOW_HOURS);
        let last_week_day_start = today_start - Duration::days(WEEK_BASELINE_DAYS);
        let last_week_day_end = last_week_day_start + Duration::hours(CURRENT_WINDOW_HOURS);
        let week_start = today_start - Duration::days(WEEK_BASELINE_DAYS);
        let month_start = today_start - Duration::days(MONTH_BASELINE_DAYS);
        let until = now + Duration::seconds(1);

        let events = self
            .store
            .query_window(Category::CheckoutVolume, month_start)
            .await?;
        let category = Category::CheckoutVolume;
        let today = summaries_by_dimension(category, &events, today_start, until);
        let yesterday = summaries_by_dimension(category, &events, yesterday_start, today_start);
        let last_week_day = summaries_by_dimension(category, &events, last_week_day_start, last_week_day_end);
        let week = summaries_by_dimension(category, &events, week_start, today_start);
        let month = summaries_by_dimension(category, &events, month_start, today_start);

        let mut rows: Vec<CheckoutSnapshot> = month
            .keys()
            .chain(today.keys())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|dim| {
                let parsed = CheckoutDimension::parse(dim);
                CheckoutSnapshot {
                    time: parsed.hour.to_string(),
                    dataset: parsed.series.unwrap_or(DEFAULT_CHECKOUT_SERIES).to_string(),
                    today: sum_of(&today, dim),
                    yesterday: sum_of(&yesterday, dim),
                    same_day_last_week: sum_of(&last_week_day, dim),
                    avg_last_week: sum_of(&week, dim) as f64 / WEEK_BASELINE_DAYS as f64,
                    avg_last_month: sum_of(&month, dim) as f64 / MONTH_BASELINE_DAYS as f64,
                }
            })
            .collect();

        rows.sort_by(|a, b| {
            let hour = |r: &CheckoutSnapshot| CheckoutDimension::parse(&r.time).hour_index().unwrap_or(24);
            hour(a).cmp(&hour(b)).then_with(|| a.dataset.cmp(&b.dataset))
        });
        Ok(rows)
    }
}

fn sum_of(summaries: &BTreeMap<String, WindowSummary>, dimension: &str) -> u64 {
    summaries.get(dimension).map_or(0, |s| s.sum)
}

fn group_points(events: &[MetricEvent]) -> Vec<TimeseriesPoint> {
    let mut grouped: BTreeMap<(DateTime<Utc>, &str), u64> = BTreeMap::new();
    for event in events {
        *grouped
            .entry((event.timestamp, event.dimension.as_str()))
            .or_default() += event.value;
    }
    grouped
        .into_iter()
        .map(|((ts, status), total_count)| TimeseriesPoint {
            time: format_timestamp(&ts),
            status: status.to_string(),
            total_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryMetricStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 14, 12, 0, 0).unwrap()
    }

    async fn service(events: Vec<MetricEvent>) -> QueryService {
        let store = Arc::new(InMemoryMetricStore::new());
        store.append_batch(events).await.unwrap();
        QueryService::new(store, 24)
    }

    #[test]
    fn test_window_hours() {
        assert_eq!(window_hours(None), None);
        assert_eq!(window_hours(Some(0)), None);
        assert_eq!(window_hours(Some(-3)), None);
        assert_eq!(window_hours(Some(6)), Some(6));
        assert_eq!(window_hours(Some(i64::MAX)), Some(MAX_WINDOW_HOURS));
    }

    #[tokio::test]
    async fn test_stats_ordered_by_sum() {
        let svc = service(vec![
            MetricEvent::transaction(now() - Duration::minutes(10), "approved", 100),
            MetricEvent::transaction(now() - Duration::minutes(5), "approved", 50),
            MetricEvent::transaction(now() - Duration::minutes(5), "failed", 9),
        ])
        .await;

        let stats = svc.stats(Some(1), now()).await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].status, "approved");
        assert_eq!(stats[0].total, 2);
        assert_eq!(stats[0].sum_count, 150);
        assert_eq!(stats[0].avg_count, 75.0);
        assert_eq!(stats[1].status, "failed");
    }

    #[tokio::test]
    async fn test_stats_fall_back_to_default_window() {
        let svc = service(vec![
            MetricEvent::transaction(now() - Duration::hours(5), "approved", 10),
            MetricEvent::transaction(now() - Duration::hours(30), "approved", 99),
        ])
        .await;

        // Nothing in the last hour: falls back to 24h, which excludes the 30h-old row.
        let stats = svc.stats(Some(1), now()).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].sum_count, 10);

        // No window: everything.
        let all = svc.stats(None, now()).await.unwrap();
        assert_eq!(all[0].sum_count, 109);
    }

    #[tokio::test]
    async fn test_timeseries_groups_and_falls_back() {
        let t1 = now() - Duration::hours(3);
        let t2 = now() - Duration::hours(2);
        let svc = service(vec![
            MetricEvent::transaction(t2, "approved", 5),
            MetricEvent::transaction(t1, "approved", 7),
            MetricEvent::transaction(t1, "approved", 3),
            MetricEvent::transaction(t1, "denied", 1),
        ])
        .await;

        let points = svc.timeseries(Some(6), now()).await.unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].time, format_timestamp(&t1));
        assert_eq!(points[0].total_count, 10);
        assert_eq!(points[2].time, format_timestamp(&t2));

        // Empty one-hour window: newest-first fallback.
        let fallback = svc.timeseries(Some(1), now()).await.unwrap();
        assert_eq!(fallback.len(), 3);
        assert_eq!(fallback[0].time, format_timestamp(&t2));
    }

    #[tokio::test]
    async fn test_checkout_snapshot() {
        let svc = service(vec![
            MetricEvent::checkout(now() - Duration::hours(2), "10h", 30),
            MetricEvent::checkout(now() - Duration::hours(26), "10h", 20),
            MetricEvent::checkout(now() - Duration::days(7) - Duration::hours(2), "10h", 14),
            MetricEvent::checkout(now() - Duration::hours(2), "checkout_2:09h", 4),
            MetricEvent::checkout(now() - Duration::hours(2), "09h", 8),
        ])
        .await;

        let rows = svc.checkout_snapshot(now()).await.unwrap();
        let keys: Vec<(&str, &str)> = rows.iter().map(|r| (r.time.as_str(), r.dataset.as_str())).collect();
        assert_eq!(
            keys,
            vec![("09h", "checkout"), ("09h", "checkout_2"), ("10h", "checkout")]
        );

        let ten = &rows[2];
        assert_eq!(ten.today, 30);
        assert_eq!(ten.yesterday, 20);
        assert_eq!(ten.same_day_last_week, 14);
        assert_eq!(ten.avg_last_week, 34.0 / 7.0);
        assert_eq!(ten.avg_last_month, 34.0 / 30.0);
    }
}
