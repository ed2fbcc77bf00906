//! Anomaly rules and threshold evaluation engine.
//!
//! Three rule families run over one set of window summaries:
//!
//! * **Rate rules** (transaction statuses): share of a status group in the total
//!   transaction count, with a critical tier and an optional warning tier. Every
//!   configured rate rule is checked; they are independent of each other.
//! * **Peak rules** (transaction statuses): a status whose peak count dwarfs its
//!   average in the window.
//! * **Volume rules** (checkout hours): current count against the week and month
//!   baselines. Checked in a fixed order, first match wins per dimension.
//!
//! A rule whose inputs are missing (no observations, zero total, no baseline)
//! produces nothing for that dimension. Evaluation is a pure function of the
//! summaries, the configuration and the supplied detection time.

use crate::summarizer::{VolumeSummary, WindowSummaries, WindowSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use txpulse_shared::{AnomalyFinding, Category, FindingKind, Severity};

/// Which side of the threshold is anomalous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateDirection {
    Above,
    Below,
}

/// Share of one or more statuses in the total transaction count, in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRule {
    /// Reported as the finding dimension, e.g. "failure_rate". A rule can
    /// cover several statuses ("reversal_rate" adds `reversed` and
    /// `backend_reversed`), so findings name the rule rather than a status.
    pub name: String,
    /// Label used in messages, e.g. "FAILURE"
    pub label: String,
    /// Statuses whose counts are added together
    pub statuses: Vec<String>,
    pub direction: RateDirection,
    /// Warning tier; `None` means the rule only has a critical tier
    #[serde(default)]
    pub warning: Option<f64>,
    pub critical: f64,
}

impl RateRule {
    fn new(
        name: &str,
        label: &str,
        statuses: &[&str],
        direction: RateDirection,
        warning: Option<f64>,
        critical: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            statuses: statuses.iter().map(|s| s.to_string()).collect(),
            direction,
            warning,
            critical,
        }
    }

    fn breaches(&self, rate: f64, threshold: f64) -> bool {
        match self.direction {
            RateDirection::Above => rate > threshold,
            RateDirection::Below => rate < threshold,
        }
    }

    fn symbol(&self) -> &'static str {
        match self.direction {
            RateDirection::Above => ">",
            RateDirection::Below => "<",
        }
    }
}

/// Peak-vs-average spike rule for one transaction status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakRule {
    pub status: String,
    pub multiplier: f64,
    /// The window average must exceed this before the rule applies
    pub minimum_observation_count: f64,
}

impl PeakRule {
    fn new(status: &str, multiplier: f64, minimum_observation_count: f64) -> Self {
        Self {
            status: status.to_string(),
            multiplier,
            minimum_observation_count,
        }
    }
}

/// Thresholds of the checkout volume rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeThresholds {
    /// high_volume when current > week average × this
    pub high_week_multiplier: f64,
    /// high_volume when current > month average × this
    pub high_month_multiplier: f64,
    /// high_volume is high severity when current > max(week, month) × this
    pub high_severity_multiplier: f64,
    /// zero_volume needs a week average above this
    pub zero_min_week_average: f64,
    /// low_volume when current < week average × this
    pub low_ratio: f64,
    /// low_volume needs a week average above this
    pub low_min_week_average: f64,
}

impl Default for VolumeThresholds {
    fn default() -> Self {
        Self {
            high_week_multiplier: 2.5,
            high_month_multiplier: 3.0,
            high_severity_multiplier: 1.5,
            zero_min_week_average: 5.0,
            low_ratio: 0.3,
            low_min_week_average: 10.0,
        }
    }
}

/// Full rule configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub rates: Vec<RateRule>,
    pub peaks: Vec<PeakRule>,
    pub volume: VolumeThresholds,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            rates: vec![
                RateRule::new("failure_rate", "FAILURE", &["failed"], RateDirection::Above, Some(3.0), 5.0),
                RateRule::new(
                    "reversal_rate",
                    "REVERSAL",
                    &["reversed", "backend_reversed"],
                    RateDirection::Above,
                    Some(2.0),
                    3.0,
                ),
                RateRule::new("denial_rate", "DENIAL", &["denied"], RateDirection::Above, Some(7.0), 10.0),
                // Low approval has no warning tier.
                RateRule::new("approval_rate", "APPROVAL", &["approved"], RateDirection::Below, None, 80.0),
            ],
            peaks: vec![
                PeakRule::new("failed", 2.5, 10.0),
                PeakRule::new("denied", 2.0, 5.0),
                PeakRule::new("reversed", 3.0, 8.0),
                PeakRule::new("backend_reversed", 2.5, 3.0),
            ],
            volume: VolumeThresholds::default(),
        }
    }
}

/// Inputs of the volume rules for one checkout dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeInput {
    /// Current value
    pub current: f64,
    /// Week baseline (daily average)
    pub week: Option<f64>,
    /// Month baseline (daily average)
    pub month: Option<f64>,
}

impl VolumeInput {
    fn from_summary(summary: &VolumeSummary) -> Option<Self> {
        let input = Self {
            current: summary.current_value()?,
            week: summary.week_average(),
            month: summary.month_average(),
        };
        input.is_finite().then_some(input)
    }

    fn is_finite(&self) -> bool {
        self.current.is_finite()
            && self.week.map_or(true, f64::is_finite)
            && self.month.map_or(true, f64::is_finite)
    }

    fn largest_baseline(&self) -> Option<f64> {
        match (self.week, self.month) {
            (Some(w), Some(m)) => Some(w.max(m)),
            (w, m) => w.or(m),
        }
    }
}

/// Result of a matching volume rule.
struct VolumeOutcome {
    severity: Severity,
    expected: f64,
    message: String,
}

type VolumePredicate = fn(&str, &VolumeInput, &VolumeThresholds) -> Option<VolumeOutcome>;

/// Volume rules in evaluation order. The first rule that matches decides.
const VOLUME_RULES: [(FindingKind, VolumePredicate); 3] = [
    (FindingKind::HighVolume, high_volume),
    (FindingKind::ZeroVolume, zero_volume),
    (FindingKind::LowVolume, low_volume),
];

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v))
}

fn high_volume(dimension: &str, input: &VolumeInput, t: &VolumeThresholds) -> Option<VolumeOutcome> {
    let v = input.current;
    let above_week = input.week.map_or(false, |w| v > w * t.high_week_multiplier);
    let above_month = input.month.map_or(false, |m| v > m * t.high_month_multiplier);
    if !(above_week || above_month) {
        return None;
    }
    let expected = input.largest_baseline()?;
    let severity = if v > expected * t.high_severity_multiplier {
        Severity::High
    } else {
        Severity::Medium
    };
    Some(VolumeOutcome {
        severity,
        expected,
        message: format!(
            "Unusual checkout activity at {}: {} vs week avg {}, month avg {}",
            dimension,
            v,
            fmt_opt(input.week),
            fmt_opt(input.month),
        ),
    })
}

fn zero_volume(dimension: &str, input: &VolumeInput, t: &VolumeThresholds) -> Option<VolumeOutcome> {
    let w = input.week?;
    if input.current != 0.0 || w <= t.zero_min_week_average {
        return None;
    }
    Some(VolumeOutcome {
        severity: Severity::High,
        expected: w,
        message: format!(
            "Critical: Zero checkouts at {}, expected ~{:.2} based on historical data",
            dimension, w
        ),
    })
}

fn low_volume(dimension: &str, input: &VolumeInput, t: &VolumeThresholds) -> Option<VolumeOutcome> {
    let w = input.week?;
    if input.current >= w * t.low_ratio || w <= t.low_min_week_average {
        return None;
    }
    Some(VolumeOutcome {
        severity: Severity::Medium,
        expected: w,
        message: format!(
            "Low checkout volume at {}: {} vs week avg {:.2} ({:.2}% of normal)",
            dimension,
            input.current,
            w,
            input.current / w * 100.0,
        ),
    })
}

/// Evaluates window summaries against the configured rules.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    config: RuleConfig,
}

impl RuleEngine {
    pub fn new(config: RuleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    /// Run every rule family. Findings come out in a stable order: rate rules
    /// in configured order, then peak rules, then volume rules by dimension.
    pub fn evaluate(&self, summaries: &WindowSummaries, detected_at: DateTime<Utc>) -> Vec<AnomalyFinding> {
        let mut findings = self.evaluate_rates(&summaries.statuses, detected_at);
        findings.extend(self.evaluate_peaks(&summaries.statuses, detected_at));
        findings.extend(self.evaluate_volumes(&summaries.volumes, detected_at));
        for finding in &findings {
            crate::metrics::FINDINGS_TOTAL
                .with_label_values(&[finding.kind.as_str()])
                .inc();
        }
        findings
    }

    /// Rate rules over per-status summaries. All matching rules report.
    pub fn evaluate_rates(&self, statuses: &[WindowSummary], detected_at: DateTime<Utc>) -> Vec<AnomalyFinding> {
        let total: u64 = statuses.iter().map(|s| s.sum).sum();
        if total == 0 {
            return Vec::new();
        }

        let mut findings = Vec::new();
        for rule in &self.config.rates {
            // Statuses absent from the window count as zero.
            let count: u64 = statuses
                .iter()
                .filter(|s| rule.statuses.iter().any(|st| *st == s.dimension))
                .map(|s| s.sum)
                .sum();
            let rate = count as f64 * 100.0 / total as f64;
            if !rate.is_finite() {
                continue;
            }

            let tier = if rule.breaches(rate, rule.critical) {
                Some(("CRITICAL", Severity::High, rule.critical))
            } else {
                rule.warning
                    .filter(|w| rule.breaches(rate, *w))
                    .map(|w| ("WARNING", Severity::Medium, w))
            };
            let Some((tier_name, severity, threshold)) = tier else {
                continue;
            };

            let headline = match (rule.direction, severity) {
                (RateDirection::Below, Severity::High) => format!("CRITICAL LOW {} RATE", rule.label),
                (RateDirection::Below, Severity::Medium) => format!("LOW {} RATE", rule.label),
                (RateDirection::Above, Severity::High) => format!("CRITICAL {} RATE", rule.label),
                (RateDirection::Above, Severity::Medium) => format!("HIGH {} RATE", rule.label),
            };
            let tier_label = if tier_name == "CRITICAL" { "Critical" } else { "Warning" };

            findings.push(AnomalyFinding {
                kind: FindingKind::RateAnomaly,
                category: Category::TransactionStatus,
                dimension: rule.name.clone(),
                observed_value: rate,
                expected_value: threshold,
                severity,
                message: format!(
                    "{}: {:.2}% ({}: {}{:.2}%)",
                    headline,
                    rate,
                    tier_label,
                    rule.symbol(),
                    threshold
                ),
                detected_at,
            });
        }
        findings
    }

    /// Peak-vs-average rules over per-status summaries.
    pub fn evaluate_peaks(&self, statuses: &[WindowSummary], detected_at: DateTime<Utc>) -> Vec<AnomalyFinding> {
        let mut findings = Vec::new();
        for rule in &self.config.peaks {
            let Some(summary) = statuses.iter().find(|s| s.dimension == rule.status) else {
                continue;
            };
            let (Some(avg), Some(max)) = (summary.mean, summary.max) else {
                continue;
            };
            let peak = max as f64;
            let threshold = avg * rule.multiplier;
            if !threshold.is_finite() {
                continue;
            }
            if avg <= rule.minimum_observation_count || peak <= threshold {
                continue;
            }

            let severity = if peak > threshold * 1.5 {
                Severity::High
            } else {
                Severity::Medium
            };
            findings.push(AnomalyFinding {
                kind: FindingKind::TransactionSpike,
                category: Category::TransactionStatus,
                dimension: rule.status.clone(),
                observed_value: peak,
                expected_value: threshold,
                severity,
                message: format!(
                    "{} transactions showing unusual activity: {} peak vs {:.2} average",
                    rule.status, max, avg
                ),
                detected_at,
            });
        }
        findings
    }

    /// Volume rules, first match wins within each dimension.
    pub fn evaluate_volumes(&self, volumes: &[VolumeSummary], detected_at: DateTime<Utc>) -> Vec<AnomalyFinding> {
        volumes
            .iter()
            .filter_map(|summary| {
                let input = VolumeInput::from_summary(summary)?;
                self.evaluate_volume(&summary.dimension, &input, detected_at)
            })
            .collect()
    }

    /// Volume rules for one dimension.
    pub fn evaluate_volume(
        &self,
        dimension: &str,
        input: &VolumeInput,
        detected_at: DateTime<Utc>,
    ) -> Option<AnomalyFinding> {
        if input.week.is_none() && input.month.is_none() {
            return None;
        }
        VOLUME_RULES.iter().find_map(|(kind, predicate)| {
            let outcome = predicate(dimension, input, &self.config.volume)?;
            Some(AnomalyFinding {
                kind: *kind,
                category: Category::CheckoutVolume,
                dimension: dimension.to_string(),
                observed_value: input.current,
                expected_value: outcome.expected,
                severity: outcome.severity,
                message: outcome.message,
                detected_at,
            })
        })
    }
}
