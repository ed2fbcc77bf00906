//! Anomaly finding definitions

use crate::types::metric::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned identifier of a recorded alert. Monotonic per store.
pub type AlertId = u64;

/// Kind of anomaly a rule detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    HighVolume,
    ZeroVolume,
    LowVolume,
    RateAnomaly,
    TransactionSpike,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighVolume => "high_volume",
            Self::ZeroVolume => "zero_volume",
            Self::LowVolume => "low_volume",
            Self::RateAnomaly => "rate_anomaly",
            Self::TransactionSpike => "transaction_spike",
        }
    }
}

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// A single anomaly detection result. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFinding {
    #[serde(rename = "type")]
    pub kind: FindingKind,
    pub category: Category,
    pub dimension: String,
    pub observed_value: f64,
    pub expected_value: f64,
    pub severity: Severity,
    pub message: String,
    pub detected_at: DateTime<Utc>,
}

impl AnomalyFinding {
    /// True when both findings describe the same anomaly, ignoring when it was detected.
    pub fn same_anomaly(&self, other: &AnomalyFinding) -> bool {
        self.kind == other.kind
            && self.category == other.category
            && self.dimension == other.dimension
            && self.severity == other.severity
            && self.observed_value == other.observed_value
            && self.expected_value == other.expected_value
            && self.message == other.message
    }
}

/// A finding as persisted in the alert log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: AlertId,
    #[serde(flatten)]
    pub finding: AnomalyFinding,
}
