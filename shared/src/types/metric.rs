//! Metric event definitions
//!
//! A metric event is one observed count for one dimension of a category,
//! e.g. "17 failed transactions at 10:42" or "35 checkouts in the 13h bucket".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Store-assigned identifier of an appended metric event
pub type EventId = u64;

/// Metric category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Transaction counts per status (approved, failed, denied, ...)
    TransactionStatus,
    /// Checkout counts per hour-of-day bucket
    CheckoutVolume,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::TransactionStatus, Category::CheckoutVolume];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransactionStatus => "transaction_status",
            Self::CheckoutVolume => "checkout_volume",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid metric category: {0}")]
pub struct ParseCategoryError(pub String);

impl std::str::FromStr for Category {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "transaction_status" | "transaction" | "transactions" => Ok(Category::TransactionStatus),
            "checkout_volume" | "checkout" | "checkouts" => Ok(Category::CheckoutVolume),
            _ => Err(ParseCategoryError(s.to_string())),
        }
    }
}

/// A single observed metric value. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEvent {
    /// When the value was observed
    pub timestamp: DateTime<Utc>,

    /// Category the value belongs to
    pub category: Category,

    /// Status name for transactions, hour bucket for checkouts
    pub dimension: String,

    /// Observed count
    pub value: u64,
}

impl MetricEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        category: Category,
        dimension: impl Into<String>,
        value: u64,
    ) -> Self {
        Self {
            timestamp,
            category,
            dimension: dimension.into(),
            value,
        }
    }

    pub fn transaction(timestamp: DateTime<Utc>, status: impl Into<String>, count: u64) -> Self {
        Self::new(timestamp, Category::TransactionStatus, status, count)
    }

    pub fn checkout(timestamp: DateTime<Utc>, hour: impl Into<String>, count: u64) -> Self {
        Self::new(timestamp, Category::CheckoutVolume, hour, count)
    }
}

/// A checkout dimension split into its optional series name and hour label.
///
/// `"13h"` has no series; `"checkout_2:13h"` belongs to series `checkout_2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutDimension<'a> {
    pub series: Option<&'a str>,
    pub hour: &'a str,
}

impl<'a> CheckoutDimension<'a> {
    pub fn parse(dimension: &'a str) -> Self {
        match dimension.split_once(':') {
            Some((series, hour)) => Self {
                series: Some(series),
                hour,
            },
            None => Self {
                series: None,
                hour: dimension,
            },
        }
    }

    /// Hour-of-day index for ordering, `None` for labels that are not `00h`..`23h`.
    pub fn hour_index(&self) -> Option<u32> {
        let digits = self.hour.strip_suffix('h')?;
        let hour: u32 = digits.parse().ok()?;
        (hour < 24).then_some(hour)
    }
}
