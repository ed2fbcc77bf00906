//! Live-update channel messages
//!
//! Every message pushed to a connected client is a JSON object
//! `{"type": "...", "data": {...}}`.

use crate::types::finding::AnomalyFinding;
use crate::types::metric::MetricEvent;
use serde::{Deserialize, Serialize};

/// Kind of live event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveEventKind {
    /// A metric event was ingested
    Transaction,
    /// A finding raised while handling ingestion or a manual evaluation
    Alert,
    /// A finding raised by the periodic scheduler
    ScheduledAlert,
}

/// One message on the live-update channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    #[serde(rename = "type")]
    pub kind: LiveEventKind,
    pub data: serde_json::Value,
}

impl LiveEvent {
    pub fn transaction(event: &MetricEvent) -> Self {
        Self {
            kind: LiveEventKind::Transaction,
            data: serde_json::json!({
                "timestamp": event.timestamp,
                "category": event.category,
                "status": event.dimension,
                "count": event.value,
            }),
        }
    }

    pub fn alert(finding: &AnomalyFinding) -> Self {
        Self::finding(LiveEventKind::Alert, finding)
    }

    pub fn scheduled_alert(finding: &AnomalyFinding) -> Self {
        Self::finding(LiveEventKind::ScheduledAlert, finding)
    }

    fn finding(kind: LiveEventKind, finding: &AnomalyFinding) -> Self {
        Self {
            kind,
            data: serde_json::to_value(finding).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Encode for the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_transaction_event_wire_shape() {
        let ts = Utc.with_ymd_and_hms(2025, 7, 14, 10, 0, 0).unwrap();
        let event = LiveEvent::transaction(&MetricEvent::transaction(ts, "approved", 120));
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "transaction");
        assert_eq!(json["data"]["status"], "approved");
        assert_eq!(json["data"]["count"], 120);
    }

    #[test]
    fn test_scheduled_alert_kind() {
        let json = serde_json::to_string(&LiveEventKind::ScheduledAlert).unwrap();
        assert_eq!(json, "\"scheduled_alert\"");
    }
}
