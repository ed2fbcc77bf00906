//! REST API for ingestion and the dashboard.
//! Serves /api/transaction, /api/stats, /api/timeseries, /api/alerts,
//! /api/checkout-analysis, /api/evaluate and /health with JSON and CORS.

use crate::app::AppState;
use crate::error::{StoreError, ValidationError};
use crate::metrics;
use crate::pipeline::Trigger;
use crate::server::auth;
use chrono::Utc;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::{body::to_bytes, Body, Method, Request, Response, StatusCode};
use serde::Serialize;
use serde_json::{json, Map, Value};
use txpulse_shared::utils::time::parse_timestamp;
use txpulse_shared::{Category, LiveEvent, MetricEvent};

pub const DEFAULT_ALERT_LIMIT: usize = 50;
pub const MAX_ALERT_LIMIT: usize = 500;

fn json_response(body: String, status: StatusCode) -> Response<Body> {
    let mut res = Response::new(Body::from(body));
    *res.status_mut() = status;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    res
}

fn json_ok<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_string(value) {
        Ok(body) => json_response(body, StatusCode::OK),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    json_response(json!({ "error": message }).to_string(), status)
}

fn store_failure(context: &str, e: StoreError) -> Response<Body> {
    tracing::error!("{}: {}", context, e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}

pub fn cors_preflight() -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = StatusCode::NO_CONTENT;
    let headers = res.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert("Access-Control-Max-Age", HeaderValue::from_static("86400"));
    res
}

pub fn add_cors_headers(mut res: Response<Body>) -> Response<Body> {
    res.headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    res
}

/// Value of `key` in the query string, if present.
fn query_param<'a>(req: &'a Request<Body>, key: &str) -> Option<&'a str> {
    req.uri().query()?.split('&').find_map(|part| {
        let (k, v) = part.split_once('=')?;
        (k == key).then_some(v)
    })
}

fn present<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key)
        .filter(|v| !v.is_null() && v.as_str().map_or(true, |s| !s.trim().is_empty()))
}

/// Validate an ingestion body: `{timestamp, status, count, category?}`.
pub fn parse_transaction(body: &[u8]) -> Result<MetricEvent, ValidationError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| ValidationError::MalformedBody(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| ValidationError::MalformedBody("expected a JSON object".to_string()))?;

    let timestamp = present(obj, "timestamp");
    let status = present(obj, "status");
    let count = present(obj, "count");
    let missing: Vec<&'static str> = [("timestamp", timestamp), ("status", status), ("count", count)]
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(name, _)| *name)
        .collect();
    let (Some(timestamp), Some(status), Some(count)) = (timestamp, status, count) else {
        return Err(ValidationError::MissingFields(missing));
    };

    let timestamp = timestamp
        .as_str()
        .and_then(parse_timestamp)
        .ok_or_else(|| ValidationError::InvalidTimestamp(timestamp.to_string()))?;

    let status = status
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ValidationError::MalformedBody("status must be a string".to_string()))?;

    let count = match count {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ValidationError::InvalidCount(count.to_string()))?;

    let category = match obj.get("category") {
        None | Some(Value::Null) => Category::TransactionStatus,
        Some(Value::String(s)) => s
            .parse::<Category>()
            .map_err(|_| ValidationError::InvalidCategory(s.clone()))?,
        Some(other) => return Err(ValidationError::InvalidCategory(other.to_string())),
    };

    Ok(MetricEvent::new(timestamp, category, status, count))
}

async fn ingest_transaction(req: Request<Body>, state: &AppState) -> Result<Response<Body>, hyper::Error> {
    if let Err(e) = auth::check_bearer(req.headers(), state.auth_token.as_deref(), req.uri().path()) {
        metrics::INGEST_TOTAL.with_label_values(&["unauthorized"]).inc();
        return Ok(error_response(StatusCode::UNAUTHORIZED, &e.to_string()));
    }

    let body = to_bytes(req.into_body()).await?;
    let event = match parse_transaction(&body) {
        Ok(event) => event,
        Err(e) => {
            metrics::INGEST_TOTAL.with_label_values(&["invalid"]).inc();
            return Ok(error_response(StatusCode::BAD_REQUEST, &e.to_string()));
        }
    };

    if let Err(e) = state.metrics_store.append(event.clone()).await {
        metrics::INGEST_TOTAL.with_label_values(&["error"]).inc();
        return Ok(store_failure("Error storing metric", e));
    }

    let report = match state.pipeline.run(Trigger::Ingestion(event.category)).await {
        Ok(report) => report,
        Err(e) => {
            metrics::INGEST_TOTAL.with_label_values(&["error"]).inc();
            return Ok(store_failure("Evaluation after ingest failed", e));
        }
    };
    state.broadcaster.publish(&LiveEvent::transaction(&event));
    metrics::INGEST_TOTAL.with_label_values(&["ok"]).inc();

    let anomalous = report.has_anomalies();
    Ok(json_ok(&json!({
        "recommendation": if anomalous { "alert" } else { "normal" },
        "anomalies": report.findings,
        "message": if anomalous { "Anomalies detected" } else { "Transaction processed normally" },
    })))
}

async fn evaluate_now(req: Request<Body>, state: &AppState) -> Response<Body> {
    if let Err(e) = auth::check_bearer(req.headers(), state.auth_token.as_deref(), req.uri().path()) {
        return error_response(StatusCode::UNAUTHORIZED, &e.to_string());
    }
    match state.pipeline.run(Trigger::Manual).await {
        Ok(report) => json_ok(&json!({
            "findings": report.findings,
            "recorded": report.recorded,
            "suppressed": report.suppressed,
        })),
        Err(e) => store_failure("Manual evaluation failed", e),
    }
}

fn hours_param(req: &Request<Body>) -> Option<i64> {
    query_param(req, "hours").and_then(|v| v.parse().ok())
}

pub async fn handle_api(req: Request<Body>, state: &AppState) -> Result<Response<Body>, hyper::Error> {
    if req.method() == Method::OPTIONS {
        return Ok(cors_preflight());
    }

    let (path, method) = (req.uri().path().to_string(), req.method().clone());
    let res = match (method, path.as_str()) {
        (Method::GET, "/health") => json_ok(&json!({
            "status": "ok",
            "dataReady": state.readiness.is_ready(),
        })),

        (Method::POST, "/api/transaction") => ingest_transaction(req, state).await?,

        (Method::POST, "/api/evaluate") => evaluate_now(req, state).await,

        (Method::GET, "/api/stats") => match state.queries.stats(hours_param(&req), Utc::now()).await {
            Ok(rows) => json_ok(&rows),
            Err(e) => store_failure("Stats query failed", e),
        },

        (Method::GET, "/api/timeseries") => {
            match state.queries.timeseries(hours_param(&req), Utc::now()).await {
                Ok(points) => json_ok(&points),
                Err(e) => store_failure("Timeseries query failed", e),
            }
        }

        (Method::GET, "/api/alerts") => {
            let limit = query_param(&req, "limit")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(DEFAULT_ALERT_LIMIT)
                .min(MAX_ALERT_LIMIT);
            match state.alerts.recent(limit).await {
                Ok(records) => json_ok(&records),
                Err(e) => store_failure("Alert query failed", e),
            }
        }

        (Method::GET, "/api/checkout-analysis") => match state.queries.checkout_snapshot(Utc::now()).await {
            Ok(rows) => json_ok(&rows),
            Err(e) => store_failure("Checkout query failed", e),
        },

        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(add_cors_headers(res))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_valid_transaction() {
        let event = parse_transaction(
            br#"{"timestamp": "2025-07-14 10:42:00", "status": "approved", "count": 12}"#,
        )
        .unwrap();
        assert_eq!(event.category, Category::TransactionStatus);
        assert_eq!(event.dimension, "approved");
        assert_eq!(event.value, 12);
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2025, 7, 14, 10, 42, 0).unwrap());
    }

    #[test]
    fn test_parse_reports_all_missing_fields() {
        let err = parse_transaction(br#"{"status": ""}"#).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingFields(vec!["timestamp", "status", "count"])
        );
        assert_eq!(err.to_string(), "Missing required fields: timestamp, status, count");
    }

    #[test]
    fn test_parse_zero_count_is_present() {
        let event =
            parse_transaction(br#"{"timestamp": "2025-07-14T10:42:00Z", "status": "failed", "count": 0}"#)
                .unwrap();
        assert_eq!(event.value, 0);
    }

    #[test]
    fn test_parse_rejects_negative_count() {
        let err =
            parse_transaction(br#"{"timestamp": "2025-07-14T10:42:00Z", "status": "failed", "count": -1}"#)
                .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCount(_)));
    }

    #[test]
    fn test_parse_rejects_bad_timestamp() {
        let err = parse_transaction(br#"{"timestamp": "yesterday", "status": "failed", "count": 1}"#)
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTimestamp(_)));
    }

    #[test]
    fn test_parse_checkout_category() {
        let event = parse_transaction(
            br#"{"timestamp": "2025-07-14T10:00:00Z", "status": "10h", "count": "31", "category": "checkout"}"#,
        )
        .unwrap();
        assert_eq!(event.category, Category::CheckoutVolume);
        assert_eq!(event.value, 31);

        let err = parse_transaction(
            br#"{"timestamp": "2025-07-14T10:00:00Z", "status": "10h", "count": 1, "category": "refunds"}"#,
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::InvalidCategory("refunds".to_string()));
    }

    #[test]
    fn test_parse_malformed_body() {
        assert!(matches!(
            parse_transaction(b"not json"),
            Err(ValidationError::MalformedBody(_))
        ));
        assert!(matches!(
            parse_transaction(b"[1, 2]"),
            Err(ValidationError::MalformedBody(_))
        ));
    }
}
