//! Audit logging for security and operational events.
//!
//! All events are emitted via `tracing` with a dedicated target so they can be
//! filtered and formatted (e.g. JSON) for audit pipelines.

use tracing::{info, warn};

pub const AUDIT_TARGET: &str = "txpulse::audit";

/// Log a write request that passed the bearer check (or auth is disabled).
pub fn ingest_auth_success(path: &str) {
    info!(
        target: AUDIT_TARGET,
        event = "ingest_auth_success",
        path = %path,
        result = "ok",
    );
}

/// Log a rejected write request.
pub fn ingest_auth_failure(path: &str, reason: &str) {
    warn!(
        target: AUDIT_TARGET,
        event = "ingest_auth_failure",
        path = %path,
        result = "denied",
        reason = %reason,
    );
}

/// Log admin HTTP request (sensitive endpoints: metrics, readiness).
pub fn admin_http_request(path: &str, status: u16) {
    info!(
        target: AUDIT_TARGET,
        event = "admin_http_request",
        path = %path,
        status = %status,
    );
}

pub fn live_connected(subscriber: u64, peer: &str) {
    info!(
        target: AUDIT_TARGET,
        event = "live_connected",
        subscriber = subscriber,
        peer = %peer,
    );
}

pub fn live_disconnected(subscriber: u64, reason: &str) {
    info!(
        target: AUDIT_TARGET,
        event = "live_disconnected",
        subscriber = subscriber,
        reason = %reason,
    );
}
