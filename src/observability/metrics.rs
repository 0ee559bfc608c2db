//! Metrics collection and exposition.
//!
//! # Metrics
//! - `datajud_requests_total` (counter): requests by type and outcome
//! - `datajud_request_duration_seconds` (histogram): end-to-end latency
//! - `datajud_rate_limited_total` (counter): denials by tier
//! - `datajud_breaker_transitions_total` (counter): by breaker and target state
//! - `datajud_cache_lookups_total` (counter): hits and misses
//! - `datajud_cache_entries` / `datajud_cache_size_bytes` (gauges)
//! - `datajud_cache_evictions_total` (counter): by reason
//! - `datajud_queue_depth` (gauge): by priority
//! - `datajud_credential_quota_used_total` (counter): by credential
//! - `datajud_events_total` (counter): published events by type and result
//!
//! # Design Decisions
//! - Call sites use these helpers instead of raw macros so names stay in one place
//! - Without an installed recorder every call is a no-op

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(request_type: &str, outcome: &str, duration: Duration) {
    counter!("datajud_requests_total", "type" => request_type.to_string(), "outcome" => outcome.to_string())
        .increment(1);
    histogram!("datajud_request_duration_seconds", "type" => request_type.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_rate_limited(tier: &str) {
    counter!("datajud_rate_limited_total", "tier" => tier.to_string()).increment(1);
}

pub fn record_breaker_transition(breaker: &str, to: &str) {
    counter!("datajud_breaker_transitions_total", "breaker" => breaker.to_string(), "to" => to.to_string())
        .increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("datajud_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(entries: usize, bytes: u64) {
    gauge!("datajud_cache_entries").set(entries as f64);
    gauge!("datajud_cache_size_bytes").set(bytes as f64);
}

pub fn record_cache_eviction(reason: &'static str, count: usize) {
    counter!("datajud_cache_evictions_total", "reason" => reason).increment(count as u64);
}

pub fn record_queue_depth(priority: &str, depth: usize) {
    gauge!("datajud_queue_depth", "priority" => priority.to_string()).set(depth as f64);
}

pub fn record_quota_used(credential: &str, amount: u32) {
    counter!("datajud_credential_quota_used_total", "credential" => credential.to_string())
        .increment(u64::from(amount));
}

pub fn record_event(kind: &str, published: bool) {
    let result = if published { "published" } else { "failed" };
    counter!("datajud_events_total", "type" => kind.to_string(), "result" => result).increment(1);
}
