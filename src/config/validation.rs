//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, thresholds consistent)
//! - Validate addresses and URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

struct Errors(Vec<ValidationError>);

impl Errors {
    fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.0.push(ValidationError {
                field: field.to_string(),
                message: message.to_string(),
            });
        }
    }

    fn positive(&mut self, value: u64, field: &str) {
        self.check(value > 0, field, "must be greater than zero");
    }

    fn socket_addr(&mut self, value: &str, field: &str) {
        self.check(value.parse::<SocketAddr>().is_ok(), field, "must be a socket address (host:port)");
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Errors(Vec::new());

    errors.socket_addr(&config.server.bind_address, "server.bind_address");
    errors.positive(config.server.request_timeout_secs, "server.request_timeout_secs");

    if config.admin.enabled {
        errors.socket_addr(&config.admin.bind_address, "admin.bind_address");
        errors.check(!config.admin.api_key.trim().is_empty(), "admin.api_key", "is required when admin is enabled");
    }

    let upstream = &config.upstream;
    errors.check(
        url::Url::parse(&upstream.base_url).is_ok_and(|u| matches!(u.scheme(), "http" | "https")),
        "upstream.base_url",
        "must be an http(s) URL",
    );
    errors.positive(upstream.timeout_secs, "upstream.timeout_secs");
    errors.positive(upstream.retry_ceiling_secs, "upstream.retry_ceiling_secs");
    errors.check(upstream.transport_attempts >= 1, "upstream.transport_attempts", "must be at least 1");

    errors.positive(u64::from(config.quota.default_daily_limit), "quota.default_daily_limit");
    errors.check(
        config.quota.utc_offset_minutes.abs() < 24 * 60,
        "quota.utc_offset_minutes",
        "must be within one day of UTC",
    );
    errors.positive(config.quota.sweep_interval_secs, "quota.sweep_interval_secs");

    let rl = &config.rate_limit;
    errors.positive(rl.credential_window_secs, "rate_limit.credential_window_secs");
    errors.positive(rl.tenant_window_secs, "rate_limit.tenant_window_secs");
    errors.positive(rl.global_window_secs, "rate_limit.global_window_secs");
    errors.positive(u64::from(rl.tenant_max_requests), "rate_limit.tenant_max_requests");
    errors.positive(u64::from(rl.global_max_requests), "rate_limit.global_max_requests");
    errors.positive(rl.cleanup_interval_secs, "rate_limit.cleanup_interval_secs");

    let cb = &config.circuit_breaker;
    errors.positive(u64::from(cb.failure_threshold), "circuit_breaker.failure_threshold");
    errors.positive(u64::from(cb.success_threshold), "circuit_breaker.success_threshold");
    errors.positive(cb.timeout_secs, "circuit_breaker.timeout_secs");
    errors.check(
        cb.max_half_open_requests >= cb.success_threshold,
        "circuit_breaker.max_half_open_requests",
        "must be at least success_threshold",
    );
    errors.positive(cb.health_check_interval_secs, "circuit_breaker.health_check_interval_secs");

    let cache = &config.cache;
    errors.positive(cache.default_ttl_secs, "cache.default_ttl_secs");
    errors.positive(cache.max_size_bytes, "cache.max_size_bytes");
    errors.positive(cache.max_entries as u64, "cache.max_entries");
    errors.positive(cache.sweep_interval_secs, "cache.sweep_interval_secs");

    let q = &config.queue;
    errors.positive(q.workers as u64, "queue.workers");
    errors.positive(q.poll_interval_ms, "queue.poll_interval_ms");
    for (cap, field) in [
        (q.urgent_capacity, "queue.urgent_capacity"),
        (q.high_capacity, "queue.high_capacity"),
        (q.normal_capacity, "queue.normal_capacity"),
        (q.low_capacity, "queue.low_capacity"),
    ] {
        errors.positive(cap as u64, field);
    }
    errors.check(q.backoff_cap_secs >= q.backoff_base_secs, "queue.backoff_cap_secs", "must be >= backoff_base_secs");

    errors.check(
        (1..=1000).contains(&config.bulk.max_items),
        "bulk.max_items",
        "must be between 1 and 1000",
    );

    if config.observability.metrics_enabled {
        errors.socket_addr(&config.observability.metrics_address, "observability.metrics_address");
    }

    if errors.0.is_empty() {
        Ok(())
    } else {
        Err(errors.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.admin.api_key = "secret".into();
        config
    }

    #[test]
    fn defaults_with_admin_key_are_valid() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = valid();
        config.admin.api_key.clear();
        config.circuit_breaker.success_threshold = 10;
        config.queue.workers = 0;
        config.upstream.base_url = "ftp://nope".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "admin.api_key",
                "upstream.base_url",
                "circuit_breaker.max_half_open_requests",
                "queue.workers"
            ]
        );
    }
}
