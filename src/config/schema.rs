//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheConfig, EvictionPolicy};
use crate::credentials::{QuotaRollover, SelectionStrategy};
use crate::queue::{LaneCapacities, QueueSettings};
use crate::ratelimit::{TierDefaults, TierLimit};
use crate::resilience::BreakerConfig;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Query API listener.
    pub server: ServerConfig,

    /// Admin API listener and key.
    pub admin: AdminConfig,

    /// DataJud endpoint and retry policy.
    pub upstream: UpstreamConfig,

    /// Daily credential quotas.
    pub quota: QuotaConfig,

    /// Tenant and global sliding windows.
    pub rate_limit: RateLimitConfig,

    pub circuit_breaker: CircuitBreakerConfig,

    pub pool: PoolConfig,

    pub cache: CacheSettings,

    pub queue: QueueConfig,

    pub bulk: BulkConfig,

    pub persistence: PersistenceConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Whole-request timeout for the query API.
    pub request_timeout_secs: u64,

    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 120,
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,

    /// Bearer key for the admin API.
    pub api_key: String,

    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
            bind_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,

    /// Deadline for a single upstream call.
    pub timeout_secs: u64,

    /// Base of the synchronous retry delay (`2^n * retry_delay`).
    pub retry_delay_secs: u64,

    pub max_retries: u32,

    /// Ceiling for any computed retry delay.
    pub retry_ceiling_secs: u64,

    /// In-transport attempts for transient errors, first try included.
    pub transport_attempts: u32,

    pub transport_base_delay_ms: u64,

    pub transport_max_delay_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-publica.datajud.cnj.jus.br".to_string(),
            timeout_secs: 30,
            retry_delay_secs: 5,
            max_retries: 3,
            retry_ceiling_secs: 300,
            transport_attempts: 1,
            transport_base_delay_ms: 100,
            transport_max_delay_ms: 2000,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn retry_ceiling(&self) -> Duration {
        Duration::from_secs(self.retry_ceiling_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Daily limit for credentials created without one.
    pub default_daily_limit: u32,

    /// Quotas roll over at local midnight for this offset (Brasília by default).
    pub utc_offset_minutes: i32,

    pub sweep_interval_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_daily_limit: 10_000,
            utc_offset_minutes: -180,
            sweep_interval_secs: 60,
        }
    }
}

impl QuotaConfig {
    pub fn rollover(&self) -> QuotaRollover {
        QuotaRollover {
            utc_offset_minutes: self.utc_offset_minutes,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Credential windows use the credential's daily limit as max.
    pub credential_window_secs: u64,

    pub tenant_max_requests: u32,
    pub tenant_window_secs: u64,

    pub global_max_requests: u32,
    pub global_window_secs: u64,

    pub cleanup_interval_secs: u64,

    /// Windows idle for longer than this are dropped.
    pub idle_ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            credential_window_secs: 24 * 60 * 60,
            tenant_max_requests: 100,
            tenant_window_secs: 60 * 60,
            global_max_requests: 1000,
            global_window_secs: 60 * 60,
            cleanup_interval_secs: 15 * 60,
            idle_ttl_secs: 60 * 60,
        }
    }
}

impl RateLimitConfig {
    pub fn tier_defaults(&self, default_daily_limit: u32) -> TierDefaults {
        TierDefaults {
            credential: TierLimit::new(Duration::from_secs(self.credential_window_secs), default_daily_limit),
            tenant: TierLimit::new(Duration::from_secs(self.tenant_window_secs), self.tenant_max_requests),
            global: TierLimit::new(Duration::from_secs(self.global_window_secs), self.global_max_requests),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_secs: u64,
    pub max_half_open_requests: u32,
    pub health_check_interval_secs: u64,

    /// Breakers created at startup.
    pub default_breakers: Vec<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout_secs: 30,
            max_half_open_requests: 5,
            health_check_interval_secs: 30,
            default_breakers: ["datajud-api", "datajud-auth", "database", "cache", "rabbitmq"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: Duration::from_secs(self.timeout_secs),
            max_half_open_requests: self.max_half_open_requests,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    pub default_strategy: SelectionStrategy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub default_ttl_secs: u64,
    pub max_size_bytes: u64,
    pub max_entries: usize,
    pub sweep_interval_secs: u64,
    pub eviction_policy: EvictionPolicy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 3600,
            max_size_bytes: 1024 * 1024 * 1024,
            max_entries: 100_000,
            sweep_interval_secs: 15 * 60,
            eviction_policy: EvictionPolicy::Lru,
        }
    }
}

impl CacheSettings {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            default_ttl: Duration::from_secs(self.default_ttl_secs),
            max_size_bytes: self.max_size_bytes,
            max_entries: self.max_entries,
            eviction_policy: self.eviction_policy,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub workers: usize,
    pub poll_interval_ms: u64,

    pub urgent_capacity: usize,
    pub high_capacity: usize,
    pub normal_capacity: usize,
    pub low_capacity: usize,

    /// Execution retries wait `2^n * backoff_base`, capped at `backoff_cap`.
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,

    /// Minimum deferral after a rate-limit denial.
    pub rate_limit_deferral_secs: u64,

    /// Pending requests reloaded from storage on start.
    pub pending_reload_limit: usize,

    pub retry_sweep_interval_secs: u64,

    /// Finished requests older than this are purged.
    pub retention_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            poll_interval_ms: 100,
            urgent_capacity: 1_000,
            high_capacity: 5_000,
            normal_capacity: 10_000,
            low_capacity: 20_000,
            backoff_base_secs: 1,
            backoff_cap_secs: 300,
            rate_limit_deferral_secs: 60,
            pending_reload_limit: 1_000,
            retry_sweep_interval_secs: 30,
            retention_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl QueueConfig {
    pub fn settings(&self) -> QueueSettings {
        QueueSettings {
            workers: self.workers,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            capacities: LaneCapacities {
                urgent: self.urgent_capacity,
                high: self.high_capacity,
                normal: self.normal_capacity,
                low: self.low_capacity,
            },
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            backoff_cap: Duration::from_secs(self.backoff_cap_secs),
            deferral_floor: Duration::from_secs(self.rate_limit_deferral_secs),
            pending_reload_limit: self.pending_reload_limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BulkConfig {
    pub max_items: usize,

    /// Pause between bulk items.
    pub throttle_ms: u64,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_items: 100,
            throttle_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// JSON state file. In-memory only when unset.
    pub state_file: Option<String>,

    /// How often limiter windows are snapshotted.
    pub snapshot_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_file: None,
            snapshot_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines.
    pub json_logs: bool,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9100".to_string(),
        }
    }
}
