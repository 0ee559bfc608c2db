//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via ArcSwap to the runtime
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap; breaker and limiter settings are re-applied
//! ```
//!
//! # Design Decisions
//! - A loaded config is never mutated; reload swaps in a whole new one
//! - Listener addresses and queue sizing only take effect on restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError, ConfigResult};
pub use schema::{
    AdminConfig, BulkConfig, CacheSettings, CircuitBreakerConfig, GatewayConfig, ObservabilityConfig,
    PersistenceConfig, PoolConfig, QueueConfig, QuotaConfig, RateLimitConfig, ServerConfig, UpstreamConfig,
};
pub use watcher::ConfigWatcher;
