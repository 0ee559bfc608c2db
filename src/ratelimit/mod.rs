//! Multi-tier sliding-window rate limiting.
//!
//! # Data Flow
//! ```text
//! credential selected
//!     → registry.rs (get-or-create one window per "{tier}:{key}")
//!     → reservation.rs (admit credential → tenant → global, in order)
//!         - any tier denies: earlier admissions are released, denial returned
//!         - all admit: reservation committed
//! ```
//!
//! # Design Decisions
//! - One mutex per window, never held across tiers
//! - Rollback removes exactly the admitted timestamp, so concurrent
//!   admissions on the same key are never disturbed
//! - Status queries compute over a read view and never prune or count

pub mod registry;
pub mod reservation;
pub mod window;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use registry::{LimiterStats, RateLimiterRegistry, TierDefaults, TierLimit};
pub use reservation::{LimitSpec, Reservation};
pub use window::SlidingWindow;

/// Scope of a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Credential,
    Tenant,
    Global,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Credential => "credential",
            Tier::Tenant => "tenant",
            Tier::Global => "global",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key used for the single global window.
pub const GLOBAL_KEY: &str = "global";

pub fn limiter_id(tier: Tier, key: &str) -> String {
    format!("{}:{}", tier, key)
}

/// Answer to an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub used: u32,
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after: Duration,
}

/// A tier refused admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDenial {
    pub tier: Tier,
    pub key: String,
    pub used: u32,
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after: Duration,
}

impl RateLimitDenial {
    pub fn from_decision(tier: Tier, key: &str, decision: &RateDecision) -> Self {
        Self {
            tier,
            key: key.to_string(),
            used: decision.used,
            limit: decision.limit,
            reset_at: decision.reset_at,
            retry_after: decision.retry_after,
        }
    }
}

impl fmt::Display for RateLimitDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} limit for '{}' reached ({}/{}), resets at {}",
            self.tier, self.key, self.used, self.limit, self.reset_at
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit exceeded: {0}")]
    Denied(RateLimitDenial),

    #[error("no rate limiter registered for {0}")]
    NotFound(String),
}

pub type RateLimitResult<T> = Result<T, RateLimitError>;
