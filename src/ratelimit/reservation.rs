//! Transactional admission across several tiers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::ratelimit::{RateDecision, SlidingWindow, Tier, TierLimit};

/// One tier to reserve against. `limit` overrides the tier default when the
/// window is created (credential windows carry the credential's daily quota).
#[derive(Debug, Clone)]
pub struct LimitSpec {
    pub tier: Tier,
    pub key: String,
    pub limit: Option<TierLimit>,
}

impl LimitSpec {
    pub fn new(tier: Tier, key: impl Into<String>) -> Self {
        Self {
            tier,
            key: key.into(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: TierLimit) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Admissions held across tiers.
///
/// Dropping an uncommitted reservation releases every admission it holds.
#[derive(Debug)]
pub struct Reservation {
    held: Vec<(Arc<Mutex<SlidingWindow>>, DateTime<Utc>)>,
    decisions: Vec<(Tier, RateDecision)>,
    committed: bool,
}

impl Reservation {
    pub(crate) fn new() -> Self {
        Self {
            held: Vec::new(),
            decisions: Vec::new(),
            committed: false,
        }
    }

    pub(crate) fn hold(&mut self, window: Arc<Mutex<SlidingWindow>>, at: DateTime<Utc>, tier: Tier, decision: RateDecision) {
        self.held.push((window, at));
        self.decisions.push((tier, decision));
    }

    pub fn decisions(&self) -> &[(Tier, RateDecision)] {
        &self.decisions
    }

    /// Keep every admission.
    pub fn commit(mut self) -> Vec<(Tier, RateDecision)> {
        self.committed = true;
        std::mem::take(&mut self.decisions)
    }

    /// Give every admission back.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for (window, at) in self.held.drain(..).rev() {
            let mut w = window.lock();
            if !w.release(at) {
                tracing::debug!(limiter = %w.id(), "Reservation already gone from window");
            }
        }
    }
}
