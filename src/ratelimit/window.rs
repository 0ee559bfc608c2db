//! Sliding-window admission counter for a single `(tier, key)`.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{elapsed, to_chrono};
use crate::ratelimit::{RateDecision, Tier};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidingWindow {
    pub tier: Tier,
    pub key: String,
    pub window: Duration,
    pub max_requests: u32,
    /// Admission instants inside the trailing window, oldest first.
    timestamps: VecDeque<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl SlidingWindow {
    pub fn new(tier: Tier, key: impl Into<String>, window: Duration, max_requests: u32, now: DateTime<Utc>) -> Self {
        Self {
            tier,
            key: key.into(),
            window,
            max_requests,
            timestamps: VecDeque::new(),
            active: true,
            created_at: now,
            last_used_at: None,
        }
    }

    /// Registry key, `"{tier}:{key}"`.
    pub fn id(&self) -> String {
        super::limiter_id(self.tier, &self.key)
    }

    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - to_chrono(self.window)
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let start = self.window_start(now);
        while self.timestamps.front().is_some_and(|ts| *ts <= start) {
            self.timestamps.pop_front();
        }
    }

    /// Count in window without touching state.
    fn count_at(&self, now: DateTime<Utc>) -> usize {
        let start = self.window_start(now);
        self.timestamps.iter().filter(|ts| **ts > start).count()
    }

    fn oldest_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = self.window_start(now);
        self.timestamps.iter().copied().find(|ts| *ts > start)
    }

    fn decision(&self, allowed: bool, used: usize, oldest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> RateDecision {
        let reset_at = match oldest {
            Some(ts) => {
                let at = ts + to_chrono(self.window);
                if at < now { now + to_chrono(self.window) } else { at }
            }
            None => now + to_chrono(self.window),
        };
        let retry_after = if allowed { Duration::ZERO } else { elapsed(now, reset_at) };
        RateDecision {
            allowed,
            used: used as u32,
            limit: self.max_requests,
            reset_at,
            retry_after,
        }
    }

    /// Prune, then admit `now` if the window has room.
    pub fn admit(&mut self, now: DateTime<Utc>) -> RateDecision {
        if !self.active {
            return RateDecision {
                allowed: false,
                used: 0,
                limit: self.max_requests,
                reset_at: now + to_chrono(self.window),
                retry_after: self.window,
            };
        }

        self.prune(now);
        let allowed = (self.timestamps.len() as u64) < u64::from(self.max_requests);
        if allowed {
            self.timestamps.push_back(now);
            self.last_used_at = Some(now);
        }
        let oldest = self.timestamps.front().copied();
        self.decision(allowed, self.timestamps.len(), oldest, now)
    }

    /// What `admit` would answer, with no side effects.
    pub fn status(&self, now: DateTime<Utc>) -> RateDecision {
        if !self.active {
            return RateDecision {
                allowed: false,
                used: 0,
                limit: self.max_requests,
                reset_at: now + to_chrono(self.window),
                retry_after: self.window,
            };
        }
        let used = self.count_at(now);
        let allowed = (used as u64) < u64::from(self.max_requests);
        self.decision(allowed, used, self.oldest_at(now), now)
    }

    /// Remove exactly one admission recorded at `at`. Returns whether one was found.
    pub fn release(&mut self, at: DateTime<Utc>) -> bool {
        match self.timestamps.iter().rposition(|ts| *ts == at) {
            Some(pos) => {
                self.timestamps.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        self.timestamps.clear();
    }

    pub fn set_window(&mut self, window: Duration, max_requests: u32, now: DateTime<Utc>) {
        self.window = window;
        self.max_requests = max_requests;
        self.prune(now);
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> u32 {
        let used = self.count_at(now) as u32;
        self.max_requests.saturating_sub(used)
    }

    pub fn usage_percentage(&self, now: DateTime<Utc>) -> f64 {
        if self.max_requests == 0 {
            return 100.0;
        }
        self.count_at(now) as f64 / f64::from(self.max_requests) * 100.0
    }

    /// Last instant this limiter admitted anything, or its creation time.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_used_at.unwrap_or(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(max: u32) -> (SlidingWindow, DateTime<Utc>) {
        let now = Utc::now();
        (SlidingWindow::new(Tier::Tenant, "t1", Duration::from_secs(60), max, now), now)
    }

    #[test]
    fn admits_up_to_max_then_denies() {
        let (mut w, now) = window(3);
        for i in 0..3 {
            let d = w.admit(now);
            assert!(d.allowed, "admission {}", i);
        }
        let denied = w.admit(now);
        assert!(!denied.allowed);
        assert_eq!(denied.used, 3);
        assert_eq!(denied.retry_after, Duration::from_secs(60));
        assert_eq!(denied.reset_at, now + chrono::Duration::seconds(60));
    }

    #[test]
    fn old_timestamps_slide_out() {
        let (mut w, now) = window(2);
        w.admit(now);
        w.admit(now + chrono::Duration::seconds(30));
        assert!(!w.admit(now + chrono::Duration::seconds(40)).allowed);

        let later = now + chrono::Duration::seconds(61);
        let d = w.admit(later);
        assert!(d.allowed);
        assert_eq!(d.used, 2);
        // oldest in window is now the +30s admission
        assert_eq!(d.reset_at, now + chrono::Duration::seconds(90));
    }

    #[test]
    fn status_does_not_mutate() {
        let (mut w, now) = window(1);
        for _ in 0..5 {
            assert!(w.status(now).allowed);
        }
        assert!(w.admit(now).allowed);
        assert!(!w.status(now).allowed);
        assert_eq!(w.remaining(now), 0);
    }

    #[test]
    fn release_removes_single_admission() {
        let (mut w, now) = window(2);
        w.admit(now);
        w.admit(now);
        assert!(w.release(now));
        assert_eq!(w.remaining(now), 1);
        assert!(!w.release(now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn inactive_window_denies() {
        let (mut w, now) = window(10);
        w.active = false;
        assert!(!w.admit(now).allowed);
        assert!(!w.status(now).allowed);
    }

    #[test]
    fn usage_percentage_tracks_window() {
        let (mut w, now) = window(4);
        w.admit(now);
        assert_eq!(w.usage_percentage(now), 25.0);
        w.reset();
        assert_eq!(w.usage_percentage(now), 0.0);
    }
}
