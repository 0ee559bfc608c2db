//! Circuit breaker guarding one upstream resource.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: resource assumed down, requests fail fast
//! - Half-Open: a bounded number of probe requests test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first admission check after `timeout` has elapsed
//! Half-Open → Closed: successes >= success_threshold
//! Half-Open → Open: any probe fails
//! ```
//!
//! # Design Decisions
//! - All state lives behind one mutex per breaker; the lazy Open → Half-Open
//!   transition happens inside the same critical section as the check
//! - Every transition zeroes the failure, success and probe counters
//! - Every transition bumps a generation; an outcome recorded against an
//!   older generation only touches the totals, so a slow call admitted while
//!   closed never counts toward half-open recovery
//! - Transitions are broadcast so domain events stay out of the hot path

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::clock::{elapsed, to_chrono, SharedClock};
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Minimum time spent open before probes are allowed.
    pub timeout: Duration,
    /// Probe admissions allowed while half-open.
    pub max_half_open_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(30),
            max_half_open_requests: 5,
        }
    }
}

/// A state change, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub breaker: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
    /// Failure count at the moment of the transition, before the reset.
    pub failure_count: u32,
    pub failure_threshold: u32,
}

/// Complete breaker state. Also the persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerState {
    pub name: String,
    pub config: BreakerConfig,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub probe_count: u32,
    pub state_changed_at: DateTime<Utc>,
    /// Bumped on every transition.
    #[serde(default)]
    pub generation: u64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn new(name: String, config: BreakerConfig, now: DateTime<Utc>) -> Self {
        Self {
            name,
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            probe_count: 0,
            state_changed_at: now,
            generation: 0,
            active: true,
            created_at: now,
            total_successes: 0,
            total_failures: 0,
            total_rejections: 0,
            last_failure_at: None,
        }
    }

    fn transition_to(&mut self, to: CircuitState, now: DateTime<Utc>) -> Option<StateTransition> {
        if self.state == to {
            return None;
        }
        let transition = StateTransition {
            breaker: self.name.clone(),
            from: self.state,
            to,
            at: now,
            failure_count: self.failure_count,
            failure_threshold: self.config.failure_threshold,
        };
        self.state = to;
        self.state_changed_at = now;
        self.generation = self.generation.wrapping_add(1);
        self.failure_count = 0;
        self.success_count = 0;
        self.probe_count = 0;
        Some(transition)
    }

    fn timeout_elapsed(&self, now: DateTime<Utc>) -> bool {
        elapsed(self.state_changed_at, now) >= self.config.timeout
    }

    /// Lazily move Open → Half-Open once the timeout has passed.
    fn refresh(&mut self, now: DateTime<Utc>) -> Option<StateTransition> {
        if self.state == CircuitState::Open && self.timeout_elapsed(now) {
            return self.transition_to(CircuitState::HalfOpen, now);
        }
        None
    }

    fn has_capacity(&self) -> bool {
        if !self.active {
            return false;
        }
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self.probe_count < self.config.max_half_open_requests,
        }
    }

    fn on_success(&mut self, admitted: Option<u64>, now: DateTime<Utc>) -> Option<StateTransition> {
        self.total_successes += 1;
        if self.is_stale(admitted) {
            return None;
        }
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.transition_to(CircuitState::Closed, now)
                } else {
                    None
                }
            }
            // late result from a call admitted before the breaker opened
            CircuitState::Open => None,
        }
    }

    fn on_failure(&mut self, admitted: Option<u64>, now: DateTime<Utc>) -> Option<StateTransition> {
        self.total_failures += 1;
        self.last_failure_at = Some(now);
        if self.is_stale(admitted) {
            return None;
        }
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    self.transition_to(CircuitState::Open, now)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                self.failure_count += 1;
                self.transition_to(CircuitState::Open, now)
            }
            CircuitState::Open => None,
        }
    }

    fn is_stale(&self, admitted: Option<u64>) -> bool {
        admitted.is_some_and(|g| g != self.generation)
    }

    fn retry_at(&self) -> Option<DateTime<Utc>> {
        (self.state == CircuitState::Open).then(|| self.state_changed_at + to_chrono(self.config.timeout))
    }

    fn is_healthy(&self) -> bool {
        if !self.active {
            return false;
        }
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self.success_count > 0,
            CircuitState::Open => false,
        }
    }

    fn failure_rate(&self) -> f64 {
        let total = self.total_successes + self.total_failures;
        if total == 0 {
            return 0.0;
        }
        self.total_failures as f64 / total as f64 * 100.0
    }
}

/// Point-in-time view for admin endpoints and health summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub active: bool,
    pub healthy: bool,
    pub failure_count: u32,
    pub success_count: u32,
    pub probe_count: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub failure_rate: f64,
    pub state_changed_at: DateTime<Utc>,
    pub time_in_state_secs: u64,
    pub retry_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub config: BreakerConfig,
}

/// Ticket for one admitted call, tied to the state it was admitted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    generation: u64,
}

/// Outcome of [`CircuitBreaker::execute`].
#[derive(Debug)]
pub struct ExecutionResult<T, E> {
    /// False when the breaker refused the call; `outcome` is then `None`.
    pub allowed: bool,
    pub outcome: Option<Result<T, E>>,
    pub duration: Duration,
    /// State after the call was recorded.
    pub state: CircuitState,
    pub executed_at: DateTime<Utc>,
    /// Set when rejected by an open breaker.
    pub retry_at: Option<DateTime<Utc>>,
}

impl<T, E> ExecutionResult<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Some(Ok(_)))
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<BreakerState>,
    clock: SharedClock,
    transitions: Option<broadcast::Sender<StateTransition>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: SharedClock) -> Self {
        let name = name.into();
        let now = clock.now();
        Self {
            inner: Mutex::new(BreakerState::new(name.clone(), config, now)),
            name,
            clock,
            transitions: None,
        }
    }

    /// Rebuild from a persisted record.
    pub fn from_state(state: BreakerState, clock: SharedClock) -> Self {
        Self {
            name: state.name.clone(),
            inner: Mutex::new(state),
            clock,
            transitions: None,
        }
    }

    pub fn with_transitions(mut self, tx: broadcast::Sender<StateTransition>) -> Self {
        self.transitions = Some(tx);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, transition: Option<StateTransition>) {
        let Some(t) = transition else { return };
        tracing::info!(breaker = %t.breaker, from = %t.from, to = %t.to, "Circuit state transition");
        metrics::record_breaker_transition(&t.breaker, t.to.as_str());
        if let Some(tx) = &self.transitions {
            let _ = tx.send(t);
        }
    }

    /// Current state, applying the lazy Open → Half-Open transition.
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now();
        let (state, transition) = {
            let mut inner = self.inner.lock();
            let t = inner.refresh(now);
            (inner.state, t)
        };
        self.emit(transition);
        state
    }

    /// Whether a call would be admitted right now. Does not consume a probe.
    pub fn can_execute(&self) -> bool {
        let now = self.clock.now();
        let (ok, transition) = {
            let mut inner = self.inner.lock();
            let t = inner.refresh(now);
            (inner.has_capacity(), t)
        };
        self.emit(transition);
        ok
    }

    /// Admit one call, consuming a probe slot when half-open.
    pub fn try_acquire(&self) -> bool {
        self.acquire().is_some()
    }

    /// Like [`try_acquire`](Self::try_acquire), returning a ticket to report
    /// the call's outcome with.
    pub fn acquire(&self) -> Option<Admission> {
        let now = self.clock.now();
        let (admission, transition) = {
            let mut inner = self.inner.lock();
            let t = inner.refresh(now);
            let admission = if inner.has_capacity() {
                if inner.state == CircuitState::HalfOpen {
                    inner.probe_count += 1;
                }
                Some(Admission {
                    generation: inner.generation,
                })
            } else {
                inner.total_rejections += 1;
                None
            };
            (admission, t)
        };
        self.emit(transition);
        admission
    }

    /// Record a success against whatever state the breaker is in now.
    pub fn record_success(&self) {
        let now = self.clock.now();
        let t = self.inner.lock().on_success(None, now);
        self.emit(t);
    }

    /// Record a failure against whatever state the breaker is in now.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let t = self.inner.lock().on_failure(None, now);
        self.emit(t);
    }

    /// Record an admitted call's outcome. If the breaker changed state since
    /// the admission, only the totals move.
    pub fn complete(&self, admission: Admission, success: bool) {
        let now = self.clock.now();
        let t = {
            let mut inner = self.inner.lock();
            if success {
                inner.on_success(Some(admission.generation), now)
            } else {
                inner.on_failure(Some(admission.generation), now)
            }
        };
        self.emit(t);
    }

    /// When an open breaker will next allow a probe.
    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().retry_at()
    }

    /// Run `f` under the breaker; every error counts as a failure.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> ExecutionResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_classified(|_| true, f).await
    }

    /// Run `f` under the breaker. Errors for which `is_failure` is false are
    /// returned to the caller but recorded as successes (the resource answered).
    pub async fn execute_classified<F, Fut, T, E, C>(&self, is_failure: C, f: F) -> ExecutionResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let executed_at = self.clock.now();
        let Some(admission) = self.acquire() else {
            let (state, retry_at) = {
                let inner = self.inner.lock();
                (inner.state, inner.retry_at())
            };
            tracing::debug!(breaker = %self.name, state = %state, "Call rejected by circuit breaker");
            return ExecutionResult {
                allowed: false,
                outcome: None,
                duration: Duration::ZERO,
                state,
                executed_at,
                retry_at,
            };
        };

        let started = Instant::now();
        let outcome = f().await;
        let duration = started.elapsed();

        let failed = matches!(&outcome, Err(e) if is_failure(e));
        self.complete(admission, !failed);

        ExecutionResult {
            allowed: true,
            outcome: Some(outcome),
            duration,
            state: self.inner.lock().state,
            executed_at,
            retry_at: None,
        }
    }

    pub fn force_open(&self) {
        let now = self.clock.now();
        let t = self.inner.lock().transition_to(CircuitState::Open, now);
        self.emit(t);
    }

    pub fn force_closed(&self) {
        let now = self.clock.now();
        let t = self.inner.lock().transition_to(CircuitState::Closed, now);
        self.emit(t);
    }

    /// Back to closed with zeroed counters.
    pub fn reset(&self) {
        let now = self.clock.now();
        let t = {
            let mut inner = self.inner.lock();
            let t = inner.transition_to(CircuitState::Closed, now);
            inner.failure_count = 0;
            inner.success_count = 0;
            inner.probe_count = 0;
            t
        };
        self.emit(t);
    }

    pub fn set_active(&self, active: bool) {
        self.inner.lock().active = active;
        tracing::info!(breaker = %self.name, active, "Circuit breaker activation changed");
    }

    pub fn update_config(&self, config: BreakerConfig) {
        self.inner.lock().config = config;
    }

    pub fn config(&self) -> BreakerConfig {
        self.inner.lock().config
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.lock().is_healthy()
    }

    pub fn failure_rate(&self) -> f64 {
        self.inner.lock().failure_rate()
    }

    /// How long the breaker has been in its current state.
    pub fn time_in_state(&self) -> Duration {
        let now = self.clock.now();
        elapsed(self.inner.lock().state_changed_at, now)
    }

    pub fn stats(&self) -> BreakerStats {
        let now = self.clock.now();
        let inner = self.inner.lock();
        BreakerStats {
            name: inner.name.clone(),
            state: inner.state,
            active: inner.active,
            healthy: inner.is_healthy(),
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            probe_count: inner.probe_count,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            failure_rate: inner.failure_rate(),
            state_changed_at: inner.state_changed_at,
            time_in_state_secs: elapsed(inner.state_changed_at, now).as_secs(),
            retry_at: inner.retry_at(),
            last_failure_at: inner.last_failure_at,
            config: inner.config,
        }
    }

    pub fn snapshot(&self) -> BreakerState {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn breaker(failures: u32, successes: u32, max_probes: u32) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let config = BreakerConfig {
            failure_threshold: failures,
            success_threshold: successes,
            timeout: Duration::from_secs(30),
            max_half_open_requests: max_probes,
        };
        (CircuitBreaker::new("datajud:tjsp", config, clock.clone()), clock)
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let (cb, _) = breaker(3, 2, 5);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn success_in_closed_resets_failure_streak() {
        let (cb, _) = breaker(3, 2, 5);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn stays_open_until_timeout_then_half_opens_lazily() {
        let (cb, clock) = breaker(1, 2, 5);
        cb.record_failure();
        clock.advance(Duration::from_secs(29));
        assert!(!cb.try_acquire());
        assert_eq!(cb.snapshot().state, CircuitState::Open);

        clock.advance(Duration::from_secs(1));
        // no background task ran; the check itself moves the state
        assert!(cb.can_execute());
        assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let (cb, clock) = breaker(1, 2, 5);
        cb.record_failure();
        clock.advance(Duration::from_secs(30));

        assert!(cb.try_acquire());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        let snap = cb.snapshot();
        assert_eq!((snap.failure_count, snap.success_count, snap.probe_count), (0, 0, 0));
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let (cb, clock) = breaker(1, 3, 5);
        cb.record_failure();
        clock.advance(Duration::from_secs(31));
        assert!(cb.try_acquire());
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.snapshot().state, CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn outcome_of_call_admitted_while_closed_does_not_close_half_open_breaker() {
        let (cb, clock) = breaker(2, 1, 1);
        let slow = cb.acquire().unwrap();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        clock.advance(Duration::from_secs(30));
        let trial = cb.acquire().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // the slow call's success would otherwise close the breaker
        cb.complete(slow, true);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.stats().success_count, 0);
        assert_eq!(cb.stats().total_successes, 1);

        cb.complete(trial, true);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn stale_failure_does_not_reopen_half_open_breaker() {
        let (cb, clock) = breaker(1, 2, 2);
        let slow = cb.acquire().unwrap();
        cb.record_failure();
        clock.advance(Duration::from_secs(30));
        let trial = cb.acquire().unwrap();

        cb.complete(slow, false);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.stats().total_failures, 2);
        cb.complete(trial, true);
        assert_eq!(cb.stats().success_count, 1);
    }

    #[test]
    fn half_open_limits_probes() {
        let (cb, clock) = breaker(1, 3, 2);
        cb.record_failure();
        clock.advance(Duration::from_secs(30));
        assert!(cb.try_acquire());
        assert!(cb.try_acquire());
        assert!(!cb.try_acquire());
        assert_eq!(cb.stats().total_rejections, 1);
    }

    #[test]
    fn transitions_are_broadcast() {
        let (tx, mut rx) = broadcast::channel(16);
        let clock = Arc::new(ManualClock::starting_now());
        let cb = CircuitBreaker::new(
            "datajud:trf1",
            BreakerConfig {
                failure_threshold: 1,
                ..BreakerConfig::default()
            },
            clock.clone(),
        )
        .with_transitions(tx);

        cb.record_failure();
        let t = rx.try_recv().unwrap();
        assert_eq!((t.from, t.to), (CircuitState::Closed, CircuitState::Open));
        assert_eq!(t.failure_count, 1);

        clock.advance(Duration::from_secs(30));
        cb.can_execute();
        let t = rx.try_recv().unwrap();
        assert_eq!(t.to, CircuitState::HalfOpen);
    }

    #[test]
    fn inactive_breaker_rejects() {
        let (cb, _) = breaker(3, 2, 5);
        cb.set_active(false);
        assert!(!cb.can_execute());
        assert!(!cb.is_healthy());
        cb.set_active(true);
        assert!(cb.can_execute());
    }

    #[test]
    fn force_and_reset() {
        let (cb, _) = breaker(3, 2, 5);
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.retry_at().is_some());
        cb.force_closed();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        cb.reset();
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn execute_skips_work_when_open() {
        let (cb, _) = breaker(1, 1, 1);
        cb.force_open();
        let mut called = false;
        let result: ExecutionResult<(), ()> = cb
            .execute(|| {
                called = true;
                async { Ok(()) }
            })
            .await;
        assert!(!result.allowed);
        assert!(result.outcome.is_none());
        assert!(result.retry_at.is_some());
        assert!(!called);
    }

    #[tokio::test]
    async fn execute_records_outcomes() {
        let (cb, _) = breaker(2, 1, 1);
        let r: ExecutionResult<u8, &str> = cb.execute(|| async { Err("boom") }).await;
        assert!(r.allowed && !r.is_success());
        let r: ExecutionResult<u8, &str> = cb.execute(|| async { Err("boom") }).await;
        assert_eq!(r.state, CircuitState::Open);
        assert_eq!(cb.failure_rate(), 100.0);
    }

    #[tokio::test]
    async fn classified_errors_do_not_trip() {
        let (cb, _) = breaker(1, 1, 1);
        let r: ExecutionResult<u8, u16> = cb.execute_classified(|status| *status >= 500, || async { Err(404) }).await;
        assert!(!r.is_success());
        assert_eq!(r.state, CircuitState::Closed);
    }
}
