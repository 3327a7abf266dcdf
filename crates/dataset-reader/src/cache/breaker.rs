//! Consecutive-failure circuit breaker for the cache backend.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const CLOSED: u64 = 0;
const NO_TRIAL: u64 = 0;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Backend is used normally.
    Closed,
    /// Backend is skipped until the cooldown elapses.
    Open,
    /// Cooldown elapsed; the next call is let through as a trial.
    HalfOpen,
}

/// Opens after `threshold` consecutive failures and stays open for
/// `cooldown`. After the cooldown exactly one caller is let through as a
/// trial; its success closes the breaker, its failure re-opens it.
///
/// A trial that never reports back (its caller was dropped mid-request)
/// expires after another `cooldown`, and the next caller becomes the trial instead.
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    base: Instant,
    failures: AtomicU32,
    /// Milliseconds since `base` when the breaker opened, plus one; 0 when closed.
    opened_at: AtomicU64,
    /// Mark at which the outstanding trial was granted; 0 when none.
    trial_at: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            base: Instant::now(),
            failures: AtomicU32::new(0),
            opened_at: AtomicU64::new(CLOSED),
            trial_at: AtomicU64::new(NO_TRIAL),
        }
    }

    fn now_mark(&self) -> u64 {
        self.base.elapsed().as_millis() as u64 + 1
    }

    fn cooldown_elapsed(&self, since: u64) -> bool {
        self.now_mark().saturating_sub(since) >= self.cooldown.as_millis() as u64
    }

    /// Whether the backend may be contacted now.
    pub fn allow(&self) -> bool {
        let opened_at = self.opened_at.load(Ordering::Acquire);
        if opened_at == CLOSED {
            return true;
        }
        if !self.cooldown_elapsed(opened_at) {
            return false;
        }

        // One trial at a time; an abandoned one is replaced after a cooldown
        let trial_at = self.trial_at.load(Ordering::Acquire);
        if trial_at != NO_TRIAL && !self.cooldown_elapsed(trial_at) {
            return false;
        }
        self.trial_at
            .compare_exchange(trial_at, self.now_mark(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        let was_open = self.opened_at.swap(CLOSED, Ordering::AcqRel) != CLOSED;
        self.trial_at.store(NO_TRIAL, Ordering::Release);
        if was_open {
            info!("Cache backend recovered, leaving degraded mode");
        }
    }

    pub fn record_failure(&self) {
        if self.trial_at.swap(NO_TRIAL, Ordering::AcqRel) != NO_TRIAL {
            self.opened_at.store(self.now_mark(), Ordering::Release);
            warn!(
                cooldown_secs = self.cooldown.as_secs(),
                "Cache backend trial failed, staying in degraded mode"
            );
            return;
        }

        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.threshold
            && self
                .opened_at
                .compare_exchange(CLOSED, self.now_mark(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            warn!(
                failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Cache backend failing, entering degraded mode"
            );
        }
    }

    pub fn state(&self) -> BreakerState {
        let opened_at = self.opened_at.load(Ordering::Acquire);
        if opened_at == CLOSED {
            BreakerState::Closed
        } else if self.cooldown_elapsed(opened_at) {
            BreakerState::HalfOpen
        } else {
            BreakerState::Open
        }
    }

    /// True while the backend is being bypassed.
    pub fn is_degraded(&self) -> bool {
        self.state() != BreakerState::Closed
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }
}
