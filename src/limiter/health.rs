use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU32, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Healthy,
    Degraded,
}

const HEALTHY: u8 = 0;
const DEGRADED: u8 = 1;

#[derive(Debug, Default)]
struct FailureStreak {
    count: u32,
    started_at: i64,
}

/// Health of one remote backend, shared by every request in the process.
///
/// The state is a single atomic so the admission path reads it without
/// locking. Failure streak bookkeeping sits behind a short mutex and state
/// flips go through compare-and-swap, so racing callers flip it at most once.
#[derive(Debug)]
pub struct BackendHealth {
    state: AtomicU8,
    streak: Mutex<FailureStreak>,
    consecutive_failures: AtomicU32,
    last_probe_time: AtomicI64,
    recovery_armed: AtomicBool,
    threshold: u32,
    failure_period_secs: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub last_probe_time: Option<i64>,
    pub recovery_armed: bool,
}

impl BackendHealth {
    pub fn new(threshold: u32, failure_period_secs: u64) -> Self {
        Self {
            state: AtomicU8::new(HEALTHY),
            streak: Mutex::new(FailureStreak::default()),
            consecutive_failures: AtomicU32::new(0),
            last_probe_time: AtomicI64::new(i64::MIN),
            recovery_armed: AtomicBool::new(false),
            threshold: threshold.max(1),
            failure_period_secs: failure_period_secs as i64,
        }
    }

    pub fn state(&self) -> HealthState {
        match self.state.load(Ordering::Acquire) {
            HEALTHY => HealthState::Healthy,
            _ => HealthState::Degraded,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == HealthState::Healthy
    }

    /// Records a `BackendUnavailable` seen at `now`. Returns `true` when this
    /// failure is the one that degraded the backend.
    pub fn record_failure(&self, now: i64) -> bool {
        let failures = {
            let mut streak = self.streak.lock();
            if streak.count == 0 || now - streak.started_at > self.failure_period_secs {
                streak.count = 1;
                streak.started_at = now;
            } else {
                streak.count += 1;
            }
            self.consecutive_failures
                .store(streak.count, Ordering::Release);
            streak.count
        };

        if failures >= self.threshold {
            return self.transition(HEALTHY, DEGRADED);
        }
        false
    }

    /// Records a successful remote call. Only the call that claimed the
    /// recovery attempt may flip DEGRADED back to HEALTHY; any other success,
    /// such as a request already in flight when the backend degraded, just
    /// clears the failure streak. Returns `true` when the backend was restored.
    pub fn record_success(&self, recovery_attempt: bool) -> bool {
        if self.consecutive_failures.load(Ordering::Acquire) != 0 {
            let mut streak = self.streak.lock();
            *streak = FailureStreak::default();
            self.consecutive_failures.store(0, Ordering::Release);
        }
        if !recovery_attempt {
            return false;
        }
        self.transition(DEGRADED, HEALTHY)
    }

    /// Notes a successful background probe; the next request may try the
    /// remote again.
    pub fn arm_recovery(&self, now: i64) {
        self.last_probe_time.store(now, Ordering::Release);
        if !self.is_healthy() {
            self.recovery_armed.store(true, Ordering::Release);
        }
    }

    pub fn note_probe(&self, now: i64) {
        self.last_probe_time.store(now, Ordering::Release);
    }

    /// Claims the single optimistic retry granted by a successful probe.
    pub fn take_recovery_attempt(&self) -> bool {
        self.recovery_armed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last_probe = self.last_probe_time.load(Ordering::Acquire);
        HealthSnapshot {
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            last_probe_time: (last_probe != i64::MIN).then_some(last_probe),
            recovery_armed: self.recovery_armed.load(Ordering::Acquire),
        }
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for BackendHealth {
    fn default() -> Self {
        Self::new(3, 10)
    }
}
