#![forbid(unsafe_code)]

//! **warden-breaker** – Per-tool circuit breaker.
//!
//! Each tool owns one breaker. The breaker wraps the protected execution:
//! consecutive counted failures open it, an adaptive recovery timeout gates
//! the transition to HALF_OPEN, a bounded number of trial calls probe the
//! tool, and a single trial success closes it again. State lives under one
//! mutex; the protected future always runs outside the lock, and opening
//! never cancels a call already in flight.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Exponent cap for the adaptive recovery backoff.
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Retry hint returned when a HALF_OPEN trial slot is unavailable.
const HALF_OPEN_RETRY_AFTER: Duration = Duration::from_secs(5);

//─────────────────────────────
//  Public types
//─────────────────────────────

/// Breaker state as observed by callers and health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Normal operation; failures are being counted.
    Closed,
    /// Rejecting calls until the recovery timeout elapses.
    Open,
    /// Admitting a bounded number of trial calls.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => f.write_str("CLOSED"),
            BreakerState::Open => f.write_str("OPEN"),
            BreakerState::HalfOpen => f.write_str("HALF_OPEN"),
        }
    }
}

/// Construction-time thresholds.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Consecutive counted failures that open the breaker.
    pub failure_threshold: u32,
    /// Base recovery timeout before a HALF_OPEN probe is allowed.
    pub recovery_timeout: Duration,
    /// Ceiling on the adaptive (backed-off) recovery timeout.
    pub max_recovery_timeout: Duration,
    /// Concurrent trial calls admitted while HALF_OPEN.
    pub half_open_max_in_flight: usize,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            max_recovery_timeout: Duration::from_secs(3600),
            half_open_max_in_flight: 1,
        }
    }
}

/// Error returned from [`CircuitBreaker::call_with`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without executing it.
    #[error("circuit breaker '{name}' is open, retry after {retry_after:?}")]
    Open {
        /// Breaker (tool) name.
        name: String,
        /// How long the caller should wait before retrying.
        retry_after: Duration,
    },
    /// The protected execution itself failed.
    #[error("{0}")]
    Inner(E),
}

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    /// Breaker (tool) name.
    pub name: String,
    /// Current state.
    pub state: BreakerState,
    /// Consecutive counted failures in the current CLOSED window.
    pub failure_count: u32,
    /// Times the breaker has opened without an intervening close.
    pub consecutive_opens: u32,
    /// Calls admitted for execution (successes + failures).
    pub total_calls: u64,
    /// Successful protected executions.
    pub successes: u64,
    /// Counted failures of protected executions.
    pub failures: u64,
    /// Calls rejected while OPEN or over the HALF_OPEN budget.
    pub rejections: u64,
    /// CLOSED/HALF_OPEN → OPEN transitions.
    pub transitions_to_open: u64,
    /// OPEN → HALF_OPEN transitions.
    pub transitions_to_half_open: u64,
    /// HALF_OPEN → CLOSED transitions (plus force-closes).
    pub transitions_to_closed: u64,
    /// Cumulative seconds spent CLOSED.
    pub time_in_closed_sec: f64,
    /// Cumulative seconds spent OPEN.
    pub time_in_open_sec: f64,
    /// Cumulative seconds spent HALF_OPEN.
    pub time_in_half_open_sec: f64,
    /// Current effective (backed-off, jittered) recovery timeout in seconds.
    pub effective_recovery_timeout_sec: f64,
}

//─────────────────────────────
//  Internal state
//─────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    total_calls: u64,
    successes: u64,
    failures: u64,
    rejections: u64,
    transitions_to_open: u64,
    transitions_to_half_open: u64,
    transitions_to_closed: u64,
    time_in_closed: Duration,
    time_in_open: Duration,
    time_in_half_open: Duration,
}

#[derive(Debug)]
struct Core {
    state: BreakerState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    half_open_in_flight: usize,
    consecutive_opens: u32,
    effective_recovery_timeout: Duration,
    state_entered_at: Instant,
    counters: Counters,
}

impl Core {
    fn new(settings: &BreakerSettings) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_time: None,
            half_open_in_flight: 0,
            consecutive_opens: 0,
            effective_recovery_timeout: settings.recovery_timeout,
            state_entered_at: Instant::now(),
            counters: Counters::default(),
        }
    }

    fn enter_state(&mut self, next: BreakerState) {
        let spent = self.state_entered_at.elapsed();
        match self.state {
            BreakerState::Closed => self.counters.time_in_closed += spent,
            BreakerState::Open => self.counters.time_in_open += spent,
            BreakerState::HalfOpen => self.counters.time_in_half_open += spent,
        }
        self.state = next;
        self.state_entered_at = Instant::now();
    }
}

/// How an admission request was resolved.
enum Admission {
    /// Execute normally (CLOSED).
    Normal,
    /// Execute as a HALF_OPEN trial; the slot must be returned.
    Trial,
    /// Rejected; do not execute.
    Rejected { retry_after: Duration },
}

/// Returns a HALF_OPEN trial slot if the call never settles.
///
/// A trial caller can disappear at an await point (client gone, task
/// aborted); without this the slot would leak and the breaker could wedge
/// in HALF_OPEN forever.
struct TrialSlot {
    core: Arc<Mutex<Core>>,
    armed: bool,
}

impl TrialSlot {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TrialSlot {
    fn drop(&mut self) {
        if self.armed {
            let mut core = self.core.lock().unwrap_or_else(|p| p.into_inner());
            core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
        }
    }
}

//─────────────────────────────
//  Circuit breaker
//─────────────────────────────

/// Per-tool failure isolator.
///
/// Cheap to share: clones refer to the same state.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    core: Arc<Mutex<Core>>,
}

impl CircuitBreaker {
    /// Create a breaker named after the tool it protects.
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        let core = Core::new(&settings);
        Self {
            name: name.into(),
            settings,
            core: Arc::new(Mutex::new(core)),
        }
    }

    /// Breaker (tool) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Execute `fut` under the breaker, counting every error as a failure.
    pub async fn call<T, E, Fut>(&self, fut: Fut) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with(fut, |_| true).await
    }

    /// Execute `fut` under the breaker.
    ///
    /// `counts` classifies errors: only errors it returns `true` for are
    /// counted toward the failure threshold; others pass through untouched
    /// (they still release a HALF_OPEN trial slot, but neither close nor
    /// reopen the breaker).
    pub async fn call_with<T, E, Fut, P>(&self, fut: Fut, counts: P) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        let admission = self.admit();
        let slot = match admission {
            Admission::Rejected { retry_after } => {
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                    retry_after,
                });
            }
            Admission::Trial => Some(TrialSlot {
                core: Arc::clone(&self.core),
                armed: true,
            }),
            Admission::Normal => None,
        };

        // The protected execution runs outside the mutex.
        let outcome = fut.await;

        match &outcome {
            Ok(_) => self.on_success(slot.is_some()),
            Err(err) => {
                if counts(err) {
                    self.on_failure(slot.is_some());
                } else {
                    self.on_uncounted(slot.is_some());
                }
            }
        }
        if let Some(slot) = slot {
            slot.disarm();
        }

        outcome.map_err(BreakerError::Inner)
    }

    /// Open the breaker unconditionally (operator action).
    pub fn force_open(&self) {
        let mut core = self.lock();
        if core.state != BreakerState::Open {
            warn!(breaker = %self.name, "circuit breaker forced open");
            core.counters.transitions_to_open += 1;
            core.enter_state(BreakerState::Open);
        }
        core.last_failure_time = Some(Instant::now());
    }

    /// Close the breaker and reset its failure window (operator action).
    pub fn force_close(&self) {
        let mut core = self.lock();
        if core.state != BreakerState::Closed {
            info!(breaker = %self.name, "circuit breaker forced closed");
            core.counters.transitions_to_closed += 1;
            core.enter_state(BreakerState::Closed);
        }
        core.failure_count = 0;
        core.consecutive_opens = 0;
        core.half_open_in_flight = 0;
        core.last_failure_time = None;
        core.effective_recovery_timeout = self.settings.recovery_timeout;
    }

    /// Point-in-time statistics.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let core = self.lock();
        let extra = core.state_entered_at.elapsed();
        let (closed, open, half_open) = match core.state {
            BreakerState::Closed => (core.counters.time_in_closed + extra, core.counters.time_in_open, core.counters.time_in_half_open),
            BreakerState::Open => (core.counters.time_in_closed, core.counters.time_in_open + extra, core.counters.time_in_half_open),
            BreakerState::HalfOpen => (core.counters.time_in_closed, core.counters.time_in_open, core.counters.time_in_half_open + extra),
        };
        BreakerSnapshot {
            name: self.name.clone(),
            state: core.state,
            failure_count: core.failure_count,
            consecutive_opens: core.consecutive_opens,
            total_calls: core.counters.total_calls,
            successes: core.counters.successes,
            failures: core.counters.failures,
            rejections: core.counters.rejections,
            transitions_to_open: core.counters.transitions_to_open,
            transitions_to_half_open: core.counters.transitions_to_half_open,
            transitions_to_closed: core.counters.transitions_to_closed,
            time_in_closed_sec: closed.as_secs_f64(),
            time_in_open_sec: open.as_secs_f64(),
            time_in_half_open_sec: half_open.as_secs_f64(),
            effective_recovery_timeout_sec: core.effective_recovery_timeout.as_secs_f64(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self) -> Admission {
        let mut core = self.lock();
        match core.state {
            BreakerState::Closed => {
                core.counters.total_calls += 1;
                Admission::Normal
            }
            BreakerState::Open => {
                let elapsed = core
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or_default();
                if elapsed >= core.effective_recovery_timeout {
                    info!(breaker = %self.name, "circuit breaker moving to HALF_OPEN");
                    core.counters.transitions_to_half_open += 1;
                    core.enter_state(BreakerState::HalfOpen);
                    core.half_open_in_flight = 1;
                    core.counters.total_calls += 1;
                    Admission::Trial
                } else {
                    core.counters.rejections += 1;
                    debug!(breaker = %self.name, "circuit breaker OPEN, rejecting call");
                    Admission::Rejected {
                        retry_after: core.effective_recovery_timeout.saturating_sub(elapsed),
                    }
                }
            }
            BreakerState::HalfOpen => {
                if core.half_open_in_flight < self.settings.half_open_max_in_flight {
                    core.half_open_in_flight += 1;
                    core.counters.total_calls += 1;
                    debug!(
                        breaker = %self.name,
                        in_flight = core.half_open_in_flight,
                        "circuit breaker HALF_OPEN, admitting trial call"
                    );
                    Admission::Trial
                } else {
                    core.counters.rejections += 1;
                    Admission::Rejected {
                        retry_after: HALF_OPEN_RETRY_AFTER,
                    }
                }
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut core = self.lock();
        core.counters.successes += 1;
        if trial {
            core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
        }
        match core.state {
            BreakerState::HalfOpen => {
                info!(breaker = %self.name, "trial call succeeded, closing circuit breaker");
                core.counters.transitions_to_closed += 1;
                core.enter_state(BreakerState::Closed);
                core.failure_count = 0;
                core.consecutive_opens = 0;
                core.half_open_in_flight = 0;
                core.last_failure_time = None;
                core.effective_recovery_timeout = self.settings.recovery_timeout;
            }
            BreakerState::Closed => {
                core.failure_count = 0;
            }
            BreakerState::Open => {
                // A pre-open in-flight call finished after the breaker
                // opened; opening does not retroactively fail it.
            }
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut core = self.lock();
        core.counters.failures += 1;
        core.failure_count += 1;
        core.last_failure_time = Some(Instant::now());
        if trial {
            core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
        }
        match core.state {
            BreakerState::Closed => {
                if core.failure_count >= self.settings.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = core.failure_count,
                        "failure threshold reached, opening circuit breaker"
                    );
                    self.open_locked(&mut core);
                } else {
                    debug!(
                        breaker = %self.name,
                        failures = core.failure_count,
                        threshold = self.settings.failure_threshold,
                        "counted failure"
                    );
                }
            }
            BreakerState::HalfOpen => {
                warn!(breaker = %self.name, "trial call failed, reopening circuit breaker");
                core.half_open_in_flight = 0;
                self.open_locked(&mut core);
            }
            BreakerState::Open => {
                // Late failure from a call admitted before opening.
            }
        }
    }

    fn on_uncounted(&self, trial: bool) {
        let mut core = self.lock();
        if trial {
            core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Transition to OPEN and advance the adaptive backoff.
    ///
    /// The effective recovery timeout doubles per consecutive open (capped
    /// at 2^6) with ±20% jitter so that a fleet of breakers does not probe
    /// a struggling tool in lockstep.
    fn open_locked(&self, core: &mut Core) {
        let exponent = core.consecutive_opens.min(MAX_BACKOFF_EXPONENT);
        let base = self.settings.recovery_timeout.as_secs_f64() * f64::from(1u32 << exponent);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        let backed_off = Duration::from_secs_f64(base * jitter);
        core.effective_recovery_timeout = backed_off.min(self.settings.max_recovery_timeout);
        core.consecutive_opens += 1;
        core.counters.transitions_to_open += 1;
        core.enter_state(BreakerState::Open);
        info!(
            breaker = %self.name,
            consecutive_opens = core.consecutive_opens,
            recovery_timeout_sec = core.effective_recovery_timeout.as_secs_f64(),
            "circuit breaker OPEN"
        );
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &core.state)
            .field("failure_count", &core.failure_count)
            .finish()
    }
}
