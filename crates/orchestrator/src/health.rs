//! Post-apply readiness polling
//!
//! # Phases
//!
//! ```text
//! Pending
//!    ↓  (predicate issued immediately)
//! Polling ──→ Ready      predicate returned true
//!    │
//!    ├──────→ TimedOut   deadline passed without success
//!    ├──────→ Error      predicate itself failed
//!    └──────→ Interrupted  run cancelled while waiting
//! ```
//!
//! Only `Ready` lets the executor record the module as applied.

use crate::cancel::CancelToken;
use crate::context::{ApplyContext, ExecutionObserver};
use crate::error::{ExecutionError, ExecutionErrorKind, HealthCheckError};
use crate::module::{HealthCheck, Module};
use std::fmt;
use std::time::{Duration, Instant};

/// Health check state machine phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthPhase {
    /// Apply succeeded, nothing polled yet
    Pending,
    /// Predicate is being polled
    Polling,
    /// Predicate returned true (terminal)
    Ready,
    /// Deadline passed (terminal)
    TimedOut,
    /// Predicate failed to run (terminal)
    Error { message: String },
    /// Cancelled while waiting (terminal)
    Interrupted,
}

impl HealthPhase {
    /// Returns true for phases that end polling
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Polling)
    }
}

impl fmt::Display for HealthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Polling => write!(f, "polling"),
            Self::Ready => write!(f, "ready"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Error { message } => write!(f, "error: {message}"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Result of waiting for a module to become healthy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthOutcome {
    /// Terminal phase reached
    pub phase: HealthPhase,
    /// Number of predicate invocations
    pub polls: u32,
    /// Time spent from the first poll to the terminal phase
    pub waited: Duration,
}

impl HealthOutcome {
    /// Check if the module became ready
    pub fn is_ready(&self) -> bool {
        self.phase == HealthPhase::Ready
    }

    /// Convert a non-ready outcome into its error
    pub fn into_result(self) -> Result<(), HealthCheckError> {
        match self.phase {
            HealthPhase::Ready => Ok(()),
            HealthPhase::Error { message } => Err(HealthCheckError::Probe { message }),
            HealthPhase::Interrupted => Err(HealthCheckError::Interrupted),
            HealthPhase::Pending | HealthPhase::Polling | HealthPhase::TimedOut => {
                Err(HealthCheckError::TimedOut {
                    waited: self.waited,
                    polls: self.polls,
                })
            }
        }
    }
}

/// A predicate killed at the shared deadline ran out of time; anything
/// else is a broken probe
fn probe_failed(error: &ExecutionError) -> HealthPhase {
    if error.kind() == ExecutionErrorKind::Timeout {
        HealthPhase::TimedOut
    } else {
        HealthPhase::Error {
            message: error.message().to_string(),
        }
    }
}

/// Polls a module's readiness predicate with a bounded wait
pub struct HealthChecker<'a> {
    cancel: &'a CancelToken,
}

impl<'a> HealthChecker<'a> {
    /// Create a checker that stops waiting when `cancel` fires
    pub fn new(cancel: &'a CancelToken) -> Self {
        Self { cancel }
    }

    /// Poll until the module is ready or a terminal phase is reached
    pub fn wait(
        &self,
        module: &dyn Module,
        ctx: &ApplyContext,
        spec: HealthCheck,
        observer: &mut dyn ExecutionObserver,
    ) -> HealthOutcome {
        let name = module.name();
        let started = Instant::now();
        let deadline = started.checked_add(spec.timeout);
        let mut phase = HealthPhase::Pending;
        let mut polls = 0;

        log::debug!(
            "Health check for {name}: timeout {}s, interval {}s",
            spec.timeout.as_secs(),
            spec.interval.as_secs()
        );

        while !phase.is_terminal() {
            phase = HealthPhase::Polling;
            polls += 1;

            match module.check_health(ctx) {
                Ok(true) => {
                    phase = HealthPhase::Ready;
                    continue;
                }
                Ok(false) => {}
                Err(_) if self.cancel.is_cancelled() => {
                    phase = HealthPhase::Interrupted;
                    continue;
                }
                Err(e) => {
                    log::warn!("Health probe for {name} failed: {e}");
                    phase = probe_failed(&e);
                    continue;
                }
            }

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                phase = HealthPhase::TimedOut;
                continue;
            }

            observer.on_health_wait(name, polls, started.elapsed());
            let pause = deadline.map_or(spec.interval, |d| spec.interval.min(d - now));
            if !self.cancel.sleep(pause) {
                phase = HealthPhase::Interrupted;
            } else if pause < spec.interval && deadline.is_some_and(|d| Instant::now() >= d) {
                // Deadline reached mid-interval: one last poll, then give up
                polls += 1;
                phase = match module.check_health(ctx) {
                    Ok(true) => HealthPhase::Ready,
                    Ok(false) => HealthPhase::TimedOut,
                    Err(e) => probe_failed(&e),
                };
            }
        }

        let outcome = HealthOutcome {
            phase,
            polls,
            waited: started.elapsed(),
        };
        log::info!(
            "Health check for {name} ended {} after {} poll(s)",
            outcome.phase,
            outcome.polls
        );
        outcome
    }
}
