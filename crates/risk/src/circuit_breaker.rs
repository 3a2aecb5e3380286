//! Circuit breaker gating new entries.
//!
//! Trading is blocked when:
//! - the operator engaged the kill switch
//! - a fatal (authentication) error halted trading until `reset`
//! - consecutive entry failures reached the limit, for the pause duration
//!
//! Closes never consult the breaker.

use parking_lot::RwLock;
use perp_sentinel_core::{BreakerConfig, ExchangeError};
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Default)]
struct CircuitBreakerState {
    consecutive_failures: u32,
    pause_started: Option<Instant>,
    successful_entries: u64,
    failed_entries: u64,
    kill_switch: bool,
    /// Why trading was halted by a fatal error.
    halted: Option<String>,
}

/// Why new entries are not allowed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CircuitBreakerError {
    #[error("kill switch engaged")]
    KillSwitch,

    #[error("trading halted: {reason}")]
    Halted { reason: String },

    #[error("circuit breaker paused after {failures} consecutive failures, {remaining_secs}s remaining")]
    Paused { failures: u32, remaining_secs: u64 },
}

/// Point-in-time view for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub kill_switch: bool,
    pub halted: Option<String>,
    pub consecutive_failures: u32,
    pub paused_for_secs: Option<u64>,
    pub successful_entries: u64,
    pub failed_entries: u64,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    state: RwLock<CircuitBreakerState>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("kill_switch", &state.kill_switch)
            .field("halted", &state.halted)
            .field("consecutive_failures", &state.consecutive_failures)
            .finish()
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CircuitBreakerState::default()),
        }
    }

    /// Checks whether a new entry may be attempted.
    ///
    /// # Errors
    ///
    /// Returns the first blocking condition, in order: kill switch, fatal halt, failure pause.
    pub fn can_trade(&self) -> Result<(), CircuitBreakerError> {
        let state = self.state.read();

        if state.kill_switch {
            return Err(CircuitBreakerError::KillSwitch);
        }
        if let Some(reason) = &state.halted {
            return Err(CircuitBreakerError::Halted {
                reason: reason.clone(),
            });
        }
        if let Some(remaining) = self.remaining(&state) {
            return Err(CircuitBreakerError::Paused {
                failures: state.consecutive_failures,
                remaining_secs: remaining.as_secs(),
            });
        }

        Ok(())
    }

    /// Records a successful entry; clears the failure streak and any pause.
    pub fn record_success(&self) {
        let mut state = self.state.write();
        state.consecutive_failures = 0;
        state.pause_started = None;
        state.successful_entries += 1;
    }

    /// Records a failed entry and starts a pause once the limit is reached.
    ///
    /// After a pause expires one more attempt is allowed; another failure
    /// restarts the pause.
    pub fn record_failure(&self) {
        let mut state = self.state.write();
        state.consecutive_failures += 1;
        state.failed_entries += 1;

        if state.consecutive_failures >= self.config.max_consecutive_failures {
            state.pause_started = Some(Instant::now());
            warn!(
                failures = state.consecutive_failures,
                pause_secs = self.config.pause_secs,
                "Circuit breaker paused new entries"
            );
        }
    }

    /// Classifies an exchange error from an entry attempt.
    ///
    /// Fatal errors halt trading; anything else counts as a failure.
    pub fn record_error(&self, err: &ExchangeError) {
        if err.is_fatal() {
            self.halt(err.to_string());
        } else {
            self.record_failure();
        }
    }

    /// Halts new entries until [`CircuitBreaker::reset`] is called.
    pub fn halt(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(reason = %reason, "Trading halted pending operator reset");
        self.state.write().halted = Some(reason);
    }

    /// Engages or releases the manual kill switch.
    pub fn set_kill_switch(&self, engaged: bool) {
        let mut state = self.state.write();
        if state.kill_switch != engaged {
            info!(engaged, "Kill switch changed");
        }
        state.kill_switch = engaged;
    }

    #[must_use]
    pub fn is_kill_switch_engaged(&self) -> bool {
        self.state.read().kill_switch
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.state.read().halted.is_some()
    }

    /// Clears halts, pauses and counters. The kill switch is left as is.
    pub fn reset(&self) {
        let mut state = self.state.write();
        let kill_switch = state.kill_switch;
        *state = CircuitBreakerState {
            kill_switch,
            ..CircuitBreakerState::default()
        };
        info!("Circuit breaker reset");
    }

    #[must_use]
    pub fn status(&self) -> BreakerStatus {
        let state = self.state.read();
        BreakerStatus {
            kill_switch: state.kill_switch,
            halted: state.halted.clone(),
            consecutive_failures: state.consecutive_failures,
            paused_for_secs: self.remaining(&state).map(|d| d.as_secs()),
            successful_entries: state.successful_entries,
            failed_entries: state.failed_entries,
        }
    }

    fn remaining(&self, state: &CircuitBreakerState) -> Option<Duration> {
        let started = state.pause_started?;
        self.config
            .pause_duration()
            .checked_sub(started.elapsed())
            .filter(|d| !d.is_zero())
    }
}
