use std::time::{Duration, Instant};

use crate::types::CircuitState;

/// Failure-counting circuit breaker. Pure state machine: the caller supplies
/// the clock, so tests never sleep.
///
/// Closed until `threshold` consecutive failures, then open for `cooldown`.
/// After the cooldown one probe call is allowed through (half-open); its
/// outcome decides whether the circuit closes again or re-opens.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }

    pub fn state(&self, now: Instant) -> CircuitState {
        match self.opened_at {
            None => CircuitState::Closed,
            Some(at) if now.duration_since(at) >= self.cooldown => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }

    /// Whether a call may proceed right now. In the half-open window only the
    /// first caller gets through; the rest are rejected until the probe
    /// resolves.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.state(now) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.probe_in_flight = false;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures += 1;
        self.probe_in_flight = false;
        if self.opened_at.is_some() {
            // Failed probe: restart the cooldown from now.
            self.opened_at = Some(now);
        } else if self.consecutive_failures >= self.threshold {
            self.opened_at = Some(now);
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
