// ===============================
// src/breaker.rs (circuit breaker per downstream target)
// ===============================
//
// closed    : calls pass, outcomes go into a rolling time window. Trips when
//             samples >= volume_threshold and failure% >= error_threshold.
// open      : calls rejected without I/O until reset_timeout elapses.
// half-open : exactly one trial call; success -> closed, failure -> open.
//
// Pure state machine: the caller passes `now`, so tests drive time directly.
//
use std::collections::VecDeque;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
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
            CircuitState::HalfOpen => "half-open",
        }
    }

    pub fn gauge_value(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    Allow,
    Probe,
    Reject,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    cfg: BreakerConfig,
    state: CircuitState,
    // (at, failed)
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(cfg: BreakerConfig) -> Self {
        Self { cfg, state: CircuitState::Closed, window: VecDeque::new(), opened_at: None, trial_in_flight: false }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn pre_call(&mut self, now: Instant) -> CircuitDecision {
        match self.state {
            CircuitState::Closed => CircuitDecision::Allow,
            CircuitState::Open => {
                let cooled = self.opened_at.map_or(true, |t| now >= t + self.cfg.reset_timeout);
                if cooled {
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                    CircuitDecision::Probe
                } else {
                    CircuitDecision::Reject
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    CircuitDecision::Reject
                } else {
                    self.trial_in_flight = true;
                    CircuitDecision::Probe
                }
            }
        }
    }

    /// Feed back the outcome of a call admitted by `pre_call`.
    pub fn record(&mut self, decision: CircuitDecision, success: bool, now: Instant) {
        match (self.state, decision) {
            (CircuitState::HalfOpen, CircuitDecision::Probe) => {
                self.trial_in_flight = false;
                if success {
                    self.close();
                } else {
                    self.trip(now);
                }
            }
            (CircuitState::Closed, CircuitDecision::Allow) => {
                self.window.push_back((now, !success));
                self.prune(now);
                if self.should_trip() {
                    self.trip(now);
                }
            }
            // late result of a call admitted under an older state
            _ => {}
        }
    }

    /// Failure percentage over the current window (0 when empty).
    pub fn failure_pct(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failed = self.window.iter().filter(|(_, f)| *f).count();
        failed as f64 * 100.0 / self.window.len() as f64
    }

    pub fn samples(&self) -> usize {
        self.window.len()
    }

    fn should_trip(&self) -> bool {
        self.window.len() >= self.cfg.volume_threshold && self.failure_pct() >= self.cfg.error_threshold_pct
    }

    fn prune(&mut self, now: Instant) {
        while let Some((at, _)) = self.window.front() {
            if now.saturating_duration_since(*at) > self.cfg.rolling_window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn trip(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.window.clear();
        self.trial_in_flight = false;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.window.clear();
    }
}
