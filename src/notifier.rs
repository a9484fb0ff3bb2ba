// ===============================
// src/notifier.rs (Resilient Notifier)
// ===============================
//
// PUT {base}/orders/{id} {"status":"completed"} behind one circuit breaker
// per target base. The notifier never fails the caller: it returns an
// outcome and logs. Retry (breaker-aware) is a thin optional wrapper.
//
use std::sync::Mutex;
use std::time::Duration;

use ahash::AHashMap as HashMap;
use serde_json::json;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::breaker::{CircuitBreaker, CircuitDecision, CircuitState};
use crate::config::{BreakerConfig, RetryPolicy};
use crate::metrics::{CIRCUIT_STATE, NOTIFY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// order service answered 2xx
    Success,
    /// breaker open, no request made; the status update is lost for this event
    Deferred,
    /// request made and failed (non-2xx, network error or timeout)
    Failed,
}

impl NotifyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyOutcome::Success => "success",
            NotifyOutcome::Deferred => "deferred",
            NotifyOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("order service call timed out")]
    Timeout,
    #[error("order service answered {0}")]
    Status(u16),
    #[error("order service unreachable: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for DownstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DownstreamError::Timeout
        } else {
            DownstreamError::Transport(e.to_string())
        }
    }
}

pub struct ResilientNotifier {
    http: reqwest::Client,
    call_timeout: Duration,
    breaker_cfg: BreakerConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl ResilientNotifier {
    pub fn new(call_timeout: Duration, breaker_cfg: BreakerConfig) -> Self {
        Self::with_client(reqwest::Client::new(), call_timeout, breaker_cfg)
    }

    pub fn with_client(http: reqwest::Client, call_timeout: Duration, breaker_cfg: BreakerConfig) -> Self {
        Self { http, call_timeout, breaker_cfg, breakers: Mutex::new(HashMap::new()) }
    }

    // lock is never held across an await
    fn with_breaker<R>(&self, target: &str, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        let mut map = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        let breaker = map
            .entry(target.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.breaker_cfg.clone()));
        f(breaker)
    }

    /// Current breaker state for `target` (closed if never called).
    pub fn circuit_state(&self, target: &str) -> CircuitState {
        let map = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        map.get(target).map(|b| b.state()).unwrap_or(CircuitState::Closed)
    }

    fn publish_state(target: &str, state: CircuitState) {
        CIRCUIT_STATE.with_label_values(&[target]).set(state.gauge_value());
    }

    pub async fn notify_completed(&self, order_id: i64, target_base: &str) -> NotifyOutcome {
        let (decision, state) = self.with_breaker(target_base, |b| {
            let d = b.pre_call(Instant::now());
            (d, b.state())
        });
        Self::publish_state(target_base, state);
        if decision == CircuitDecision::Reject {
            debug!(order_id, order_service = %target_base, "circuit open, skipping order update");
            NOTIFY.with_label_values(&["deferred"]).inc();
            return NotifyOutcome::Deferred;
        }
        if decision == CircuitDecision::Probe {
            info!(order_id, order_service = %target_base, "circuit half-open, sending trial call");
        }

        let mut pending = PendingCall { notifier: self, target: target_base, decision, settled: false };
        let result = self.put_completed(order_id, target_base).await;
        pending.settle(result.is_ok());

        let outcome = match result {
            Ok(()) => {
                info!(order_id, "order marked as completed in order service");
                NotifyOutcome::Success
            }
            Err(e) => {
                warn!(order_id, error = %e, "failed to update order status");
                NotifyOutcome::Failed
            }
        };
        NOTIFY.with_label_values(&[outcome.as_str()]).inc();
        outcome
    }

    fn record_result(&self, target: &str, decision: CircuitDecision, success: bool) {
        let (before, after) = self.with_breaker(target, |b| {
            let before = b.state();
            b.record(decision, success, Instant::now());
            (before, b.state())
        });
        Self::publish_state(target, after);
        if before != after {
            warn!(order_service = %target, from = before.as_str(), to = after.as_str(), "circuit state changed");
        }
    }

    /// Bounded retry on top of the breaker. Only `Failed` is retried, with
    /// base * 2^(n-1) between attempts; `Deferred` stops immediately.
    pub async fn notify_with_retry(&self, order_id: i64, target_base: &str, policy: &RetryPolicy) -> NotifyOutcome {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self.notify_completed(order_id, target_base).await;
            if outcome != NotifyOutcome::Failed || attempt >= max_attempts {
                if outcome == NotifyOutcome::Failed {
                    warn!(order_id, attempts = attempt, "giving up on order status update");
                }
                return outcome;
            }
            let wait = policy.base_delay.saturating_mul(1u32 << (attempt - 1).min(16));
            debug!(order_id, attempt, wait_ms = wait.as_millis() as u64, "retrying order status update");
            sleep(wait).await;
        }
    }

    async fn put_completed(&self, order_id: i64, target_base: &str) -> Result<(), DownstreamError> {
        let url = format!("{}/orders/{}", target_base.trim_end_matches('/'), order_id);
        let rsp = self
            .http
            .put(url)
            .json(&json!({ "status": "completed" }))
            .timeout(self.call_timeout)
            .send()
            .await?;

        if rsp.status().is_success() {
            Ok(())
        } else {
            Err(DownstreamError::Status(rsp.status().as_u16()))
        }
    }
}

/// A call admitted by the breaker. Dropping it unsettled (the caller's
/// future was cancelled mid-request) records a failure, so a half-open
/// trial can never stay in flight forever.
struct PendingCall<'a> {
    notifier: &'a ResilientNotifier,
    target: &'a str,
    decision: CircuitDecision,
    settled: bool,
}

impl PendingCall<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.notifier.record_result(self.target, self.decision, success);
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(order_service = %self.target, "order update cancelled in flight, counting as failure");
            self.notifier.record_result(self.target, self.decision, false);
        }
    }
}
