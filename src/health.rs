// ===============================
// src/health.rs (Health Reporter)
// ===============================
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;

use crate::breaker::CircuitState;
use crate::connection::ConnectionState;
use crate::domain::PaymentStatus;
use crate::ledger::PaymentLedger;
use crate::notifier::ResilientNotifier;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerHealth {
    pub connected: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentsHealth {
    pub total: usize,
    pub completed: usize,
}

#[derive(Debug, Serialize)]
pub struct OrderServiceHealth {
    pub target: String,
    pub circuit: CircuitState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: String,
    pub uptime: f64,
    pub rabbitmq: BrokerHealth,
    pub payments: PaymentsHealth,
    pub order_service: OrderServiceHealth,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Readiness {
    pub ready: bool,
}

#[derive(Clone)]
pub struct HealthReporter {
    link: watch::Receiver<ConnectionState>,
    ledger: Arc<PaymentLedger>,
    notifier: Arc<ResilientNotifier>,
    order_service_base: String,
    started: Instant,
}

impl HealthReporter {
    pub fn new(
        link: watch::Receiver<ConnectionState>,
        ledger: Arc<PaymentLedger>,
        notifier: Arc<ResilientNotifier>,
        order_service_base: impl Into<String>,
    ) -> Self {
        Self { link, ledger, notifier, order_service_base: order_service_base.into(), started: Instant::now() }
    }

    /// Process-alive check: if we can answer, we are live.
    pub fn liveness(&self) -> HealthReport {
        let link = self.link.borrow().clone();
        HealthReport {
            status: "ok",
            timestamp: Utc::now().to_rfc3339(),
            uptime: self.started.elapsed().as_secs_f64(),
            rabbitmq: BrokerHealth {
                connected: link.connected,
                attempts: link.attempts,
                last_error: link.last_error,
            },
            payments: PaymentsHealth {
                total: self.ledger.len(),
                completed: self.ledger.count_by_status(PaymentStatus::Completed),
            },
            order_service: OrderServiceHealth {
                target: self.order_service_base.clone(),
                circuit: self.notifier.circuit_state(&self.order_service_base),
            },
        }
    }

    /// Ready iff the broker link is up right now.
    pub fn readiness(&self) -> Readiness {
        Readiness { ready: self.link.borrow().connected }
    }
}
