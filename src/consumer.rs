// ===============================
// src/consumer.rs (Order-Event Consumer)
// ===============================
//
// Per message:
//   received -> parsed -> ledgered -> notified -> acknowledged
//   received -> parse-failed -> acknowledged         (poison, dropped)
// Anything unexpected after a good parse -> nack + requeue. Redelivery is
// safe because the ledger is idempotent by order_id; it only re-sends the
// order update.
//
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::broker::{Disposition, Inbound, TransportError};
use crate::config::RetryPolicy;
use crate::domain::{AmountPolicy, OrderEvent, PaymentStatus};
use crate::ledger::PaymentLedger;
use crate::metrics::ORDER_EVENTS;
use crate::notifier::{NotifyOutcome, ResilientNotifier};

/// Result of handling one message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    Processed { payment_id: u64, notify: NotifyOutcome },
    /// redelivery: no second payment, but the order update is sent again
    Duplicate { payment_id: u64, notify: NotifyOutcome },
    Poison(String),
}

impl Handled {
    pub fn disposition(&self) -> Disposition {
        // poison is acked too: it can never be parsed, redelivery would loop
        Disposition::Ack
    }

    fn label(&self) -> &'static str {
        match self {
            Handled::Processed { .. } => "processed",
            Handled::Duplicate { .. } => "duplicate",
            Handled::Poison(_) => "poison",
        }
    }
}

/// Why the run loop returned.
#[derive(Debug)]
pub enum ConsumeEnd {
    Shutdown,
    StreamClosed,
    Transport(TransportError),
}

pub struct OrderEventConsumer {
    ledger: Arc<PaymentLedger>,
    notifier: Arc<ResilientNotifier>,
    pricing: AmountPolicy,
    order_service_base: String,
    retry: RetryPolicy,
}

impl OrderEventConsumer {
    pub fn new(
        ledger: Arc<PaymentLedger>,
        notifier: Arc<ResilientNotifier>,
        pricing: AmountPolicy,
        order_service_base: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self { ledger, notifier, pricing, order_service_base: order_service_base.into(), retry }
    }

    /// Parse, ledger and notify one body. Never fails: downstream trouble is
    /// an outcome, not an error.
    pub async fn handle(&self, body: &[u8]) -> Handled {
        let ev = match OrderEvent::parse(body) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(error = %e, bytes = body.len(), "failed to parse order message, dropping");
                return Handled::Poison(e.to_string());
            }
        };
        info!(order_id = ev.id, "received order for payment");

        let amount = self.pricing.amount_for(&ev);
        let method = self.pricing.method_for(&ev);
        let appended = self.ledger.append(ev.id, amount, method, PaymentStatus::Completed);
        let payment_id = appended.record().id;
        if appended.is_new() {
            let r = appended.record();
            info!(order_id = ev.id, payment_id, amount = r.amount, method = %r.method, "payment recorded");
        } else {
            // the PUT is idempotent, a redelivery is the only chance to retry it
            info!(order_id = ev.id, payment_id, "payment already recorded, re-sending order update");
        }

        let notify = self.notifier.notify_with_retry(ev.id, &self.order_service_base, &self.retry).await;
        if appended.is_new() {
            Handled::Processed { payment_id, notify }
        } else {
            Handled::Duplicate { payment_id, notify }
        }
    }

    /// Consume until shutdown or the stream ends. Strictly one message in
    /// flight: the next one is pulled only after the current one is settled.
    pub async fn run<S, M>(self: Arc<Self>, mut stream: S, mut shutdown: watch::Receiver<bool>) -> ConsumeEnd
    where
        S: Stream<Item = Result<M, TransportError>> + Unpin,
        M: Inbound + 'static,
    {
        loop {
            if *shutdown.borrow() {
                return ConsumeEnd::Shutdown;
            }
            let next = tokio::select! {
                changed = shutdown.changed() => {
                    // sender gone means the process is going down
                    if changed.is_err() {
                        return ConsumeEnd::Shutdown;
                    }
                    continue;
                }
                next = stream.next() => next,
            };
            let msg = match next {
                Some(Ok(m)) => m,
                Some(Err(e)) => {
                    error!(error = %e, "consume stream error");
                    return ConsumeEnd::Transport(e);
                }
                None => return ConsumeEnd::StreamClosed,
            };

            let disposition = self.process(msg.body().to_vec()).await;
            if let Err(e) = msg.settle(disposition).await {
                error!(error = %e, ?disposition, "failed to settle message");
                return ConsumeEnd::Transport(e);
            }
        }
    }

    // Handler runs in its own task so a panic becomes a requeue instead of
    // killing the consumer.
    async fn process(self: &Arc<Self>, body: Vec<u8>) -> Disposition {
        let this = Arc::clone(self);
        match tokio::spawn(async move { this.handle(&body).await }).await {
            Ok(handled) => {
                ORDER_EVENTS.with_label_values(&[handled.label()]).inc();
                handled.disposition()
            }
            Err(e) => {
                error!(error = %e, "error processing payment, requeueing");
                ORDER_EVENTS.with_label_values(&["requeued"]).inc();
                Disposition::Requeue
            }
        }
    }
}
