// ===============================
// src/main.rs
// ===============================
/*
 cd /home/kukuhtw/rust/payment_svc_rust

 # liveness / readiness
curl -s localhost:3004/health
curl -si localhost:3004/ready | head -1

# payments & counters
curl -s localhost:3004/payments
curl -s localhost:3004/metrics | egrep '^(payments_total|order_events_total|order_notify_total)'

*/
/*
=============================================================================
Project : payment_svc_rust — resilient order-to-payment consumer in Rust
Module  : <module_name>.rs
Version : 0.5.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Consumes order events from RabbitMQ, records payments in an
          in-memory ledger, marks orders completed on the order service
          behind a circuit breaker, and exposes health/readiness,
          payments and Prometheus metrics over HTTP.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use payment_svc_rust::{
    broker::{AmqpBroker, Topology},
    config,
    connection::ConnectionManager,
    consumer::OrderEventConsumer,
    domain::AmountPolicy,
    health::HealthReporter,
    http::{self, AppContext},
    ledger::PaymentLedger,
    metrics,
    notifier::ResilientNotifier,
    supervisor::{self, SupervisorCfg},
};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // ---- Load config ----
    let (args, res) = config::load();

    // ---- Metrics ----
    metrics::init();

    info!(
        order_service = %args.order_service_base,
        port = args.port,
        exchange = %args.exchange,
        queue = %args.queue,
        connect_max_attempts = res.connect_max_attempts,
        breaker_threshold_pct = res.breaker.error_threshold_pct,
        breaker_volume = res.breaker.volume_threshold,
        breaker_reset_ms = res.breaker.reset_timeout.as_millis() as u64,
        "startup config"
    );

    // ---- Shared components ----
    let ledger = Arc::new(PaymentLedger::new());
    let notifier = Arc::new(ResilientNotifier::new(res.notify_timeout, res.breaker.clone()));
    let manager = Arc::new(ConnectionManager::new(args.rabbit_url.clone(), res.backoff.clone()).with_jitter(250));

    let consumer = Arc::new(OrderEventConsumer::new(
        Arc::clone(&ledger),
        Arc::clone(&notifier),
        AmountPolicy {
            unit_fallback_price: args.unit_fallback_price,
            default_method: args.default_method.clone(),
        },
        args.order_service_base.clone(),
        res.retry.clone(),
    ));

    let health = HealthReporter::new(
        manager.subscribe(),
        Arc::clone(&ledger),
        Arc::clone(&notifier),
        args.order_service_base.clone(),
    );
    let ctx = Arc::new(AppContext { ledger: Arc::clone(&ledger), health });

    // ---- Shutdown flag ----
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ---- HTTP ----
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let http_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = http::serve(addr, ctx, http_shutdown).await {
            // same policy as a failed bind elsewhere: no HTTP, no point running
            error!(error = %e, %addr, "http server failed");
            std::process::exit(1);
        }
    });

    // ---- Broker supervisor (connect -> consume -> reconnect) ----
    let sup_cfg = SupervisorCfg {
        topology: Topology::new(args.exchange.clone(), args.queue.clone()),
        max_attempts: res.connect_max_attempts,
        reconnect_delay: res.backoff.base,
        exhausted_cooldown: res.connect_cooldown,
    };
    let sup = tokio::spawn(supervisor::run(Arc::new(AmqpBroker), manager, consumer, sup_cfg, shutdown_rx));

    // ---- Wait for signal ----
    wait_for_signal().await;
    info!(timeout_s = args.shutdown_timeout.as_secs(), "shutdown requested, draining");
    let _ = shutdown_tx.send(true);

    let drain = async {
        if let Err(e) = sup.await {
            error!(error = %e, "supervisor task failed");
        }
        if let Err(e) = server.await {
            error!(error = %e, "http task failed");
        }
    };
    if tokio::time::timeout(args.shutdown_timeout, drain).await.is_err() {
        error!("graceful shutdown timed out, forcing exit");
        std::process::exit(1);
    }
    info!("bye");
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
                return;
            }
            Err(e) => warn!(error = %e, "SIGTERM handler unavailable, ctrl-c only"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "ctrl-c handler failed");
        // tanpa handler sinyal, tetap jalan sampai di-kill
        std::future::pending::<()>().await;
    }
}
