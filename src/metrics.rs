// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Ledger --------
pub static PAYMENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("payments_total", "Total number of payments"),
        &["status"],
    )
    .unwrap()
});

pub static PAYMENTS_AMOUNT: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new("payments_amount_total", "Total amount of payments").unwrap()
});

// -------- Consumer / notifier --------
pub static ORDER_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "order_events_total",
            "order events by outcome (processed, duplicate, poison, requeued)",
        ),
        &["outcome"],
    )
    .unwrap()
});

pub static NOTIFY: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("order_notify_total", "order-completed notifications by outcome"),
        &["outcome"],
    )
    .unwrap()
});

pub static CIRCUIT_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "order_service_circuit_state",
            "breaker state per target: 0 closed, 1 open, 2 half-open",
        ),
        &["target"],
    )
    .unwrap()
});

// -------- Broker link health --------
pub static BROKER_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("broker_connected", "1 if the AMQP connection is up, 0 otherwise").unwrap()
});

pub static BROKER_CONNECT_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("broker_connect_failures_total", "failed broker dial attempts").unwrap()
});

pub static BROKER_CONNECT_CYCLES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("broker_connect_cycles_total", "connect cycles started").unwrap()
});

// -------- HTTP --------
pub static HTTP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "Duration of HTTP requests in seconds",
        ),
        &["method", "route", "status_code"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry; re-registration is ignored
    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(PAYMENTS.clone()),
        Box::new(PAYMENTS_AMOUNT.clone()),
        Box::new(ORDER_EVENTS.clone()),
        Box::new(NOTIFY.clone()),
        Box::new(CIRCUIT_STATE.clone()),
        Box::new(BROKER_CONNECTED.clone()),
        Box::new(BROKER_CONNECT_FAILURES.clone()),
        Box::new(BROKER_CONNECT_CYCLES.clone()),
        Box::new(HTTP_DURATION.clone()),
    ];
    for c in collectors {
        let _ = REGISTRY.register(c);
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}
