// ===============================
// src/http.rs (operator HTTP surface)
// ===============================
//
// GET  /health    liveness + broker/ledger/breaker snapshot, always 200
// GET  /ready     200 {ready:true} if broker connected, else 503
// GET  /payments  ledger snapshot
// POST /payments  append (same ledger path as the broker consumer), body <= 64 KiB
// GET  /metrics   Prometheus text
//
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use hyper::body::HttpBody;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::domain::PaymentStatus;
use crate::health::HealthReporter;
use crate::ledger::{Appended, PaymentLedger};
use crate::metrics::{self, HTTP_DURATION};

/// Largest accepted `POST /payments` body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

pub struct AppContext {
    pub ledger: Arc<PaymentLedger>,
    pub health: HealthReporter,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AmountField {
    Num(f64),
    Text(String),
}

impl AmountField {
    fn value(&self) -> Option<f64> {
        match self {
            AmountField::Num(n) => Some(*n),
            AmountField::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NewPayment {
    order_id: Option<i64>,
    amount: Option<AmountField>,
    status: Option<String>,
    method: Option<String>,
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(b) => (status, b),
        Err(e) => {
            warn!(error = %e, "response serialize failed");
            (StatusCode::INTERNAL_SERVER_ERROR, br#"{"error":"internal error"}"#.to_vec())
        }
    };
    let mut resp = Response::new(Body::from(bytes));
    *resp.status_mut() = status;
    resp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

fn error_response(status: StatusCode, msg: &str) -> Response<Body> {
    json_response(status, &json!({ "error": msg }))
}

fn metrics_response() -> Response<Body> {
    let mut resp = Response::new(Body::from(metrics::encode_metrics()));
    if let Ok(v) = HeaderValue::from_str(&metrics::content_type()) {
        resp.headers_mut().insert(CONTENT_TYPE, v);
    }
    resp
}

enum BodyError {
    TooLarge,
    Read(hyper::Error),
}

// buffer at most `limit` bytes; bail out as soon as the body grows past it
async fn read_limited(req: Request<Body>, limit: usize) -> Result<Vec<u8>, BodyError> {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.map_or(false, |n| n > limit as u64) {
        return Err(BodyError::TooLarge);
    }

    let mut body = req.into_body();
    let mut buf = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(BodyError::Read)?;
        if buf.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

async fn create_payment(req: Request<Body>, ctx: &AppContext) -> Response<Body> {
    let bytes = match read_limited(req, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(BodyError::TooLarge) => return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large"),
        Err(BodyError::Read(e)) => return error_response(StatusCode::BAD_REQUEST, &format!("unreadable body: {e}")),
    };
    let input: NewPayment = match serde_json::from_slice(&bytes) {
        Ok(p) => p,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid JSON body"),
    };

    let (Some(order_id), Some(amount), Some(status), Some(method)) =
        (input.order_id, input.amount, input.status, input.method.filter(|m| !m.trim().is_empty()))
    else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing required fields: order_id, amount, status, method",
        );
    };
    let amount = match amount.value() {
        Some(a) if a.is_finite() && a > 0.0 => a,
        _ => return error_response(StatusCode::BAD_REQUEST, "amount must be a positive number"),
    };
    let Some(status) = PaymentStatus::parse(&status) else {
        return error_response(StatusCode::BAD_REQUEST, "status must be pending or completed");
    };

    match ctx.ledger.append(order_id, amount, method.trim(), status) {
        Appended::New(rec) => {
            info!(order_id, payment_id = rec.id, "payment recorded via http");
            json_response(StatusCode::CREATED, &rec)
        }
        Appended::Existing(rec) => json_response(
            StatusCode::CONFLICT,
            &json!({ "error": "payment already recorded for order", "payment": rec }),
        ),
    }
}

/// Route one request. Public so tests can drive it without a socket.
pub async fn handle(req: Request<Body>, ctx: &AppContext) -> Response<Body> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let (route, resp) = match (&method, path.as_str()) {
        (&Method::GET, "/health") => ("/health", json_response(StatusCode::OK, &ctx.health.liveness())),
        (&Method::GET, "/ready") => {
            let r = ctx.health.readiness();
            let code = if r.ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
            ("/ready", json_response(code, &r))
        }
        (&Method::GET, "/payments") => ("/payments", json_response(StatusCode::OK, &ctx.ledger.all())),
        (&Method::POST, "/payments") => ("/payments", create_payment(req, ctx).await),
        (&Method::GET, "/metrics") => ("/metrics", metrics_response()),
        (_, "/health" | "/ready" | "/payments" | "/metrics") => {
            ("unmatched", error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"))
        }
        _ => ("unmatched", error_response(StatusCode::NOT_FOUND, "not found")),
    };

    HTTP_DURATION
        .with_label_values(&[method.as_str(), route, resp.status().as_str()])
        .observe(started.elapsed().as_secs_f64());
    resp
}

/// Serve until the shutdown flag flips to true, then drain in-flight requests.
pub async fn serve(
    addr: SocketAddr,
    ctx: Arc<AppContext>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |_conn| {
        let ctx = Arc::clone(&ctx);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let ctx = Arc::clone(&ctx);
                async move { Ok::<_, Infallible>(handle(req, &ctx).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!(%addr, "payment service listening (try GET /health)");
    server
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}
