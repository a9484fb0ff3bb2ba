// Stub order service for integration tests: answers PUT /orders/{id} with a
// scripted sequence of status codes and records every request it sees.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub body: serde_json::Value,
}

#[derive(Default)]
struct Script {
    statuses: VecDeque<u16>,
    fallback: u16,
    delay: Option<Duration>,
    seen: Vec<SeenRequest>,
}

#[derive(Clone)]
pub struct StubOrderService {
    pub base: String,
    script: Arc<Mutex<Script>>,
}

impl StubOrderService {
    /// Every request answered with `status` unless scripted otherwise.
    pub async fn start(status: u16) -> Self {
        let script = Arc::new(Mutex::new(Script { fallback: status, ..Default::default() }));
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");

        let shared = Arc::clone(&script);
        let make_svc = make_service_fn(move |_| {
            let shared = Arc::clone(&shared);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let shared = Arc::clone(&shared);
                    async move { Ok::<_, Infallible>(answer(req, shared).await) }
                }))
            }
        });
        let server = Server::from_tcp(listener).expect("stub server").serve(make_svc);
        tokio::spawn(server);

        Self { base: format!("http://{addr}"), script }
    }

    pub fn push_statuses(&self, codes: &[u16]) {
        self.script.lock().unwrap().statuses.extend(codes.iter().copied());
    }

    pub fn set_fallback(&self, code: u16) {
        self.script.lock().unwrap().fallback = code;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.script.lock().unwrap().delay = delay;
    }

    pub fn hits(&self) -> usize {
        self.script.lock().unwrap().seen.len()
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.script.lock().unwrap().seen.clone()
    }
}

async fn answer(req: Request<Body>, script: Arc<Mutex<Script>>) -> Response<Body> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let bytes = hyper::body::to_bytes(req.into_body()).await.unwrap_or_default();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);

    let (code, delay) = {
        let mut s = script.lock().unwrap();
        s.seen.push(SeenRequest { method, path, body });
        let code = s.statuses.pop_front().unwrap_or(s.fallback);
        (code, s.delay)
    };
    if let Some(d) = delay {
        tokio::time::sleep(d).await;
    }

    let mut resp = Response::new(Body::from(r#"{"ok":true}"#));
    *resp.status_mut() = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    resp
}
