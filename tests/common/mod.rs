//! In-process DriftQ broker for integration tests.
#![allow(dead_code)]

use driftq_client::{
    AckRequest, ClientConfig, DeliveredMessage, DriftqClient, NackRequest, ProduceRequest,
    RetryConfig,
};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use warp::http::StatusCode;
use warp::{Filter, Reply};

#[derive(Default)]
pub struct BrokerState {
    line_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    line_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    attempts: Mutex<HashMap<(u32, u64), u32>>,

    pub acks: Mutex<Vec<AckRequest>>,
    pub nacks: Mutex<Vec<NackRequest>>,
    pub consume_queries: Mutex<Vec<HashMap<String, String>>>,
    pub produce_keys: Mutex<Vec<Option<String>>>,

    pub healthz_calls: AtomicU32,
    pub produce_calls: AtomicU32,
    healthz_failures: AtomicU32,
    produce_failures: AtomicU32,
    healthz_delay: Mutex<Duration>,
    consume_status: Mutex<Option<u16>>,
    redeliver: Mutex<bool>,
    close_after: Mutex<Option<usize>>,
}

impl BrokerState {
    fn send_line(&self, line: String) {
        if let Some(tx) = self.line_tx.lock().unwrap().as_ref() {
            let _ = tx.send(line);
        }
    }

    fn deliver(&self, msg: &DeliveredMessage) {
        self.attempts
            .lock()
            .unwrap()
            .insert((msg.partition, msg.offset), msg.attempts);
        self.send_line(serde_json::to_string(msg).unwrap());
    }

    fn settle(&self) {
        let outcomes = self.acks.lock().unwrap().len() + self.nacks.lock().unwrap().len();
        let limit = *self.close_after.lock().unwrap();
        if limit.map_or(false, |n| outcomes >= n) {
            self.line_tx.lock().unwrap().take();
        }
    }
}

pub struct MockBroker {
    pub addr: SocketAddr,
    pub state: Arc<BrokerState>,
}

fn error_reply(status: StatusCode, code: &str, message: &str) -> warp::reply::Response {
    let body = warp::reply::json(&serde_json::json!({ "error": code, "message": message }));
    let reply = warp::reply::with_status(body, status);
    warp::reply::with_header(reply, "Retry-After", "0").into_response()
}

async fn consume(
    query: HashMap<String, String>,
    state: Arc<BrokerState>,
) -> Result<warp::reply::Response, Infallible> {
    state.consume_queries.lock().unwrap().push(query);

    if let Some(status) = *state.consume_status.lock().unwrap() {
        let status = StatusCode::from_u16(status).unwrap();
        return Ok(error_reply(status, "lease_conflict", "group is owned elsewhere"));
    }

    let rx = state.line_rx.lock().unwrap().take();
    let Some(rx) = rx else {
        return Ok(error_reply(StatusCode::CONFLICT, "busy", "stream already open"));
    };

    let lines = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|line| (Ok::<_, Infallible>(format!("{}\n", line)), rx))
    });
    let response = warp::http::Response::builder()
        .header("content-type", "application/x-ndjson")
        .body(warp::hyper::Body::wrap_stream(lines))
        .unwrap();
    Ok(response)
}

async fn ack(req: AckRequest, state: Arc<BrokerState>) -> Result<warp::reply::Response, Infallible> {
    state.acks.lock().unwrap().push(req);
    state.settle();
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn nack(req: NackRequest, state: Arc<BrokerState>) -> Result<warp::reply::Response, Infallible> {
    state.nacks.lock().unwrap().push(req.clone());
    if *state.redeliver.lock().unwrap() {
        let attempts = state
            .attempts
            .lock()
            .unwrap()
            .get(&(req.partition, req.offset))
            .copied()
            .unwrap_or(1);
        let redelivery = DeliveredMessage {
            attempts: attempts + 1,
            last_error: req.reason.clone(),
            ..message(req.partition, req.offset)
        };
        state.deliver(&redelivery);
    }
    state.settle();
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn produce(
    key: Option<String>,
    req: ProduceRequest,
    state: Arc<BrokerState>,
) -> Result<warp::reply::Response, Infallible> {
    state.produce_calls.fetch_add(1, Ordering::SeqCst);
    state.produce_keys.lock().unwrap().push(key);

    if take_failure(&state.produce_failures) {
        return Ok(error_reply(StatusCode::SERVICE_UNAVAILABLE, "unavailable", "try again"));
    }
    let body = serde_json::json!({ "status": "produced", "topic": req.topic });
    Ok(warp::reply::json(&body).into_response())
}

async fn healthz(state: Arc<BrokerState>) -> Result<warp::reply::Response, Infallible> {
    state.healthz_calls.fetch_add(1, Ordering::SeqCst);

    let delay = *state.healthz_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    if take_failure(&state.healthz_failures) {
        return Ok(error_reply(StatusCode::SERVICE_UNAVAILABLE, "unavailable", "warming up"));
    }
    Ok(warp::reply::json(&serde_json::json!({ "status": "ok" })).into_response())
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MockBroker {
    pub async fn start() -> Self {
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let state = Arc::new(BrokerState {
            line_tx: Mutex::new(Some(line_tx)),
            line_rx: Mutex::new(Some(line_rx)),
            ..Default::default()
        });

        let with_state = {
            let state = state.clone();
            warp::any().map(move || state.clone())
        };

        let consume_route = warp::path!("v1" / "consume")
            .and(warp::get())
            .and(warp::query::<HashMap<String, String>>())
            .and(with_state.clone())
            .and_then(consume);
        let ack_route = warp::path!("v1" / "ack")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_state.clone())
            .and_then(ack);
        let nack_route = warp::path!("v1" / "nack")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_state.clone())
            .and_then(nack);
        let produce_route = warp::path!("v1" / "produce")
            .and(warp::post())
            .and(warp::header::optional::<String>("idempotency-key"))
            .and(warp::body::json())
            .and(with_state.clone())
            .and_then(produce);
        let healthz_route = warp::path!("v1" / "healthz")
            .and(warp::get())
            .and(with_state)
            .and_then(healthz);
        let version_route = warp::path!("v1" / "version").and(warp::get()).map(|| {
            warp::reply::json(&serde_json::json!({
                "version": "1.4.0",
                "commit": "9f2c1ab",
                "wal_enabled": true
            }))
        });

        let routes = consume_route
            .or(ack_route)
            .or(nack_route)
            .or(produce_route)
            .or(healthz_route)
            .or(version_route);

        let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client config with fast retries
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.url()).with_retry(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        })
    }

    pub fn client(&self) -> DriftqClient {
        DriftqClient::new(self.config()).unwrap()
    }

    pub fn push(&self, msg: &DeliveredMessage) {
        self.state.deliver(msg);
    }

    /// Push a line verbatim; a newline is appended
    pub fn push_raw(&self, line: &str) {
        self.state.send_line(line.to_string());
    }

    /// End the consume stream cleanly
    pub fn close_stream(&self) {
        self.state.line_tx.lock().unwrap().take();
    }

    /// End the consume stream once `n` acks and nacks have arrived in total
    pub fn close_after(&self, n: usize) {
        *self.state.close_after.lock().unwrap() = Some(n);
    }

    /// Nacked messages come back with `attempts + 1` and the reason as `last_error`
    pub fn redeliver_on_nack(&self) {
        *self.state.redeliver.lock().unwrap() = true;
    }

    pub fn fail_healthz(&self, times: u32) {
        self.state.healthz_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_produce(&self, times: u32) {
        self.state.produce_failures.store(times, Ordering::SeqCst);
    }

    pub fn delay_healthz(&self, delay: Duration) {
        *self.state.healthz_delay.lock().unwrap() = delay;
    }

    pub fn reject_consume(&self, status: u16) {
        *self.state.consume_status.lock().unwrap() = Some(status);
    }

    pub fn acks(&self) -> Vec<AckRequest> {
        self.state.acks.lock().unwrap().clone()
    }

    pub fn nacks(&self) -> Vec<NackRequest> {
        self.state.nacks.lock().unwrap().clone()
    }

    pub fn consume_queries(&self) -> Vec<HashMap<String, String>> {
        self.state.consume_queries.lock().unwrap().clone()
    }

    pub fn produce_keys(&self) -> Vec<Option<String>> {
        self.state.produce_keys.lock().unwrap().clone()
    }

    pub fn healthz_calls(&self) -> u32 {
        self.state.healthz_calls.load(Ordering::SeqCst)
    }

    pub fn produce_calls(&self) -> u32 {
        self.state.produce_calls.load(Ordering::SeqCst)
    }
}

pub fn message(partition: u32, offset: u64) -> DeliveredMessage {
    DeliveredMessage {
        partition,
        offset,
        value: format!("value-{}-{}", partition, offset),
        ..Default::default()
    }
}
