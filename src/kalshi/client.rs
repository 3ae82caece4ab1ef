//! Authenticated async client for the Kalshi trade API.
//!
//! Public methods enqueue `(method, path, body, reply)` on a FIFO queue and
//! await the reply. A single background worker drains the queue: it takes
//! one token from the rate limiter, signs, sends, classifies, and retries
//! one request at a time. While a request is in flight nothing else is
//! signed or sent, which keeps rate-limit accounting exact, signing
//! timestamps stable per request, and ordering deterministic.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::Method;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::config::{ConfigError, KalshiConfig};

use super::auth::{
    RequestSigner, SignError, ACCESS_KEY_HEADER, ACCESS_SIGNATURE_HEADER, ACCESS_TIMESTAMP_HEADER,
};
use super::models::{KalshiBalance, KalshiMarket, KalshiOrder, KalshiOrderBook, KalshiPosition};
use super::rate_limit::TokenBucketRateLimiter;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Network/DNS/timeout failure below the HTTP layer. Retryable.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response. Retryable iff 429 or 5xx.
    #[error("Kalshi API HTTP {status}: {payload:?}")]
    Http { status: u16, payload: Option<Value> },

    /// 2xx response whose content signals a rejection (batch item errors).
    #[error("venue rejected the request: {payload}")]
    VenueReject { payload: Value },

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error(transparent)]
    Sign(#[from] SignError),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("response missing field {0:?}")]
    MissingField(&'static str),

    #[error("empty response where a body was expected")]
    EmptyResponse,

    #[error("request worker is gone")]
    WorkerGone,
}

impl ClientError {
    /// Transient per the retry policy: transport failures, 429, and 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Query strings
// ─────────────────────────────────────────────────────────

/// Builds a query string, omitting absent values. Booleans render as
/// `true`/`false`, lists as comma-joined values; key order follows the
/// insertion order.
#[derive(Debug, Default, Clone)]
pub struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opt(mut self, key: &str, value: Option<impl std::fmt::Display>) -> Self {
        if let Some(v) = value {
            self.pairs.push((key.to_string(), v.to_string()));
        }
        self
    }

    pub fn opt_bool(mut self, key: &str, value: Option<bool>) -> Self {
        if let Some(v) = value {
            let rendered = if v { "true" } else { "false" };
            self.pairs.push((key.to_string(), rendered.to_string()));
        }
        self
    }

    pub fn opt_list(mut self, key: &str, values: Option<&[String]>) -> Self {
        if let Some(vs) = values {
            self.pairs.push((key.to_string(), vs.join(",")));
        }
        self
    }

    /// `""` when no pairs were added, else `?`-prefixed urlencoded pairs.
    pub fn build(&self) -> String {
        if self.pairs.is_empty() {
            return String::new();
        }
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.pairs {
            serializer.append_pair(key, value);
        }
        format!("?{}", serializer.finish())
    }
}

// ─────────────────────────────────────────────────────────
// Retry policy
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempt: u32,
    pub base_delay: f64,
    pub backoff_multiplier: f64,
    /// Total retry budget in seconds; surfacing happens as soon as the
    /// elapsed time plus the proposed delay would exceed it.
    pub max_delay: f64,
    pub jitter_fraction: f64,
}

impl RetryPolicy {
    fn from_config(config: &KalshiConfig) -> Self {
        Self {
            max_attempt: config.max_attempt,
            base_delay: config.base_delay,
            backoff_multiplier: config.backoff_multiplier,
            max_delay: config.max_delay,
            jitter_fraction: config.jitter_fraction,
        }
    }

    /// Delay before retry `attempt` (1-based), jitter excluded.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay * self.backoff_multiplier.powi(attempt as i32 - 1);
        Duration::from_secs_f64(delay.max(0.0))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_fraction <= 0.0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=self.jitter_fraction);
        delay + Duration::from_secs_f64(delay.as_secs_f64() * jitter)
    }
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

type ApiResult = Result<Option<Value>, ClientError>;

struct PendingRequest {
    method: Method,
    path: String,
    body: Option<Value>,
    reply: oneshot::Sender<ApiResult>,
}

struct WorkerState {
    // Present until the worker is spawned (lazily, on first request).
    parts: Option<(mpsc::UnboundedReceiver<PendingRequest>, RequestWorker)>,
    handle: Option<JoinHandle<()>>,
}

pub struct KalshiClient {
    tx: mpsc::UnboundedSender<PendingRequest>,
    worker: Mutex<WorkerState>,
    orderbook_depth: u32,
}

impl KalshiClient {
    pub fn new(config: &KalshiConfig) -> Result<Self, ClientError> {
        let signer = RequestSigner::new(&config.api_key, &config.private_key)?;
        let limiter = TokenBucketRateLimiter::new(f64::from(config.rate_limit)).map_err(|e| {
            ClientError::Config(ConfigError::OutOfRange {
                name: "KALSHI_RATE_LIMIT",
                value: e.0.to_string(),
            })
        })?;
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = RequestWorker {
            http,
            signer,
            limiter,
            base_url: config.base_url().to_string(),
            retry: RetryPolicy::from_config(config),
        };

        Ok(Self {
            tx,
            worker: Mutex::new(WorkerState {
                parts: Some((rx, worker)),
                handle: None,
            }),
            orderbook_depth: config.orderbook_depth,
        })
    }

    /// Same client against an arbitrary base URL (tests, demo mirrors).
    pub fn with_base_url(config: &KalshiConfig, base_url: &str) -> Result<Self, ClientError> {
        let client = Self::new(config)?;
        {
            let mut state = client.worker.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((_, worker)) = state.parts.as_mut() {
                worker.base_url = base_url.trim_end_matches('/').to_string();
            }
        }
        Ok(client)
    }

    fn ensure_worker_started(&self) {
        let mut state = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((rx, worker)) = state.parts.take() {
            state.handle = Some(tokio::spawn(worker.run(rx)));
        }
    }

    /// Stop the background worker. In-flight callers observe `WorkerGone`.
    pub fn shutdown(&self) {
        let mut state = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        state.parts = None;
        if let Some(handle) = state.handle.take() {
            handle.abort();
        }
    }

    async fn request(&self, method: Method, path: String, body: Option<Value>) -> ApiResult {
        self.ensure_worker_started();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                method,
                path,
                body,
                reply,
            })
            .map_err(|_| ClientError::WorkerGone)?;
        rx.await.map_err(|_| ClientError::WorkerGone)?
    }

    async fn request_body(&self, method: Method, path: String, body: Option<Value>) -> Result<Value, ClientError> {
        self.request(method, path, body)
            .await?
            .ok_or(ClientError::EmptyResponse)
    }

    // ── Market data ──────────────────────────────────────

    pub async fn get_market(&self, ticker: &str) -> Result<KalshiMarket, ClientError> {
        let ticker = normalize_ticker(ticker);
        let body = self
            .request_body(Method::GET, format!("/trade-api/v2/markets/{ticker}"), None)
            .await?;
        Ok(serde_json::from_value(take_field(body, "market")?)?)
    }

    pub async fn get_market_orderbook(
        &self,
        ticker: &str,
        depth: Option<u32>,
    ) -> Result<KalshiOrderBook, ClientError> {
        let ticker = normalize_ticker(ticker);
        let depth = depth.unwrap_or(self.orderbook_depth);
        let query = Query::new().opt("depth", Some(depth)).build();
        let body = self
            .request_body(
                Method::GET,
                format!("/trade-api/v2/markets/{ticker}/orderbook{query}"),
                None,
            )
            .await?;
        Ok(KalshiOrderBook::from_api(&body))
    }

    pub async fn get_markets(
        &self,
        series_ticker: Option<&str>,
        event_ticker: Option<&str>,
        status: Option<&str>,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Vec<KalshiMarket>, ClientError> {
        let query = Query::new()
            .opt("limit", Some(limit))
            .opt("cursor", cursor)
            .opt("event_ticker", event_ticker.map(normalize_ticker))
            .opt("series_ticker", series_ticker.map(normalize_ticker))
            .opt("status", status)
            .build();
        let body = self
            .request_body(Method::GET, format!("/trade-api/v2/markets{query}"), None)
            .await?;
        decode_list(body, "markets")
    }

    pub async fn get_event(&self, event_ticker: &str) -> Result<Value, ClientError> {
        let event_ticker = normalize_ticker(event_ticker);
        self.request_body(
            Method::GET,
            format!("/trade-api/v2/events/{event_ticker}"),
            None,
        )
        .await
    }

    pub async fn get_series(&self, series_ticker: &str) -> Result<Value, ClientError> {
        let series_ticker = normalize_ticker(series_ticker);
        let body = self
            .request_body(
                Method::GET,
                format!("/trade-api/v2/series/{series_ticker}"),
                None,
            )
            .await?;
        take_field(body, "series")
    }

    // ── Portfolio ────────────────────────────────────────

    pub async fn get_orders(
        &self,
        ticker: Option<&str>,
        event_ticker: Option<&str>,
        status: Option<&str>,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Vec<KalshiOrder>, ClientError> {
        let query = Query::new()
            .opt("ticker", ticker.map(normalize_ticker))
            .opt("event_ticker", event_ticker.map(normalize_ticker))
            .opt("status", status)
            .opt("limit", Some(limit))
            .opt("cursor", cursor)
            .build();
        let body = self
            .request_body(
                Method::GET,
                format!("/trade-api/v2/portfolio/orders{query}"),
                None,
            )
            .await?;
        decode_list(body, "orders")
    }

    pub async fn get_order(&self, order_id: &str) -> Result<KalshiOrder, ClientError> {
        let body = self
            .request_body(
                Method::GET,
                format!("/trade-api/v2/portfolio/orders/{order_id}"),
                None,
            )
            .await?;
        Ok(serde_json::from_value(take_field(body, "order")?)?)
    }

    pub async fn create_order(&self, order: &KalshiOrder) -> Result<KalshiOrder, ClientError> {
        let body = order_create_body(order)?;
        let response = self
            .request_body(
                Method::POST,
                "/trade-api/v2/portfolio/orders".to_string(),
                Some(body),
            )
            .await?;
        Ok(serde_json::from_value(take_field(response, "order")?)?)
    }

    /// Cancel (fully reduce) an order by its venue order id.
    pub async fn cancel_order(&self, order_id: &str) -> Result<(), ClientError> {
        self.request(
            Method::DELETE,
            format!("/trade-api/v2/portfolio/orders/{order_id}"),
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn batch_create_orders(
        &self,
        orders: &[KalshiOrder],
    ) -> Result<Vec<KalshiOrder>, ClientError> {
        let bodies = orders
            .iter()
            .map(order_create_body)
            .collect::<Result<Vec<_>, _>>()?;
        let response = self
            .request_body(
                Method::POST,
                "/trade-api/v2/portfolio/orders/batched".to_string(),
                Some(json!({ "orders": bodies })),
            )
            .await?;

        let mut results = Vec::new();
        for item in batch_items(response)? {
            if let Some(error) = item.get("error").filter(|e| !e.is_null()) {
                return Err(ClientError::VenueReject {
                    payload: error.clone(),
                });
            }
            let order = item
                .get("order")
                .cloned()
                .ok_or(ClientError::MissingField("order"))?;
            results.push(serde_json::from_value(order)?);
        }
        Ok(results)
    }

    pub async fn batch_cancel_orders(&self, order_ids: &[String]) -> Result<(), ClientError> {
        let body = json!({
            "orders": order_ids.iter().map(|id| json!({ "order_id": id })).collect::<Vec<_>>(),
        });
        let response = self
            .request_body(
                Method::DELETE,
                "/trade-api/v2/portfolio/orders/batched".to_string(),
                Some(body),
            )
            .await?;
        for item in batch_items(response)? {
            if let Some(error) = item.get("error").filter(|e| !e.is_null()) {
                return Err(ClientError::VenueReject {
                    payload: error.clone(),
                });
            }
        }
        Ok(())
    }

    /// Account balance and portfolio value, both in cents.
    pub async fn get_balance(&self) -> Result<KalshiBalance, ClientError> {
        let body = self
            .request_body(Method::GET, "/trade-api/v2/portfolio/balance".to_string(), None)
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    pub async fn get_positions(
        &self,
        ticker: Option<&str>,
        event_ticker: Option<&str>,
        limit: u32,
    ) -> Result<Vec<KalshiPosition>, ClientError> {
        let query = Query::new()
            .opt("ticker", ticker.map(normalize_ticker))
            .opt("event_ticker", event_ticker.map(normalize_ticker))
            .opt("limit", Some(limit))
            .build();
        let body = self
            .request_body(
                Method::GET,
                format!("/trade-api/v2/portfolio/positions{query}"),
                None,
            )
            .await?;
        decode_list(body, "market_positions")
    }
}

impl Drop for KalshiClient {
    fn drop(&mut self) {
        let mut state = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = state.handle.take() {
            handle.abort();
        }
    }
}

// ─────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────

struct RequestWorker {
    http: reqwest::Client,
    signer: RequestSigner,
    limiter: TokenBucketRateLimiter,
    base_url: String,
    retry: RetryPolicy,
}

impl RequestWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<PendingRequest>) {
        while let Some(pending) = rx.recv().await {
            let result = self
                .send_with_retries(&pending.method, &pending.path, pending.body.as_ref())
                .await;
            // A cancelled caller has dropped its receiver; that is not an
            // error and must not stall the queue.
            let _ = pending.reply.send(result);
        }
        debug!("kalshi request worker shutting down");
    }

    async fn send_with_retries(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
    ) -> ApiResult {
        let mut attempt: u32 = 0;
        let start = Instant::now();

        loop {
            self.limiter.acquire().await;
            let err = match self.send_request(method, path, body).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            attempt += 1;
            if !err.is_retryable() || attempt >= self.retry.max_attempt {
                return Err(err);
            }

            let delay = self.retry.jittered(self.retry.backoff_delay(attempt));
            if start.elapsed() + delay > Duration::from_secs_f64(self.retry.max_delay) {
                return Err(err);
            }
            warn!(
                %method,
                path,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying after transient Kalshi error: {err}"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One sign + send + classify cycle. Re-signing happens here so every
    /// retry carries a fresh timestamp.
    async fn send_request(&self, method: &Method, path: &str, body: Option<&Value>) -> ApiResult {
        let headers = self.signer.sign(method.as_str(), path)?;
        let url = format!("{}{}", self.base_url, path);

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(ACCESS_KEY_HEADER, &headers.api_key)
            .header(ACCESS_SIGNATURE_HEADER, &headers.signature)
            .header(ACCESS_TIMESTAMP_HEADER, &headers.timestamp_ms);
        if let Some(b) = body {
            request = request.json(b);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            if text.is_empty() {
                return Ok(None);
            }
            return Ok(Some(serde_json::from_str(&text)?));
        }

        let payload = serde_json::from_str(&text).ok();
        Err(ClientError::Http {
            status: status.as_u16(),
            payload,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────

pub(crate) fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_ascii_uppercase()
}

/// Fixed-point dollars rendering per the API convention.
pub(crate) fn format_price(value: f64) -> String {
    format!("{value:.4}")
}

fn take_field(mut body: Value, key: &'static str) -> Result<Value, ClientError> {
    body.get_mut(key)
        .map(Value::take)
        .ok_or(ClientError::MissingField(key))
}

fn decode_list<T: serde::de::DeserializeOwned>(
    mut body: Value,
    key: &'static str,
) -> Result<Vec<T>, ClientError> {
    let items = match body.get_mut(key).map(Value::take) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => return Err(ClientError::Decode(serde::de::Error::custom(format!(
            "{key} is not an array: {other}"
        )))),
    };
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(ClientError::from))
        .collect()
}

fn batch_items(mut response: Value) -> Result<Vec<Value>, ClientError> {
    match response.get_mut("orders").map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(_) => Err(ClientError::MissingField("orders")),
    }
}

/// Build a Create Order request body. The REST API wants fields beyond
/// those echoed back on the order object; the mapping stays minimal and
/// predictable.
pub(crate) fn order_create_body(order: &KalshiOrder) -> Result<Value, ClientError> {
    let ticker = order
        .ticker
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ClientError::InvalidOrder("create_order requires ticker".into()))?;
    let side = order
        .side
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ClientError::InvalidOrder("create_order requires side".into()))?;
    let action = order
        .action
        .as_deref()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ClientError::InvalidOrder("create_order requires action".into()))?;
    let count = order
        .count
        .filter(|c| *c > 0)
        .ok_or_else(|| ClientError::InvalidOrder("create_order requires a positive count".into()))?;

    let mut body = json!({
        "ticker": normalize_ticker(ticker),
        "side": side,
        "action": action,
        "count": count,
    });
    if let Some(client_order_id) = &order.client_order_id {
        body["client_order_id"] = json!(client_order_id);
    }
    if let Some(order_type) = &order.order_type {
        body["type"] = json!(order_type);
    }
    if side == "yes" {
        if let Some(price) = order.yes_price_dollars {
            body["yes_price_dollars"] = json!(format_price(price));
        }
    }
    if side == "no" {
        if let Some(price) = order.no_price_dollars {
            body["no_price_dollars"] = json!(format_price(price));
        }
    }
    Ok(body)
}
