//! The request-dispatch pipeline.
//!
//! A request flows through the stages in order: recover, transport routing,
//! health probe, logging, metrics, auth, path routing, envelope parsing,
//! load balancing, forwarding. Each stage is a method that delegates to the
//! next and observes its outcome on the way back out; the shared
//! [`RequestContext`] carries everything logging and metrics need.

pub mod reqctx;
mod websocket;

use std::{
    any::Any,
    backtrace::Backtrace,
    collections::HashMap,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Router, Server,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    balancer::{Balancer, Kind, LeastConnection, P2cEwma, Payload, RoundRobin},
    config::{Config, ConfigError},
    metrics,
};
use reqctx::{JsonRpcResponse, RequestContext, UNKNOWN_CLIENT};

const HEALTHZ_PATH: &str = "/healthz";
const HTTP_TRANSPORT: &str = "http";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("can not build upstream http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("proxy server failed: {0}")]
    Server(#[from] hyper::Error),
    #[error(transparent)]
    Metrics(#[from] metrics::MetricsError),
}

/// A named pool of equivalent upstream providers with its balancer.
pub(crate) struct Chain {
    pub(crate) name: String,
    pub(crate) chain_id: i64,
    pub(crate) balancer: Balancer,
}

pub(crate) enum AuthMode {
    Basic,
    Query,
}

pub(crate) struct Auth {
    pub(crate) mode: AuthMode,
    pub(crate) required: bool,
    pub(crate) allow: HashMap<String, String>,
}

pub(crate) enum AuthDecision {
    Allow(String),
    Deny(String, &'static str),
}

/// The proxy server: immutable routing/auth state shared by all requests.
pub struct Gateway {
    port: u16,
    client: reqwest::Client,
    pub(crate) chains: HashMap<String, Chain>,
    pub(crate) auth: Auth,
    pub(crate) metrics_enabled: bool,
    request_seq: AtomicU64,
}

impl Gateway {
    pub fn new(cfg: &Config) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().tcp_nodelay(true).build()?;

        let mut chains = HashMap::new();
        for rpc in &cfg.rpcs {
            let payloads: Vec<Payload> = rpc
                .providers
                .iter()
                .map(|p| Payload { name: p.name.clone(), url: p.conn_url.clone() })
                .collect();
            let balancer = match rpc.balancer_kind() {
                Kind::P2cEwma => Balancer::P2cEwma(P2cEwma::new(payloads, rpc.p2c_params())),
                Kind::RoundRobin => Balancer::RoundRobin(RoundRobin::new(payloads)),
                Kind::LeastConnection => {
                    Balancer::LeastConnection(LeastConnection::new(payloads))
                }
            };
            chains.insert(
                format!("/{}", rpc.name),
                Chain { name: rpc.name.clone(), chain_id: rpc.chain_id, balancer },
            );
        }

        let auth = Auth {
            mode: match cfg.clients.auth_type.as_deref() {
                Some("query") => AuthMode::Query,
                _ => AuthMode::Basic,
            },
            required: cfg.clients.auth_required,
            allow: cfg
                .clients
                .clients
                .iter()
                .map(|c| (c.login.clone(), c.password.clone()))
                .collect(),
        };

        Ok(Self {
            port: cfg.server_port(),
            client,
            chains,
            auth,
            metrics_enabled: cfg.metrics.enabled,
            request_seq: AtomicU64::new(0),
        })
    }

    /// Runs the proxy listener until the shutdown signal. Connections still
    /// open at that point are waited on by the caller's shutdown budget.
    pub async fn serve(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<(), GatewayError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let app = Router::new().fallback(dispatch).with_state(self.clone());

        info!(addr = %addr, "proxy server started");
        Server::try_bind(&addr)?
            .serve(app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;
        info!("proxy server stopped");
        Ok(())
    }

    fn next_request_id(&self) -> u64 {
        self.request_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn route_transport(
        self: &Arc<Self>,
        request_id: u64,
        ws: Option<WebSocketUpgrade>,
        req: Request<Body>,
    ) -> Response {
        match ws {
            Some(upgrade) => {
                let (parts, _) = req.into_parts();
                websocket::handle(self, request_id, upgrade, parts).await
            }
            None => self.handle_http(request_id, req).await.into_response(),
        }
    }

    async fn handle_http(self: &Arc<Self>, request_id: u64, req: Request<Body>) -> ProxiedResponse {
        if req.uri().path() == HEALTHZ_PATH {
            return ProxiedResponse::text(StatusCode::OK, "ok");
        }

        let (parts, body) = req.into_parts();
        let body = match hyper::body::to_bytes(body).await {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(request_id, error = %err, "can not read request body");
                return ProxiedResponse::text(StatusCode::BAD_REQUEST, "bad request");
            }
        };

        let start = Instant::now();
        let mut rctx = RequestContext::new();
        let resp = self.metrics_stage(request_id, &mut rctx, &parts, body).await;
        info!(
            request_id,
            status = resp.status.as_u16(),
            latency = ?start.elapsed(),
            path = parts.uri.path(),
            client = %rctx.client,
            provider = %rctx.provider,
            chain = %rctx.chain_name,
            "request completed"
        );
        resp
    }

    async fn metrics_stage(
        &self,
        request_id: u64,
        rctx: &mut RequestContext,
        parts: &Parts,
        body: Bytes,
    ) -> ProxiedResponse {
        if !self.metrics_enabled {
            return self.auth_stage(request_id, rctx, parts, body).await;
        }

        let start = Instant::now();
        let resp = self.auth_stage(request_id, rctx, parts, body).await;
        let latency = start.elapsed().as_secs_f64();
        emit_http_metrics(request_id, rctx, resp.status, resp.body.len(), latency);
        resp
    }

    async fn auth_stage(
        &self,
        request_id: u64,
        rctx: &mut RequestContext,
        parts: &Parts,
        body: Bytes,
    ) -> ProxiedResponse {
        match self.auth.decide(parts) {
            AuthDecision::Allow(client) => {
                rctx.client = client;
                self.route_stage(request_id, rctx, parts, body).await
            }
            AuthDecision::Deny(client, reason) => {
                rctx.client = client;
                info!(request_id, reason, "unauthorized");
                ProxiedResponse::text(StatusCode::UNAUTHORIZED, "")
            }
        }
    }

    async fn route_stage(
        &self,
        request_id: u64,
        rctx: &mut RequestContext,
        parts: &Parts,
        body: Bytes,
    ) -> ProxiedResponse {
        let Some(chain) = self.chains.get(parts.uri.path()) else {
            debug!(request_id, path = parts.uri.path(), "unknown path");
            return ProxiedResponse::text(StatusCode::NOT_FOUND, "not found");
        };
        rctx.chain_id = chain.chain_id;
        rctx.chain_name = chain.name.clone();

        self.parse_stage(request_id, rctx, chain, body).await
    }

    async fn parse_stage(
        &self,
        request_id: u64,
        rctx: &mut RequestContext,
        chain: &Chain,
        body: Bytes,
    ) -> ProxiedResponse {
        let (batched, requests) = reqctx::parse_requests(request_id, &body);
        rctx.batched = batched;
        rctx.requests = requests;

        self.balance_stage(request_id, rctx, chain, body).await
    }

    async fn balance_stage(
        &self,
        request_id: u64,
        rctx: &mut RequestContext,
        chain: &Chain,
        body: Bytes,
    ) -> ProxiedResponse {
        rctx.balancer = chain.balancer.kind().as_str();
        let (provider, release) = chain.balancer.borrow();
        if provider.is_empty() {
            error!(request_id, chain = %chain.name, "balancer returned no provider");
            release(false, Duration::ZERO);
            return ProxiedResponse::text(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
        }
        rctx.provider = provider.name;
        rctx.conn_url = provider.url;

        let start = Instant::now();
        let resp = self.forward_stage(request_id, rctx, body).await;
        let latency = start.elapsed();
        rctx.latency_seconds = latency.as_secs_f64();

        // Record the response envelope before releasing so classification
        // can see JSON-RPC errors the upstream reported.
        rctx.responses = reqctx::parse_responses(request_id, rctx.batched, &resp.body);
        let ok = upstream_call_ok(resp.status, &rctx.responses);
        release(ok, latency);

        resp
    }

    async fn forward_stage(
        &self,
        request_id: u64,
        rctx: &RequestContext,
        body: Bytes,
    ) -> ProxiedResponse {
        let result = self
            .client
            .post(&rctx.conn_url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                error!(request_id, provider = %rctx.provider, error = %err, "error while request");
                return ProxiedResponse::empty();
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(
                    request_id,
                    provider = %rctx.provider,
                    error = %err,
                    "can not read upstream response body"
                );
                return ProxiedResponse::empty();
            }
        };

        ProxiedResponse { status, headers, body }
    }
}

/// Entry handler for every inbound request: generates the request id and
/// applies the recover stage around the rest of the pipeline.
async fn dispatch(
    State(gateway): State<Arc<Gateway>>,
    ws: Option<WebSocketUpgrade>,
    req: Request<Body>,
) -> Response {
    let request_id = gateway.next_request_id();
    match AssertUnwindSafe(gateway.route_transport(request_id, ws, req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            error!(
                request_id,
                panic = panic_message(&panic),
                backtrace = %Backtrace::force_capture(),
                "panic at handler"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

/// Upstream response buffered in full so later stages can size, parse and
/// relay it.
pub(crate) struct ProxiedResponse {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl ProxiedResponse {
    fn text(status: StatusCode, body: &'static str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self { status, headers, body: Bytes::from_static(body.as_bytes()) }
    }

    /// Placeholder written when the upstream call itself failed; the status
    /// stays at the framework default and the balancer learns about the
    /// failure through the empty response list.
    fn empty() -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new(), body: Bytes::new() }
    }
}

impl IntoResponse for ProxiedResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        for (name, value) in self.headers.iter() {
            // Hop-by-hop and framing headers are regenerated by the server.
            if *name == header::CONNECTION
                || *name == header::TRANSFER_ENCODING
                || *name == header::CONTENT_LENGTH
            {
                continue;
            }
            if *name == header::CONTENT_TYPE {
                response.headers_mut().insert(name, value.clone());
            } else {
                response.headers_mut().append(name, value.clone());
            }
        }
        response
    }
}

impl Auth {
    pub(crate) fn decide(&self, parts: &Parts) -> AuthDecision {
        match self.mode {
            AuthMode::Query => {
                let client = query_param(parts.uri.query().unwrap_or(""), "client");
                let client =
                    if client.is_empty() { UNKNOWN_CLIENT.to_string() } else { client };
                AuthDecision::Allow(client)
            }
            AuthMode::Basic => {
                let header = parts
                    .headers
                    .get(header::AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("");
                self.decide_basic(header)
            }
        }
    }

    fn decide_basic(&self, header: &str) -> AuthDecision {
        match decode_basic_auth(header) {
            Err(_) => {
                if self.required {
                    AuthDecision::Deny(UNKNOWN_CLIENT.to_string(), "failed to decode basic auth")
                } else {
                    AuthDecision::Allow(UNKNOWN_CLIENT.to_string())
                }
            }
            Ok((login, password)) => {
                if !self.required {
                    return AuthDecision::Allow(login);
                }
                match self.allow.get(&login) {
                    Some(expected) if *expected == password => AuthDecision::Allow(login),
                    Some(_) => AuthDecision::Deny(login, "invalid pass"),
                    None => AuthDecision::Deny(login, "invalid login"),
                }
            }
        }
    }
}

/// Decodes an `Authorization: Basic` header value. The `Basic ` prefix is
/// optional; the remainder is base64 `login:password`. An empty login
/// normalizes to `_unknown_`.
pub fn decode_basic_auth(header: &str) -> Result<(String, String), base64::DecodeError> {
    const PREFIX: &str = "Basic ";
    let trimmed = header.strip_prefix(PREFIX).unwrap_or(header);
    let decoded = STANDARD.decode(trimmed)?;
    let decoded = String::from_utf8_lossy(&decoded);
    let (login, password) = decoded.split_once(':').unwrap_or((decoded.as_ref(), ""));
    let login = if login.is_empty() { UNKNOWN_CLIENT } else { login };
    Ok((login.to_string(), password.to_string()))
}

fn query_param(query: &str, key: &str) -> String {
    for pair in query.split('&') {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        if k == key {
            return v.to_string();
        }
    }
    String::new()
}

/// Classifies the upstream call for the balancer: false on transport/HTTP
/// failure, an unparsable response, or any JSON-RPC error attributable to
/// the provider.
fn upstream_call_ok(status: StatusCode, responses: &[JsonRpcResponse]) -> bool {
    if !status.is_success() {
        return false;
    }
    if responses.is_empty() {
        return false;
    }
    for response in responses {
        if !response.has_error() {
            continue;
        }
        let Some(err) = &response.error else { continue };
        if !reqctx::is_user_call_error(err.code, &err.message) {
            return false;
        }
    }
    true
}

fn emit_http_metrics(
    request_id: u64,
    rctx: &RequestContext,
    status: StatusCode,
    body_len: usize,
    latency: f64,
) {
    let chain_id = rctx.chain_id.to_string();

    if rctx.requests.len() == 1 && rctx.responses.len() == 1 {
        let labels = [
            chain_id.as_str(),
            rctx.chain_name.as_str(),
            HTTP_TRANSPORT,
            rctx.provider.as_str(),
            rctx.balancer,
            rctx.requests[0].method.as_str(),
            rctx.client.as_str(),
        ];
        metrics::REQUEST_LATENCY_SECONDS.with_label_values(&labels).observe(latency);
        metrics::REQUEST_TOTAL.with_label_values(&labels).inc();
        if !status.is_success() {
            metrics::REQUEST_ERROR.with_label_values(&labels).inc();
        }
        if rctx.responses[0].has_error() {
            metrics::CLIENT_REQUEST_ERROR.with_label_values(&labels).inc();
        }
        metrics::RESPONSE_SIZE_BYTES.with_label_values(&labels).observe(body_len as f64);
        return;
    }

    let batch_labels = [
        chain_id.as_str(),
        rctx.chain_name.as_str(),
        HTTP_TRANSPORT,
        rctx.provider.as_str(),
        rctx.balancer,
        "batch",
        rctx.client.as_str(),
    ];
    metrics::REQUEST_LATENCY_SECONDS.with_label_values(&batch_labels).observe(latency);
    if !status.is_success() {
        metrics::REQUEST_ERROR.with_label_values(&batch_labels).inc();
    }
    metrics::RESPONSE_SIZE_BYTES.with_label_values(&batch_labels).observe(body_len as f64);

    if rctx.requests.len() != rctx.responses.len() {
        warn!(
            request_id,
            requests = rctx.requests.len(),
            responses = rctx.responses.len(),
            "request/response count mismatch, per-call metrics skipped"
        );
        return;
    }
    for (request, response) in rctx.requests.iter().zip(&rctx.responses) {
        let labels = [
            chain_id.as_str(),
            rctx.chain_name.as_str(),
            HTTP_TRANSPORT,
            rctx.provider.as_str(),
            rctx.balancer,
            request.method.as_str(),
            rctx.client.as_str(),
        ];
        metrics::REQUEST_TOTAL.with_label_values(&labels).inc();
        if response.has_error() {
            metrics::CLIENT_REQUEST_ERROR.with_label_values(&labels).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::reqctx::{JsonRpcError, JsonRpcResponse};
    use super::*;

    fn encode(raw: &str) -> String {
        STANDARD.encode(raw)
    }

    #[test]
    fn basic_auth_decoding() {
        // header, expected login, expected password, expect error
        let cases = vec![
            (format!("Basic {}", encode("admin:test")), "admin", "test", false),
            (encode("admin:test"), "admin", "test", false),
            (format!("Basic {}", encode("admin:")), "admin", "", false),
            ("=corrupted".to_string(), "", "", true),
            (format!("Basic {}", encode(":")), "_unknown_", "", false),
        ];
        for (header, login, password, expect_err) in &cases {
            let result = decode_basic_auth(header);
            if *expect_err {
                assert!(result.is_err(), "header {header:?}");
            } else {
                let (got_login, got_password) = result.unwrap();
                assert_eq!(got_login, *login, "header {header:?}");
                assert_eq!(got_password, *password, "header {header:?}");
            }
        }
    }

    #[test]
    fn missing_separator_keeps_whole_login() {
        let (login, password) = decode_basic_auth(&encode("justlogin")).unwrap();
        assert_eq!(login, "justlogin");
        assert_eq!(password, "");
    }

    fn basic_auth(required: bool) -> Auth {
        Auth {
            mode: AuthMode::Basic,
            required,
            allow: HashMap::from([("admin".to_string(), "test".to_string())]),
        }
    }

    #[test]
    fn wrong_password_is_denied() {
        let auth = basic_auth(true);
        // admin:wrong
        let header = format!("Basic {}", encode("admin:wrong"));
        assert!(matches!(auth.decide_basic(&header), AuthDecision::Deny(login, _) if login == "admin"));
    }

    #[test]
    fn known_login_and_password_is_allowed() {
        let auth = basic_auth(true);
        let header = format!("Basic {}", encode("admin:test"));
        assert!(matches!(auth.decide_basic(&header), AuthDecision::Allow(login) if login == "admin"));
    }

    #[test]
    fn unknown_login_is_denied() {
        let auth = basic_auth(true);
        let header = format!("Basic {}", encode("guest:test"));
        assert!(matches!(auth.decide_basic(&header), AuthDecision::Deny(login, _) if login == "guest"));
    }

    #[test]
    fn auth_not_required_lets_everything_through() {
        let auth = basic_auth(false);
        assert!(matches!(auth.decide_basic("=corrupted"), AuthDecision::Allow(login) if login == UNKNOWN_CLIENT));
        let header = format!("Basic {}", encode("guest:whatever"));
        assert!(matches!(auth.decide_basic(&header), AuthDecision::Allow(login) if login == "guest"));
    }

    #[test]
    fn empty_login_checks_the_allow_list_under_unknown() {
        let auth = Auth {
            mode: AuthMode::Basic,
            required: true,
            allow: HashMap::from([(UNKNOWN_CLIENT.to_string(), "secret".to_string())]),
        };
        let header = format!("Basic {}", encode(":secret"));
        assert!(
            matches!(auth.decide_basic(&header), AuthDecision::Allow(login) if login == UNKNOWN_CLIENT)
        );
        let header = format!("Basic {}", encode(":wrong"));
        assert!(matches!(auth.decide_basic(&header), AuthDecision::Deny(_, _)));
    }

    #[test]
    fn query_params_are_extracted() {
        assert_eq!(query_param("client=bot&x=1", "client"), "bot");
        assert_eq!(query_param("x=1&client=bot", "client"), "bot");
        assert_eq!(query_param("client=", "client"), "");
        assert_eq!(query_param("x=1", "client"), "");
        assert_eq!(query_param("", "client"), "");
    }

    fn response_with_error(code: i64, message: &str) -> JsonRpcResponse {
        JsonRpcResponse { error: Some(JsonRpcError { code, message: message.to_string() }) }
    }

    #[test]
    fn non_2xx_status_is_a_provider_failure() {
        assert!(!upstream_call_ok(StatusCode::BAD_GATEWAY, &[JsonRpcResponse::default()]));
        assert!(!upstream_call_ok(StatusCode::TOO_MANY_REQUESTS, &[JsonRpcResponse::default()]));
    }

    #[test]
    fn missing_responses_are_a_provider_failure() {
        assert!(!upstream_call_ok(StatusCode::OK, &[]));
    }

    #[test]
    fn caller_errors_do_not_count_against_the_provider() {
        let responses = [response_with_error(-32602, "invalid address")];
        assert!(upstream_call_ok(StatusCode::OK, &responses));

        let responses = [response_with_error(-32000, "execution reverted")];
        assert!(upstream_call_ok(StatusCode::OK, &responses));
    }

    #[test]
    fn provider_errors_fail_the_call() {
        let responses = [response_with_error(-32602, "block range limit exceeded")];
        assert!(!upstream_call_ok(StatusCode::OK, &responses));

        let responses = [response_with_error(-32000, "header not found")];
        assert!(!upstream_call_ok(StatusCode::OK, &responses));
    }

    #[test]
    fn one_provider_error_in_a_batch_fails_the_call() {
        let responses = [
            JsonRpcResponse::default(),
            response_with_error(-32602, "invalid address"),
            response_with_error(-32012, "internal"),
        ];
        assert!(!upstream_call_ok(StatusCode::OK, &responses));
    }

    #[test]
    fn clean_responses_succeed() {
        let responses = [JsonRpcResponse::default(), JsonRpcResponse::default()];
        assert!(upstream_call_ok(StatusCode::OK, &responses));
    }

    use crate::config::ClientConfig;

    #[tokio::test]
    async fn health_probe_short_circuits() {
        let cfg = Config::default().finalize().unwrap();
        let gateway = Arc::new(Gateway::new(&cfg).unwrap());

        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let resp = gateway.handle_http(1, req).await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body.as_ref(), b"ok");
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let cfg = Config::default().finalize().unwrap();
        let gateway = Arc::new(Gateway::new(&cfg).unwrap());

        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = gateway.handle_http(1, req).await;
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert_eq!(resp.body.as_ref(), b"not found");
    }

    #[tokio::test]
    async fn auth_rejection_blocks_before_routing() {
        let mut cfg = Config::default();
        cfg.clients.auth_required = true;
        cfg.clients
            .clients
            .push(ClientConfig { login: "admin".to_string(), password: "test".to_string() });
        let cfg = cfg.finalize().unwrap();
        let gateway = Arc::new(Gateway::new(&cfg).unwrap());

        // admin:wrong
        let req = Request::builder()
            .uri("/eth")
            .header(header::AUTHORIZATION, "Basic YWRtaW46d3Jvbmc=")
            .body(Body::empty())
            .unwrap();
        let resp = gateway.handle_http(1, req).await;
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
        assert!(resp.body.is_empty());
    }
}
