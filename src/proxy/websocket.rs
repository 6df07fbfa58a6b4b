//! Websocket pipeline and session forwarder.
//!
//! After auth and path routing the client connection is upgraded, the chosen
//! provider is dialed, and two pumps relay frames in both directions while a
//! supervisor waits for the first fault. Faults travel over single-slot
//! channels with non-blocking sends, so only the first report per side
//! matters; the supervisor then orders both pumps to write a close frame and
//! exit.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::ws::{close_code, CloseFrame, Message as ClientMessage, WebSocket, WebSocketUpgrade},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message as UpstreamMessage, MaybeTlsStream,
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::{balancer::Kind, metrics};

use super::{
    reqctx::{self, RequestContext},
    AuthDecision, Gateway,
};

const WS_TRANSPORT: &str = "websocket";

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Everything the detached session tasks need for logging and metric labels.
#[derive(Clone)]
struct SessionLabels {
    chain_id: String,
    chain_name: String,
    provider: String,
    balancer: &'static str,
    client: String,
    conn_url: String,
    metrics_enabled: bool,
}

impl SessionLabels {
    fn values<'a>(&'a self, method: &'a str) -> [&'a str; 7] {
        [
            self.chain_id.as_str(),
            self.chain_name.as_str(),
            WS_TRANSPORT,
            self.provider.as_str(),
            self.balancer,
            method,
            self.client.as_str(),
        ]
    }
}

/// The first failure observed on one side of the session.
enum PumpFault {
    /// The peer closed cleanly.
    Closed,
    Error(String),
}

/// Websocket variant of the pipeline: logging, auth, path routing, balancer
/// checks, then the upgrade. The actual forwarding runs in a detached task
/// once the handshake response has been written.
pub(super) async fn handle(
    gateway: &Arc<Gateway>,
    request_id: u64,
    upgrade: WebSocketUpgrade,
    parts: Parts,
) -> Response {
    let start = Instant::now();
    let mut rctx = RequestContext::new();
    let response = pipeline(gateway, request_id, &mut rctx, upgrade, &parts);
    info!(
        request_id,
        status = response.status().as_u16(),
        latency = ?start.elapsed(),
        path = parts.uri.path(),
        client = %rctx.client,
        provider = %rctx.provider,
        chain = %rctx.chain_name,
        "websocket request completed"
    );
    response
}

fn pipeline(
    gateway: &Arc<Gateway>,
    request_id: u64,
    rctx: &mut RequestContext,
    upgrade: WebSocketUpgrade,
    parts: &Parts,
) -> Response {
    match gateway.auth.decide(parts) {
        AuthDecision::Allow(client) => rctx.client = client,
        AuthDecision::Deny(client, reason) => {
            rctx.client = client;
            info!(request_id, reason, "unauthorized");
            return (StatusCode::UNAUTHORIZED, "").into_response();
        }
    }

    let Some(chain) = gateway.chains.get(parts.uri.path()) else {
        debug!(request_id, path = parts.uri.path(), "unknown path");
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };
    rctx.chain_id = chain.chain_id;
    rctx.chain_name = chain.name.clone();
    rctx.balancer = chain.balancer.kind().as_str();

    // Long-lived sessions carry no per-call latency signal, so the EWMA
    // model has nothing to learn from them.
    if chain.balancer.kind() == Kind::P2cEwma {
        error!(request_id, chain = %chain.name, "p2cewma balancer is unsupported for websocket");
        return (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response();
    }

    let (provider, release) = chain.balancer.borrow();
    if provider.is_empty() {
        error!(request_id, chain = %chain.name, "balancer returned no provider");
        release(false, Duration::ZERO);
        return (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response();
    }
    rctx.provider = provider.name.clone();
    rctx.conn_url = provider.url.clone();
    release(true, Duration::ZERO);

    let labels = SessionLabels {
        chain_id: rctx.chain_id.to_string(),
        chain_name: rctx.chain_name.clone(),
        provider: rctx.provider.clone(),
        balancer: rctx.balancer,
        client: rctx.client.clone(),
        conn_url: provider.url,
        metrics_enabled: gateway.metrics_enabled,
    };
    upgrade.on_upgrade(move |socket| run_session(request_id, labels, socket))
}

async fn run_session(request_id: u64, labels: SessionLabels, mut client: WebSocket) {
    let (upstream, response) = match connect_async(labels.conn_url.as_str()).await {
        Ok(pair) => pair,
        Err(err) => {
            error!(
                request_id,
                provider = %labels.provider,
                error = %err,
                "can not dial upstream websocket"
            );
            let _ = client.send(ClientMessage::Close(None)).await;
            return;
        }
    };
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        error!(
            request_id,
            provider = %labels.provider,
            status = response.status().as_u16(),
            "unexpected upstream websocket handshake status"
        );
        let _ = client.send(ClientMessage::Close(None)).await;
        return;
    }
    info!(request_id, provider = %labels.provider, "websocket session established");

    let (client_tx, client_rx) = client.split();
    let (upstream_tx, upstream_rx) = upstream.split();

    let (client_fault_tx, mut client_fault_rx) = mpsc::channel::<PumpFault>(1);
    let (upstream_fault_tx, mut upstream_fault_rx) = mpsc::channel::<PumpFault>(1);
    let (close_upstream_tx, close_upstream_rx) = oneshot::channel::<()>();
    let (close_client_tx, close_client_rx) = oneshot::channel::<u16>();

    let inbound = tokio::spawn(pump_client_to_upstream(
        request_id,
        labels.clone(),
        client_rx,
        upstream_tx,
        client_fault_tx.clone(),
        upstream_fault_tx.clone(),
        close_upstream_rx,
    ));
    let outbound = tokio::spawn(pump_upstream_to_client(
        request_id,
        labels.clone(),
        upstream_rx,
        client_tx,
        client_fault_tx,
        upstream_fault_tx,
        close_client_rx,
    ));

    // Supervisor: the first fault decides how both sides are closed.
    tokio::select! {
        fault = upstream_fault_rx.recv() => {
            match fault {
                Some(PumpFault::Error(reason)) => {
                    error!(request_id, reason, provider = %labels.provider, "upstream websocket failed");
                    if labels.metrics_enabled {
                        metrics::REQUEST_ERROR.with_label_values(&labels.values(WS_TRANSPORT)).inc();
                    }
                    let _ = close_client_tx.send(close_code::AWAY);
                }
                Some(PumpFault::Closed) | None => {
                    let _ = close_client_tx.send(close_code::NORMAL);
                }
            }
            let _ = close_upstream_tx.send(());
        }
        fault = client_fault_rx.recv() => {
            if let Some(PumpFault::Error(reason)) = fault {
                warn!(request_id, reason, "client websocket failed");
                if labels.metrics_enabled {
                    metrics::CLIENT_REQUEST_ERROR.with_label_values(&labels.values(WS_TRANSPORT)).inc();
                }
            }
            let _ = close_upstream_tx.send(());
            let _ = close_client_tx.send(close_code::NORMAL);
        }
    }

    let _ = tokio::join!(inbound, outbound);
    info!(request_id, provider = %labels.provider, "websocket session closed");
}

/// Relays client frames upstream, counting each JSON-RPC message. A read
/// fault is reported on the client channel, a write fault on the upstream
/// channel; either way the pump waits for the supervisor's close order,
/// writes the close frame and exits.
async fn pump_client_to_upstream(
    request_id: u64,
    labels: SessionLabels,
    mut client_rx: SplitStream<WebSocket>,
    mut upstream_tx: SplitSink<UpstreamSocket, UpstreamMessage>,
    client_fault: mpsc::Sender<PumpFault>,
    upstream_fault: mpsc::Sender<PumpFault>,
    mut close_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut close_rx => {
                let _ = upstream_tx.send(UpstreamMessage::Close(None)).await;
                return;
            }
            msg = client_rx.next() => {
                let report = match msg {
                    None => Some((&client_fault, PumpFault::Closed)),
                    Some(Err(err)) => {
                        Some((&client_fault, PumpFault::Error(format!("read: {err}"))))
                    }
                    Some(Ok(ClientMessage::Close(_))) => Some((&client_fault, PumpFault::Closed)),
                    Some(Ok(ClientMessage::Text(text))) => {
                        count_client_request(request_id, &labels, text.as_bytes());
                        match upstream_tx.send(UpstreamMessage::Text(text)).await {
                            Ok(()) => None,
                            Err(err) => {
                                Some((&upstream_fault, PumpFault::Error(format!("write: {err}"))))
                            }
                        }
                    }
                    Some(Ok(ClientMessage::Binary(data))) => {
                        count_client_request(request_id, &labels, &data);
                        match upstream_tx.send(UpstreamMessage::Binary(data)).await {
                            Ok(()) => None,
                            Err(err) => {
                                Some((&upstream_fault, PumpFault::Error(format!("write: {err}"))))
                            }
                        }
                    }
                    // Pings and pongs are answered by both stacks already.
                    Some(Ok(_)) => None,
                };
                if let Some((channel, fault)) = report {
                    let _ = channel.try_send(fault);
                    let _ = (&mut close_rx).await;
                    let _ = upstream_tx.send(UpstreamMessage::Close(None)).await;
                    return;
                }
            }
        }
    }
}

/// Relays upstream frames to the client, observing response sizes. A read
/// fault is reported on the upstream channel, a write fault on the client
/// channel.
async fn pump_upstream_to_client(
    _request_id: u64,
    labels: SessionLabels,
    mut upstream_rx: SplitStream<UpstreamSocket>,
    mut client_tx: SplitSink<WebSocket, ClientMessage>,
    client_fault: mpsc::Sender<PumpFault>,
    upstream_fault: mpsc::Sender<PumpFault>,
    mut close_rx: oneshot::Receiver<u16>,
) {
    loop {
        tokio::select! {
            code = &mut close_rx => {
                send_client_close(&mut client_tx, code.unwrap_or(close_code::NORMAL)).await;
                return;
            }
            msg = upstream_rx.next() => {
                let report = match msg {
                    None => Some((&upstream_fault, PumpFault::Closed)),
                    Some(Err(err)) => {
                        Some((&upstream_fault, PumpFault::Error(format!("read: {err}"))))
                    }
                    Some(Ok(UpstreamMessage::Close(_))) => {
                        Some((&upstream_fault, PumpFault::Closed))
                    }
                    Some(Ok(UpstreamMessage::Text(text))) => {
                        observe_response_size(&labels, text.len());
                        match client_tx.send(ClientMessage::Text(text)).await {
                            Ok(()) => None,
                            Err(err) => {
                                Some((&client_fault, PumpFault::Error(format!("write: {err}"))))
                            }
                        }
                    }
                    Some(Ok(UpstreamMessage::Binary(data))) => {
                        observe_response_size(&labels, data.len());
                        match client_tx.send(ClientMessage::Binary(data)).await {
                            Ok(()) => None,
                            Err(err) => {
                                Some((&client_fault, PumpFault::Error(format!("write: {err}"))))
                            }
                        }
                    }
                    Some(Ok(_)) => None,
                };
                if let Some((channel, fault)) = report {
                    let _ = channel.try_send(fault);
                    let code = (&mut close_rx).await.unwrap_or(close_code::NORMAL);
                    send_client_close(&mut client_tx, code).await;
                    return;
                }
            }
        }
    }
}

async fn send_client_close(client_tx: &mut SplitSink<WebSocket, ClientMessage>, code: u16) {
    let frame = CloseFrame { code, reason: "".into() };
    let _ = client_tx.send(ClientMessage::Close(Some(frame))).await;
}

fn count_client_request(request_id: u64, labels: &SessionLabels, payload: &[u8]) {
    if !labels.metrics_enabled {
        return;
    }
    let (batched, requests) = reqctx::parse_requests(request_id, payload);
    let method = if batched {
        "batch".to_string()
    } else {
        match requests.first() {
            Some(request) => request.method.clone(),
            None => "unknown".to_string(),
        }
    };
    metrics::REQUEST_TOTAL.with_label_values(&labels.values(&method)).inc();
}

fn observe_response_size(labels: &SessionLabels, size: usize) {
    if !labels.metrics_enabled {
        return;
    }
    metrics::RESPONSE_SIZE_BYTES
        .with_label_values(&labels.values(WS_TRANSPORT))
        .observe(size as f64);
}
