//! Request-scoped metadata and the JSON-RPC envelope helpers.
//!
//! The context is progressively filled by the pipeline stages and read back
//! for logging and metrics. Envelope parsing is best-effort: the gateway
//! forwards raw bytes regardless, it only needs the `method` of each call and
//! the `error` of each response for labeling and provider classification.

use serde::Deserialize;
use tracing::{error, info};

/// Client identity used when none can be resolved.
pub const UNKNOWN_CLIENT: &str = "_unknown_";

/// Per-request scratchpad threaded through the pipeline stages.
#[derive(Debug)]
pub struct RequestContext {
    /// Resolved client identity (login or query value).
    pub client: String,
    pub chain_id: i64,
    pub chain_name: String,
    pub balancer: &'static str,
    pub provider: String,
    pub conn_url: String,
    /// Whether the client body classified as a batch.
    pub batched: bool,
    /// Parsed calls; one element for a single request, N for a batch,
    /// empty when the body did not parse.
    pub requests: Vec<JsonRpcRequest>,
    /// Parsed responses; may be empty on upstream or parse failure.
    pub responses: Vec<JsonRpcResponse>,
    pub latency_seconds: f64,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            client: UNKNOWN_CLIENT.to_string(),
            chain_id: 0,
            chain_name: String::new(),
            balancer: "",
            provider: String::new(),
            conn_url: String::new(),
            batched: false,
            requests: Vec::new(),
            responses: Vec::new(),
            latency_seconds: 0.0,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The only request field the gateway consults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub method: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl JsonRpcResponse {
    /// A response counts as error-free when the error member is absent,
    /// null, or has a zero code and empty message.
    pub fn has_error(&self) -> bool {
        match &self.error {
            Some(err) => err.code != 0 || !err.message.is_empty(),
            None => false,
        }
    }
}

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Classifies a body as batch (`[`) or single (`{`) by its first significant
/// byte, after trimming whitespace and an optional UTF-8 BOM.
pub fn is_body_array(body: &[u8]) -> Result<bool, &'static str> {
    let body = body.trim_ascii();
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);
    match body.first() {
        None => Err("body is empty"),
        Some(b'[') => Ok(true),
        Some(b'{') => Ok(false),
        Some(_) => Err("body is not a json object or array"),
    }
}

/// Parses the client body into the per-call request list. Decode failures
/// are logged and yield an empty list; the raw body is still forwarded.
pub fn parse_requests(request_id: u64, body: &[u8]) -> (bool, Vec<JsonRpcRequest>) {
    let batched = match is_body_array(body) {
        Ok(batched) => batched,
        Err(reason) => {
            info!(request_id, reason, "can not classify request body");
            false
        }
    };

    let requests = if batched {
        match serde_json::from_slice::<Vec<JsonRpcRequest>>(body) {
            Ok(requests) => requests,
            Err(err) => {
                error!(request_id, error = %err, "can not parse batch request");
                Vec::new()
            }
        }
    } else {
        match serde_json::from_slice::<JsonRpcRequest>(body) {
            Ok(request) => vec![request],
            Err(err) => {
                error!(request_id, error = %err, "can not parse request");
                Vec::new()
            }
        }
    };

    (batched, requests)
}

/// Parses the upstream body into the per-call response list. The batch-ness
/// of the response follows the request classification.
pub fn parse_responses(request_id: u64, batched: bool, body: &[u8]) -> Vec<JsonRpcResponse> {
    if batched {
        match serde_json::from_slice::<Vec<JsonRpcResponse>>(body) {
            Ok(responses) => responses,
            Err(err) => {
                error!(request_id, error = %err, "can not parse batch response");
                Vec::new()
            }
        }
    } else {
        match serde_json::from_slice::<JsonRpcResponse>(body) {
            Ok(response) => vec![response],
            Err(err) => {
                error!(request_id, error = %err, "can not parse response");
                Vec::new()
            }
        }
    }
}

/// Decides whether a JSON-RPC error is attributable to the caller rather
/// than the provider. Caller errors must not penalize a healthy upstream.
pub fn is_user_call_error(code: i64, message: &str) -> bool {
    match code {
        -32003 | -32004 | -32006 | -32010 | -32600 | -32700 => true,
        // TODO required-methods validation: a missing method may also mean a
        // mis-provisioned provider.
        -32601 => true,
        -32602 => {
            let m = message.to_lowercase();
            !m.contains("block range limit exceeded")
        }
        -32000 => {
            let m = message.to_lowercase();
            m.contains("execution reverted") || m.contains("replacement transaction underpriced")
        }
        _ => false,
    }
}
