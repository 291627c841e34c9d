//! Wire types for the JSON-RPC 2.0 dialect spoken over an agent subprocess's stdio pipes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A transport-scoped request identifier. Never reused within the lifetime of a
/// single [`crate::transport::Transport`] — once retired (by timeout or crash) an id
/// stays retired until the transport itself is recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An outbound call expecting a matching [`RpcResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, method: method.into(), params }
    }
}

/// A fire-and-forget message with no id and no expected reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0".to_string(), method: method.into(), params }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A reply correlated to an [`RpcRequest`] by id. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

/// A single line of the stdio stream, in either direction. Agents may emit
/// notifications unprompted (progress, log lines); the server only ever emits
/// requests and notifications, never responses (it is the client side of the pair).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcMessage {
    Response(RpcResponse),
    Notification(RpcNotification),
    Request(RpcRequest),
}

/// Static method names the agent subprocess protocol defines on top of raw JSON-RPC.
/// Every agent advertises at least these during `initialize`.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const RUN: &str = "run";
    pub const PING: &str = "ping";
    pub const CANCEL: &str = "cancel";
    pub const SHUTDOWN: &str = "shutdown";
}
