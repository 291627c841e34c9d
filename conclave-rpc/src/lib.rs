//! JSON-RPC 2.0 over stdio: wire types and the transport that speaks them to an agent subprocess.

pub mod error;
pub mod protocol;
pub mod transport;

pub use error::TransportError;
pub use protocol::{RequestId, RpcMessage, RpcNotification, RpcRequest, RpcResponse};
pub use transport::Transport;
