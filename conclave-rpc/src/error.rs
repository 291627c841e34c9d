use std::fmt;

use crate::protocol::RequestId;

/// Failures surfaced by a [`crate::transport::Transport`]. A malformed line is logged
/// and dropped rather than treated as fatal; everything else here ends the transport.
#[derive(Debug)]
pub enum TransportError {
    /// The subprocess closed stdout (or stdin write failed) before the reply arrived.
    AgentCrashed { request: Option<RequestId> },
    /// No reply within the step deadline.
    Timeout { request: RequestId },
    /// The subprocess returned an `error` object in its `RpcResponse`.
    AgentError { request: RequestId, code: i64, message: String },
    /// Locally resolved after a `cancel` notification's grace period elapsed with no
    /// acknowledgement from the agent.
    Cancelled { request: RequestId },
    /// Spawning or writing to the child process failed at the OS level.
    Io(std::io::Error),
    /// A line on stdout did not parse as a `RpcMessage`; the line itself is kept only
    /// for logging, never surfaced to the caller as structured data.
    MalformedLine,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::AgentCrashed { request } => match request {
                Some(id) => write!(f, "agent crashed while awaiting request {id}"),
                None => write!(f, "agent crashed"),
            },
            TransportError::Timeout { request } => {
                write!(f, "request {request} timed out waiting for a reply")
            }
            TransportError::AgentError { request, code, message } => {
                write!(f, "request {request} failed: [{code}] {message}")
            }
            TransportError::Cancelled { request } => write!(f, "request {request} cancelled"),
            TransportError::Io(err) => write!(f, "transport I/O error: {err}"),
            TransportError::MalformedLine => write!(f, "malformed JSON-RPC line, dropped"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err)
    }
}
