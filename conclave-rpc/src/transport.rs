//! Line-delimited JSON-RPC 2.0 over a subprocess's stdio pipes.
//!
//! One [`Transport`] wraps one live child process. Request ids are a per-transport
//! monotonic counter; once a request is issued its id is never reused, even after it
//! times out or the agent crashes — only constructing a fresh `Transport` (recycling
//! the transport) resets the counter.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::TransportError;
use crate::protocol::{methods, RequestId, RpcMessage, RpcNotification, RpcRequest};

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, TransportError>>>>>;

/// A notification pushed by the agent unprompted (progress, logs), surfaced to whoever
/// owns this transport so it can be forwarded as a stream event.
pub struct InboundNotification {
    pub method: String,
    pub params: Option<Value>,
}

pub struct Transport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    next_id: AtomicU64,
    pending: PendingMap,
    notifications: Mutex<mpsc::UnboundedReceiver<InboundNotification>>,
}

impl Transport {
    /// Spawns `command` and starts the background reader task. Stderr lines are logged
    /// at `warn`; stdout carries the JSON-RPC stream exclusively.
    pub fn spawn(mut command: Command) -> Result<Self, TransportError> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn()?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (notif_tx, notif_rx) = mpsc::unbounded_channel();

        tokio::spawn(read_stderr(stderr));
        tokio::spawn(read_stdout(stdout, pending.clone(), notif_tx));

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            next_id: AtomicU64::new(0),
            pending,
            notifications: Mutex::new(notif_rx),
        })
    }

    fn allocate_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Dispatches a request without waiting for the reply, returning the id assigned
    /// so a caller can track (and potentially [`Self::cancel`]) it while it's in flight.
    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<(RequestId, oneshot::Receiver<Result<Value, TransportError>>), TransportError> {
        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = RpcRequest::new(id, method, params);
        if let Err(err) = self.write_line(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }
        Ok((id, rx))
    }

    async fn await_reply(&self, id: RequestId, rx: oneshot::Receiver<Result<Value, TransportError>>, deadline: Duration) -> Result<Value, TransportError> {
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::AgentCrashed { request: Some(id) }),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(TransportError::Timeout { request: id })
            }
        }
    }

    /// Sends a request and awaits its reply, failing with [`TransportError::Timeout`]
    /// if `deadline` elapses first. The id is never reissued regardless of outcome.
    /// `on_dispatch` runs as soon as the id is assigned, before the reply is awaited —
    /// callers that need to cancel an in-flight call record the id there.
    pub async fn call_with(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
        on_dispatch: impl FnOnce(RequestId),
    ) -> Result<Value, TransportError> {
        let (id, rx) = self.dispatch(method, params).await?;
        on_dispatch(id);
        self.await_reply(id, rx, deadline).await
    }

    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
    ) -> Result<Value, TransportError> {
        self.call_with(method, params, deadline, |_| {}).await
    }

    /// Convenience wrapper over [`Self::call`] for the `run` method every agent implements.
    pub async fn run(&self, params: Value, deadline: Duration) -> Result<Value, TransportError> {
        self.call(methods::RUN, Some(params), deadline).await
    }

    pub async fn ping(&self, deadline: Duration) -> Result<Value, TransportError> {
        self.call(methods::PING, None, deadline).await
    }

    /// Performs the `initialize` handshake every agent must complete before it can be
    /// moved to `ready`.
    pub async fn initialize(&self, deadline: Duration) -> Result<Value, TransportError> {
        self.call(methods::INITIALIZE, Some(serde_json::json!({ "protocol_version": "1.0" })), deadline).await
    }

    /// Sends a `cancel` notification carrying `request`'s id, then waits `grace` for
    /// the agent to answer the original call with an error. If the call is still
    /// pending once `grace` elapses, resolves it locally with
    /// [`TransportError::Cancelled`] and retires the id.
    pub async fn cancel(&self, request: RequestId, grace: Duration) {
        let _ = self.notify(methods::CANCEL, Some(serde_json::json!({ "id": request.0 }))).await;
        tokio::time::sleep(grace).await;
        if let Some(tx) = self.pending.lock().await.remove(&request) {
            let _ = tx.send(Err(TransportError::Cancelled { request }));
        }
    }

    /// Sends a `shutdown` notification; does not wait for acknowledgement.
    pub async fn shutdown(&self) -> Result<(), TransportError> {
        self.notify(methods::SHUTDOWN, None).await
    }

    /// Sends a notification; does not wait for or expect a reply.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        let notification = RpcNotification::new(method, params);
        let mut line = serde_json::to_vec(&notification).map_err(|_| TransportError::MalformedLine)?;
        line.push(b'\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(&line).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn write_line(&self, request: &RpcRequest) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(request).map_err(|_| TransportError::MalformedLine)?;
        line.push(b'\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(&line).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Pulls the next unsolicited notification from the agent, if any is buffered.
    /// Takes `&self` (not `&mut self`) so it can be called through the `Arc<Transport>`
    /// the registry holds.
    pub async fn try_next_notification(&self) -> Option<InboundNotification> {
        self.notifications.lock().await.try_recv().ok()
    }

    pub async fn kill(&self) -> std::io::Result<()> {
        self.child.lock().await.start_kill()
    }
}

async fn read_stdout(
    stdout: tokio::process::ChildStdout,
    pending: PendingMap,
    notif_tx: mpsc::UnboundedSender<InboundNotification>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RpcMessage>(&line) {
                    Ok(RpcMessage::Response(response)) => {
                        if let Some(tx) = pending.lock().await.remove(&response.id) {
                            let resolved = match response.error {
                                Some(err) => Err(TransportError::AgentError {
                                    request: response.id,
                                    code: err.code,
                                    message: err.message,
                                }),
                                None => Ok(response.result.unwrap_or(Value::Null)),
                            };
                            let _ = tx.send(resolved);
                        }
                    }
                    Ok(RpcMessage::Notification(n)) => {
                        let _ = notif_tx.send(InboundNotification { method: n.method, params: n.params });
                    }
                    Ok(RpcMessage::Request(_)) => {
                        log::warn!("agent sent an unsupported server-bound request, dropping");
                    }
                    Err(_) => {
                        log::warn!("dropping malformed JSON-RPC line: {line}");
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                log::warn!("transport stdout read error: {err}");
                break;
            }
        }
    }
    fail_all_pending(&pending).await;
}

async fn fail_all_pending(pending: &PendingMap) {
    let mut guard = pending.lock().await;
    for (id, tx) in guard.drain() {
        let _ = tx.send(Err(TransportError::AgentCrashed { request: Some(id) }));
    }
}

async fn read_stderr(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::warn!("agent stderr: {line}");
    }
}
