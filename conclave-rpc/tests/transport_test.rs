use std::time::Duration;

use conclave_rpc::protocol::RequestId;
use conclave_rpc::transport::Transport;
use conclave_rpc::TransportError;
use tokio::process::Command;

/// A fresh transport's first request always gets id 0, so a canned-response
/// shell script can reply deterministically without parsing the request.
fn echo_ok_command() -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(
        r#"read line; printf '{"jsonrpc":"2.0","id":0,"result":{"ok":true}}\n'; sleep 5"#,
    );
    cmd
}

fn crash_immediately_command() -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg("exit 1");
    cmd
}

#[tokio::test]
async fn call_resolves_with_agent_result() {
    let transport = Transport::spawn(echo_ok_command()).expect("spawn");
    let result = transport
        .run(serde_json::json!({"task": "ping"}), Duration::from_secs(2))
        .await
        .expect("call should succeed");
    assert_eq!(result, serde_json::json!({"ok": true}));
}

#[tokio::test]
async fn first_request_id_is_zero() {
    let transport = Transport::spawn(echo_ok_command()).expect("spawn");
    // The call succeeding at all proves the id-0 assumption baked into the fixture held.
    let result = transport.ping(Duration::from_secs(2)).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn crashed_agent_fails_pending_calls() {
    let transport = Transport::spawn(crash_immediately_command()).expect("spawn");
    let result = transport.ping(Duration::from_secs(2)).await;
    assert!(matches!(result, Err(TransportError::AgentCrashed { .. })));
}

#[tokio::test]
async fn timeout_retires_the_request_id_permanently() {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg("sleep 5");
    let transport = Transport::spawn(cmd).expect("spawn");

    let result = transport.ping(Duration::from_millis(50)).await;
    match result {
        Err(TransportError::Timeout { request }) => assert_eq!(request, RequestId(0)),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn initialize_succeeds_against_a_compliant_agent() {
    let transport = Transport::spawn(echo_ok_command()).expect("spawn");
    let result = transport.initialize(Duration::from_secs(2)).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn cancel_resolves_the_pending_call_locally_after_the_grace_period() {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg("sleep 5");
    let transport = std::sync::Arc::new(Transport::spawn(cmd).expect("spawn"));

    let t = transport.clone();
    let pending = tokio::spawn(async move { t.ping(Duration::from_secs(10)).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The pending ping is request id 0, the first (and only) one issued so far.
    transport.cancel(RequestId(0), Duration::from_millis(50)).await;
    let result = pending.await.expect("join");
    assert!(matches!(result, Err(TransportError::Cancelled { request }) if request == RequestId(0)));
}
