//! A frame exceeding `max_frame_bytes` is never decoded: the transport
//! is closed, all pending calls are tombstoned, and the connection
//! enters backoff (from which it later reconnects).

mod common;

use std::time::Duration;

use mcp_connect::config::ConnectionConfig;
use mcp_connect::error::CallError;
use serde_json::{json, Value};

#[tokio::test]
async fn oversized_frame_fails_pending_and_reconnects() {
    let config = ConnectionConfig::builder()
        .backoff_min(Duration::from_millis(20))
        .backoff_max(Duration::from_millis(100))
        .backoff_jitter(0.0)
        .build()
        .unwrap();
    let (handle, mut fake, mut reconnects) = common::ready_connection(config).await;

    let call_handle = handle.clone();
    let call = tokio::spawn(async move {
        call_handle
            .call("tools/list", Some(json!({})), Some(Duration::from_secs(5)))
            .await
    });
    let _ = common::recv_within(&mut fake.outbound_rx, "tools/list request").await;

    // Default max_frame_bytes is 16 MiB; pad well past it.
    let filler = "x".repeat(17 * 1024 * 1024);
    fake.inject(json!({
        "jsonrpc": "2.0",
        "method": "notifications/junk",
        "params": {"filler": filler},
    }));

    let outcome = call.await.unwrap();
    assert!(matches!(outcome, Err(CallError::Transport { .. })), "got {outcome:?}");

    let mut second = common::recv_within(&mut reconnects, "reconnect after oversized frame").await;
    let init_request = common::recv_within(&mut second.outbound_rx, "second initialize request").await;
    let parsed: Value = serde_json::from_str(&init_request).unwrap();
    assert_eq!(parsed["method"], "initialize");
}
