//! A call whose deadline expires receives `timeout` and sends a
//! best-effort cancellation; a response arriving after the tombstone
//! window has not yet elapsed is dropped silently and does not alter
//! the outcome already delivered.

mod common;

use std::time::Duration;

use mcp_connect::config::ConnectionConfig;
use mcp_connect::error::CallError;
use serde_json::{json, Value};

#[tokio::test]
async fn timeout_fires_then_late_response_is_dropped() {
    let (handle, mut fake, _reconnects) =
        common::ready_connection(ConnectionConfig::default()).await;

    let call_handle = handle.clone();
    let call = tokio::spawn(async move {
        call_handle
            .call("tools/list", Some(json!({})), Some(Duration::from_millis(100)))
            .await
    });

    let frame = common::recv_within(&mut fake.outbound_rx, "tools/list request").await;
    let parsed: Value = serde_json::from_str(&frame).unwrap();
    let id = parsed["id"].as_u64().unwrap();

    let outcome = call.await.unwrap();
    assert!(matches!(outcome, Err(CallError::Timeout)), "got {outcome:?}");

    let cancellation = common::recv_within(&mut fake.outbound_rx, "cancellation notification").await;
    let cancellation: Value = serde_json::from_str(&cancellation).unwrap();
    assert_eq!(cancellation["method"], "notifications/cancelled");
    assert_eq!(cancellation["params"]["requestId"], id);

    // A late response for the now-tombstoned id must be dropped rather
    // than delivered anywhere; observably, the connection keeps serving
    // calls normally afterwards.
    fake.inject(json!({"jsonrpc": "2.0", "id": id, "result": {"tools": []}}));

    let call_handle = handle.clone();
    let probe = tokio::spawn(async move {
        call_handle
            .call("ping", None, Some(Duration::from_secs(5)))
            .await
    });
    let probe_frame = common::recv_within(&mut fake.outbound_rx, "probe request").await;
    let probe_parsed: Value = serde_json::from_str(&probe_frame).unwrap();
    let probe_id = probe_parsed["id"].as_u64().unwrap();
    assert_ne!(probe_id, id, "probe must use a fresh id");
    fake.inject(json!({"jsonrpc": "2.0", "id": probe_id, "result": {}}));
    assert_eq!(probe.await.unwrap().unwrap(), json!({}));
}
