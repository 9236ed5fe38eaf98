//! A `busy` send is retried automatically; the caller sees only the
//! eventual successful send and its result, with no added table state
//! once it resolves.

mod common;

use std::time::{Duration, Instant};

use mcp_connect::config::ConnectionConfig;
use serde_json::{json, Value};

#[tokio::test]
async fn busy_send_retries_then_succeeds() {
    let (handle, mut fake, _reconnects) =
        common::ready_connection(ConnectionConfig::default()).await;

    fake.fail_next_sends_with_busy(1);

    let started = Instant::now();
    let call_handle = handle.clone();
    let call = tokio::spawn(async move {
        call_handle
            .call("tools/list", Some(json!({})), Some(Duration::from_secs(5)))
            .await
    });

    let frame = common::recv_within(&mut fake.outbound_rx, "retried tools/list request").await;
    let parsed: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(parsed["method"], "tools/list");
    let id = parsed["id"].as_u64().unwrap();

    fake.inject(json!({"jsonrpc": "2.0", "id": id, "result": {"tools": []}}));

    let result = call.await.unwrap().expect("call eventually succeeds");
    assert_eq!(result, json!({"tools": []}));
    // send_retry_delay defaults to 10ms with up to 50% jitter, so the
    // single retry should land well under a second even with test
    // scheduling overhead.
    assert!(started.elapsed() < Duration::from_secs(1));
}
