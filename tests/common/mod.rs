//! Shared scaffolding for the scenario tests: a transport factory that
//! hands every spawned [`FakeTransport`]'s handle back over a channel,
//! and a helper that drives a fresh Connection through the `initialize`
//! handshake up to `ready`.

use std::sync::{Arc, Once};
use std::time::Duration;

use mcp_connect::config::ConnectionConfig;
use mcp_connect::connection::{ConnectionHandle, NotificationHandler};
use mcp_connect::error::ConnectionError;
use mcp_connect::transport::fake::{FakeTransport, FakeTransportHandle};
use mcp_connect::transport::{Transport, TransportFactory};
use mcp_connect::types::Implementation;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING_INIT: Once = Once::new();

/// Install a `tracing` subscriber once per test binary, so `RUST_LOG`
/// filters the actor's diagnostics instead of them going nowhere.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mcp_connect=debug"));
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

/// A `transport_factory` backed by [`FakeTransport`], plus the receiver
/// side that yields one [`FakeTransportHandle`] per spawn (including
/// reconnects after backoff).
pub fn fake_factory() -> (TransportFactory, mpsc::UnboundedReceiver<FakeTransportHandle>) {
    let (handle_tx, handle_rx) = mpsc::unbounded_channel();
    let factory: TransportFactory = Arc::new(move |events| {
        let handle_tx = handle_tx.clone();
        Box::pin(async move {
            let (transport, handle) = FakeTransport::new(events);
            let _ = handle_tx.send(handle);
            Ok::<Box<dyn Transport>, ConnectionError>(Box::new(transport))
        })
    });
    (factory, handle_rx)
}

pub fn test_client_info() -> Implementation {
    Implementation {
        name: "mcp-connect-tests".to_string(),
        version: "0.0.0".to_string(),
        description: None,
    }
}

pub fn no_op_notification_handler() -> NotificationHandler {
    Arc::new(|_params: serde_json::Value| {})
}

/// Wait up to five seconds for the next item from a channel, panicking
/// with a clear message on timeout rather than hanging the test suite.
pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>, what: &str) -> T {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .unwrap_or_else(|| panic!("channel closed waiting for {what}"))
}

/// Start a Connection against a fresh [`FakeTransport`] and drive it
/// through the `initialize` handshake to `ready`. Returns the handle,
/// the first transport's [`FakeTransportHandle`], and the receiver that
/// will yield further handles on reconnect.
pub async fn ready_connection(
    config: ConnectionConfig,
) -> (
    ConnectionHandle,
    FakeTransportHandle,
    mpsc::UnboundedReceiver<FakeTransportHandle>,
) {
    init_tracing();
    let (factory, mut handle_rx) = fake_factory();
    let handle = mcp_connect::start(
        config,
        test_client_info(),
        factory,
        no_op_notification_handler(),
    )
    .await
    .expect("valid config starts a connection");

    let mut fake = recv_within(&mut handle_rx, "first transport spawn").await;

    let init_request = recv_within(&mut fake.outbound_rx, "initialize request").await;
    let parsed: serde_json::Value =
        serde_json::from_str(&init_request).expect("initialize request is valid JSON");
    assert_eq!(parsed["method"], "initialize");
    let id = parsed["id"].as_u64().expect("initialize request has an id");

    fake.inject(serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": "2025-11-25",
            "capabilities": {},
            "serverInfo": {"name": "fake-server", "version": "1.0"},
        }
    }));

    let initialized = recv_within(&mut fake.outbound_rx, "notifications/initialized").await;
    let parsed: serde_json::Value =
        serde_json::from_str(&initialized).expect("initialized notification is valid JSON");
    assert_eq!(parsed["method"], "notifications/initialized");

    (handle, fake, handle_rx)
}
