//! In-process fake transport for exercising the Connection actor
//! without a real child process or socket.
//!
//! Gated behind `#[cfg(any(test, feature = "test-util"))]` so the
//! crate's own integration tests (which link against a normal,
//! non-`--cfg test` build of the library) can still reach it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::transport::{ActiveMode, SendOutcome, Transport, TransportEvent};

/// A [`Transport`] driven entirely by in-process channels.
///
/// Construct with [`FakeTransport::new`], which returns the transport
/// plus a [`FakeTransportHandle`] the test uses to observe sends and
/// inject inbound frames.
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    armed: Arc<AtomicBool>,
    queue: Arc<Mutex<VecDeque<String>>>,
    busy_then_ok: Arc<Mutex<u32>>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for FakeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeTransport").finish_non_exhaustive()
    }
}

/// Test-side handle paired with a [`FakeTransport`].
pub struct FakeTransportHandle {
    /// Frames the transport's owner sent, in send order.
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    armed: Arc<AtomicBool>,
    queue: Arc<Mutex<VecDeque<String>>>,
    busy_then_ok: Arc<Mutex<u32>>,
}

impl FakeTransportHandle {
    /// Inject a decoded JSON-RPC message as if it arrived from the peer.
    /// Delivered upward immediately if the transport is currently armed
    /// (consuming the arm); otherwise queued until the next re-arm, in
    /// injection order.
    pub fn inject(&self, value: serde_json::Value) {
        let line = serde_json::to_string(&value).expect("value must serialize");
        if self.armed.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Frame(line));
        } else {
            self.queue.lock().unwrap().push_back(line);
        }
    }

    /// Emit a `down` event as if the remote peer disconnected.
    pub fn push_down(&self, reason: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Down(reason.into()));
    }

    /// Configure the next `busy_count` sends to report [`SendOutcome::Busy`]
    /// before the transport starts returning `Ok`.
    pub fn fail_next_sends_with_busy(&self, busy_count: u32) {
        *self.busy_then_ok.lock().unwrap() = busy_count;
    }

    /// True once the Connection has called `set_active(Once)` without a
    /// frame yet having been delivered to satisfy it.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

impl FakeTransport {
    /// Build a wired `(transport, handle)` pair. `events` is the sender
    /// the transport pushes `Up`/`Frame`/`Down` onto; pass the
    /// Connection's own event channel.
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let armed = Arc::new(AtomicBool::new(false));
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let busy_then_ok = Arc::new(Mutex::new(0u32));

        let transport = Self {
            outbound_tx,
            events: events.clone(),
            armed: Arc::clone(&armed),
            queue: Arc::clone(&queue),
            busy_then_ok: Arc::clone(&busy_then_ok),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let _ = events.send(TransportEvent::Up);

        let handle = FakeTransportHandle {
            outbound_rx,
            events,
            armed,
            queue,
            busy_then_ok,
        };
        (transport, handle)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, frame: String) -> SendOutcome {
        if self.closed.load(Ordering::SeqCst) {
            return SendOutcome::Error("transport closed".to_string());
        }
        let mut remaining = self.busy_then_ok.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return SendOutcome::Busy;
        }
        drop(remaining);
        match self.outbound_tx.send(frame) {
            Ok(()) => SendOutcome::Ok,
            Err(_) => SendOutcome::Error("handle dropped".to_string()),
        }
    }

    fn set_active(&self, mode: ActiveMode) {
        match mode {
            ActiveMode::Once => {
                if let Some(line) = self.queue.lock().unwrap().pop_front() {
                    let _ = self.events.send(TransportEvent::Frame(line));
                } else {
                    self.armed.store(true, Ordering::SeqCst);
                }
            }
            ActiveMode::Off => {
                self.armed.store(false, Ordering::SeqCst);
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn new_emits_up() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (_transport, _handle) = FakeTransport::new(events_tx);
        assert!(matches!(events_rx.recv().await, Some(TransportEvent::Up)));
    }

    #[tokio::test]
    async fn send_delivers_to_handle_outbound_rx() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (transport, mut handle) = FakeTransport::new(events_tx);
        assert_eq!(transport.send("ping".into()).await, SendOutcome::Ok);
        let got = handle.outbound_rx.recv().await.unwrap();
        assert_eq!(got, "ping");
    }

    #[tokio::test]
    async fn inject_delivers_only_after_set_active() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (transport, handle) = FakeTransport::new(events_tx);
        assert!(matches!(events_rx.recv().await, Some(TransportEvent::Up)));

        handle.inject(serde_json::json!({"jsonrpc":"2.0","id":1,"result":{}}));
        let not_yet = tokio::time::timeout(Duration::from_millis(50), events_rx.recv()).await;
        assert!(not_yet.is_err());

        transport.set_active(ActiveMode::Once);
        let event = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, TransportEvent::Frame(_)));
    }

    #[tokio::test]
    async fn set_active_before_inject_delivers_immediately() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (transport, handle) = FakeTransport::new(events_tx);
        assert!(matches!(events_rx.recv().await, Some(TransportEvent::Up)));

        transport.set_active(ActiveMode::Once);
        assert!(handle.is_armed());
        handle.inject(serde_json::json!({"jsonrpc":"2.0","method":"notifications/ping"}));
        let event = events_rx.recv().await.unwrap();
        assert!(matches!(event, TransportEvent::Frame(_)));
        assert!(!handle.is_armed());
    }

    #[tokio::test]
    async fn busy_then_ok_reports_busy_exact_count() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (transport, mut handle) = FakeTransport::new(events_tx);
        handle.fail_next_sends_with_busy(2);

        assert_eq!(transport.send("a".into()).await, SendOutcome::Busy);
        assert_eq!(transport.send("a".into()).await, SendOutcome::Busy);
        assert_eq!(transport.send("a".into()).await, SendOutcome::Ok);
        assert_eq!(handle.outbound_rx.recv().await.unwrap(), "a");
    }

    #[tokio::test]
    async fn send_after_close_returns_error() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (transport, _handle) = FakeTransport::new(events_tx);
        transport.close().await;
        assert!(matches!(
            transport.send("late".into()).await,
            SendOutcome::Error(_)
        ));
    }
}
