//! Transport abstraction: the narrow message contract (§6) the
//! Connection core uses to talk to a concrete byte channel.
//!
//! Transport implementations are external collaborators per the core's
//! scope: this module defines only the contract plus one concrete,
//! non-test implementation ([`stdio::StdioTransport`]) needed to
//! exercise the Connection outside a test harness, and a test double
//! ([`fake::FakeTransport`]) gated behind the `test-util` feature.
//!
//! # Design
//!
//! A [`Transport`] is constructed already wired to an event sink: the
//! upward message kinds (`up`, `frame`, `down`) are pushed onto a
//! [`TransportEvent`] channel supplied at construction, rather than
//! exposed as methods on the trait, because they are asynchronous and
//! unsolicited from the Connection's point of view. The trait itself
//! carries only the three downward operations the Connection invokes:
//! `send`, `set_active`, `close`.
//!
//! Flow control is active-once: a freshly constructed transport
//! delivers no frames until [`Transport::set_active`] is called with
//! [`ActiveMode::Once`]; after delivering exactly one frame it reverts
//! to inactive until re-armed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ConnectionError;

pub mod stdio;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

/// Upward message kinds a Transport implementation emits. Exactly these
/// three kinds exist; no other upward communication is defined.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Emitted exactly once, when the transport is ready to send/receive.
    Up,
    /// One complete JSON-RPC text frame, emitted only after a `set_active`
    /// re-arm and at most once per re-arm.
    Frame(String),
    /// Emitted at most once, terminal for this transport instance.
    Down(String),
}

/// Result of a downward `send` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame was accepted by the transport.
    Ok,
    /// Transient: the transport cannot accept a frame right now. Eligible
    /// for the bounded retry described in §4.2.
    Busy,
    /// Terminal for this send attempt.
    Error(String),
}

/// Flow-control re-arm mode passed to [`Transport::set_active`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveMode {
    /// Permit delivery of exactly one more frame.
    Once,
    /// Revoke any outstanding permit (used when entering backoff/closing).
    Off,
}

/// The downward operations the Connection invokes on its transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one complete JSON-RPC text frame. Must not block on I/O
    /// beyond what the concrete medium requires; a transport under
    /// pressure should return [`SendOutcome::Busy`] rather than stall.
    async fn send(&self, frame: String) -> SendOutcome;

    /// Re-arm (or revoke) flow control. See [`ActiveMode`].
    fn set_active(&self, mode: ActiveMode);

    /// Terminate the transport. The Connection will observe a
    /// subsequent [`TransportEvent::Down`] on the event channel.
    async fn close(&self);
}

/// Constructs a fresh [`Transport`], wired to push [`TransportEvent`]s
/// onto the given sender. Invoked by the Supervisor each time a
/// transport needs to be (re)started, so it is held behind an `Arc`
/// rather than consumed: a rest-for-one restart calls it again against
/// a brand new event channel.
pub type TransportFactory = Arc<
    dyn Fn(
            mpsc::UnboundedSender<TransportEvent>,
        ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Transport>, ConnectionError>> + Send>>
        + Send
        + Sync,
>;
