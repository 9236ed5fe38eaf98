//! The serialized event queue a Connection actor processes one item at
//! a time (§5 "Scheduling model").

use std::time::Duration;

use tokio::sync::oneshot;

use crate::connection::tables::ReplyTx;

/// Everything that can happen to a Connection: inbound transport
/// activity, timer expirations, and user operations. Tagging transport
/// events with `generation` lets the actor ignore stray events from a
/// transport instance the Supervisor has already superseded.
pub enum Event {
    /// Transport became ready to send/receive.
    TransportUp { generation: u64 },
    /// One decoded-pending JSON-RPC text frame.
    TransportFrame { generation: u64, frame: String },
    /// Transport terminated.
    TransportDown { generation: u64, reason: String },

    /// A caller's `call`.
    Call {
        method: String,
        params: Option<serde_json::Value>,
        timeout: Option<Duration>,
        reply: ReplyTx,
    },
    /// A caller's `notify`.
    Notify {
        method: String,
        params: Option<serde_json::Value>,
    },
    /// A caller's `stop`.
    Stop { reply: oneshot::Sender<()> },

    /// The handshake deadline armed on `starting → initializing` expired.
    InitTimeout { epoch: u64 },
    /// The reconnect delay armed on entry to `backoff` expired.
    BackoffExpired { epoch: u64 },
    /// A per-request timer fired for `id`.
    RequestTimeout { id: u64 },
    /// A send-retry timer fired for `id`, carrying the attempt count it
    /// was armed for (stale if the record has since moved past it).
    RetryTimer { id: u64, attempt: u32 },
    /// Periodic tombstone sweep.
    SweepTombstones,

    /// Server-initiated cancel-all: tombstone pending work and
    /// re-enter the handshake. No inbound wire signal in this crate's
    /// scope is mapped to this event; it exists so the state machine's
    /// `ready --server_cancel_all--> initializing` row is reachable,
    /// e.g. from a future feature-layer hook.
    ServerCancelAll,
}
