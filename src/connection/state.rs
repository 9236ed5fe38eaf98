//! The five connection states and the legality of transitions between
//! them (§4.1).

/// A Connection's current position in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Awaiting the transport's `up` event.
    Starting,
    /// The `initialize` handshake is in flight.
    Initializing,
    /// Serving `call`/`notify`; the steady state.
    Ready,
    /// A reconnect delay is armed.
    Backoff,
    /// Terminal: draining nothing, failing everything.
    Closing,
}

impl ConnectionState {
    /// Whether `call`/`notify` may be accepted in this state. Only
    /// `Ready` serves calls; every other state rejects with
    /// `unavailable` (or silently drops, for `notify`).
    pub fn accepts_calls(self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}
