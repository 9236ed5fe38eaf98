//! Error types for the connection core.
//!
//! Two error surfaces exist, deliberately kept apart:
//!
//! - [`CallError`] is the closed set of terminal outcomes a `call` or
//!   `notify` can produce. It is returned directly, not boxed into
//!   `anyhow`, so callers can match on the exact kind.
//! - [`ConnectionError`] covers setup and supervisor-level failures that
//!   fall outside the per-call contract (bad configuration, transport
//!   spawn failure).
//!
//! Ambient, non-call-path code (configuration loading, example
//! binaries) uses the crate-wide [`Result`] alias.

use thiserror::Error;

use crate::connection::state::ConnectionState;

/// Terminal outcome of a `call`, or the reason a `notify` was dropped.
///
/// Exactly one variant is ever delivered per accepted call (see the
/// core's P1 invariant). Variant names mirror the error kinds named in
/// the connection lifecycle design, not arbitrary strings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// The per-request deadline expired before a response arrived. The
    /// id has been tombstoned; a cancellation notification was sent
    /// best-effort.
    #[error("request timed out")]
    Timeout,

    /// The operation was attempted while the connection was not in
    /// `ready`. Carries the state observed at rejection time.
    #[error("connection unavailable in state {state:?}")]
    Unavailable {
        /// The state the connection was in when the call was rejected.
        state: ConnectionState,
    },

    /// The send failed permanently, or the connection was lost while
    /// the request was in flight.
    #[error("transport error: {reason}")]
    Transport {
        /// Human-readable cause, as reported by the transport.
        reason: String,
    },

    /// `send_retry_attempts` was exhausted against a persistently busy
    /// transport.
    #[error("backpressure: exhausted after {attempts} attempts")]
    Backpressure {
        /// Total send attempts made, including the first.
        attempts: u32,
    },

    /// The request was retired because the connection is stopping.
    #[error("connection shutting down")]
    Shutdown,

    /// The server returned a JSON-RPC error response, or a local
    /// handshake capability check failed.
    #[error("protocol error {code}: {message}")]
    Protocol {
        /// JSON-RPC error code, preserved from the wire response (or a
        /// locally-assigned negative code for handshake failures).
        code: i64,
        /// Human-readable message.
        message: String,
        /// Optional structured error data from the response.
        data: Option<serde_json::Value>,
    },
}

/// Errors raised outside the per-call contract: configuration
/// validation, transport construction, and other setup-time failures.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Configuration values are individually valid but mutually
    /// contradictory (e.g. `backoff_min > backoff_max`).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The transport factory failed to produce a transport.
    #[error("failed to start transport: {0}")]
    TransportStart(String),

    /// The connection actor task was lost (panicked or was dropped)
    /// before it could reply.
    #[error("connection actor is gone")]
    ActorGone,

    /// JSON encoding/decoding failure outside the per-frame decode path
    /// (e.g. encoding a handshake request).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO failure from a transport implementation's setup path.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias for ambient, non-call-path code.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_error_display() {
        let e = CallError::Timeout;
        assert_eq!(e.to_string(), "request timed out");

        let e = CallError::Unavailable {
            state: ConnectionState::Backoff,
        };
        assert!(e.to_string().contains("Backoff"));

        let e = CallError::Backpressure { attempts: 3 };
        assert!(e.to_string().contains('3'));

        let e = CallError::Protocol {
            code: -32601,
            message: "method not found".into(),
            data: None,
        };
        assert!(e.to_string().contains("-32601"));
        assert!(e.to_string().contains("method not found"));
    }

    #[test]
    fn call_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CallError>();
    }

    #[test]
    fn connection_error_from_json() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json}").unwrap_err();
        let e: ConnectionError = bad.into();
        assert!(matches!(e, ConnectionError::Serialization(_)));
    }
}
