//! Connection configuration.
//!
//! Unlike the rest of the crate's ambient surface, [`ConnectionConfig`]
//! is a plain in-process value handed to `start` by the caller — there
//! is no on-disk schema in the core's scope, so it derives neither
//! `Serialize` nor `Deserialize`.

use std::time::Duration;

use crate::error::ConnectionError;

/// Immutable (after `start`) configuration for a single Connection.
///
/// All fields have the defaults listed in the external interface
/// design; construct with [`ConnectionConfig::builder`] to override
/// only the fields that matter for a given deployment.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Default per-call deadline, used unless a call overrides it.
    pub request_timeout: Duration,
    /// Deadline for the initialize handshake after `up`.
    pub init_timeout: Duration,
    /// Floor of the exponential backoff delay.
    pub backoff_min: Duration,
    /// Ceiling of the exponential backoff delay.
    pub backoff_max: Duration,
    /// Multiplicative jitter factor applied to backoff delays, e.g.
    /// `0.2` for ±20%.
    pub backoff_jitter: f64,
    /// Hard ceiling on an inbound frame's byte size.
    pub max_frame_bytes: usize,
    /// Total send attempts for one id, including the first.
    pub send_retry_attempts: u32,
    /// Base delay between send retries, before jitter.
    pub send_retry_delay: Duration,
    /// Multiplicative jitter factor applied to `send_retry_delay`.
    pub send_retry_jitter: f64,
    /// Interval between tombstone sweeps.
    pub tombstone_sweep_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            init_timeout: Duration::from_secs(10),
            backoff_min: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            backoff_jitter: 0.2,
            max_frame_bytes: 16 * 1024 * 1024,
            send_retry_attempts: 3,
            send_retry_delay: Duration::from_millis(10),
            send_retry_jitter: 0.5,
            tombstone_sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ConnectionConfig {
    /// Start a [`ConnectionConfigBuilder`] seeded with defaults.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Tombstone TTL per §4.3: `request_timeout + init_timeout +
    /// backoff_max + epsilon`. Deliberately ignores per-call timeout
    /// overrides.
    pub fn tombstone_ttl(&self) -> Duration {
        self.request_timeout + self.init_timeout + self.backoff_max + Self::EPSILON
    }

    /// Clock-granularity/jitter absorption constant used by
    /// [`Self::tombstone_ttl`].
    pub const EPSILON: Duration = Duration::from_secs(5);

    /// Reject mutually contradictory values that are each individually
    /// well-typed (e.g. an inverted backoff range).
    pub fn validate(&self) -> Result<(), ConnectionError> {
        if self.backoff_min > self.backoff_max {
            return Err(ConnectionError::Config(format!(
                "backoff_min ({:?}) exceeds backoff_max ({:?})",
                self.backoff_min, self.backoff_max
            )));
        }
        if self.send_retry_attempts == 0 {
            return Err(ConnectionError::Config(
                "send_retry_attempts must be at least 1".into(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConnectionError::Config(
                "max_frame_bytes must be nonzero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(ConnectionError::Config(
                "backoff_jitter must be within [0.0, 1.0]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.send_retry_jitter) {
            return Err(ConnectionError::Config(
                "send_retry_jitter must be within [0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ConnectionConfig`], following the teacher's
/// field-by-field construction style.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfigBuilder {
    inner: ConnectionConfig,
}

macro_rules! setter {
    ($name:ident, $ty:ty) => {
        /// Overrides the corresponding `ConnectionConfig` field.
        pub fn $name(mut self, value: $ty) -> Self {
            self.inner.$name = value;
            self
        }
    };
}

impl ConnectionConfigBuilder {
    setter!(request_timeout, Duration);
    setter!(init_timeout, Duration);
    setter!(backoff_min, Duration);
    setter!(backoff_max, Duration);
    setter!(backoff_jitter, f64);
    setter!(max_frame_bytes, usize);
    setter!(send_retry_attempts, u32);
    setter!(send_retry_delay, Duration);
    setter!(send_retry_jitter, f64);
    setter!(tombstone_sweep_interval, Duration);

    /// Validate and produce the final [`ConnectionConfig`].
    pub fn build(self) -> Result<ConnectionConfig, ConnectionError> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}
