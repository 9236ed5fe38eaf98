//! Exponential backoff with multiplicative jitter (§4.1).
//!
//! The jitter PRNG is seeded per-Connection from a mix of wall-clock
//! time and process identity so that many independent Connections
//! reconnecting at once do not thunder in lockstep.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::ConnectionConfig;

/// Tracks the current reconnect delay for one Connection.
pub struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
    jitter: f64,
    rng: StdRng,
}

impl Backoff {
    /// Build a fresh backoff tracker, floor set to `config.backoff_min`.
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            current: config.backoff_min,
            min: config.backoff_min,
            max: config.backoff_max,
            jitter: config.backoff_jitter,
            rng: seed_rng(),
        }
    }

    /// Double the current delay (capped at `backoff_max`), then return a
    /// jittered value to arm the state timeout with. Call once per entry
    /// into `backoff`.
    pub fn next_delay(&mut self) -> Duration {
        self.current = (self.current * 2).min(self.max);
        jittered(self.current, self.jitter, &mut self.rng)
    }

    /// Reset the floor, called on reaching `ready` so a later failure
    /// restarts the doubling sequence from `backoff_min`.
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// The undoubled, unjittered delay currently on file; exposed for
    /// tests and diagnostics.
    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Seed a `StdRng` from a mix of wall-clock time and process identity.
/// Exposed to the actor so its send-retry jitter uses an independently
/// seeded RNG rather than sharing the backoff tracker's.
pub fn seed_rng() -> StdRng {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let pid = std::process::id() as u128;
    let seed = (nanos ^ (pid << 64)) as u64;
    StdRng::seed_from_u64(seed)
}

/// Apply multiplicative jitter of `± factor` to `base`, e.g. `factor =
/// 0.2` varies the result within `[0.8 * base, 1.2 * base]`. Generic
/// over the RNG so callers can supply either a `Connection`'s seeded
/// `StdRng` (backoff delays) or a transient thread-local one (send
/// retry delays, which need no reconnect-storm protection).
pub fn jittered<R: Rng + ?Sized>(base: Duration, factor: f64, rng: &mut R) -> Duration {
    if factor <= 0.0 {
        return base;
    }
    let delta = rng.random_range(-factor..=factor);
    let scaled = base.as_secs_f64() * (1.0 + delta);
    Duration::from_secs_f64(scaled.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_delay_doubles_and_clamps() {
        let cfg = ConnectionConfig::builder()
            .backoff_min(Duration::from_millis(100))
            .backoff_max(Duration::from_millis(350))
            .backoff_jitter(0.0)
            .build()
            .unwrap();
        let mut backoff = Backoff::new(&cfg);
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350)); // clamped from 400
        assert_eq!(backoff.next_delay(), Duration::from_millis(350)); // stays clamped
    }

    #[test]
    fn reset_restores_floor() {
        let cfg = ConnectionConfig::builder()
            .backoff_min(Duration::from_millis(100))
            .backoff_max(Duration::from_secs(10))
            .backoff_jitter(0.0)
            .build()
            .unwrap();
        let mut backoff = Backoff::new(&cfg);
        backoff.next_delay();
        backoff.next_delay();
        assert!(backoff.current() > Duration::from_millis(100));
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut rng = seed_rng();
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let d = jittered(base, 0.2, &mut rng);
            assert!(d >= Duration::from_millis(800));
            assert!(d <= Duration::from_millis(1200));
        }
    }
}
