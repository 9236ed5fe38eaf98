//! The Request, Retry, and Tombstone tables (§3): the per-Connection
//! bookkeeping that makes response correlation, bounded send retry, and
//! late-response suppression possible.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::CallError;

/// The outcome channel for one in-flight `call`.
pub type ReplyTx = oneshot::Sender<Result<serde_json::Value, CallError>>;

/// One in-flight call (§3 "Request Record").
pub struct RequestRecord {
    /// The method this request invoked, kept for logging/tracing.
    pub method: String,
    /// When the request was accepted, for tracing/latency accounting.
    pub started_at: Instant,
    /// The per-call timeout in effect for this request.
    pub timeout: Duration,
    /// The session counter value when this id was issued. A response
    /// whose session does not match the Connection's current session is
    /// treated as a tombstone hit even if the id is technically still
    /// present (defensive; in practice the table is cleared on every
    /// state change out of `ready`, so this rarely fires).
    pub session_id: u64,
    /// Delivers the terminal outcome to the caller. `None` after it has
    /// been consumed, which should never observably happen twice.
    pub reply: Option<ReplyTx>,
}

/// One request awaiting send retry after a transient `busy` (§3 "Retry Record").
pub struct RetryRecord {
    /// The fully encoded JSON-RPC frame, ready to resend verbatim.
    pub frame: String,
    /// The method, kept for logging.
    pub method: String,
    /// The per-call timeout to install once the retry succeeds and the
    /// record is promoted into the Request table. `None` for a `notify`
    /// retry, which has no timer.
    pub timeout: Option<Duration>,
    /// `Some` for a `call` (delivers the eventual outcome), `None` for a
    /// `notify` (fire-and-forget; exhaustion is only logged).
    pub reply: Option<ReplyTx>,
    /// Attempts made so far, including the first. Bounded by
    /// `send_retry_attempts`.
    pub attempt: u32,
}

/// Pending-call and in-retry tables, keyed by request id.
#[derive(Default)]
pub struct RequestTable {
    requests: HashMap<u64, RequestRecord>,
}

impl RequestTable {
    /// Insert a freshly-sent call's record. Per P2, the id must not
    /// already be present in this table or the retry table.
    pub fn insert(&mut self, id: u64, record: RequestRecord) {
        self.requests.insert(id, record);
    }

    /// Remove and return a record by id, e.g. on matching response,
    /// timeout, transport loss, or shutdown.
    pub fn remove(&mut self, id: u64) -> Option<RequestRecord> {
        self.requests.remove(&id)
    }

    /// Whether `id` currently has an in-flight request.
    pub fn contains(&self, id: u64) -> bool {
        self.requests.contains_key(&id)
    }

    /// Number of in-flight requests, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the table holds no in-flight requests.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Drain every record, e.g. on `transport_down` or `stop`.
    pub fn drain(&mut self) -> Vec<(u64, RequestRecord)> {
        self.requests.drain().collect()
    }
}

/// Send-retry bookkeeping, keyed by request id.
#[derive(Default)]
pub struct RetryTable {
    retries: HashMap<u64, RetryRecord>,
}

impl RetryTable {
    /// Insert or replace the retry record for `id`.
    pub fn insert(&mut self, id: u64, record: RetryRecord) {
        self.retries.insert(id, record);
    }

    /// Remove and return a record by id, e.g. on send success or
    /// attempt-cap exhaustion.
    pub fn remove(&mut self, id: u64) -> Option<RetryRecord> {
        self.retries.remove(&id)
    }

    /// Borrow a record mutably to bump its attempt counter in place.
    pub fn get_mut(&mut self, id: u64) -> Option<&mut RetryRecord> {
        self.retries.get_mut(&id)
    }

    /// Number of ids currently retrying, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.retries.len()
    }

    /// Drain every record, e.g. on entering `closing`.
    pub fn drain(&mut self) -> Vec<(u64, RetryRecord)> {
        self.retries.drain().collect()
    }
}

/// Retired ids, so a late response can be dropped rather than
/// misdelivered (§3 "Tombstone", §4.3).
#[derive(Default)]
pub struct TombstoneTable {
    entries: HashMap<u64, Instant>,
}

impl TombstoneTable {
    /// Retire `id` as of now.
    pub fn insert(&mut self, id: u64) {
        self.entries.insert(id, Instant::now());
    }

    /// Whether `id` is still within its TTL. Re-checks the timestamp at
    /// lookup time (rather than relying solely on the periodic sweep)
    /// so a response arriving in the window between expiry and the next
    /// sweep is still correctly dropped; an expired entry found here is
    /// evicted immediately.
    pub fn is_live(&mut self, id: u64, ttl: Duration) -> bool {
        match self.entries.get(&id) {
            Some(inserted_at) if inserted_at.elapsed() < ttl => true,
            Some(_) => {
                self.entries.remove(&id);
                false
            }
            None => false,
        }
    }

    /// Remove every entry older than `ttl`. Idempotent: running twice at
    /// the same instant yields the same surviving set (L2).
    pub fn sweep(&mut self, ttl: Duration) {
        self.entries.retain(|_, inserted_at| inserted_at.elapsed() < ttl);
    }

    /// Number of live tombstones, for tests and diagnostics (not
    /// TTL-checked; only meaningful right after a sweep).
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_pair() -> (ReplyTx, oneshot::Receiver<Result<serde_json::Value, CallError>>) {
        oneshot::channel()
    }

    #[test]
    fn request_table_insert_remove_roundtrip() {
        let mut table = RequestTable::default();
        let (tx, _rx) = reply_pair();
        table.insert(
            1,
            RequestRecord {
                method: "tools/list".into(),
                started_at: Instant::now(),
                timeout: Duration::from_secs(1),
                session_id: 0,
                reply: Some(tx),
            },
        );
        assert!(table.contains(1));
        assert_eq!(table.len(), 1);
        let record = table.remove(1).unwrap();
        assert_eq!(record.method, "tools/list");
        assert!(!table.contains(1));
    }

    #[test]
    fn retry_table_attempt_bump() {
        let mut table = RetryTable::default();
        table.insert(
            1,
            RetryRecord {
                frame: "{}".into(),
                method: "tools/list".into(),
                timeout: Some(Duration::from_secs(1)),
                reply: None,
                attempt: 1,
            },
        );
        table.get_mut(1).unwrap().attempt += 1;
        assert_eq!(table.get_mut(1).unwrap().attempt, 2);
        assert_eq!(table.len(), 1);
        assert!(table.remove(1).is_some());
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn tombstone_is_live_until_ttl_then_expires() {
        let mut table = TombstoneTable::default();
        table.insert(7);
        assert!(table.is_live(7, Duration::from_millis(50)));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!table.is_live(7, Duration::from_millis(50)));
        // The lazy check above should have evicted it.
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn tombstone_unknown_id_is_not_live() {
        let mut table = TombstoneTable::default();
        assert!(!table.is_live(99, Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let mut table = TombstoneTable::default();
        table.insert(1);
        table.insert(2);
        tokio::time::sleep(Duration::from_millis(30)).await;
        table.sweep(Duration::from_millis(10));
        let after_first = table.len();
        table.sweep(Duration::from_millis(10));
        assert_eq!(after_first, table.len());
        assert_eq!(after_first, 0);
    }
}
