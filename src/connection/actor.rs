//! The Connection actor: a single-threaded, serialized consumer of
//! [`Event`]s that implements the full lifecycle transition table
//! (§4.1), response correlation and tombstoning (§4.3), bounded send
//! retry (§4.2), and inbound frame handling (§4.4).
//!
//! Every event is handled to completion before the next is read off the
//! queue, which is what makes the per-state invariants (P1-P8)
//! straightforward to reason about: there is never a second event
//! interleaved mid-handler.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use tokio::sync::{mpsc, oneshot};

use crate::config::ConnectionConfig;
use crate::connection::backoff::{self, jittered, Backoff};
use crate::connection::events::Event;
use crate::connection::state::ConnectionState;
use crate::connection::tables::{ReplyTx, RequestRecord, RequestTable, RetryRecord, RetryTable, TombstoneTable};
use crate::error::CallError;
use crate::transport::{ActiveMode, SendOutcome, Transport, TransportEvent, TransportFactory};
use crate::types::{
    self, ClientCapabilities, Implementation, InboundMessage, InitializeParams, InitializeResponse,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ServerCapabilities, METHOD_INITIALIZE,
    METHOD_INITIALIZED,
};

/// Shared cell a [`super::handle::ConnectionHandle`] reads the
/// negotiated server capabilities from. Non-empty iff the connection is
/// currently `ready`, or `closing` after having reached `ready` at least
/// once in its current session.
pub type SharedServerCapabilities = Arc<StdMutex<Option<ServerCapabilities>>>;

/// Dispatched once per decoded inbound notification. Must not panic;
/// panics are caught and logged rather than allowed to kill the actor.
pub type NotificationHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Owns every piece of per-Connection state and drives the transition
/// table. Constructed fresh on every Supervisor restart.
pub struct ConnectionActor {
    state: ConnectionState,
    config: ConnectionConfig,
    client_info: Implementation,
    transport_factory: TransportFactory,
    notification_handler: NotificationHandler,

    transport: Option<Box<dyn Transport>>,
    transport_generation: u64,

    requests: RequestTable,
    retries: RetryTable,
    tombstones: TombstoneTable,
    backoff: Backoff,
    retry_rng: StdRng,

    /// Negotiated at the last successful handshake; shared with the
    /// `ConnectionHandle` so callers can observe it.
    server_capabilities: SharedServerCapabilities,

    next_id: u64,
    session_id: u64,
    epoch: u64,
    init_request_id: Option<u64>,

    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl ConnectionActor {
    /// Build a fresh actor. `events_tx`/`events_rx` must be a matched
    /// pair; the actor keeps its own clone of the sender alive for the
    /// whole of its lifetime so the channel never closes out from under
    /// a still-running timer task.
    ///
    /// `server_capabilities` is shared with the `ConnectionHandle` the
    /// Supervisor hands out; it is reset to `None` here so a
    /// panic-triggered restart never leaves a stale value behind from a
    /// session the new actor did not negotiate.
    pub fn new(
        config: ConnectionConfig,
        client_info: Implementation,
        transport_factory: TransportFactory,
        notification_handler: NotificationHandler,
        server_capabilities: SharedServerCapabilities,
        events_tx: mpsc::UnboundedSender<Event>,
        events_rx: mpsc::UnboundedReceiver<Event>,
    ) -> Self {
        let backoff = Backoff::new(&config);
        *server_capabilities.lock().unwrap() = None;
        Self {
            state: ConnectionState::Starting,
            config,
            client_info,
            transport_factory,
            notification_handler,
            transport: None,
            transport_generation: 0,
            requests: RequestTable::default(),
            retries: RetryTable::default(),
            tombstones: TombstoneTable::default(),
            backoff,
            retry_rng: backoff::seed_rng(),
            server_capabilities,
            next_id: 0,
            session_id: 0,
            epoch: 0,
            init_request_id: None,
            events_tx,
            events_rx,
        }
    }

    /// Run until a graceful `stop` is processed. Returning means the
    /// Supervisor should not restart; a panic mid-loop means it should.
    pub async fn run(mut self) {
        self.arm_sweep_timer();
        self.spawn_transport().await;
        while let Some(event) = self.events_rx.recv().await {
            self.handle_event(event).await;
            if matches!(self.state, ConnectionState::Closing) {
                break;
            }
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Call {
                method,
                params,
                timeout,
                reply,
            } => self.handle_call(method, params, timeout, reply).await,
            Event::Notify { method, params } => self.handle_notify(method, params).await,
            Event::Stop { reply } => self.handle_stop(reply).await,
            Event::TransportUp { generation } => self.on_transport_up(generation).await,
            Event::TransportFrame { generation, frame } => {
                self.on_transport_frame(generation, frame).await
            }
            Event::TransportDown { generation, reason } => {
                self.on_transport_down(generation, reason).await
            }
            Event::InitTimeout { epoch } => self.on_init_timeout(epoch).await,
            Event::BackoffExpired { epoch } => self.on_backoff_expired(epoch).await,
            Event::RequestTimeout { id } => self.on_request_timeout(id).await,
            Event::RetryTimer { id, attempt } => self.on_retry_timer(id, attempt).await,
            Event::SweepTombstones => self.on_sweep(),
            Event::ServerCancelAll => self.on_server_cancel_all().await,
        }
    }

    // ---- user operations ----------------------------------------------

    async fn handle_call(
        &mut self,
        method: String,
        params: Option<serde_json::Value>,
        timeout: Option<Duration>,
        reply: ReplyTx,
    ) {
        if !self.state.accepts_calls() {
            let _ = reply.send(Err(CallError::Unavailable { state: self.state }));
            return;
        }
        let id = self.next_id();
        let timeout = timeout.unwrap_or(self.config.request_timeout);
        let frame = serde_json::to_string(&JsonRpcRequest::new(id, method.clone(), params))
            .expect("JsonRpcRequest always serializes");
        self.attempt_send(id, frame, method, Some(timeout), Some(reply))
            .await;
    }

    async fn handle_notify(&mut self, method: String, params: Option<serde_json::Value>) {
        if !matches!(self.state, ConnectionState::Ready) {
            tracing::warn!(
                target: "mcp_connect::connection",
                method = %method,
                state = ?self.state,
                "dropping notify: connection not ready",
            );
            return;
        }
        self.issue_notify(method, params).await;
    }

    async fn issue_notify(&mut self, method: String, params: Option<serde_json::Value>) {
        let key = self.next_id();
        let frame = serde_json::to_string(&JsonRpcNotification::new(method.clone(), params))
            .expect("JsonRpcNotification always serializes");
        self.attempt_send(key, frame, method, None, None).await;
    }

    async fn handle_stop(&mut self, reply: oneshot::Sender<()>) {
        if matches!(self.state, ConnectionState::Closing) {
            let _ = reply.send(());
            return;
        }
        self.retire_all(CallError::Shutdown);
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.epoch = self.epoch.wrapping_add(1);
        self.state = ConnectionState::Closing;
        let _ = reply.send(());
    }

    // ---- transport events ----------------------------------------------

    async fn on_transport_up(&mut self, generation: u64) {
        if generation != self.transport_generation {
            return;
        }
        match self.state {
            ConnectionState::Starting => {
                self.state = ConnectionState::Initializing;
                self.arm_init_timer();
                self.rearm_transport();
                self.send_initialize().await;
            }
            other => {
                tracing::warn!(target: "mcp_connect::connection", state = ?other, "unexpected transport_up");
                debug_assert!(false, "transport_up only expected from starting");
            }
        }
    }

    async fn on_transport_frame(&mut self, generation: u64, frame: String) {
        if generation != self.transport_generation {
            return;
        }
        match self.state {
            ConnectionState::Initializing | ConnectionState::Ready => {
                self.handle_inbound_frame(frame).await;
            }
            ConnectionState::Backoff | ConnectionState::Closing => {
                tracing::debug!(target: "mcp_connect::connection", state = ?self.state, "dropping frame");
            }
            ConnectionState::Starting => {
                tracing::warn!(target: "mcp_connect::connection", "frame arrived before transport_up");
                debug_assert!(false, "frame before up");
            }
        }
    }

    async fn on_transport_down(&mut self, generation: u64, reason: String) {
        if generation != self.transport_generation {
            return;
        }
        match self.state {
            ConnectionState::Starting | ConnectionState::Initializing | ConnectionState::Ready => {
                self.transport = None;
                self.retire_all(CallError::Transport {
                    reason: reason.clone(),
                });
                self.enter_backoff(&reason);
            }
            ConnectionState::Backoff | ConnectionState::Closing => {
                // Already backing off or shutting down; a trailing down
                // from the transport we already abandoned is expected.
            }
        }
    }

    // ---- inbound frame handling (§4.4) ---------------------------------

    async fn handle_inbound_frame(&mut self, frame: String) {
        if frame.len() > self.config.max_frame_bytes {
            self.on_oversized_frame(frame.len()).await;
            return;
        }
        let value: serde_json::Value = match serde_json::from_str(&frame) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "mcp_connect::connection", error = %e, "non-JSON frame, dropping");
                self.rearm_transport();
                return;
            }
        };
        match types::classify(&value) {
            None => {
                tracing::warn!(target: "mcp_connect::connection", "unclassifiable frame, dropping");
            }
            Some(InboundMessage::Response(resp)) => self.handle_response(resp).await,
            Some(InboundMessage::Notification(n)) => self.handle_notification(n),
            Some(InboundMessage::ServerRequest(req)) => self.handle_server_request(req).await,
        }
        self.rearm_transport();
    }

    async fn on_oversized_frame(&mut self, size: usize) {
        tracing::error!(
            target: "mcp_connect::connection",
            frame_size = size,
            max = self.config.max_frame_bytes,
            "protocol violation: oversized frame",
        );
        self.retire_all(CallError::Transport {
            reason: "oversized frame".to_string(),
        });
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.enter_backoff("oversized frame");
    }

    async fn handle_response(&mut self, resp: JsonRpcResponse) {
        let id = match resp.id.as_u64() {
            Some(id) => id,
            None => {
                tracing::warn!(target: "mcp_connect::connection", id = ?resp.id, "response with non-numeric id, dropping");
                return;
            }
        };

        if self.state == ConnectionState::Initializing && Some(id) == self.init_request_id {
            self.complete_handshake(id, resp).await;
            return;
        }

        if let Some(record) = self.requests.remove(id) {
            if record.session_id != self.session_id {
                tracing::warn!(target: "mcp_connect::connection", id, "response from a prior session, dropping");
                return;
            }
            let outcome = match resp.error {
                Some(err) => Err(CallError::Protocol {
                    code: err.code,
                    message: err.message,
                    data: err.data,
                }),
                None => Ok(resp.result.unwrap_or(serde_json::Value::Null)),
            };
            if let Some(reply) = record.reply {
                let _ = reply.send(outcome);
            }
        } else if self.tombstones.is_live(id, self.config.tombstone_ttl()) {
            tracing::debug!(target: "mcp_connect::connection", id, "late response for tombstoned id, dropping");
        } else {
            tracing::warn!(target: "mcp_connect::connection", id, "response for unknown id, dropping");
        }
    }

    fn handle_notification(&self, n: JsonRpcNotification) {
        let handler = Arc::clone(&self.notification_handler);
        let params = n.params.clone().unwrap_or(serde_json::Value::Null);
        let method = n.method.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(params)));
        if result.is_err() {
            tracing::error!(target: "mcp_connect::connection", method = %method, "notification handler panicked");
        }
    }

    async fn handle_server_request(&self, req: JsonRpcRequest) {
        // No feature-layer request handler exists in this crate's
        // scope, so every server-initiated request is answered with a
        // standard JSON-RPC "method not found".
        let response = serde_json::json!({
            "jsonrpc": "2.0",
            "id": req.id,
            "error": {
                "code": -32601,
                "message": format!("method not found: {}", req.method),
            },
        });
        if let Ok(frame) = serde_json::to_string(&response) {
            let _ = self.send_frame(&frame).await;
        }
    }

    fn rearm_transport(&self) {
        if let Some(transport) = &self.transport {
            transport.set_active(ActiveMode::Once);
        }
    }

    // ---- handshake ------------------------------------------------------

    async fn send_initialize(&mut self) {
        let id = self.next_id();
        self.init_request_id = Some(id);
        let params = InitializeParams {
            protocol_version: types::LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: self.client_info.clone(),
        };
        let frame = serde_json::to_string(&JsonRpcRequest::new(
            id,
            METHOD_INITIALIZE,
            Some(serde_json::to_value(&params).expect("InitializeParams always serializes")),
        ))
        .expect("JsonRpcRequest always serializes");
        // No external caller awaits this directly (the handshake is
        // intercepted in `handle_response` before any table lookup), but
        // a real timeout still has to land the id in the Request table
        // so `retire_all` tombstones it on `init_timeout`/`transport_down`
        // like every other in-flight id.
        self.attempt_send(
            id,
            frame,
            METHOD_INITIALIZE.to_string(),
            Some(self.config.init_timeout),
            None,
        )
        .await;
    }

    async fn complete_handshake(&mut self, id: u64, resp: JsonRpcResponse) {
        self.init_request_id = None;
        self.requests.remove(id);

        if let Some(err) = resp.error {
            let reason = format!("initialize error {}: {}", err.code, err.message);
            tracing::warn!(target: "mcp_connect::connection", reason = %reason, "handshake rejected");
            if let Some(transport) = self.transport.take() {
                transport.close().await;
            }
            self.enter_backoff(&reason);
            return;
        }

        let result = resp.result.unwrap_or(serde_json::Value::Null);
        let parsed: Result<InitializeResponse, _> = serde_json::from_value(result);
        match parsed {
            Ok(init_resp) => match types::validate_init_response(&init_resp) {
                Ok(()) => {
                    self.session_id += 1;
                    self.backoff.reset();
                    self.state = ConnectionState::Ready;
                    *self.server_capabilities.lock().unwrap() = Some(init_resp.capabilities.clone());
                    tracing::debug!(
                        target: "mcp_connect::connection",
                        session_id = self.session_id,
                        server = %init_resp.server_info.name,
                        "handshake complete",
                    );
                    self.issue_notify(METHOD_INITIALIZED.to_string(), None).await;
                }
                Err(reason) => {
                    tracing::warn!(target: "mcp_connect::connection", reason = %reason, "malformed initialize response");
                    if let Some(transport) = self.transport.take() {
                        transport.close().await;
                    }
                    self.enter_backoff(&reason);
                }
            },
            Err(e) => {
                let reason = format!("malformed initialize response: {e}");
                tracing::warn!(target: "mcp_connect::connection", reason = %reason);
                if let Some(transport) = self.transport.take() {
                    transport.close().await;
                }
                self.enter_backoff(&reason);
            }
        }
    }

    // ---- timers ---------------------------------------------------------

    async fn on_init_timeout(&mut self, epoch: u64) {
        if epoch != self.epoch || !matches!(self.state, ConnectionState::Initializing) {
            return;
        }
        tracing::warn!(target: "mcp_connect::connection", "initialize handshake timed out");
        self.retire_all(CallError::Timeout);
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.enter_backoff("initialize handshake timed out");
    }

    async fn on_backoff_expired(&mut self, epoch: u64) {
        if epoch != self.epoch || !matches!(self.state, ConnectionState::Backoff) {
            return;
        }
        self.state = ConnectionState::Starting;
        self.spawn_transport().await;
    }

    async fn on_request_timeout(&mut self, id: u64) {
        let Some(record) = self.requests.remove(id) else {
            return; // already resolved; lazy invalidation (P8)
        };
        self.tombstones.insert(id);
        tracing::warn!(target: "mcp_connect::connection", id, method = %record.method, "request timed out");
        self.send_cancellation(id).await;
        if let Some(reply) = record.reply {
            let _ = reply.send(Err(CallError::Timeout));
        }
    }

    async fn send_cancellation(&self, id: u64) {
        let note = JsonRpcNotification::cancelled(id);
        if let Ok(frame) = serde_json::to_string(&note) {
            let _ = self.send_frame(&frame).await;
        }
    }

    async fn on_retry_timer(&mut self, id: u64, fired_attempt: u32) {
        let Some(record) = self.retries.get_mut(id) else {
            return; // resolved or superseded since arming (lazy invalidation)
        };
        if record.attempt != fired_attempt {
            return; // stale timer from a prior attempt
        }
        let frame = record.frame.clone();
        match self.send_frame(&frame).await {
            SendOutcome::Ok => {
                let record = self.retries.remove(id).expect("checked above");
                if let Some(timeout) = record.timeout {
                    self.requests.insert(
                        id,
                        RequestRecord {
                            method: record.method,
                            started_at: Instant::now(),
                            timeout,
                            session_id: self.session_id,
                            reply: record.reply,
                        },
                    );
                    self.arm_request_timer(id, timeout);
                }
            }
            SendOutcome::Busy => {
                let attempt = {
                    let record = self.retries.get_mut(id).expect("checked above");
                    record.attempt += 1;
                    record.attempt
                };
                if attempt >= self.config.send_retry_attempts {
                    let record = self.retries.remove(id).expect("checked above");
                    if let Some(reply) = record.reply {
                        let _ = reply.send(Err(CallError::Backpressure { attempts: attempt }));
                    }
                } else {
                    self.arm_retry_timer(id, attempt);
                }
            }
            SendOutcome::Error(reason) => {
                let record = self.retries.remove(id).expect("checked above");
                if let Some(reply) = record.reply {
                    let _ = reply.send(Err(CallError::Transport { reason }));
                }
            }
        }
    }

    fn on_sweep(&mut self) {
        self.tombstones.sweep(self.config.tombstone_ttl());
        self.arm_sweep_timer();
    }

    async fn on_server_cancel_all(&mut self) {
        if !matches!(self.state, ConnectionState::Ready) {
            return;
        }
        self.retire_all(CallError::Transport {
            reason: "server requested re-handshake".to_string(),
        });
        self.state = ConnectionState::Initializing;
        *self.server_capabilities.lock().unwrap() = None;
        self.arm_init_timer();
        self.rearm_transport();
        self.send_initialize().await;
    }

    // ---- send path (§4.2) ------------------------------------------------

    async fn attempt_send(
        &mut self,
        key: u64,
        frame: String,
        method: String,
        timeout: Option<Duration>,
        reply: Option<ReplyTx>,
    ) {
        match self.send_frame(&frame).await {
            SendOutcome::Ok => {
                if let Some(timeout) = timeout {
                    self.requests.insert(
                        key,
                        RequestRecord {
                            method,
                            started_at: Instant::now(),
                            timeout,
                            session_id: self.session_id,
                            reply,
                        },
                    );
                    self.arm_request_timer(key, timeout);
                }
            }
            SendOutcome::Busy => {
                self.retries.insert(
                    key,
                    RetryRecord {
                        frame,
                        method,
                        timeout,
                        reply,
                        attempt: 1,
                    },
                );
                self.arm_retry_timer(key, 1);
            }
            SendOutcome::Error(reason) => {
                if let Some(reply) = reply {
                    let _ = reply.send(Err(CallError::Transport { reason }));
                }
            }
        }
    }

    /// Narrow `&self` wrapper so callers that already hold an
    /// exclusive borrow elsewhere (e.g. while mutating the retry table
    /// across an `.await`) can still issue a send.
    async fn send_frame(&self, frame: &str) -> SendOutcome {
        match &self.transport {
            Some(transport) => transport.send(frame.to_string()).await,
            None => SendOutcome::Error("no transport".to_string()),
        }
    }

    // ---- bookkeeping helpers --------------------------------------------

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn retire_all(&mut self, err: CallError) {
        for (id, record) in self.requests.drain() {
            self.tombstones.insert(id);
            if let Some(reply) = record.reply {
                let _ = reply.send(Err(err.clone()));
            }
        }
        for (id, record) in self.retries.drain() {
            self.tombstones.insert(id);
            if let Some(reply) = record.reply {
                let _ = reply.send(Err(err.clone()));
            }
        }
    }

    fn enter_backoff(&mut self, reason: &str) {
        tracing::warn!(target: "mcp_connect::connection", reason = %reason, "entering backoff");
        self.transport = None;
        self.state = ConnectionState::Backoff;
        *self.server_capabilities.lock().unwrap() = None;
        let delay = self.backoff.next_delay();
        self.arm_backoff_timer(delay);
    }

    async fn spawn_transport(&mut self) {
        self.transport_generation += 1;
        let generation = self.transport_generation;
        let (transport_tx, mut transport_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let forward_tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = transport_rx.recv().await {
                let mapped = match event {
                    TransportEvent::Up => Event::TransportUp { generation },
                    TransportEvent::Frame(frame) => Event::TransportFrame { generation, frame },
                    TransportEvent::Down(reason) => Event::TransportDown { generation, reason },
                };
                if forward_tx.send(mapped).is_err() {
                    break;
                }
            }
        });

        match (self.transport_factory)(transport_tx).await {
            Ok(transport) => self.transport = Some(transport),
            Err(e) => {
                self.transport = None;
                let _ = self.events_tx.send(Event::TransportDown {
                    generation,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn arm_init_timer(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        let epoch = self.epoch;
        let delay = self.config.init_timeout;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Event::InitTimeout { epoch });
        });
    }

    fn arm_backoff_timer(&mut self, delay: Duration) {
        self.epoch = self.epoch.wrapping_add(1);
        let epoch = self.epoch;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Event::BackoffExpired { epoch });
        });
    }

    fn arm_request_timer(&self, id: u64, timeout: Duration) {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Event::RequestTimeout { id });
        });
    }

    fn arm_retry_timer(&mut self, id: u64, attempt: u32) {
        let delay = jittered(
            self.config.send_retry_delay,
            self.config.send_retry_jitter,
            &mut self.retry_rng,
        );
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Event::RetryTimer { id, attempt });
        });
    }

    fn arm_sweep_timer(&mut self) {
        let interval = self.config.tombstone_sweep_interval;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = tx.send(Event::SweepTombstones);
        });
    }
}
