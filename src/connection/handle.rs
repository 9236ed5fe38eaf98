//! [`ConnectionHandle`]: the public, cloneable front door onto a running
//! Connection actor. Every method just encodes an [`Event`] and awaits
//! its outcome; all the actual state lives in [`super::actor::ConnectionActor`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::connection::actor::SharedServerCapabilities;
use crate::connection::events::Event;
use crate::error::CallError;
use crate::types::ServerCapabilities;

/// A cheaply cloneable reference to a running Connection.
///
/// The inner sender is wrapped so the Supervisor can swap it for a
/// fresh one after a restart without invalidating handles callers are
/// already holding.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub(crate) cmd_tx: Arc<Mutex<mpsc::UnboundedSender<Event>>>,
    pub(crate) server_capabilities: SharedServerCapabilities,
}

impl ConnectionHandle {
    /// Issue a request and await its terminal outcome.
    ///
    /// `timeout` overrides `request_timeout` for this call only. Returns
    /// as soon as the Connection actor resolves the request: on
    /// success, on a JSON-RPC error response, on the per-request
    /// deadline, or if the connection is lost or unavailable.
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, CallError> {
        let (reply, reply_rx) = oneshot::channel();
        let event = Event::Call {
            method: method.into(),
            params,
            timeout,
            reply,
        };
        let tx = self.cmd_tx.lock().await.clone();
        if tx.send(event).is_err() {
            return Err(CallError::Transport {
                reason: "connection actor unavailable".to_string(),
            });
        }
        match reply_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(CallError::Transport {
                reason: "connection actor lost before replying".to_string(),
            }),
        }
    }

    /// Fire-and-forget a notification. Silently dropped if the
    /// connection is not `ready`; there is no outcome to observe.
    pub async fn notify(&self, method: impl Into<String>, params: Option<serde_json::Value>) {
        let tx = self.cmd_tx.lock().await.clone();
        let _ = tx.send(Event::Notify {
            method: method.into(),
            params,
        });
    }

    /// Gracefully shut the connection down: fail every in-flight call
    /// with [`CallError::Shutdown`], close the transport, and stop
    /// accepting new work. Idempotent.
    ///
    /// `wait` bounds how long this call blocks for the actor to confirm
    /// the shutdown; `None` waits indefinitely. On a `wait` timeout the
    /// stop request has still been sent and will be processed — this
    /// call simply stops waiting for its confirmation.
    pub async fn stop(&self, wait: Option<Duration>) {
        let (reply, reply_rx) = oneshot::channel();
        let tx = self.cmd_tx.lock().await.clone();
        if tx.send(Event::Stop { reply }).is_err() {
            return;
        }
        match wait {
            Some(bound) => {
                let _ = tokio::time::timeout(bound, reply_rx).await;
            }
            None => {
                let _ = reply_rx.await;
            }
        }
    }

    /// The capabilities negotiated at the last successful handshake.
    /// `None` unless the connection is currently `ready`, or `closing`
    /// after having reached `ready` earlier in its current session.
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.server_capabilities.lock().unwrap().clone()
    }
}
