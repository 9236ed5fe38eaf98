//! Supervises one Connection actor: starts it, and restarts it
//! (rest-for-one — a fresh actor means a fresh Transport too, since the
//! actor owns it) if the actor task panics rather than exiting via a
//! graceful `stop`.
//!
//! This is the crate's only entry point: [`start`] is the `start(config,
//! transport_factory, notification_handler) -> handle` operation
//! callers invoke to bring up a Connection.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex};

use crate::config::ConnectionConfig;
use crate::connection::actor::{ConnectionActor, NotificationHandler};
use crate::connection::events::Event;
use crate::connection::handle::ConnectionHandle;
use crate::error::ConnectionError;
use crate::transport::TransportFactory;
use crate::types::Implementation;

/// Validate `config`, start a Connection actor under supervision, and
/// return a handle to it. The actor begins in `starting` and spawns its
/// first transport before this function returns.
pub async fn start(
    config: ConnectionConfig,
    client_info: Implementation,
    transport_factory: TransportFactory,
    notification_handler: NotificationHandler,
) -> Result<ConnectionHandle, ConnectionError> {
    config.validate()?;

    let (tx, rx) = mpsc::unbounded_channel();
    let shared_tx = Arc::new(Mutex::new(tx.clone()));
    let server_capabilities = Arc::new(StdMutex::new(None));
    let handle = ConnectionHandle {
        cmd_tx: Arc::clone(&shared_tx),
        server_capabilities: Arc::clone(&server_capabilities),
    };

    tokio::spawn(supervise(
        config,
        client_info,
        transport_factory,
        notification_handler,
        shared_tx,
        server_capabilities,
        tx,
        rx,
    ));

    Ok(handle)
}

async fn supervise(
    config: ConnectionConfig,
    client_info: Implementation,
    transport_factory: TransportFactory,
    notification_handler: NotificationHandler,
    shared_tx: Arc<Mutex<mpsc::UnboundedSender<Event>>>,
    server_capabilities: crate::connection::actor::SharedServerCapabilities,
    mut tx: mpsc::UnboundedSender<Event>,
    mut rx: mpsc::UnboundedReceiver<Event>,
) {
    loop {
        let actor = ConnectionActor::new(
            config.clone(),
            client_info.clone(),
            Arc::clone(&transport_factory),
            Arc::clone(&notification_handler),
            Arc::clone(&server_capabilities),
            tx.clone(),
            rx,
        );

        match tokio::spawn(actor.run()).await {
            Ok(()) => {
                tracing::debug!(target: "mcp_connect::supervisor", "connection stopped gracefully");
                break;
            }
            Err(join_error) => {
                tracing::error!(
                    target: "mcp_connect::supervisor",
                    error = %join_error,
                    "connection actor panicked, restarting",
                );
                let (new_tx, new_rx) = mpsc::unbounded_channel();
                *shared_tx.lock().await = new_tx.clone();
                tx = new_tx;
                rx = new_rx;
            }
        }
    }
}
