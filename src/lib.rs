//! mcp-connect - the connection lifecycle core of a Model Context
//! Protocol client.
//!
//! This crate owns exactly one concern: a bidirectional JSON-RPC 2.0
//! peer with a connection lifecycle state machine, request/response
//! correlation, active-once transport flow control, and graceful
//! shutdown. Feature-layer concerns (Tools, Resources, Prompts,
//! Sampling, Roots, Logging, notification routing, connection pooling)
//! are out of scope; a feature layer is expected to sit on top of
//! [`ConnectionHandle`].
//!
//! # Architecture
//!
//! - `state`: the five-state connection lifecycle and its transition
//!   legality
//! - `tables`: the Request, Retry, and Tombstone bookkeeping that makes
//!   correlation, bounded send retry, and late-response suppression
//!   possible
//! - `backoff`: exponential reconnect backoff with jitter
//! - `connection`: the actor that drives the state machine, plus the
//!   handle callers use to issue calls
//! - `supervisor`: restarts the Connection (and its Transport) if the
//!   actor task panics
//! - `transport`: the narrow message contract a concrete transport
//!   implements, plus a stdio transport and a test double
//! - `types`: JSON-RPC wire primitives and the `initialize` handshake
//!   shapes
//! - `error`, `config`: ambient support
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! use mcp_connect::config::ConnectionConfig;
//! use mcp_connect::transport::stdio::StdioTransport;
//! use mcp_connect::types::Implementation;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client_info = Implementation {
//!         name: "example-client".to_string(),
//!         version: "0.1.0".to_string(),
//!         description: None,
//!     };
//!     let transport_factory: mcp_connect::transport::TransportFactory =
//!         Arc::new(move |events| {
//!             Box::pin(async move {
//!                 StdioTransport::spawn(
//!                     PathBuf::from("mcp-server"),
//!                     vec![],
//!                     Default::default(),
//!                     None,
//!                     events,
//!                 )
//!                 .await
//!                 .map(|t| Box::new(t) as Box<dyn mcp_connect::transport::Transport>)
//!             })
//!         });
//!     let notification_handler = Arc::new(|_params: serde_json::Value| {});
//!
//!     let handle = mcp_connect::start(
//!         ConnectionConfig::default(),
//!         client_info,
//!         transport_factory,
//!         notification_handler,
//!     )
//!     .await?;
//!
//!     let _ = handle.call("tools/list", None, None).await;
//!     handle.stop(None).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod supervisor;
pub mod transport;
pub mod types;

pub use config::ConnectionConfig;
pub use connection::{ConnectionHandle, ConnectionState, NotificationHandler};
pub use error::{CallError, ConnectionError, Result};
pub use supervisor::start;
