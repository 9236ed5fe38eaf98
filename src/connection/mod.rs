//! The Connection lifecycle core: state machine, event queue, request
//! correlation, and the public handle callers use to drive it.
//!
//! [`actor`] and [`events`] are `pub(crate)`: the actor's internals are
//! an implementation detail reached only through [`handle::ConnectionHandle`],
//! which [`crate::supervisor::start`] hands back to callers.

pub mod backoff;
pub(crate) mod actor;
pub(crate) mod events;
pub mod handle;
pub mod state;
pub mod tables;

pub use actor::NotificationHandler;
pub use handle::ConnectionHandle;
pub use state::ConnectionState;
