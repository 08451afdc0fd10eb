//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (ID, peer, live-connection count)
//!     → server.rs (JoinSet task: Framer → Dispatcher)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Connection tasks are aborted, not drained, on shutdown

pub mod connection;
pub mod listener;
pub mod server;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionInfo, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use server::{Pipeline, SipServer};
