//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → server stops accepting → connection tasks aborted
//!             → ordering state released → worker pool joined
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, abort readers, drain pool
//! - Shutdown has timeout: the binary stops waiting after a deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::{spawn_signal_handler, wait_for_signal};
