//! Stream framing: bytes in, messages out.
//!
//! # Data Flow
//! ```text
//! TcpStream / any AsyncRead
//!     → framer.rs (start line → header block → body, budget, starvation timer)
//!     → MessageParser (pluggable header grammar)
//!     → FrameEvent::Message  → Dispatcher::dispatch
//!     → FrameEvent::Rejected → Dispatcher::report_rejection
//!     → Err(FrameError)      → connection closes
//! ```
//!
//! # Design Decisions
//! - One framer per connection, driven by that connection's task
//! - Per-message problems are values, connection-ending problems are errors
//! - Size limits are per message and reset at every start line

pub mod budget;
pub mod error;
pub mod framer;
pub mod message;

pub use budget::SizeBudget;
pub use error::{FrameError, ParseFailure, RejectReason};
pub use framer::{
    ConnectionSummary, FrameEvent, Framer, FramerSettings, FramerState, OversizeBodyPolicy,
};
pub use message::FramedMessage;
