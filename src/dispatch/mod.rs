//! Message delivery to the application.
//!
//! # Data Flow
//! ```text
//! Framer
//!     → Dispatcher::dispatch(FramedMessage)
//!         inline: MessageHandler::on_message on the connection task
//!         pooled: registry[Call-ID] queue → WorkerPool job → on_message
//!     → Dispatcher::report_rejection(ParseFailure) → on_parse_error
//! ```
//!
//! # Design Decisions
//! - One dispatcher per connection; the worker pool is shared
//! - Ordering is per Call-ID only; different Call-IDs run concurrently
//! - Dropping a connection discards what its dispatcher still holds

pub mod handler;
pub mod ordering;
pub mod pool;

pub use handler::{HandlerResult, LoggingHandler, MessageHandler};
pub use ordering::{Dispatcher, ReleaseGuard};
pub use pool::{PoolError, WorkerPool};
