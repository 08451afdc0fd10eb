//! SIP stream protocol engine.
//!
//! Frames SIP messages out of stream connections, parses their header
//! blocks, and delivers them to an application handler, in order per
//! Call-ID.

// Grammar
pub mod lexer;
pub mod parser;

// Stream processing
pub mod dispatch;
pub mod framing;
pub mod net;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::EngineConfig;
pub use dispatch::{Dispatcher, HandlerResult, MessageHandler, WorkerPool};
pub use framing::{FramedMessage, Framer, ParseFailure};
pub use lifecycle::Shutdown;
pub use net::{Pipeline, SipServer};
