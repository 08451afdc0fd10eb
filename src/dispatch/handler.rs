//! Application callback surface.

use crate::framing::{FramedMessage, ParseFailure};

/// Outcome of a message callback. Errors are logged and counted; they do
/// not affect other messages.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives framed messages.
///
/// In pooled mode callbacks for different Call-IDs run concurrently on
/// worker threads; callbacks for one Call-ID never overlap.
pub trait MessageHandler: Send + Sync + 'static {
    /// Called once per framed and parsed message.
    fn on_message(&self, message: FramedMessage) -> HandlerResult;

    /// Called for every rejected message, on the connection's task.
    fn on_parse_error(&self, failure: &ParseFailure) {
        tracing::debug!(
            connection = %failure.connection,
            position = failure.position,
            reason = %failure.cause,
            "Parse failure"
        );
    }
}

impl<F> MessageHandler for F
where
    F: Fn(FramedMessage) -> HandlerResult + Send + Sync + 'static,
{
    fn on_message(&self, message: FramedMessage) -> HandlerResult {
        self(message)
    }
}

/// Logs every message it receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl MessageHandler for LoggingHandler {
    fn on_message(&self, message: FramedMessage) -> HandlerResult {
        tracing::info!(
            connection = %message.connection,
            call_id = %message.call_id,
            start_line = %message.start_line,
            headers = message.headers.len(),
            body_bytes = message.body.len(),
            "Message received"
        );
        Ok(())
    }

    fn on_parse_error(&self, failure: &ParseFailure) {
        tracing::warn!(
            connection = %failure.connection,
            position = failure.position,
            reason = %failure.cause,
            "Message rejected"
        );
    }
}
