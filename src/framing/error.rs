//! Framing outcomes that are not messages.
//!
//! [`RejectReason`] and [`ParseFailure`] describe a single message that was
//! dropped; the connection carries on. [`FrameError`] ends the connection.

use std::time::Duration;

use thiserror::Error;

use crate::lexer::ParseError;
use crate::net::connection::ConnectionInfo;

/// Why a single message was dropped.
#[derive(Debug, Error)]
pub enum RejectReason {
    #[error("grammar violation: {0}")]
    Grammar(#[from] ParseError),

    #[error("header block is not valid UTF-8")]
    Encoding,

    #[error("declared body of {declared} bytes exceeds the remaining {remaining} bytes")]
    BodyTooLarge { declared: usize, remaining: usize },
}

impl RejectReason {
    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::Grammar(_) => "grammar",
            RejectReason::Encoding => "encoding",
            RejectReason::BodyTooLarge { .. } => "body_too_large",
        }
    }
}

/// A rejected message as reported to the handler.
#[derive(Debug)]
pub struct ParseFailure {
    pub connection: ConnectionInfo,
    /// The header block as received, lossily decoded.
    pub raw: String,
    /// Byte offset into `raw` where the failure was detected.
    pub position: usize,
    pub cause: RejectReason,
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} bytes, position {})", self.cause, self.raw.len(), self.position)
    }
}

/// Conditions that terminate a connection.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("end of stream")]
    Eof,

    #[error("stream ended in the middle of a message")]
    Truncated,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no data received for {0:?}")]
    StarvationTimeout(Duration),

    #[error("message exceeds the {limit} byte limit")]
    MessageTooLarge { limit: usize },

    #[error("oversized body: {0}")]
    BodyTooLarge(ParseFailure),
}

impl FrameError {
    /// Short label used for metrics and the connection summary.
    pub fn label(&self) -> &'static str {
        match self {
            FrameError::Eof => "eof",
            FrameError::Truncated => "truncated",
            FrameError::Io(_) => "io",
            FrameError::StarvationTimeout(_) => "starvation_timeout",
            FrameError::MessageTooLarge { .. } => "message_too_large",
            FrameError::BodyTooLarge(_) => "body_too_large",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_distinct() {
        let labels = [
            FrameError::Eof.label(),
            FrameError::Truncated.label(),
            FrameError::StarvationTimeout(Duration::from_secs(1)).label(),
            FrameError::MessageTooLarge { limit: 20 }.label(),
        ];
        for (i, a) in labels.iter().enumerate() {
            for b in &labels[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn failure_display_names_the_cause() {
        let failure = ParseFailure {
            connection: ConnectionInfo::new(None),
            raw: "INVITE".to_string(),
            position: 6,
            cause: RejectReason::BodyTooLarge {
                declared: 100,
                remaining: 10,
            },
        };
        let text = failure.to_string();
        assert!(text.contains("100 bytes"));
        assert!(text.contains("position 6"));
        assert_eq!(failure.cause.label(), "body_too_large");
    }
}
