//! Grammar violation error.

use thiserror::Error;

/// A grammar violation found while lexing or parsing a header block.
///
/// Carries a snapshot of the buffer being parsed and the byte offset where
/// the lexer gave up, so a rejected message can be reported verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at position {position}")]
pub struct ParseError {
    message: String,
    buffer: String,
    position: usize,
}

impl ParseError {
    /// Create a new parse error.
    pub fn new(message: impl Into<String>, buffer: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            buffer: buffer.into(),
            position,
        }
    }

    /// Human readable description of what was expected.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The buffer that was being parsed.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Byte offset into [`buffer`](Self::buffer) where parsing failed.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Re-anchor the error onto an enclosing buffer.
    ///
    /// Header values are lexed in isolation; this maps the position back
    /// into the full header block.
    pub fn relocate(self, buffer: &str, base: usize) -> Self {
        Self {
            message: self.message,
            buffer: buffer.to_string(),
            position: base + self.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_position() {
        let err = ParseError::new("expected ':'", "Via SIP/2.0", 3);
        assert_eq!(err.to_string(), "expected ':' at position 3");
        assert_eq!(err.buffer(), "Via SIP/2.0");
    }

    #[test]
    fn relocate_shifts_position() {
        let err = ParseError::new("bad digit", "12x", 2).relocate("Content-Length: 12x", 16);
        assert_eq!(err.position(), 18);
        assert_eq!(err.buffer(), "Content-Length: 12x");
    }
}
