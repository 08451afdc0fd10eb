//! Per-message size accounting.

use crate::framing::error::FrameError;

/// Bytes a single message may still occupy. A limit of 0 is unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBudget {
    limit: usize,
    used: usize,
}

impl SizeBudget {
    pub fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    /// Start accounting for a new message.
    pub fn reset(&mut self) {
        self.used = 0;
    }

    /// Record `bytes` against the budget.
    pub fn charge(&mut self, bytes: usize) -> Result<(), FrameError> {
        if self.limit != 0 && self.used + bytes > self.limit {
            return Err(FrameError::MessageTooLarge { limit: self.limit });
        }
        self.used += bytes;
        Ok(())
    }

    /// Bytes left, or `None` when unlimited.
    pub fn remaining(&self) -> Option<usize> {
        (self.limit != 0).then(|| self.limit.saturating_sub(self.used))
    }

    /// Whether `bytes` more would still fit.
    pub fn fits(&self, bytes: usize) -> bool {
        self.remaining().map_or(true, |left| bytes <= left)
    }

    pub fn used(&self) -> usize {
        self.used
    }
}
