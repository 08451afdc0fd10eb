//! Cursor-based lexer.
//!
//! # Responsibilities
//! - Classify input into [`Token`]s against the active grammar context
//! - Provide the consume-while scanners the parser routines build on
//! - Scan quoted strings and comments with backslash escapes
//! - Support backtracking through [`Lexer::mark`] / [`Lexer::rewind`]
//!
//! # Design Decisions
//! - Scanning is byte oriented; every stop condition is an ASCII byte, so
//!   slices always land on UTF-8 boundaries
//! - Peeking works on a copy of the cursor and never moves the lexer

use crate::lexer::error::ParseError;
use crate::lexer::keywords::{GrammarContext, GrammarTables};
use crate::lexer::token::{is_safe_char, is_token_char, is_whitespace, Token, TokenKind};

/// A saved lexer position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor(usize);

impl Cursor {
    /// Byte offset into the input.
    pub fn offset(self) -> usize {
        self.0
    }
}

/// Lexer over an immutable input slice.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    tables: &'a GrammarTables,
    context: GrammarContext,
}

impl<'a> Lexer<'a> {
    /// Create a lexer positioned at the start of `input`.
    pub fn new(input: &'a str, tables: &'a GrammarTables) -> Self {
        Self {
            input,
            pos: 0,
            tables,
            context: GrammarContext::Plain,
        }
    }

    /// Builder-style context selection.
    pub fn with_context(mut self, context: GrammarContext) -> Self {
        self.context = context;
        self
    }

    /// Switch the keyword table used for classification.
    pub fn set_context(&mut self, context: GrammarContext) {
        self.context = context;
    }

    pub fn context(&self) -> GrammarContext {
        self.context
    }

    pub fn tables(&self) -> &'a GrammarTables {
        self.tables
    }

    pub fn input(&self) -> &'a str {
        self.input
    }

    /// Current byte offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Unconsumed input.
    pub fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Save the current position.
    pub fn mark(&self) -> Cursor {
        Cursor(self.pos)
    }

    /// Restore a position returned by [`mark`](Self::mark).
    pub fn rewind(&mut self, mark: Cursor) {
        self.pos = mark.0.min(self.input.len());
    }

    /// Byte `k` positions ahead of the cursor.
    pub fn lookahead(&self, k: usize) -> Option<u8> {
        self.input.as_bytes().get(self.pos.saturating_add(k)).copied()
    }

    /// Advance `n` bytes, stopping at the end of input.
    pub fn consume(&mut self, n: usize) {
        let mut end = self.pos.saturating_add(n).min(self.input.len());
        while !self.input.is_char_boundary(end) {
            end += 1;
        }
        self.pos = end;
    }

    /// Skip SP / HTAB; returns how many bytes were skipped.
    pub fn skip_whitespace(&mut self) -> usize {
        self.take_while(is_whitespace).len()
    }

    /// Consume the maximal run of bytes satisfying `pred`.
    pub fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let (value, end) = self.scan_while(self.pos, pred);
        self.pos = end;
        value
    }

    /// RFC 3261 token characters.
    pub fn take_token(&mut self) -> &'a str {
        self.take_while(is_token_char)
    }

    /// Token characters plus URI punctuation.
    pub fn take_safe(&mut self) -> &'a str {
        self.take_while(is_safe_char)
    }

    /// Everything up to the next SP, HTAB, CR or LF.
    pub fn take_until_whitespace(&mut self) -> &'a str {
        self.take_while(|b| !is_whitespace(b) && b != b'\r' && b != b'\n')
    }

    pub fn take_digits(&mut self) -> &'a str {
        self.take_while(|b| b.is_ascii_digit())
    }

    /// Consume the next unit if it matches `kind`.
    pub fn match_token(&mut self, kind: TokenKind) -> Result<Token<'a>, ParseError> {
        let start = self.pos;
        let matched = match kind {
            TokenKind::Char(c) => {
                if self.lookahead(0) == Some(c) {
                    self.pos += self.rest().chars().next().map_or(1, char::len_utf8);
                    true
                } else {
                    false
                }
            }
            TokenKind::Alpha => self.match_one(|b| b.is_ascii_alphabetic()),
            TokenKind::Digit => self.match_one(|b| b.is_ascii_digit()),
            TokenKind::Id => !self.take_token().is_empty(),
            TokenKind::Safe => !self.take_safe().is_empty(),
            TokenKind::Ipv6 => self.match_ipv6(),
            TokenKind::Keyword(keyword) => {
                let word = self.take_token();
                !word.is_empty() && self.tables.lookup(self.context, word) == Some(keyword)
            }
        };

        if matched {
            Ok(Token::new(kind, &self.input[start..self.pos]))
        } else {
            self.pos = start;
            Err(self.error(format!("expected {}", self.describe(kind))))
        }
    }

    /// Consume one literal character.
    pub fn match_char(&mut self, c: u8) -> Result<Token<'a>, ParseError> {
        self.match_token(TokenKind::Char(c))
    }

    /// The next token, without consuming it.
    pub fn peek_token(&self) -> Option<Token<'a>> {
        self.classify(self.pos).map(|(token, _)| token)
    }

    /// Up to `n` upcoming tokens, without consuming them.
    ///
    /// Whitespace between tokens is skipped in the lookahead only.
    pub fn peek_tokens(&self, n: usize) -> Vec<Token<'a>> {
        let mut tokens = Vec::with_capacity(n);
        let mut at = self.pos;
        while tokens.len() < n {
            let (_, after_ws) = self.scan_while(at, is_whitespace);
            match self.classify(after_ws) {
                Some((token, next)) => {
                    tokens.push(token);
                    at = next;
                }
                None => break,
            }
        }
        tokens
    }

    /// Scan a quoted string starting at the opening `"`.
    ///
    /// Returns the content between the quotes with escapes left in place.
    pub fn quoted_string(&mut self) -> Result<&'a str, ParseError> {
        self.delimited(b'"', b'"', false)
    }

    /// Scan a parenthesised comment starting at `(`; comments may nest.
    pub fn comment(&mut self) -> Result<&'a str, ParseError> {
        self.delimited(b'(', b')', true)
    }

    /// Build a [`ParseError`] at the current position.
    pub fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.input, self.pos)
    }

    fn scan_while(&self, from: usize, pred: impl Fn(u8) -> bool) -> (&'a str, usize) {
        let bytes = self.input.as_bytes();
        let mut end = from;
        while end < bytes.len() && pred(bytes[end]) {
            end += 1;
        }
        while !self.input.is_char_boundary(end) {
            end -= 1;
        }
        (&self.input[from..end], end)
    }

    fn classify(&self, at: usize) -> Option<(Token<'a>, usize)> {
        let first = *self.input.as_bytes().get(at)?;
        if is_token_char(first) {
            let (word, end) = self.scan_while(at, is_token_char);
            let kind = match self.tables.lookup(self.context, word) {
                Some(keyword) => TokenKind::Keyword(keyword),
                None => TokenKind::Id,
            };
            Some((Token::new(kind, word), end))
        } else {
            let end = at + self.input[at..].chars().next().map_or(1, char::len_utf8);
            Some((Token::new(TokenKind::Char(first), &self.input[at..end]), end))
        }
    }

    fn match_one(&mut self, pred: impl Fn(u8) -> bool) -> bool {
        match self.lookahead(0) {
            Some(b) if pred(b) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn match_ipv6(&mut self) -> bool {
        if self.lookahead(0) != Some(b'[') {
            return false;
        }
        let (inner, end) = self.scan_while(self.pos + 1, |b| b.is_ascii_hexdigit() || b == b':' || b == b'.');
        if inner.is_empty() || self.input.as_bytes().get(end) != Some(&b']') {
            return false;
        }
        self.pos = end + 1;
        true
    }

    fn delimited(&mut self, open: u8, close: u8, nested: bool) -> Result<&'a str, ParseError> {
        let start = self.pos;
        if self.lookahead(0) != Some(open) {
            return Err(self.error(format!("expected '{}'", open as char)));
        }

        let bytes = self.input.as_bytes();
        let mut depth = 1usize;
        let mut i = start + 1;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b if b == close => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos = i + 1;
                        return Ok(&self.input[start + 1..i]);
                    }
                    i += 1;
                }
                b if nested && b == open => {
                    depth += 1;
                    i += 1;
                }
                _ => i += 1,
            }
        }

        Err(ParseError::new(
            format!("unterminated '{}'", open as char),
            self.input,
            self.input.len(),
        ))
    }

    fn describe(&self, kind: TokenKind) -> String {
        match kind {
            TokenKind::Keyword(keyword) => match self.tables.canonical(keyword) {
                Some(text) => format!("'{text}'"),
                None => format!("{} keyword", self.context),
            },
            other => other.to_string(),
        }
    }
}
