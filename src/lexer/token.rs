//! Token types produced by the lexer.

use std::fmt;

use crate::lexer::keywords::Keyword;

/// Classification of a lexical unit.
///
/// The wire grammar has three disjoint bands: a literal character stands
/// for itself, a keyword is a context-specific reserved word, and the
/// remaining kinds are character classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// A single literal character such as `:` or `;`.
    Char(u8),
    /// A keyword from the active grammar context.
    Keyword(Keyword),
    /// One ASCII letter.
    Alpha,
    /// One ASCII digit.
    Digit,
    /// A maximal run of RFC 3261 token characters.
    Id,
    /// A maximal run of "safe" characters (token plus URI punctuation).
    Safe,
    /// A bracketed IPv6 literal, brackets included.
    Ipv6,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Char(c) => write!(f, "'{}'", char::from(*c).escape_default()),
            TokenKind::Keyword(k) => write!(f, "keyword {:#06x}", k.id()),
            TokenKind::Alpha => write!(f, "ALPHA"),
            TokenKind::Digit => write!(f, "DIGIT"),
            TokenKind::Id => write!(f, "ID"),
            TokenKind::Safe => write!(f, "SAFE"),
            TokenKind::Ipv6 => write!(f, "IPV6"),
        }
    }
}

/// A classified slice of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// What the slice was classified as.
    pub kind: TokenKind,
    /// The matched text, borrowed from the input buffer.
    pub value: &'a str,
}

impl<'a> Token<'a> {
    pub(crate) fn new(kind: TokenKind, value: &'a str) -> Self {
        Self { kind, value }
    }

    /// Whether this token is the given keyword.
    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.kind == TokenKind::Keyword(keyword)
    }
}

/// RFC 3261 `token` characters.
pub fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(b, b'-' | b'.' | b'!' | b'%' | b'*' | b'_' | b'+' | b'`' | b'\'' | b'~')
}

/// Token characters plus the punctuation found in URIs and hosts.
pub fn is_safe_char(b: u8) -> bool {
    is_token_char(b) || matches!(b, b':' | b'/' | b'@' | b'[' | b']' | b'?' | b'&' | b'=' | b'$' | b'#')
}

/// SP or HTAB.
pub fn is_whitespace(b: u8) -> bool {
    b == b' ' || b == b'\t'
}
