//! Lexical analysis for SIP header text.
//!
//! # Data Flow
//! ```text
//! decoded header block (&str)
//!     → Lexer (cursor over the immutable slice)
//!     → keywords.rs (context table picks keyword vs. plain token)
//!     → Token { kind, value } handed to the parser routines
//! ```
//!
//! # Design Decisions
//! - Keyword tables live in an explicit `GrammarTables` registry built once
//!   and passed by reference; there is no global table
//! - The cursor is a plain `Copy` value, so backtracking is `mark()` then
//!   `rewind()` and independent streams never share lexer state
//! - Token kinds are a tagged enum that keeps the three bands of the wire
//!   grammar apart: literal characters, keywords, character classes

pub mod error;
pub mod keywords;
pub mod scanner;
pub mod token;

pub use error::ParseError;
pub use keywords::{GrammarContext, GrammarTables, GrammarTablesBuilder, Keyword, KeywordSpaceExhausted};
pub use scanner::{Cursor, Lexer};
pub use token::{Token, TokenKind};
