//! Recursive-descent parsing on top of the lexer.
//!
//! # Data Flow
//! ```text
//! header block (&str)
//!     → message.rs (start line, header lines, folding)
//!     → params.rs (shared `name [ '=' value ]` grammar)
//!     → ParsedHead { start line, headers, Content-Length, Call-ID, CSeq }
//! ```
//!
//! # Design Decisions
//! - Every routine takes `&mut Lexer` and either consumes what it parsed
//!   or fails; optional constructs back off with `mark()` / `rewind()`
//! - Optional parameter values degrade to `None` instead of failing the
//!   whole header

pub mod message;
pub mod params;

pub use message::{
    scan_content_length, CSeq, HeaderLine, MessageParser, Method, ParsedHead, SipMessageParser,
    StartLine,
};
pub use params::{parse_name_value, parse_parameters, NameValue, Parameters};
