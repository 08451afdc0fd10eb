//! A complete message cut from the stream.

use bytes::Bytes;

use crate::lexer::Keyword;
use crate::net::connection::ConnectionInfo;
use crate::parser::{CSeq, HeaderLine, ParsedHead, StartLine};

/// A framed, parsed message ready for delivery.
#[derive(Debug, Clone)]
pub struct FramedMessage {
    pub connection: ConnectionInfo,
    pub start_line: StartLine,
    pub headers: Vec<HeaderLine>,
    pub call_id: String,
    pub cseq: Option<CSeq>,
    pub content_length: usize,
    /// Header block exactly as received, blank line excluded.
    pub head: String,
    pub body: Bytes,
}

impl FramedMessage {
    pub(crate) fn new(connection: ConnectionInfo, head: String, parsed: ParsedHead, body: Bytes) -> Self {
        Self {
            connection,
            start_line: parsed.start_line,
            headers: parsed.headers,
            call_id: parsed.call_id,
            cseq: parsed.cseq,
            content_length: parsed.content_length,
            head,
            body,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn is_request(&self) -> bool {
        self.start_line.is_request()
    }

    /// First header matching a known keyword (full or compact name).
    pub fn header(&self, keyword: Keyword) -> Option<&HeaderLine> {
        self.headers.iter().find(|h| h.is(keyword))
    }

    /// Values of every header named `name`, compared case-insensitively.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Reassembled message; the blank line is written as CRLF.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.head.len() + 2 + self.body.len());
        out.extend_from_slice(self.head.as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}
