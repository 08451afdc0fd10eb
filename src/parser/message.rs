//! Header-block parsing.
//!
//! # Responsibilities
//! - Parse the start line (request line or status line)
//! - Split header lines, unfolding continuation lines
//! - Extract the values the framer and dispatcher depend on:
//!   Content-Length, Call-ID and CSeq
//!
//! # Design Decisions
//! - The framer only sees the [`MessageParser`] trait; the grammar is
//!   pluggable and [`SipMessageParser`] is the RFC 3261 default
//! - Header values stay raw strings; typed header objects are built by
//!   higher layers on demand

use std::fmt;
use std::sync::Arc;

use crate::lexer::{GrammarContext, GrammarTables, Keyword, Lexer, ParseError, TokenKind};
use crate::parser::params::{parse_parameters, Parameters};

/// The grammar used by the framer to interpret a complete header block.
pub trait MessageParser: Send + Sync + 'static {
    /// Parse a decoded header block (start line and header lines, without
    /// the terminating blank line).
    fn parse_head(&self, head: &str) -> Result<ParsedHead, ParseError>;

    /// Best-effort Content-Length of a block that failed to parse, so the
    /// framer can skip its body and stay aligned with the stream.
    fn recover_content_length(&self, head: &str) -> Option<usize> {
        scan_content_length(head)
    }
}

/// Request method; extension methods keep their text and have no keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    text: String,
    keyword: Option<Keyword>,
}

impl Method {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn keyword(&self) -> Option<Keyword> {
        self.keyword
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// First line of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request {
        method: Method,
        uri: String,
        version: String,
    },
    Response {
        version: String,
        status: u16,
        reason: String,
    },
}

impl StartLine {
    pub fn is_request(&self) -> bool {
        matches!(self, StartLine::Request { .. })
    }

    pub fn method(&self) -> Option<&Method> {
        match self {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            StartLine::Request { .. } => None,
            StartLine::Response { status, .. } => Some(*status),
        }
    }
}

impl fmt::Display for StartLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartLine::Request { method, uri, version } => write!(f, "{method} {uri} {version}"),
            StartLine::Response { version, status, reason } => write!(f, "{version} {status} {reason}"),
        }
    }
}

/// One header field as it appeared on the wire (continuations joined).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine {
    pub name: String,
    pub value: String,
    /// Set when the name is a known header, compact forms included.
    pub keyword: Option<Keyword>,
}

impl HeaderLine {
    /// Whether this header is `keyword`, by full or compact name.
    pub fn is(&self, keyword: Keyword) -> bool {
        self.keyword == Some(keyword)
    }

    /// The `;`-parameters that follow the header value.
    ///
    /// Quoted strings and `<...>` URIs are skipped so parameters embedded in
    /// a display name or URI are not picked up.
    pub fn parameters(&self, tables: &GrammarTables) -> Result<Parameters, ParseError> {
        let mut lexer = Lexer::new(&self.value, tables);
        loop {
            match lexer.lookahead(0) {
                None | Some(b';') => break,
                Some(b'"') => {
                    lexer.quoted_string()?;
                }
                Some(b'<') => {
                    lexer.take_while(|b| b != b'>');
                    lexer.match_char(b'>')?;
                }
                Some(_) => lexer.consume(1),
            }
        }
        parse_parameters(&mut lexer)
    }
}

/// `CSeq: 1*DIGIT LWS Method`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub sequence: u32,
    pub method: Method,
}

/// Result of parsing a header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHead {
    pub start_line: StartLine,
    pub headers: Vec<HeaderLine>,
    /// Declared body length; 0 when the header is absent.
    pub content_length: usize,
    pub call_id: String,
    pub cseq: Option<CSeq>,
}

/// Default RFC 3261 header-block grammar.
#[derive(Debug, Clone)]
pub struct SipMessageParser {
    tables: Arc<GrammarTables>,
}

impl SipMessageParser {
    /// Parser using the standard keyword tables.
    pub fn new() -> Self {
        Self::with_tables(Arc::new(GrammarTables::sip()))
    }

    /// Parser using caller-supplied tables (e.g. with extension keywords).
    pub fn with_tables(tables: Arc<GrammarTables>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &Arc<GrammarTables> {
        &self.tables
    }

    fn parse_start_line(&self, line: &str) -> Result<StartLine, ParseError> {
        let mut lexer = Lexer::new(line, &self.tables).with_context(GrammarContext::Version);
        let mark = lexer.mark();

        let is_response = lexer
            .match_token(TokenKind::Keyword(Keyword::SIP_VERSION))
            .and_then(|_| lexer.match_char(b'/'))
            .is_ok();
        lexer.rewind(mark);

        if is_response {
            let version = parse_version(&mut lexer)?;
            require_whitespace(&mut lexer)?;
            let code = lexer.take_digits();
            if code.len() != 3 {
                return Err(lexer.error("expected 3-digit status code"));
            }
            let status = code
                .parse::<u16>()
                .map_err(|_| lexer.error("invalid status code"))?;
            lexer.skip_whitespace();
            Ok(StartLine::Response {
                version,
                status,
                reason: lexer.rest().trim_end().to_string(),
            })
        } else {
            lexer.set_context(GrammarContext::Method);
            let method = parse_method(&mut lexer)?;
            require_whitespace(&mut lexer)?;
            let uri = lexer.take_until_whitespace();
            if uri.is_empty() {
                return Err(lexer.error("expected Request-URI"));
            }
            require_whitespace(&mut lexer)?;
            let version = parse_version(&mut lexer)?;
            lexer.skip_whitespace();
            if !lexer.is_at_end() {
                return Err(lexer.error("unexpected text after SIP version"));
            }
            Ok(StartLine::Request {
                method,
                uri: uri.to_string(),
                version,
            })
        }
    }

    fn parse_header_line(&self, line: &str) -> Result<HeaderLine, ParseError> {
        let mut lexer = Lexer::new(line, &self.tables).with_context(GrammarContext::HeaderName);
        let name = lexer.take_token();
        if name.is_empty() {
            return Err(lexer.error("expected header name"));
        }
        let keyword = self.tables.lookup(GrammarContext::HeaderName, name);
        lexer.skip_whitespace();
        lexer.match_char(b':')?;
        Ok(HeaderLine {
            name: name.to_string(),
            value: lexer.rest().trim_matches(|c| c == ' ' || c == '\t').to_string(),
            keyword,
        })
    }

    fn parse_cseq(&self, value: &str) -> Result<CSeq, ParseError> {
        let mut lexer = Lexer::new(value, &self.tables).with_context(GrammarContext::Method);
        let digits = lexer.take_digits();
        let sequence = digits
            .parse::<u32>()
            .map_err(|_| lexer.error("expected CSeq sequence number"))?;
        require_whitespace(&mut lexer)?;
        let method = parse_method(&mut lexer)?;
        lexer.skip_whitespace();
        if !lexer.is_at_end() {
            return Err(lexer.error("unexpected text after CSeq method"));
        }
        Ok(CSeq { sequence, method })
    }

    fn parse_call_id(&self, value: &str) -> Result<String, ParseError> {
        let mut lexer = Lexer::new(value, &self.tables);
        if lexer.take_while(is_word_char).is_empty() {
            return Err(lexer.error("expected Call-ID word"));
        }
        if lexer.match_char(b'@').is_ok() && lexer.take_while(is_word_char).is_empty() {
            return Err(lexer.error("expected Call-ID host after '@'"));
        }
        if !lexer.is_at_end() {
            return Err(lexer.error("unexpected text in Call-ID"));
        }
        Ok(value.to_string())
    }

    fn parse_content_length(&self, value: &str) -> Result<usize, ParseError> {
        let mut lexer = Lexer::new(value, &self.tables);
        let digits = lexer.take_digits();
        if digits.is_empty() || !lexer.is_at_end() {
            return Err(lexer.error("expected Content-Length digits"));
        }
        digits
            .parse::<usize>()
            .map_err(|_| ParseError::new("Content-Length out of range", value, 0))
    }
}

impl Default for SipMessageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageParser for SipMessageParser {
    fn parse_head(&self, head: &str) -> Result<ParsedHead, ParseError> {
        let mut lines = Lines::new(head);

        let (start_offset, first) = lines
            .next()
            .ok_or_else(|| ParseError::new("empty message", head, 0))?;
        let start_line = self
            .parse_start_line(first)
            .map_err(|e| e.relocate(head, start_offset))?;

        // (line offset, header)
        let mut headers: Vec<(usize, HeaderLine)> = Vec::new();
        for (offset, line) in lines {
            if line.is_empty() {
                continue;
            }
            if line.starts_with(&[' ', '\t'][..]) {
                let Some((_, previous)) = headers.last_mut() else {
                    return Err(ParseError::new("continuation line without header", head, offset));
                };
                let folded = line.trim_matches(|c| c == ' ' || c == '\t');
                if !folded.is_empty() {
                    if !previous.value.is_empty() {
                        previous.value.push(' ');
                    }
                    previous.value.push_str(folded);
                }
                continue;
            }
            let header = self
                .parse_header_line(line)
                .map_err(|e| e.relocate(head, offset))?;
            headers.push((offset, header));
        }

        let mut content_length: Option<usize> = None;
        let mut call_id = None;
        let mut cseq = None;
        for (offset, header) in &headers {
            let relocate = |e: ParseError| e.relocate(head, *offset);
            match header.keyword {
                Some(Keyword::CONTENT_LENGTH) => {
                    let length = self.parse_content_length(&header.value).map_err(relocate)?;
                    match content_length {
                        Some(existing) if existing != length => {
                            return Err(ParseError::new("conflicting Content-Length headers", head, *offset));
                        }
                        _ => content_length = Some(length),
                    }
                }
                Some(Keyword::CALL_ID) if call_id.is_none() => {
                    call_id = Some(self.parse_call_id(&header.value).map_err(relocate)?);
                }
                Some(Keyword::CSEQ) if cseq.is_none() => {
                    cseq = Some(self.parse_cseq(&header.value).map_err(relocate)?);
                }
                _ => {}
            }
        }

        let call_id = call_id.ok_or_else(|| ParseError::new("missing Call-ID header", head, head.len()))?;

        Ok(ParsedHead {
            start_line,
            headers: headers.into_iter().map(|(_, h)| h).collect(),
            content_length: content_length.unwrap_or(0),
            call_id,
            cseq,
        })
    }
}

/// Scan raw header lines for a Content-Length without a full parse.
pub fn scan_content_length(head: &str) -> Option<usize> {
    Lines::new(head).skip(1).find_map(|(_, line)| {
        let (name, value) = line.split_once(':')?;
        let name = name.trim();
        if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("l") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Lines of a header block with their byte offsets; CR before LF dropped.
struct Lines<'a> {
    rest: &'a str,
    offset: usize,
}

impl<'a> Lines<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text, offset: 0 }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = (usize, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let start = self.offset;
        let (line, consumed) = match self.rest.find('\n') {
            Some(idx) => (&self.rest[..idx], idx + 1),
            None => (self.rest, self.rest.len()),
        };
        self.rest = &self.rest[consumed..];
        self.offset += consumed;
        Some((start, line.strip_suffix('\r').unwrap_or(line)))
    }
}

fn parse_method(lexer: &mut Lexer<'_>) -> Result<Method, ParseError> {
    let text = match lexer.peek_token() {
        Some(token) if matches!(token.kind, TokenKind::Keyword(_) | TokenKind::Id) => token.value,
        _ => return Err(lexer.error("expected method")),
    };
    lexer.consume(text.len());
    Ok(Method {
        text: text.to_string(),
        keyword: lexer.tables().lookup(GrammarContext::Method, text),
    })
}

fn parse_version(lexer: &mut Lexer<'_>) -> Result<String, ParseError> {
    let context = lexer.context();
    lexer.set_context(GrammarContext::Version);
    let start = lexer.position();
    let result = (|| {
        lexer.match_token(TokenKind::Keyword(Keyword::SIP_VERSION))?;
        lexer.match_char(b'/')?;
        if lexer.take_digits().is_empty() {
            return Err(lexer.error("expected major version"));
        }
        lexer.match_char(b'.')?;
        if lexer.take_digits().is_empty() {
            return Err(lexer.error("expected minor version"));
        }
        Ok(())
    })();
    lexer.set_context(context);
    result.map(|()| lexer.input()[start..lexer.position()].to_string())
}

fn require_whitespace(lexer: &mut Lexer<'_>) -> Result<(), ParseError> {
    if lexer.skip_whitespace() == 0 {
        return Err(lexer.error("expected SP"));
    }
    Ok(())
}

/// RFC 3261 `word` characters (Call-ID).
fn is_word_char(b: u8) -> bool {
    crate::lexer::token::is_token_char(b)
        || matches!(
            b,
            b'(' | b')' | b'<' | b'>' | b':' | b'\\' | b'"' | b'/' | b'[' | b']' | b'?' | b'{' | b'}'
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVITE: &str = "INVITE sip:bob@biloxi.com SIP/2.0\r\n\
        Via: SIP/2.0/TCP pc33.atlanta.com;branch=z9hG4bK776asdhds\r\n\
        Max-Forwards: 70\r\n\
        To: Bob <sip:bob@biloxi.com>\r\n\
        From: \"Alice; A.\" <sip:alice@atlanta.com;x=y>;tag=1928301774\r\n\
        Call-ID: a84b4c76e66710@pc33.atlanta.com\r\n\
        CSeq: 314159 INVITE\r\n\
        Content-Length: 142\r\n";

    #[test]
    fn parses_request_head() {
        let parser = SipMessageParser::new();
        let head = parser.parse_head(INVITE).unwrap();

        assert_eq!(head.start_line.method().map(Method::as_str), Some("INVITE"));
        assert_eq!(head.start_line.method().and_then(Method::keyword), Some(Keyword::INVITE));
        assert_eq!(head.call_id, "a84b4c76e66710@pc33.atlanta.com");
        assert_eq!(head.content_length, 142);
        assert_eq!(head.headers.len(), 7);
        let cseq = head.cseq.unwrap();
        assert_eq!(cseq.sequence, 314159);
        assert_eq!(cseq.method.keyword(), Some(Keyword::INVITE));
    }

    #[test]
    fn parses_status_line() {
        let parser = SipMessageParser::new();
        let head = parser
            .parse_head("SIP/2.0 180 Ringing\r\nCall-ID: abc\r\n")
            .unwrap();
        assert_eq!(head.start_line.status(), Some(180));
        assert_eq!(head.start_line.to_string(), "SIP/2.0 180 Ringing");
        assert_eq!(head.content_length, 0);
    }

    #[test]
    fn extension_method_is_accepted() {
        let parser = SipMessageParser::new();
        let head = parser.parse_head("FOOBAR sip:x SIP/2.0\r\ni: k\r\n").unwrap();
        let method = head.start_line.method().unwrap();
        assert_eq!(method.as_str(), "FOOBAR");
        assert_eq!(method.keyword(), None);
    }

    #[test]
    fn compact_names_and_folding() {
        let parser = SipMessageParser::new();
        let head = parser
            .parse_head("OPTIONS sip:x SIP/2.0\r\ni: xyz\r\nl: 5\r\nSubject: I know\r\n  you're there\r\n")
            .unwrap();
        assert_eq!(head.call_id, "xyz");
        assert_eq!(head.content_length, 5);
        let subject = head.headers.iter().find(|h| h.is(Keyword::SUBJECT)).unwrap();
        assert_eq!(subject.value, "I know you're there");
    }

    #[test]
    fn header_parameters_skip_display_name_and_uri() {
        let parser = SipMessageParser::new();
        let head = parser.parse_head(INVITE).unwrap();
        let from = head.headers.iter().find(|h| h.is(Keyword::FROM)).unwrap();
        let params = from.parameters(parser.tables()).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params.value("tag"), Some("1928301774"));

        let via = head.headers.iter().find(|h| h.is(Keyword::VIA)).unwrap();
        assert_eq!(
            via.parameters(parser.tables()).unwrap().value("branch"),
            Some("z9hG4bK776asdhds")
        );
    }

    #[test]
    fn missing_call_id_is_rejected() {
        let parser = SipMessageParser::new();
        let err = parser.parse_head("BYE sip:x SIP/2.0\r\nCSeq: 2 BYE\r\n").unwrap_err();
        assert!(err.message().contains("Call-ID"));
    }

    #[test]
    fn malformed_header_reports_block_position() {
        let parser = SipMessageParser::new();
        let head = "BYE sip:x SIP/2.0\r\nCall-ID: a\r\nBroken header\r\n";
        let err = parser.parse_head(head).unwrap_err();
        assert_eq!(err.buffer(), head);
        assert_eq!(err.position(), "BYE sip:x SIP/2.0\r\nCall-ID: a\r\nBroken ".len());
    }

    #[test]
    fn bad_content_length_is_rejected() {
        let parser = SipMessageParser::new();
        assert!(parser
            .parse_head("BYE sip:x SIP/2.0\r\nCall-ID: a\r\nContent-Length: -3\r\n")
            .is_err());
        assert!(parser
            .parse_head("BYE sip:x SIP/2.0\r\nCall-ID: a\r\nContent-Length: 3\r\nl: 4\r\n")
            .is_err());
        assert!(parser
            .parse_head("BYE sip:x SIP/2.0\r\nCall-ID: a\r\nContent-Length: 3\r\nl: 3\r\n")
            .is_ok());
    }

    #[test]
    fn malformed_start_lines() {
        let parser = SipMessageParser::new();
        for line in [
            "INVITE sip:x\r\nCall-ID: a\r\n",
            "INVITE sip:x HTTP/1.1\r\nCall-ID: a\r\n",
            "SIP/2.0 20 OK\r\nCall-ID: a\r\n",
            ": sip:x SIP/2.0\r\nCall-ID: a\r\n",
        ] {
            assert!(parser.parse_head(line).is_err(), "{line:?} should not parse");
        }
    }

    #[test]
    fn recover_content_length_from_broken_head() {
        let parser = SipMessageParser::new();
        let head = "garbage\r\nContent-Length: 12\r\n";
        assert!(parser.parse_head(head).is_err());
        assert_eq!(parser.recover_content_length(head), Some(12));
        assert_eq!(scan_content_length("X y\r\nl:3\r\n"), Some(3));
        assert_eq!(scan_content_length("X y\r\n"), None);
    }
}
