//! Grammar keyword registry.
//!
//! # Responsibilities
//! - Map uppercase keyword text to a [`Keyword`] per grammar context
//! - Recover the canonical spelling of a keyword
//! - Allow extension keywords to be registered before the tables are frozen
//!
//! # Design Decisions
//! - Built once through [`GrammarTablesBuilder`], read-only afterwards
//! - Keyword ids occupy their own band starting at [`Keyword::BASE`]

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// A grammar keyword id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Keyword(u16);

impl Keyword {
    /// First id of the keyword band.
    pub const BASE: u16 = 0x0800;

    pub const INVITE: Keyword = Keyword(0x0800);
    pub const ACK: Keyword = Keyword(0x0801);
    pub const BYE: Keyword = Keyword(0x0802);
    pub const CANCEL: Keyword = Keyword(0x0803);
    pub const REGISTER: Keyword = Keyword(0x0804);
    pub const OPTIONS: Keyword = Keyword(0x0805);
    pub const INFO: Keyword = Keyword(0x0806);
    pub const PRACK: Keyword = Keyword(0x0807);
    pub const UPDATE: Keyword = Keyword(0x0808);
    pub const SUBSCRIBE: Keyword = Keyword(0x0809);
    pub const NOTIFY: Keyword = Keyword(0x080a);
    pub const REFER: Keyword = Keyword(0x080b);
    pub const MESSAGE: Keyword = Keyword(0x080c);
    pub const PUBLISH: Keyword = Keyword(0x080d);

    /// The `SIP` of `SIP/2.0`.
    pub const SIP_VERSION: Keyword = Keyword(0x0820);

    pub const UDP: Keyword = Keyword(0x0830);
    pub const TCP: Keyword = Keyword(0x0831);
    pub const TLS: Keyword = Keyword(0x0832);
    pub const SCTP: Keyword = Keyword(0x0833);
    pub const WS: Keyword = Keyword(0x0834);
    pub const WSS: Keyword = Keyword(0x0835);

    pub const SCHEME_SIP: Keyword = Keyword(0x0840);
    pub const SCHEME_SIPS: Keyword = Keyword(0x0841);
    pub const SCHEME_TEL: Keyword = Keyword(0x0842);

    pub const CALL_ID: Keyword = Keyword(0x0860);
    pub const CONTENT_LENGTH: Keyword = Keyword(0x0861);
    pub const CSEQ: Keyword = Keyword(0x0862);
    pub const VIA: Keyword = Keyword(0x0863);
    pub const FROM: Keyword = Keyword(0x0864);
    pub const TO: Keyword = Keyword(0x0865);
    pub const CONTACT: Keyword = Keyword(0x0866);
    pub const CONTENT_TYPE: Keyword = Keyword(0x0867);
    pub const CONTENT_ENCODING: Keyword = Keyword(0x0868);
    pub const MAX_FORWARDS: Keyword = Keyword(0x0869);
    pub const ROUTE: Keyword = Keyword(0x086a);
    pub const RECORD_ROUTE: Keyword = Keyword(0x086b);
    pub const SUPPORTED: Keyword = Keyword(0x086c);
    pub const SUBJECT: Keyword = Keyword(0x086d);
    pub const EVENT: Keyword = Keyword(0x086e);
    pub const ALLOW: Keyword = Keyword(0x086f);
    pub const EXPIRES: Keyword = Keyword(0x0870);
    pub const USER_AGENT: Keyword = Keyword(0x0871);

    /// First id handed out to extension keywords.
    const EXTENSION_BASE: u16 = 0x0900;

    /// Raw id.
    pub const fn id(self) -> u16 {
        self.0
    }
}

/// Named keyword set selected while parsing a construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrammarContext {
    /// No keywords; every token is a plain `Id`.
    Plain,
    /// Request methods.
    Method,
    /// Header field names, compact forms included.
    HeaderName,
    /// The protocol name of the SIP version.
    Version,
    /// Via transports.
    Transport,
    /// URI schemes.
    Scheme,
}

impl fmt::Display for GrammarContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GrammarContext::Plain => "plain",
            GrammarContext::Method => "method",
            GrammarContext::HeaderName => "header_name",
            GrammarContext::Version => "version",
            GrammarContext::Transport => "transport",
            GrammarContext::Scheme => "scheme",
        };
        f.write_str(name)
    }
}

/// Frozen keyword tables shared by every lexer.
#[derive(Debug, Clone, Default)]
pub struct GrammarTables {
    by_context: HashMap<GrammarContext, HashMap<String, Keyword>>,
    canonical: HashMap<Keyword, String>,
}

impl GrammarTables {
    /// Start building a custom table set.
    pub fn builder() -> GrammarTablesBuilder {
        GrammarTablesBuilder::new()
    }

    /// The standard RFC 3261 keyword set.
    pub fn sip() -> Self {
        Self::sip_builder().build()
    }

    /// A builder pre-loaded with the RFC 3261 keywords, for adding extensions.
    pub fn sip_builder() -> GrammarTablesBuilder {
        use GrammarContext::*;

        let mut b = GrammarTablesBuilder::new();
        for (kw, text) in [
            (Keyword::INVITE, "INVITE"),
            (Keyword::ACK, "ACK"),
            (Keyword::BYE, "BYE"),
            (Keyword::CANCEL, "CANCEL"),
            (Keyword::REGISTER, "REGISTER"),
            (Keyword::OPTIONS, "OPTIONS"),
            (Keyword::INFO, "INFO"),
            (Keyword::PRACK, "PRACK"),
            (Keyword::UPDATE, "UPDATE"),
            (Keyword::SUBSCRIBE, "SUBSCRIBE"),
            (Keyword::NOTIFY, "NOTIFY"),
            (Keyword::REFER, "REFER"),
            (Keyword::MESSAGE, "MESSAGE"),
            (Keyword::PUBLISH, "PUBLISH"),
        ] {
            b.keyword(Method, kw, text);
        }

        b.keyword(Version, Keyword::SIP_VERSION, "SIP");

        for (kw, text) in [
            (Keyword::UDP, "UDP"),
            (Keyword::TCP, "TCP"),
            (Keyword::TLS, "TLS"),
            (Keyword::SCTP, "SCTP"),
            (Keyword::WS, "WS"),
            (Keyword::WSS, "WSS"),
        ] {
            b.keyword(Transport, kw, text);
        }

        b.keyword(Scheme, Keyword::SCHEME_SIP, "sip");
        b.keyword(Scheme, Keyword::SCHEME_SIPS, "sips");
        b.keyword(Scheme, Keyword::SCHEME_TEL, "tel");

        for (kw, text, compact) in [
            (Keyword::CALL_ID, "Call-ID", Some("i")),
            (Keyword::CONTENT_LENGTH, "Content-Length", Some("l")),
            (Keyword::CSEQ, "CSeq", None),
            (Keyword::VIA, "Via", Some("v")),
            (Keyword::FROM, "From", Some("f")),
            (Keyword::TO, "To", Some("t")),
            (Keyword::CONTACT, "Contact", Some("m")),
            (Keyword::CONTENT_TYPE, "Content-Type", Some("c")),
            (Keyword::CONTENT_ENCODING, "Content-Encoding", Some("e")),
            (Keyword::MAX_FORWARDS, "Max-Forwards", None),
            (Keyword::ROUTE, "Route", None),
            (Keyword::RECORD_ROUTE, "Record-Route", None),
            (Keyword::SUPPORTED, "Supported", Some("k")),
            (Keyword::SUBJECT, "Subject", Some("s")),
            (Keyword::EVENT, "Event", Some("o")),
            (Keyword::ALLOW, "Allow", None),
            (Keyword::EXPIRES, "Expires", None),
            (Keyword::USER_AGENT, "User-Agent", None),
        ] {
            b.keyword(HeaderName, kw, text);
            if let Some(short) = compact {
                b.alias(HeaderName, short, kw);
            }
        }

        b
    }

    /// Look up `text` (any case) in the given context.
    pub fn lookup(&self, context: GrammarContext, text: &str) -> Option<Keyword> {
        let table = self.by_context.get(&context)?;
        if text.bytes().any(|b| b.is_ascii_lowercase()) {
            table.get(&text.to_ascii_uppercase()).copied()
        } else {
            table.get(text).copied()
        }
    }

    /// Canonical spelling of a keyword.
    pub fn canonical(&self, keyword: Keyword) -> Option<&str> {
        self.canonical.get(&keyword).map(String::as_str)
    }

    /// Number of keywords known in a context, aliases included.
    pub fn len(&self, context: GrammarContext) -> usize {
        self.by_context.get(&context).map_or(0, HashMap::len)
    }
}

/// Every extension keyword id has been handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("extension keyword ids exhausted")]
pub struct KeywordSpaceExhausted;

/// Mutable builder for [`GrammarTables`].
#[derive(Debug)]
pub struct GrammarTablesBuilder {
    tables: GrammarTables,
    /// `None` once the last id has been used.
    next_extension: Option<u16>,
}

impl GrammarTablesBuilder {
    fn new() -> Self {
        Self {
            tables: GrammarTables::default(),
            next_extension: Some(Keyword::EXTENSION_BASE),
        }
    }

    /// Register `keyword` in `context` under `canonical` text.
    pub fn keyword(&mut self, context: GrammarContext, keyword: Keyword, canonical: &str) -> &mut Self {
        self.tables
            .canonical
            .entry(keyword)
            .or_insert_with(|| canonical.to_string());
        self.alias(context, canonical, keyword)
    }

    /// Register an extra spelling for an existing keyword.
    pub fn alias(&mut self, context: GrammarContext, text: &str, keyword: Keyword) -> &mut Self {
        self.tables
            .by_context
            .entry(context)
            .or_default()
            .insert(text.to_ascii_uppercase(), keyword);
        self
    }

    /// Allocate a fresh keyword id for an extension word.
    ///
    /// Registering the same text twice in a context returns the first id.
    pub fn extension(
        &mut self,
        context: GrammarContext,
        canonical: &str,
    ) -> Result<Keyword, KeywordSpaceExhausted> {
        if let Some(existing) = self.tables.lookup(context, canonical) {
            return Ok(existing);
        }
        let id = self.next_extension.ok_or(KeywordSpaceExhausted)?;
        self.next_extension = id.checked_add(1);
        let keyword = Keyword(id);
        self.keyword(context, keyword, canonical);
        Ok(keyword)
    }

    /// Freeze the tables.
    pub fn build(self) -> GrammarTables {
        self.tables
    }
}
