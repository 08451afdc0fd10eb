//! Shared `name [ '=' value ]` parameter grammar.

use crate::lexer::{Lexer, ParseError, TokenKind};

/// A parsed `name [ '=' value ]` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameValue {
    pub name: String,
    /// `Some("")` for a bare flag, `None` when the value after the
    /// separator could not be parsed.
    pub value: Option<String>,
    /// The parameter had no separator at all (e.g. `;lr`).
    pub is_flag: bool,
    /// The value was a quoted string; quotes are stripped, escapes kept.
    pub is_quoted: bool,
}

impl NameValue {
    /// A bare flag parameter.
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(String::new()),
            is_flag: true,
            is_quoted: false,
        }
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// Ordered parameter list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters(Vec<NameValue>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, param: NameValue) {
        self.0.push(param);
    }

    /// First parameter named `name`, compared ASCII case-insensitively.
    pub fn get(&self, name: &str) -> Option<&NameValue> {
        self.0.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Value of the first parameter named `name`.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(NameValue::value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NameValue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parse `name [ separator value ]` at the lexer's position.
///
/// A missing name is an error. A value that fails to parse after the
/// separator is not: the pair comes back with `value: None` and the cursor
/// is left just after the separator.
pub fn parse_name_value(lexer: &mut Lexer<'_>, separator: u8) -> Result<NameValue, ParseError> {
    lexer.skip_whitespace();
    let name = lexer.match_token(TokenKind::Id)?.value.to_string();
    lexer.skip_whitespace();

    if lexer.match_char(separator).is_err() {
        return Ok(NameValue::flag(name));
    }

    lexer.skip_whitespace();
    let after_separator = lexer.mark();
    let value = match lexer.lookahead(0) {
        Some(b'"') => lexer.quoted_string().map(|v| (v, true)),
        Some(b'[') => lexer.match_token(TokenKind::Ipv6).map(|t| (t.value, false)),
        _ => lexer.match_token(TokenKind::Id).map(|t| (t.value, false)),
    };

    match value {
        Ok((value, is_quoted)) => Ok(NameValue {
            name,
            value: Some(value.to_string()),
            is_flag: false,
            is_quoted,
        }),
        Err(err) => {
            tracing::trace!(parameter = %name, error = %err, "Unparsable parameter value");
            lexer.rewind(after_separator);
            Ok(NameValue {
                name,
                value: None,
                is_flag: false,
                is_quoted: false,
            })
        }
    }
}

/// Parse `*( ';' name [ '=' value ] )`.
pub fn parse_parameters(lexer: &mut Lexer<'_>) -> Result<Parameters, ParseError> {
    let mut params = Parameters::new();
    loop {
        lexer.skip_whitespace();
        if lexer.match_char(b';').is_err() {
            break;
        }
        params.push(parse_name_value(lexer, b'=')?);
    }
    Ok(params)
}
