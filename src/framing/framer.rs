//! Stream framer state machine.
//!
//! # Responsibilities
//! - Cut a byte stream into messages: start line, header block, body
//! - Charge every message byte to a per-message [`SizeBudget`]
//! - Bound every read with the starvation timer
//! - Turn message-level failures into [`FrameEvent::Rejected`] and keep
//!   the stream aligned by skipping the declared body
//!
//! # Design Decisions
//! - Lines are read one byte at a time from a `BufReader`, so the budget
//!   is enforced before a line is fully buffered
//! - The header block is decoded once, when complete; bodies stay bytes
//! - Discarded bodies are drained through a fixed scratch buffer

use std::future::Future;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::config::FramingConfig;
use crate::dispatch::Dispatcher;
use crate::framing::budget::SizeBudget;
use crate::framing::error::{FrameError, ParseFailure, RejectReason};
use crate::framing::message::FramedMessage;
use crate::net::connection::ConnectionInfo;
use crate::observability::metrics;
use crate::parser::MessageParser;

const DISCARD_CHUNK: usize = 4096;

/// What to do with a body that does not fit the remaining budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizeBodyPolicy {
    /// Report the message, skip the declared bytes and keep reading.
    #[default]
    Abandon,
    /// Report the message and close the connection.
    Close,
}

/// Framer limits, usually built from [`FramingConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramerSettings {
    /// Per-message byte limit; 0 is unlimited.
    pub max_message_size: usize,
    /// Starvation timer; zero disables it.
    pub read_timeout: Duration,
    pub oversize_body: OversizeBodyPolicy,
}

impl Default for FramerSettings {
    fn default() -> Self {
        Self::from(&FramingConfig::default())
    }
}

impl From<&FramingConfig> for FramerSettings {
    fn from(config: &FramingConfig) -> Self {
        Self {
            max_message_size: config.max_message_size,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            oversize_body: config.oversize_body,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerState {
    AwaitStartLine,
    AccumulateHeaders,
    ReadBody,
    Emit,
    Closed,
}

impl std::fmt::Display for FramerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FramerState::AwaitStartLine => "await_start_line",
            FramerState::AccumulateHeaders => "accumulate_headers",
            FramerState::ReadBody => "read_body",
            FramerState::Emit => "emit",
            FramerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Non-fatal outcome of framing one message.
#[derive(Debug)]
pub enum FrameEvent {
    Message(FramedMessage),
    Rejected(ParseFailure),
}

/// What happened on a connection, returned by [`Framer::run`].
#[derive(Debug)]
pub struct ConnectionSummary {
    pub connection: ConnectionInfo,
    pub messages_framed: u64,
    pub messages_rejected: u64,
    /// The error that ended the connection; [`FrameError::Eof`] on a clean close.
    pub closed_by: FrameError,
}

impl ConnectionSummary {
    pub fn is_clean(&self) -> bool {
        matches!(self.closed_by, FrameError::Eof)
    }
}

/// Cuts messages out of one stream.
pub struct Framer<R> {
    reader: BufReader<R>,
    connection: ConnectionInfo,
    parser: Arc<dyn MessageParser>,
    settings: FramerSettings,
    budget: SizeBudget,
    state: FramerState,
    line: Vec<u8>,
}

impl<R> Framer<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(
        stream: R,
        connection: ConnectionInfo,
        parser: Arc<dyn MessageParser>,
        settings: FramerSettings,
    ) -> Self {
        Self {
            reader: BufReader::new(stream),
            connection,
            parser,
            settings,
            budget: SizeBudget::new(settings.max_message_size),
            state: FramerState::AwaitStartLine,
            line: Vec::with_capacity(256),
        }
    }

    pub fn state(&self) -> FramerState {
        self.state
    }

    pub fn connection(&self) -> ConnectionInfo {
        self.connection
    }

    /// Give back the underlying stream. Buffered, unread bytes are lost.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }

    /// Frame the next message.
    ///
    /// `Ok` covers both delivered and rejected messages; any `Err` is fatal
    /// and leaves the framer in [`FramerState::Closed`].
    pub async fn next_event(&mut self) -> Result<FrameEvent, FrameError> {
        if self.state == FramerState::Closed {
            return Err(FrameError::Eof);
        }
        let result = self.frame_message().await;
        if result.is_err() {
            self.state = FramerState::Closed;
        }
        result
    }

    /// Frame messages until the stream closes, handing each to `dispatcher`.
    pub async fn run(&mut self, dispatcher: &Dispatcher) -> ConnectionSummary {
        let mut framed = 0u64;
        let mut rejected = 0u64;

        let closed_by = loop {
            match self.next_event().await {
                Ok(FrameEvent::Message(message)) => {
                    framed += 1;
                    metrics::record_message_framed();
                    tracing::trace!(
                        connection = %self.connection.id,
                        call_id = %message.call_id,
                        "Message framed"
                    );
                    dispatcher.dispatch(message);
                }
                Ok(FrameEvent::Rejected(failure)) => {
                    rejected += 1;
                    self.reject(dispatcher, &failure);
                }
                Err(err) => {
                    if let FrameError::BodyTooLarge(failure) = &err {
                        rejected += 1;
                        self.reject(dispatcher, failure);
                    }
                    break err;
                }
            }
        };

        metrics::record_connection_closed(closed_by.label());
        match &closed_by {
            FrameError::Eof => {
                tracing::debug!(connection = %self.connection, "Stream closed by peer")
            }
            err => tracing::info!(
                connection = %self.connection,
                error = %err,
                "Closing connection"
            ),
        }

        ConnectionSummary {
            connection: self.connection,
            messages_framed: framed,
            messages_rejected: rejected,
            closed_by,
        }
    }

    fn reject(&self, dispatcher: &Dispatcher, failure: &ParseFailure) {
        metrics::record_message_rejected(failure.cause.label());
        tracing::debug!(
            connection = %self.connection,
            position = failure.position,
            reason = %failure.cause,
            "Message dropped"
        );
        dispatcher.report_rejection(failure);
    }

    async fn frame_message(&mut self) -> Result<FrameEvent, FrameError> {
        self.state = FramerState::AwaitStartLine;
        self.budget.reset();

        // Keep-alive CRLFs between messages are not part of any message.
        loop {
            if !self.read_line().await? {
                return Err(FrameError::Eof);
            }
            if !is_blank(&self.line) {
                break;
            }
            self.budget.reset();
        }

        self.state = FramerState::AccumulateHeaders;
        let mut head = std::mem::take(&mut self.line);
        loop {
            if !self.read_line().await? {
                return Err(FrameError::Truncated);
            }
            if is_blank(&self.line) {
                break;
            }
            head.extend_from_slice(&self.line);
        }
        self.line = Vec::with_capacity(256);

        let head = match String::from_utf8(head) {
            Ok(head) => head,
            Err(err) => {
                let position = err.utf8_error().valid_up_to();
                let raw = String::from_utf8_lossy(err.as_bytes()).into_owned();
                let skip = self.parser.recover_content_length(&raw).unwrap_or(0);
                self.discard(skip).await?;
                return Ok(FrameEvent::Rejected(self.failure(raw, position, RejectReason::Encoding)));
            }
        };

        let parsed = match self.parser.parse_head(&head) {
            Ok(parsed) => parsed,
            Err(err) => {
                let skip = self.parser.recover_content_length(&head).unwrap_or(0);
                self.discard(skip).await?;
                let position = err.position();
                return Ok(FrameEvent::Rejected(self.failure(head, position, RejectReason::Grammar(err))));
            }
        };

        self.state = FramerState::ReadBody;
        let declared = parsed.content_length;
        if !self.budget.fits(declared) {
            let remaining = self.budget.remaining().unwrap_or(0);
            let position = head.len();
            let failure = self.failure(head, position, RejectReason::BodyTooLarge { declared, remaining });
            return match self.settings.oversize_body {
                OversizeBodyPolicy::Abandon => {
                    self.discard(declared).await?;
                    Ok(FrameEvent::Rejected(failure))
                }
                OversizeBodyPolicy::Close => Err(FrameError::BodyTooLarge(failure)),
            };
        }
        self.budget.charge(declared)?;
        let body = self.read_body(declared).await?;

        self.state = FramerState::Emit;
        Ok(FrameEvent::Message(FramedMessage::new(self.connection, head, parsed, body)))
    }

    fn failure(&self, raw: String, position: usize, cause: RejectReason) -> ParseFailure {
        ParseFailure {
            connection: self.connection,
            raw,
            position,
            cause,
        }
    }

    /// Read one line, terminator included, into `self.line`.
    ///
    /// Returns `false` when the stream ends before the first byte.
    async fn read_line(&mut self) -> Result<bool, FrameError> {
        self.line.clear();
        let Self {
            reader,
            line,
            budget,
            settings,
            ..
        } = self;
        let read = async {
            loop {
                let byte = match reader.read_u8().await {
                    Ok(byte) => byte,
                    Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                        return if line.is_empty() {
                            Ok(false)
                        } else {
                            Err(FrameError::Truncated)
                        };
                    }
                    Err(err) => return Err(FrameError::Io(err)),
                };
                budget.charge(1)?;
                line.push(byte);
                if byte == b'\n' {
                    return Ok(true);
                }
            }
        };
        starvation_timer(settings.read_timeout, read).await
    }

    async fn read_body(&mut self, length: usize) -> Result<Bytes, FrameError> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        let mut body = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            let read = self.reader.read(&mut body[filled..]);
            let n = starvation_timer(self.settings.read_timeout, async {
                read.await.map_err(FrameError::Io)
            })
            .await?;
            if n == 0 {
                return Err(FrameError::Truncated);
            }
            filled += n;
        }
        Ok(Bytes::from(body))
    }

    /// Consume `length` bytes without keeping them.
    async fn discard(&mut self, mut length: usize) -> Result<(), FrameError> {
        if length > 0 {
            tracing::trace!(connection = %self.connection.id, bytes = length, "Discarding body");
        }
        let mut scratch = [0u8; DISCARD_CHUNK];
        while length > 0 {
            let want = length.min(DISCARD_CHUNK);
            let read = self.reader.read(&mut scratch[..want]);
            let n = starvation_timer(self.settings.read_timeout, async {
                read.await.map_err(FrameError::Io)
            })
            .await?;
            if n == 0 {
                return Err(FrameError::Truncated);
            }
            length -= n;
        }
        Ok(())
    }
}

async fn starvation_timer<T, F>(limit: Duration, read: F) -> Result<T, FrameError>
where
    F: Future<Output = Result<T, FrameError>>,
{
    if limit.is_zero() {
        return read.await;
    }
    match tokio::time::timeout(limit, read).await {
        Ok(result) => result,
        Err(_) => Err(FrameError::StarvationTimeout(limit)),
    }
}

fn is_blank(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}
