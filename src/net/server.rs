//! Stream server: one framer task per accepted connection.
//!
//! # Responsibilities
//! - Run the accept loop until shutdown
//! - Own connection tasks in a `JoinSet` so they can be aborted together
//! - Wire each stream to a framer and a per-connection dispatcher
//!
//! # Design Decisions
//! - The worker pool, parser and handler are shared; the dispatcher and
//!   its ordering state belong to one connection
//! - Ordering state is released by a drop guard, so aborted tasks clean up too

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;

use crate::dispatch::{Dispatcher, MessageHandler, WorkerPool};
use crate::framing::{ConnectionSummary, Framer, FramerSettings};
use crate::lifecycle::ShutdownSignal;
use crate::net::connection::{ConnectionInfo, ConnectionTracker};
use crate::net::listener::{Listener, ListenerError};
use crate::parser::{MessageParser, SipMessageParser};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Everything a connection needs besides its stream.
#[derive(Clone)]
pub struct Pipeline {
    parser: Arc<dyn MessageParser>,
    handler: Arc<dyn MessageHandler>,
    pool: Option<Arc<WorkerPool>>,
    settings: FramerSettings,
}

impl Pipeline {
    /// Inline delivery with the default grammar.
    pub fn new(handler: Arc<dyn MessageHandler>, settings: FramerSettings) -> Self {
        Self {
            parser: Arc::new(SipMessageParser::new()),
            handler,
            pool: None,
            settings,
        }
    }

    /// Deliver callbacks on `pool` instead of the connection task.
    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Replace the header grammar.
    pub fn with_parser(mut self, parser: Arc<dyn MessageParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn settings(&self) -> &FramerSettings {
        &self.settings
    }

    /// Frame `stream` until it closes, then shut it down.
    pub async fn serve<S>(&self, stream: S, connection: ConnectionInfo) -> ConnectionSummary
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let dispatcher = Dispatcher::new(Arc::clone(&self.handler), self.pool.clone());
        let _release = dispatcher.release_on_drop();

        let mut framer = Framer::new(stream, connection, Arc::clone(&self.parser), self.settings);
        let summary = framer.run(&dispatcher).await;

        let mut stream = framer.into_inner();
        if let Err(err) = stream.shutdown().await {
            tracing::trace!(connection = %connection.id, error = %err, "Stream shutdown failed");
        }
        tracing::debug!(
            connection = %connection,
            framed = summary.messages_framed,
            rejected = summary.messages_rejected,
            reason = summary.closed_by.label(),
            "Connection finished"
        );
        summary
    }
}

/// Accepts stream connections and frames them.
pub struct SipServer {
    listener: Listener,
    pipeline: Pipeline,
    tracker: ConnectionTracker,
}

impl SipServer {
    pub fn new(listener: Listener, pipeline: Pipeline) -> Self {
        Self {
            listener,
            pipeline,
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Handle for observing live connections.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept until `shutdown` fires, then abort every connection task.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<(), ListenerError> {
        let mut connections: JoinSet<ConnectionSummary> = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!(error = %err, "Accept failed");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                            continue;
                        }
                    };
                    if let Err(err) = stream.set_nodelay(true) {
                        tracing::trace!(peer = %peer, error = %err, "Failed to set TCP_NODELAY");
                    }
                    let guard = self.tracker.track(Some(peer));
                    let pipeline = self.pipeline.clone();
                    tracing::debug!(connection = %guard.info(), "Connection opened");
                    connections.spawn(async move {
                        let _permit = permit;
                        let summary = pipeline.serve(stream, guard.info()).await;
                        drop(guard);
                        summary
                    });
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            tracing::error!(error = %err, "Connection task panicked");
                        }
                    }
                }
            }
        }

        tracing::info!(active = connections.len(), "Listener stopping, closing connections");
        connections.abort_all();
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::HandlerResult;
    use crate::framing::{FrameError, FramedMessage};
    use std::sync::Mutex;
    use tokio::io::{duplex, AsyncReadExt};

    #[derive(Default)]
    struct Bodies(Mutex<Vec<String>>);

    impl MessageHandler for Bodies {
        fn on_message(&self, message: FramedMessage) -> HandlerResult {
            self.0
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(&message.body).into_owned());
            Ok(())
        }
    }

    #[tokio::test]
    async fn pipeline_serves_until_eof_and_shuts_the_stream() {
        let handler = Arc::new(Bodies::default());
        let pipeline = Pipeline::new(handler.clone(), FramerSettings::default());
        let (mut client, server) = duplex(1024);

        client
            .write_all(b"MESSAGE sip:a SIP/2.0\r\nCall-ID: abc\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let summary = pipeline.serve(server, ConnectionInfo::new(None)).await;
        assert_eq!(summary.messages_framed, 1);
        assert!(matches!(summary.closed_by, FrameError::Eof));
        assert_eq!(*handler.0.lock().unwrap(), ["hello"]);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
