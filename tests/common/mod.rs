//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use sip_engine::dispatch::HandlerResult;
use sip_engine::framing::{FramedMessage, FramerSettings, OversizeBodyPolicy, ParseFailure};
use sip_engine::lifecycle::Shutdown;
use sip_engine::net::{Listener, Pipeline, SipServer};
use sip_engine::MessageHandler;

/// A request with the given Call-ID and body.
pub fn request(method: &str, call_id: &str, cseq: u32, body: &str) -> String {
    format!(
        "{method} sip:bob@biloxi.example.com SIP/2.0\r\n\
         Via: SIP/2.0/TCP pc33.atlanta.example.com;branch=z9hG4bK776asdhds\r\n\
         From: Alice <sip:alice@atlanta.example.com>;tag=1928301774\r\n\
         To: Bob <sip:bob@biloxi.example.com>\r\n\
         Call-ID: {call_id}\r\n\
         CSeq: {cseq} {method}\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {body}",
        body.len()
    )
}

/// A MESSAGE request, the shortest way to carry a body.
pub fn message(call_id: &str, body: &str) -> String {
    request("MESSAGE", call_id, 1, body)
}

/// Framer settings without limits or timers.
pub fn unlimited() -> FramerSettings {
    FramerSettings {
        max_message_size: 0,
        read_timeout: Duration::ZERO,
        oversize_body: OversizeBodyPolicy::Abandon,
    }
}

/// What a handler saw for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub call_id: String,
    pub head: String,
    pub body: Vec<u8>,
}

impl Received {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Records every callback, optionally sleeping inside `on_message`.
#[derive(Default)]
pub struct RecordingHandler {
    messages: Mutex<Vec<Received>>,
    rejections: Mutex<Vec<String>>,
    delay: Duration,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn messages(&self) -> Vec<Received> {
        self.messages.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.messages().iter().map(Received::body_text).collect()
    }

    pub fn bodies_for(&self, call_id: &str) -> Vec<String> {
        self.messages()
            .iter()
            .filter(|m| m.call_id == call_id)
            .map(Received::body_text)
            .collect()
    }

    pub fn rejections(&self) -> Vec<String> {
        self.rejections.lock().unwrap().clone()
    }

    /// Poll until `count` messages arrived or `timeout` passed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Received> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.messages.lock().unwrap().len() < count && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.messages()
    }
}

impl MessageHandler for RecordingHandler {
    fn on_message(&self, message: FramedMessage) -> HandlerResult {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match &message.body[..] {
            b"fail" => return Err("application refused the message".into()),
            b"panic" => panic!("application crashed"),
            _ => {}
        }
        self.messages.lock().unwrap().push(Received {
            call_id: message.call_id.clone(),
            head: message.head.clone(),
            body: message.body.to_vec(),
        });
        Ok(())
    }

    fn on_parse_error(&self, failure: &ParseFailure) {
        self.rejections.lock().unwrap().push(failure.cause.label().to_string());
    }
}

/// A server running on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(pipeline: Pipeline) -> Self {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = Listener::from_tcp(tcp, 64).unwrap();
        let server = SipServer::new(listener, pipeline);
        let addr = server.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let signal = shutdown.subscribe();
        let handle = tokio::spawn(async move {
            server.run(signal).await.unwrap();
        });
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap();
    }
}
