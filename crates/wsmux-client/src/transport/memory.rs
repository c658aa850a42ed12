//! In-process transport double.
//!
//! Every successful `connect` produces a [`ServerEnd`] that plays the remote
//! peer: it pushes frames to the client, sees what the client sent, and can
//! close or fail the connection. Connect attempts are recorded with their
//! (tokio) timestamps so tests can check backoff timing under paused time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use wsmux_core::error::{Result, WsMuxError};
use wsmux_core::protocol::Frame;

use super::{Connector, Transport};

enum ServerEvent {
    Frame(Frame),
    Close,
    Error(String),
}

#[derive(Default)]
struct Script {
    refuse_all: bool,
    refuse_next: usize,
    attempts: Vec<(String, Instant)>,
}

#[derive(Clone)]
pub struct MemoryConnector {
    script: Arc<Mutex<Script>>,
    live: Arc<AtomicUsize>,
    accepted_tx: mpsc::UnboundedSender<ServerEnd>,
    accepted_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerEnd>>>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            live: Arc::new(AtomicUsize::new(0)),
            accepted_tx,
            accepted_rx: Arc::new(tokio::sync::Mutex::new(accepted_rx)),
        }
    }

    /// Refuse every connect until turned off.
    pub fn set_refusing(&self, refuse: bool) {
        if let Ok(mut s) = self.script.lock() {
            s.refuse_all = refuse;
        }
    }

    /// Refuse the next `n` connects.
    pub fn refuse_next(&self, n: usize) {
        if let Ok(mut s) = self.script.lock() {
            s.refuse_next = n;
        }
    }

    /// Number of connect attempts so far (refused ones included).
    pub fn attempt_count(&self) -> usize {
        self.script.lock().map(|s| s.attempts.len()).unwrap_or(0)
    }

    /// Timestamps of every connect attempt.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.script
            .lock()
            .map(|s| s.attempts.iter().map(|(_, t)| *t).collect())
            .unwrap_or_default()
    }

    /// URLs of every connect attempt.
    pub fn attempt_urls(&self) -> Vec<String> {
        self.script
            .lock()
            .map(|s| s.attempts.iter().map(|(u, _)| u.clone()).collect())
            .unwrap_or_default()
    }

    /// Client transports currently alive.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted connection.
    pub async fn next_server(&self) -> Option<ServerEnd> {
        self.accepted_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        {
            let mut s = self
                .script
                .lock()
                .map_err(|_| WsMuxError::Internal("memory connector poisoned".into()))?;
            s.attempts.push((url.to_string(), Instant::now()));
            if s.refuse_all {
                return Err(WsMuxError::Transport("connection refused".into()));
            }
            if s.refuse_next > 0 {
                s.refuse_next -= 1;
                return Err(WsMuxError::Transport("connection refused".into()));
            }
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        self.live.fetch_add(1, Ordering::SeqCst);

        let server = ServerEnd {
            url: url.to_string(),
            to_client,
            from_client,
        };
        self.accepted_tx
            .send(server)
            .map_err(|_| WsMuxError::Internal("memory connector dropped".into()))?;

        Ok(Box::new(MemoryTransport {
            inbound,
            outbound,
            live: Arc::clone(&self.live),
        }))
    }
}

struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
    outbound: mpsc::UnboundedSender<Frame>,
    live: Arc<AtomicUsize>,
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.outbound
            .send(frame)
            .map_err(|_| WsMuxError::Transport("peer gone".into()))
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        match self.inbound.recv().await? {
            ServerEvent::Frame(f) => Some(Ok(f)),
            ServerEvent::Close => None,
            ServerEvent::Error(e) => Some(Err(WsMuxError::Transport(e))),
        }
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// Remote side of one in-memory connection.
pub struct ServerEnd {
    url: String,
    to_client: mpsc::UnboundedSender<ServerEvent>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl ServerEnd {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver a text frame to the client.
    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.push(Frame::Text(text.into()))
    }

    pub fn push(&self, frame: Frame) -> bool {
        self.to_client.send(ServerEvent::Frame(frame)).is_ok()
    }

    /// Close from the server side; the client sees end-of-stream.
    pub fn close(&self) {
        let _ = self.to_client.send(ServerEvent::Close);
    }

    /// Fail the connection with a socket error.
    pub fn fail(&self, err: impl Into<String>) {
        let _ = self.to_client.send(ServerEvent::Error(err.into()));
    }

    /// Next frame the client sent; `None` once the client transport is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Frame the client already sent, without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }
}
