//! tokio-tungstenite client transport.
//!
//! Ping frames are answered by tungstenite itself on the next read/flush;
//! ping, pong and raw frames are swallowed here so the manager only sees data.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use wsmux_core::error::{Result, WsMuxError};
use wsmux_core::protocol::Frame;

use super::{Connector, Transport};

#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| WsMuxError::Transport(format!("connect failed: {e}")))?;
        tracing::debug!(status = %response.status(), "websocket handshake complete");
        Ok(Box::new(WsTransport { stream }))
    }
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let msg = match frame {
            Frame::Text(s) => Message::Text(s.into()),
            Frame::Binary(b) => Message::Binary(b),
        };
        self.stream
            .send(msg)
            .await
            .map_err(|e| WsMuxError::Transport(format!("send failed: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(t)) => return Some(Ok(Frame::Text(t.to_string()))),
                Ok(Message::Binary(b)) => return Some(Ok(Frame::Binary(b))),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "peer closed websocket");
                    return None;
                }
                Err(e) => return Some(Err(WsMuxError::Transport(format!("read failed: {e}")))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "websocket close handshake failed");
        }
    }
}
