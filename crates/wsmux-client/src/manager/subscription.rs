use std::fmt;
use std::sync::Weak;

use futures_util::Stream;
use tokio::sync::broadcast::{self, error::RecvError};

use wsmux_core::protocol::InboundMessage;
use wsmux_core::ChannelKey;

use super::ManagerInner;

/// One subscriber's view of a channel's inbound stream.
///
/// Every live subscription of a key receives every message. `recv` returns
/// `None` only after the channel is closed.
pub struct Subscription {
    key: ChannelKey,
    stream_id: u64,
    rx: Option<broadcast::Receiver<InboundMessage>>,
    owner: Weak<ManagerInner>,
}

impl Subscription {
    pub(crate) fn new(
        key: ChannelKey,
        stream_id: u64,
        rx: broadcast::Receiver<InboundMessage>,
        owner: Weak<ManagerInner>,
    ) -> Self {
        Self {
            key,
            stream_id,
            rx: Some(rx),
            owner,
        }
    }

    pub fn key(&self) -> ChannelKey {
        self.key
    }

    /// Next inbound message. A subscriber that falls behind skips what it
    /// missed.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(key = %self.key, skipped, "subscriber lagged; messages skipped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Message already waiting, without suspending.
    pub fn try_recv(&mut self) -> Option<InboundMessage> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.try_recv() {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = InboundMessage> + Send {
        futures_util::stream::unfold(self, |mut sub| async move {
            let msg = sub.recv().await?;
            Some((msg, sub))
        })
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Release our receiver first so the idle check sees the real count.
        drop(self.rx.take());
        if let Some(inner) = self.owner.upgrade() {
            inner.release_if_idle(self.key, self.stream_id);
        }
    }
}
