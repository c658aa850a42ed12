//! Per-channel connection driver.
//!
//! One task per record. It owns the socket, the heartbeat interval and the
//! reconnect sleep, so every lifecycle event of a key is handled in order on
//! a single task. Every suspension point also waits on the cancellation token.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use wsmux_core::error::WsMuxError;
use wsmux_core::protocol::{decode_inbound, heartbeat_probe, Frame, InboundMessage};
use wsmux_core::ChannelKey;

use super::backoff::Backoff;
use super::metrics::ChannelMetrics;
use crate::state::{ConnectionStatus, StatePatch, StateStore};
use crate::transport::{Connector, Transport};

pub(crate) struct DriverCtx {
    pub(crate) key: ChannelKey,
    pub(crate) url: String,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) states: Arc<StateStore>,
    pub(crate) metrics: Arc<ChannelMetrics>,
    pub(crate) inbound: broadcast::Sender<InboundMessage>,
    pub(crate) backoff: Backoff,
    pub(crate) heartbeat: Duration,
    pub(crate) cancel: CancellationToken,
    /// Failures carried over from a replaced record.
    pub(crate) attempts: u32,
}

enum SessionEnd {
    Cancelled,
    Closed,
    Failed(WsMuxError),
}

impl DriverCtx {
    fn set_state(&self, patch: StatePatch) {
        // A cancelled driver no longer owns the key's state.
        if !self.cancel.is_cancelled() {
            self.states.set(self.key, patch);
        }
    }

    fn deliver(&self, frame: Frame) {
        self.metrics.frames_in.inc(self.key);
        match decode_inbound(&frame) {
            None => {
                self.metrics.frames_dropped.inc(self.key);
                tracing::trace!(len = frame.len(), "control frame dropped");
            }
            Some(msg) => {
                if msg.is_raw() {
                    self.metrics.frames_raw.inc(self.key);
                    tracing::debug!(len = frame.len(), "undecodable frame forwarded as raw");
                }
                // Err only means nobody is subscribed right now.
                let _ = self.inbound.send(msg);
            }
        }
    }
}

pub(crate) async fn run(ctx: DriverCtx, mut out_rx: mpsc::UnboundedReceiver<String>) {
    let mut attempts = ctx.attempts;

    loop {
        ctx.set_state(
            StatePatch::new()
                .status(ConnectionStatus::Connecting)
                .url(ctx.url.clone()),
        );

        let opened = tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            res = ctx.connector.connect(&ctx.url) => res,
        };

        let reason = match opened {
            Ok(mut transport) => {
                // Sends accepted before the previous socket died are not replayed.
                while out_rx.try_recv().is_ok() {}

                attempts = 0;
                ctx.set_state(
                    StatePatch::new()
                        .status(ConnectionStatus::Connected)
                        .attempts(0)
                        .clear_error(),
                );
                ctx.metrics.opens.inc(ctx.key);
                tracing::info!(url = %ctx.url, "channel open");

                match session(&ctx, transport.as_mut(), &mut out_rx).await {
                    SessionEnd::Cancelled => {
                        transport.close().await;
                        return;
                    }
                    SessionEnd::Closed => "connection closed by peer".to_string(),
                    SessionEnd::Failed(e) => e.to_string(),
                }
            }
            Err(e) => e.to_string(),
        };

        let delay = ctx.backoff.delay(attempts);
        attempts = attempts.saturating_add(1);
        ctx.set_state(
            StatePatch::new()
                .status(ConnectionStatus::Disconnected)
                .attempts(attempts)
                .error(reason.clone()),
        );
        ctx.metrics.reconnects_scheduled.inc(ctx.key);
        tracing::warn!(
            error = %reason,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "channel disconnected; reopen scheduled"
        );

        tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn session(
    ctx: &DriverCtx,
    transport: &mut dyn Transport,
    out_rx: &mut mpsc::UnboundedReceiver<String>,
) -> SessionEnd {
    let mut heartbeat = tokio::time::interval_at(Instant::now() + ctx.heartbeat, ctx.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return SessionEnd::Cancelled,

            incoming = transport.recv() => match incoming {
                None => return SessionEnd::Closed,
                Some(Err(e)) => return SessionEnd::Failed(e),
                Some(Ok(frame)) => ctx.deliver(frame),
            },

            Some(text) = out_rx.recv() => {
                if let Err(e) = transport.send(Frame::Text(text)).await {
                    tracing::warn!(error = %e, "outbound send failed");
                }
            }

            _ = heartbeat.tick() => {
                match transport.send(Frame::Text(heartbeat_probe())).await {
                    Ok(()) => ctx.metrics.heartbeats.inc(ctx.key),
                    Err(e) => tracing::debug!(error = %e, "heartbeat send failed"),
                }
            }
        }
    }
}
