//! Connection manager: one self-healing WebSocket per channel key.
//!
//! - `connect` waits for routing, resolves the key and either joins the live
//!   connection or starts a driver for a new one.
//! - Inbound frames fan out to every [`Subscription`] of the key.
//! - `send` is best-effort and only while connected; nothing is queued.
//! - Unexpected closes reopen with capped exponential backoff until `close`.
//!
//! `connect`, `close` and `close_all` are serialized on one async lock so a
//! record is always fully torn down before its replacement starts.

mod backoff;
mod driver;
pub mod metrics;
mod record;
mod subscription;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use wsmux_core::error::{Result, WsMuxError};
use wsmux_core::protocol::{ChatPayload, InboundMessage, MessageKind, OutboundEnvelope};
use wsmux_core::ChannelKey;

use crate::resolver::{append_token, EndpointResolver};
use crate::state::{ConnectionState, ConnectionStatus, StatePatch, StateStore};
use crate::transport::{Connector, TungsteniteConnector};

pub use crate::config::schema::IdlePolicy;
pub use backoff::Backoff;
pub use metrics::ChannelMetrics;
pub use subscription::Subscription;

use driver::DriverCtx;
use record::{ConnectionRecord, DriverHandle};

/// Runtime knobs, usually built from `ManagerConfig::settings`.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub heartbeat_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// `None` waits for routing forever.
    pub ready_timeout: Option<Duration>,
    pub idle_policy: IdlePolicy,
    pub broadcast_capacity: usize,
    pub close_grace: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            ready_timeout: None,
            idle_policy: IdlePolicy::KeepWarm,
            broadcast_capacity: 256,
            close_grace: Duration::from_secs(1),
        }
    }
}

impl ManagerSettings {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base, self.backoff_cap)
    }
}

/// Cloneable handle; all clones share the same connections.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    resolver: Arc<EndpointResolver>,
    connector: Arc<dyn Connector>,
    states: Arc<StateStore>,
    metrics: Arc<ChannelMetrics>,
    settings: ManagerSettings,
    records: DashMap<ChannelKey, ConnectionRecord>,
    ops: Mutex<()>,
    seq: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        resolver: Arc<EndpointResolver>,
        connector: Arc<dyn Connector>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                resolver,
                connector,
                states: Arc::new(StateStore::new()),
                metrics: Arc::new(ChannelMetrics::default()),
                settings,
                records: DashMap::new(),
                ops: Mutex::new(()),
                seq: AtomicU64::new(1),
            }),
        }
    }

    /// Manager over real WebSocket connections.
    pub fn with_tungstenite(resolver: Arc<EndpointResolver>, settings: ManagerSettings) -> Self {
        Self::new(resolver, Arc::new(TungsteniteConnector::new()), settings)
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.inner.resolver
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    pub fn metrics(&self) -> &ChannelMetrics {
        &self.inner.metrics
    }

    /// Live view of `key`'s connection state.
    pub fn state(&self, key: ChannelKey) -> watch::Receiver<ConnectionState> {
        self.inner.states.get(key)
    }

    pub fn snapshot(&self, key: ChannelKey) -> ConnectionState {
        self.inner.states.snapshot(key)
    }

    /// Keys that currently have a record.
    pub fn open_channels(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> = self.inner.records.iter().map(|r| *r.key()).collect();
        keys.sort();
        keys
    }

    /// Subscribe to `key`, opening its connection if none is live.
    ///
    /// Suspends until routing is loaded (bounded by `ready_timeout`). An
    /// unresolvable key still yields a subscription; it stays silent and the
    /// failure is recorded as the key's `last_error`.
    pub async fn connect(
        &self,
        key: ChannelKey,
        params: &[(&str, &str)],
        token: Option<&str>,
    ) -> Result<Subscription> {
        let inner = &self.inner;
        inner.resolver.wait_ready(inner.settings.ready_timeout).await?;

        let url = match inner.resolver.resolve(key, params) {
            Ok(url) => Some(match token {
                Some(t) => append_token(&url, t),
                None => url,
            }),
            Err(e) => {
                tracing::warn!(%key, error = %e, "channel endpoint unresolved");
                inner.states.set(
                    key,
                    StatePatch::new()
                        .status(ConnectionStatus::Disconnected)
                        .error(e.to_string()),
                );
                None
            }
        };

        let _ops = inner.ops.lock().await;

        if let Some(rec) = inner.records.get(&key) {
            if rec.is_live(key, &inner.states) {
                tracing::debug!(%key, "joining live channel");
                return Ok(self.subscription(key, &rec));
            }
        }

        // Stale record (backing off or unresolved): tear it down but keep its
        // broadcast channel so existing subscribers stay attached.
        let (stream_id, inbound) = match inner.records.remove(&key) {
            Some((_, old)) => {
                let carried = (old.stream_id, old.inbound.clone());
                old.shutdown(inner.settings.close_grace).await;
                carried
            }
            None => (
                inner.seq.fetch_add(1, Ordering::Relaxed),
                broadcast::channel(inner.settings.broadcast_capacity).0,
            ),
        };

        let record = match url {
            Some(url) => inner.spawn_driver(key, url, stream_id, inbound),
            None => ConnectionRecord::unresolved(stream_id, inbound),
        };
        let sub = self.subscription(key, &record);
        inner.records.insert(key, record);
        Ok(sub)
    }

    /// Serialize `message` as JSON and send it if `key` is connected.
    /// Returns `NotReady` otherwise; the message is not kept.
    pub fn send<T: Serialize + ?Sized>(&self, key: ChannelKey, message: &T) -> Result<()> {
        let text = serde_json::to_string(message)
            .map_err(|e| WsMuxError::BadRequest(format!("json encode failed: {e}")))?;
        self.send_text(key, text)
    }

    /// Send a chat envelope. Returns the payload that went out.
    pub fn send_chat(
        &self,
        key: ChannelKey,
        text: &str,
        kind: MessageKind,
        file_name: Option<&str>,
    ) -> Result<ChatPayload> {
        let payload = ChatPayload::new(text, kind, file_name.map(str::to_string));
        self.send(key, &OutboundEnvelope::message(payload.clone()))?;
        Ok(payload)
    }

    fn send_text(&self, key: ChannelKey, text: String) -> Result<()> {
        let inner = &self.inner;
        let sent = inner.states.snapshot(key).is_connected()
            && inner
                .records
                .get(&key)
                .map(|rec| rec.push_outbound(text))
                .unwrap_or(false);

        if !sent {
            inner.metrics.sends_rejected.inc(key);
            tracing::warn!(%key, "channel not ready; message dropped");
            return Err(WsMuxError::NotReady(key));
        }
        inner.metrics.sends.inc(key);
        Ok(())
    }

    /// Tear down `key`: close the socket, cancel timers, drop the record.
    /// Closing a key with no record is a no-op.
    pub async fn close(&self, key: ChannelKey) {
        let _ops = self.inner.ops.lock().await;
        self.inner.teardown(key).await;
    }

    /// Alias of [`ConnectionManager::close`] for UI callers.
    pub async fn disconnect(&self, key: ChannelKey) {
        self.close(key).await;
    }

    pub async fn close_all(&self) {
        let _ops = self.inner.ops.lock().await;
        let keys: Vec<ChannelKey> = self.inner.records.iter().map(|r| *r.key()).collect();
        for key in keys {
            self.inner.teardown(key).await;
        }
    }

    fn subscription(&self, key: ChannelKey, rec: &ConnectionRecord) -> Subscription {
        Subscription::new(key, rec.stream_id, rec.subscribe(), Arc::downgrade(&self.inner))
    }
}

impl ManagerInner {
    fn spawn_driver(
        &self,
        key: ChannelKey,
        url: String,
        stream_id: u64,
        inbound: broadcast::Sender<InboundMessage>,
    ) -> ConnectionRecord {
        // Visible as connecting before the task first runs, so a second
        // `connect` joins instead of replacing.
        self.states.set(
            key,
            StatePatch::new()
                .status(ConnectionStatus::Connecting)
                .url(url.clone()),
        );

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let ctx = DriverCtx {
            key,
            url,
            connector: Arc::clone(&self.connector),
            states: Arc::clone(&self.states),
            metrics: Arc::clone(&self.metrics),
            inbound: inbound.clone(),
            backoff: self.settings.backoff(),
            heartbeat: self.settings.heartbeat_interval,
            cancel: cancel.clone(),
            attempts: self.states.snapshot(key).attempts,
        };
        let task = tokio::spawn(
            driver::run(ctx, out_rx).instrument(tracing::info_span!("channel", %key)),
        );

        ConnectionRecord::active(stream_id, inbound, out_tx, DriverHandle::new(cancel, task))
    }

    async fn teardown(&self, key: ChannelKey) -> bool {
        let Some((_, record)) = self.records.remove(&key) else {
            return false;
        };
        record.shutdown(self.settings.close_grace).await;
        self.states.set(
            key,
            StatePatch::new()
                .status(ConnectionStatus::Disconnected)
                .attempts(0),
        );
        tracing::info!(%key, "channel closed");
        true
    }

    /// Called when a subscription drops. Under `CloseWhenIdle`, closes the
    /// channel once no subscriber of its stream is left.
    fn release_if_idle(self: &Arc<Self>, key: ChannelKey, stream_id: u64) {
        if self.settings.idle_policy != IdlePolicy::CloseWhenIdle {
            return;
        }
        let is_idle = move |_: &ChannelKey, r: &ConnectionRecord| {
            r.stream_id == stream_id && r.inbound.receiver_count() == 0
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                handle.spawn(async move {
                    let _ops = inner.ops.lock().await;
                    if inner.records.get(&key).is_some_and(|r| is_idle(&key, &*r)) {
                        tracing::info!(%key, "last subscriber gone; closing idle channel");
                        inner.teardown(key).await;
                    }
                });
            }
            Err(_) => {
                // No runtime to finish a graceful close; dropping the record
                // aborts its driver.
                if self.records.remove_if(&key, is_idle).is_some() {
                    self.states.set(key, StatePatch::new().status(ConnectionStatus::Disconnected));
                }
            }
        }
    }
}
