//! Per-channel connection state, observable through `watch` receivers.
//!
//! Writes come only from the connection manager (its drivers and teardown
//! paths); any number of observers may read.

use dashmap::DashMap;
use tokio::sync::watch;

use wsmux_core::ChannelKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        }
    }
}

/// Snapshot of one channel's connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub url: Option<String>,
    /// Consecutive failed attempts since the last successful open.
    pub attempts: u32,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Partial update; only the fields that are set are merged.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    status: Option<ConnectionStatus>,
    last_error: Option<Option<String>>,
    url: Option<Option<String>>,
    attempts: Option<u32>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: ConnectionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn error(mut self, err: impl Into<String>) -> Self {
        self.last_error = Some(Some(err.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(Some(url.into()));
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    fn apply(self, state: &mut ConnectionState) -> bool {
        let before = state.clone();
        if let Some(s) = self.status {
            state.status = s;
        }
        if let Some(e) = self.last_error {
            state.last_error = e;
        }
        if let Some(u) = self.url {
            state.url = u;
        }
        if let Some(a) = self.attempts {
            state.attempts = a;
        }
        *state != before
    }
}

/// Per-key state cells.
///
/// Observers hold `watch` receivers: they always see the latest state, not
/// every transition. A slow observer may see Connecting -> Connected ->
/// Disconnected as a single change to Disconnected.
#[derive(Default)]
pub struct StateStore {
    states: DashMap<ChannelKey, watch::Sender<ConnectionState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// Live view of `key`. Unseen keys start disconnected.
    pub fn get(&self, key: ChannelKey) -> watch::Receiver<ConnectionState> {
        self.states
            .entry(key)
            .or_insert_with(|| watch::channel(ConnectionState::default()).0)
            .subscribe()
    }

    /// Current value for `key`.
    pub fn snapshot(&self, key: ChannelKey) -> ConnectionState {
        self.states
            .get(&key)
            .map(|tx| tx.borrow().clone())
            .unwrap_or_default()
    }

    /// Merge `patch` into `key`'s state. Observers are woken only when
    /// something changed.
    pub fn set(&self, key: ChannelKey, patch: StatePatch) {
        let tx = self
            .states
            .entry(key)
            .or_insert_with(|| watch::channel(ConnectionState::default()).0);
        tx.send_if_modified(|state| patch.apply(state));
    }
}
