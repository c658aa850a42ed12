use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use wsmux_core::error::{Result, WsMuxError};

use crate::manager::ManagerSettings;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub version: u32,

    /// Path of the routing document (JSON).
    #[serde(default = "default_routing_path")]
    pub routing_path: String,

    /// Host group id -> base host.
    #[serde(default)]
    pub hosts: HashMap<String, String>,

    #[serde(default)]
    pub manager: ManagerConfig,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(WsMuxError::UnsupportedVersion);
        }
        if self.hosts.is_empty() {
            return Err(WsMuxError::BadRequest("hosts must not be empty".into()));
        }
        for (id, host) in &self.hosts {
            if host.trim().is_empty() {
                return Err(WsMuxError::BadRequest(format!("hosts.{id} must not be empty")));
            }
        }

        self.manager.validate()?;

        Ok(())
    }
}

/// What to do with a connection once its last subscriber goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePolicy {
    /// Keep the connection (and its reconnect loop) alive.
    #[default]
    KeepWarm,
    /// Tear the connection down when the last subscription is dropped.
    CloseWhenIdle,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Absent means `connect` waits for routing indefinitely.
    #[serde(default)]
    pub ready_timeout_ms: Option<u64>,

    #[serde(default)]
    pub idle_policy: IdlePolicy,

    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            ready_timeout_ms: None,
            idle_policy: IdlePolicy::default(),
            broadcast_capacity: default_broadcast_capacity(),
            close_grace_ms: default_close_grace_ms(),
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1000..=300000).contains(&self.heartbeat_interval_ms) {
            return Err(WsMuxError::BadRequest(
                "manager.heartbeat_interval_ms must be between 1000 and 300000".into(),
            ));
        }
        if !(10..=60000).contains(&self.backoff_base_ms) {
            return Err(WsMuxError::BadRequest(
                "manager.backoff_base_ms must be between 10 and 60000".into(),
            ));
        }
        if self.backoff_cap_ms < self.backoff_base_ms || self.backoff_cap_ms > 600000 {
            return Err(WsMuxError::BadRequest(
                "manager.backoff_cap_ms must be >= backoff_base_ms and <= 600000".into(),
            ));
        }
        if self.ready_timeout_ms == Some(0) {
            return Err(WsMuxError::BadRequest(
                "manager.ready_timeout_ms must be positive (omit it to wait forever)".into(),
            ));
        }
        if !(1..=65536).contains(&self.broadcast_capacity) {
            return Err(WsMuxError::BadRequest(
                "manager.broadcast_capacity must be between 1 and 65536".into(),
            ));
        }
        if self.close_grace_ms > 10000 {
            return Err(WsMuxError::BadRequest(
                "manager.close_grace_ms must be at most 10000".into(),
            ));
        }
        Ok(())
    }

    /// Runtime settings for [`crate::ConnectionManager`].
    pub fn settings(&self) -> ManagerSettings {
        ManagerSettings {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
            ready_timeout: self.ready_timeout_ms.map(Duration::from_millis),
            idle_policy: self.idle_policy,
            broadcast_capacity: self.broadcast_capacity,
            close_grace: Duration::from_millis(self.close_grace_ms),
        }
    }
}

fn default_routing_path() -> String {
    "assets/app.websocket.json".into()
}
fn default_heartbeat_interval_ms() -> u64 {
    30000
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_cap_ms() -> u64 {
    30000
}
fn default_broadcast_capacity() -> usize {
    256
}
fn default_close_grace_ms() -> u64 {
    1000
}
