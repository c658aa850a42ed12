//! Logical channel keys and their routing UUIDs.
//!
//! The set of channels is closed at compile time. Routing documents refer to
//! endpoints by UUID; [`ChannelKey::from_uuid`] maps a UUID onto a key and
//! returns `None` for anything unknown so newer documents stay loadable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WsMuxError;

/// Stable logical identifier for a message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKey {
    /// Live chat between participants.
    Chat,
    /// Server-pushed notifications.
    Notifications,
    /// Presence / typing indicators.
    Presence,
}

/// UUID -> key table. Matching is case-insensitive.
const UUID_TABLE: [(&str, ChannelKey); 3] = [
    ("6f1c2a9e-3b7d-4c1e-9a52-0d8e4f6b7a11", ChannelKey::Chat),
    ("b2e47c10-8f3a-4d59-a6c2-51e9d0f3b824", ChannelKey::Notifications),
    ("e9a05d37-1c6b-4f82-b3d4-7a2c8e15f960", ChannelKey::Presence),
];

impl ChannelKey {
    /// Every key, in declaration order.
    pub const ALL: [ChannelKey; 3] = [ChannelKey::Chat, ChannelKey::Notifications, ChannelKey::Presence];

    /// Name used in config, logs and metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKey::Chat => "chat",
            ChannelKey::Notifications => "notifications",
            ChannelKey::Presence => "presence",
        }
    }

    /// Routing UUID for this key.
    pub fn uuid(self) -> &'static str {
        UUID_TABLE
            .iter()
            .find(|(_, k)| *k == self)
            .map(|(u, _)| *u)
            .unwrap_or_default()
    }

    /// Look up the key an endpoint UUID refers to.
    pub fn from_uuid(uuid: &str) -> Option<Self> {
        let uuid = uuid.trim();
        UUID_TABLE
            .iter()
            .find(|(u, _)| u.eq_ignore_ascii_case(uuid))
            .map(|(_, k)| *k)
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKey {
    type Err = WsMuxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelKey::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| WsMuxError::BadRequest(format!("unknown channel key: {s}")))
    }
}
