//! Outbound wire messages.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Kind of chat content being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

/// Chat message body carried inside [`OutboundEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Serialized as `null` when absent.
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub is_sender: bool,
    pub timestamp: String,
}

impl ChatPayload {
    /// New outgoing payload with a fresh id and the current time.
    pub fn new(content: impl Into<String>, kind: MessageKind, file_name: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            kind,
            file_path: None,
            file_name,
            is_sender: true,
            timestamp: iso_now(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(content, MessageKind::Text, None)
    }
}

/// `{ "envelope": "message", "payload": { .. } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub envelope: String,
    pub payload: ChatPayload,
}

impl OutboundEnvelope {
    pub fn message(payload: ChatPayload) -> Self {
        Self {
            envelope: "message".to_string(),
            payload,
        }
    }
}

/// Current UTC time as RFC 3339 with millisecond precision.
pub fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Keep-alive probe text sent on the heartbeat interval.
pub fn heartbeat_probe() -> String {
    json!({ "type": "ping", "ts": iso_now() }).to_string()
}
