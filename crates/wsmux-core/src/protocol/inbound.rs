//! Inbound frame decoding.
//!
//! Rules, applied in order:
//! - Bare keep-alive markers (`ping`, `pong`, `heartbeat`) are dropped.
//! - `{"envelope":"message","payload":{..}}` is unwrapped to its payload.
//! - Any other JSON object passes through (`payload` field, else the object);
//!   an untyped object takes its type from the payload.
//! - Non-object JSON becomes the payload of an untyped message.
//! - `read` receipts and echoed `ping`/`pong` probes are dropped, whether the
//!   type sits on the object or inside its payload.
//! - Everything else (non-JSON text, binary) is wrapped as `raw`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::frame::Frame;

/// Message type given to frames that could not be decoded.
pub const RAW_TYPE: &str = "raw";

const KEEPALIVE_MARKERS: [&str; 3] = ["ping", "pong", "heartbeat"];
const CONTROL_TYPES: [&str; 3] = ["read", "ping", "pong"];

/// Decoded inbound event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message type (field name is `type` in JSON).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub msg_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// ISO-8601 timestamp, when the sender provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl InboundMessage {
    /// Wrap undecodable text as an opaque message.
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            msg_type: Some(RAW_TYPE.to_string()),
            payload: Some(Value::String(text.into())),
            timestamp: None,
        }
    }

    pub fn is_raw(&self) -> bool {
        self.msg_type.as_deref() == Some(RAW_TYPE)
    }

    /// Field lookup inside an object payload.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.as_ref()?.get(name)
    }

    /// `content` of a chat payload.
    pub fn content(&self) -> Option<&str> {
        self.field("content")?.as_str()
    }

    fn from_object(obj: Map<String, Value>) -> Self {
        let msg_type = str_field(&obj, "type").or_else(|| {
            obj.get("payload")
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        let timestamp = str_field(&obj, "timestamp").or_else(|| str_field(&obj, "ts"));
        let payload = match obj.get("payload") {
            Some(p) => p.clone(),
            None => Value::Object(obj),
        };
        Self {
            msg_type,
            payload: Some(payload),
            timestamp,
        }
    }

    fn from_chat_payload(payload: Map<String, Value>) -> Self {
        Self {
            msg_type: str_field(&payload, "type"),
            timestamp: str_field(&payload, "timestamp"),
            payload: Some(Value::Object(payload)),
        }
    }
}

fn str_field(obj: &Map<String, Value>, name: &str) -> Option<String> {
    obj.get(name).and_then(Value::as_str).map(str::to_string)
}

/// Decode one inbound frame. `None` means the frame is a control or
/// keep-alive frame and must not reach subscribers.
pub fn decode_inbound(frame: &Frame) -> Option<InboundMessage> {
    let text = match frame {
        Frame::Text(s) => s.as_str(),
        Frame::Binary(b) => return Some(InboundMessage::raw(String::from_utf8_lossy(b))),
    };

    let trimmed = text.trim();
    if KEEPALIVE_MARKERS.iter().any(|m| m.eq_ignore_ascii_case(trimmed)) {
        return None;
    }

    let msg = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(mut obj)) => {
            let is_envelope = obj.get("envelope").and_then(Value::as_str) == Some("message")
                && obj.get("payload").map(Value::is_object).unwrap_or(false);
            if is_envelope {
                match obj.remove("payload") {
                    Some(Value::Object(p)) => InboundMessage::from_chat_payload(p),
                    _ => InboundMessage::from_object(obj),
                }
            } else {
                InboundMessage::from_object(obj)
            }
        }
        Ok(other) => InboundMessage {
            msg_type: None,
            payload: Some(other),
            timestamp: None,
        },
        Err(_) => return Some(InboundMessage::raw(text)),
    };

    // Control types are honoured on the message and inside its payload.
    let inner_type = msg.field("type").and_then(Value::as_str);
    for t in [msg.msg_type.as_deref(), inner_type].into_iter().flatten() {
        if CONTROL_TYPES.contains(&t) {
            tracing::trace!(msg_type = t, "control message filtered");
            return None;
        }
    }
    Some(msg)
}
