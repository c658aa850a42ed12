//! Shared fixtures for client integration tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use wsmux_client::resolver::{parse_document, EndpointResolver};
use wsmux_client::transport::MemoryConnector;
use wsmux_client::{ConnectionManager, ManagerSettings};

/// Chat and notifications under one host group, plus a group with no host
/// and an endpoint with an unknown UUID.
pub const ROUTING_DOC: &str = r#"[
  {
    "Id": "CHAT_HOST",
    "Protocol": "WSS",
    "Modules": [
      {
        "Id": "messaging",
        "Path": "/messaging",
        "Endpoints": [
          { "Id": "chat", "Path": "/chat/{id}", "UUID": "6f1c2a9e-3b7d-4c1e-9a52-0d8e4f6b7a11" },
          { "Id": "alerts", "Path": "/alerts", "UUID": "b2e47c10-8f3a-4d59-a6c2-51e9d0f3b824" },
          { "Id": "future", "Path": "/future", "UUID": "11111111-2222-3333-4444-555555555555", "Extra": true }
        ]
      }
    ]
  },
  {
    "Id": "UNCONFIGURED",
    "Protocol": "ws",
    "Modules": [
      {
        "Id": "presence",
        "Path": "/presence",
        "Endpoints": [
          { "Id": "presence", "Path": "/live", "UUID": "e9a05d37-1c6b-4f82-b3d4-7a2c8e15f960" }
        ]
      }
    ]
  }
]"#;

pub fn hosts() -> HashMap<String, String> {
    HashMap::from([("CHAT_HOST".to_string(), "https://chat.example.test".to_string())])
}

pub fn loaded_resolver() -> Arc<EndpointResolver> {
    let resolver = EndpointResolver::new(hosts());
    resolver.load_document(&parse_document(ROUTING_DOC).unwrap());
    Arc::new(resolver)
}

pub fn settings() -> ManagerSettings {
    ManagerSettings {
        close_grace: Duration::from_millis(200),
        ..ManagerSettings::default()
    }
}

pub fn memory_manager(settings: ManagerSettings) -> (ConnectionManager, MemoryConnector) {
    let connector = MemoryConnector::new();
    let manager = ConnectionManager::new(loaded_resolver(), Arc::new(connector.clone()), settings);
    (manager, connector)
}
