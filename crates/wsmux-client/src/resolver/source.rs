//! Routing document shape and where it comes from.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use wsmux_core::error::{Result, WsMuxError};

/// One host group of the routing document.
///
/// Unknown fields are tolerated so newer documents keep loading.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteGroup {
    /// Host group id, looked up in the static host map.
    pub id: String,
    /// `ws` / `wss` (any case).
    pub protocol: String,
    #[serde(default)]
    pub modules: Vec<RouteModule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteModule {
    pub id: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub endpoints: Vec<RouteEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteEndpoint {
    pub id: String,
    #[serde(default)]
    pub path: String,
    #[serde(rename = "UUID")]
    pub uuid: String,
}

/// Parse a routing document from JSON text.
pub fn parse_document(s: &str) -> Result<Vec<RouteGroup>> {
    serde_json::from_str(s).map_err(|e| WsMuxError::Decode(format!("invalid routing document: {e}")))
}

/// Fetches the routing document. Implementations are called at most once per
/// resolver.
#[async_trait]
pub trait RoutingSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RouteGroup>>;
}

/// Reads the routing document from a JSON file.
pub struct FileRoutingSource {
    path: PathBuf,
}

impl FileRoutingSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RoutingSource for FileRoutingSource {
    async fn fetch(&self) -> Result<Vec<RouteGroup>> {
        let s = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            WsMuxError::ConfigUnavailable(format!("read {} failed: {e}", self.path.display()))
        })?;
        parse_document(&s)
    }
}

/// Serves an already-parsed document (tests, embedded defaults).
pub struct StaticRoutingSource {
    groups: Vec<RouteGroup>,
}

impl StaticRoutingSource {
    pub fn new(groups: Vec<RouteGroup>) -> Self {
        Self { groups }
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(Self::new(parse_document(s)?))
    }
}

#[async_trait]
impl RoutingSource for StaticRoutingSource {
    async fn fetch(&self) -> Result<Vec<RouteGroup>> {
        Ok(self.groups.clone())
    }
}
