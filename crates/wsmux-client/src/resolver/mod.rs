//! Endpoint resolver: channel key -> connection URL.
//!
//! The routing table is built once from a routing document. Until then every
//! lookup fails with `ResolutionFailure` and [`EndpointResolver::wait_ready`]
//! suspends. Readiness flips to true exactly once, after the whole document is
//! processed, even when some groups or endpoints were skipped.

pub mod source;

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use tokio::sync::watch;

use wsmux_core::error::{Result, WsMuxError};
use wsmux_core::ChannelKey;

pub use source::{
    parse_document, FileRoutingSource, RouteEndpoint, RouteGroup, RouteModule, RoutingSource,
    StaticRoutingSource,
};

pub struct EndpointResolver {
    hosts: HashMap<String, String>,
    routes: OnceLock<HashMap<ChannelKey, String>>,
    ready: watch::Sender<bool>,
}

impl EndpointResolver {
    /// `hosts` maps a routing host-group id to its base host.
    pub fn new(hosts: HashMap<String, String>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            hosts,
            routes: OnceLock::new(),
            ready,
        }
    }

    /// Fetch and apply the routing document. Returns the number of routes.
    /// A second call does not fetch again.
    pub async fn load(&self, source: &dyn RoutingSource) -> Result<usize> {
        if let Some(routes) = self.routes.get() {
            tracing::debug!(routes = routes.len(), "routing already loaded");
            return Ok(routes.len());
        }

        let groups = source.fetch().await.map_err(|e| match e {
            WsMuxError::ConfigUnavailable(_) => e,
            other => WsMuxError::ConfigUnavailable(other.to_string()),
        })?;

        Ok(self.load_document(&groups))
    }

    /// Apply an already-fetched routing document and fire readiness.
    pub fn load_document(&self, groups: &[RouteGroup]) -> usize {
        let table = build_table(&self.hosts, groups);
        let count = table.len();
        let count = match self.routes.set(table) {
            Ok(()) => count,
            Err(_) => {
                tracing::debug!("routing already loaded; document ignored");
                self.route_count()
            }
        };

        self.ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
        tracing::info!(routes = count, "routing table loaded");
        count
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn route_count(&self) -> usize {
        self.routes.get().map(HashMap::len).unwrap_or(0)
    }

    /// Suspend until the routing table is loaded. With a timeout, elapsing it
    /// yields `ConfigUnavailable`.
    pub async fn wait_ready(&self, timeout: Option<Duration>) -> Result<()> {
        let mut rx = self.ready.subscribe();
        let closed = |_| WsMuxError::Internal("readiness latch dropped".into());

        match timeout {
            None => {
                rx.wait_for(|r| *r).await.map_err(closed)?;
            }
            Some(t) => {
                tokio::time::timeout(t, rx.wait_for(|r| *r))
                    .await
                    .map_err(|_| {
                        WsMuxError::ConfigUnavailable(format!(
                            "routing not ready after {}ms",
                            t.as_millis()
                        ))
                    })?
                    .map_err(closed)?;
            }
        }
        Ok(())
    }

    /// URL for `key` with `{name}` placeholders substituted from `params`.
    pub fn resolve(&self, key: ChannelKey, params: &[(&str, &str)]) -> Result<String> {
        let template = self
            .routes
            .get()
            .and_then(|r| r.get(&key))
            .ok_or(WsMuxError::ResolutionFailure(key))?;

        let mut url = template.clone();
        for (name, value) in params {
            url = url.replace(&format!("{{{name}}}"), &urlencoding::encode(value));
        }
        Ok(url)
    }
}

/// Append `token=<value>` as a query parameter.
pub fn append_token(url: &str, token: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}token={}", urlencoding::encode(token))
}

fn strip_scheme(host: &str) -> &str {
    host.split_once("://").map(|(_, rest)| rest).unwrap_or(host)
}

fn build_table(hosts: &HashMap<String, String>, groups: &[RouteGroup]) -> HashMap<ChannelKey, String> {
    let mut table = HashMap::new();

    for group in groups {
        let Some(host) = hosts.get(&group.id) else {
            tracing::debug!(group = %group.id, "no host configured; group skipped");
            continue;
        };
        let scheme = group.protocol.trim().to_ascii_lowercase();
        let base = format!("{scheme}://{}", strip_scheme(host.trim()));

        for module in &group.modules {
            for endpoint in &module.endpoints {
                let Some(key) = ChannelKey::from_uuid(&endpoint.uuid) else {
                    tracing::debug!(module = %module.id, uuid = %endpoint.uuid, "unknown endpoint uuid skipped");
                    continue;
                };
                let url = format!("{base}{}{}", module.path, endpoint.path);
                if let Some(prev) = table.insert(key, url) {
                    tracing::debug!(%key, %prev, "route replaced by later endpoint");
                }
            }
        }
    }

    table
}
