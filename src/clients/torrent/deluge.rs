//! Deluge Web UI JSON-RPC adapter.

use super::TorrentClient;
use crate::clients::error::TransportError;
use crate::clients::http::{decode_json, HttpExecutor};
use crate::config::ClientEndpoint;
use crate::queue::ClientEnrichment;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

const DEFAULT_PASSWORD: &str = "deluge";
const STATUS_KEYS: [&str; 7] = [
    "state",
    "download_payload_rate",
    "num_peers",
    "num_peers_connected",
    "num_seeds",
    "total_seeds",
    "tracker_status",
];

#[derive(Debug, Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

impl RpcFault {
    fn is_auth(&self) -> bool {
        self.code == 1 || self.message.to_lowercase().contains("not authenticated")
    }
}

#[derive(Debug, Default, Deserialize)]
struct TorrentStatus {
    state: Option<String>,
    download_payload_rate: Option<f64>,
    num_peers: Option<i64>,
    num_peers_connected: Option<i64>,
    num_seeds: Option<i64>,
    total_seeds: Option<i64>,
    tracker_status: Option<String>,
}

/// Deluge keeps a session cookie after `auth.login`.
pub struct DelugeClient {
    rpc_url: String,
    password: String,
    http: HttpExecutor,
    logged_in: Mutex<bool>,
    next_id: AtomicU64,
}

impl DelugeClient {
    /// `http` must carry a cookie store for the session to stick.
    pub fn new(endpoint: &ClientEndpoint, http: HttpExecutor) -> Self {
        let base = endpoint.url.trim_end_matches('/');
        let rpc_url = if base.ends_with("/json") {
            base.to_string()
        } else {
            format!("{}/json", base)
        };
        Self {
            rpc_url,
            password: endpoint
                .password
                .clone()
                .unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
            http,
            logged_in: Mutex::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<RpcReply, TransportError> {
        let body = json!({
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });
        let label = format!("deluge {}", method);
        self.http
            .json(&label, |client| client.post(&self.rpc_url).json(&body))
            .await
    }

    async fn login(&self, logged_in: &mut bool) -> Result<(), TransportError> {
        let reply = self.call("auth.login", json!([self.password])).await?;
        if reply.result.as_bool() != Some(true) {
            *logged_in = false;
            return Err(TransportError::Auth {
                url: self.rpc_url.clone(),
            });
        }
        debug!("deluge: logged in to {}", self.rpc_url);
        *logged_in = true;
        Ok(())
    }

    /// Call a method on an authenticated session, logging in again once
    /// when the session has expired.
    async fn rpc(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        {
            let mut logged_in = self.logged_in.lock().await;
            if !*logged_in {
                self.login(&mut logged_in).await?;
            }
        }

        let mut reply = self.call(method, params.clone()).await?;
        if reply.error.as_ref().is_some_and(RpcFault::is_auth) {
            {
                let mut logged_in = self.logged_in.lock().await;
                self.login(&mut logged_in).await?;
            }
            reply = self.call(method, params).await?;
        }

        match reply.error {
            Some(fault) => Err(TransportError::Rpc {
                url: self.rpc_url.clone(),
                message: fault.message,
            }),
            None => Ok(reply.result),
        }
    }
}

fn count(value: Option<i64>) -> Option<u32> {
    value.map(|v| v.clamp(0, u32::MAX as i64) as u32)
}

fn to_enrichment(status: TorrentStatus) -> ClientEnrichment {
    ClientEnrichment {
        state: status
            .state
            .map(|s| s.to_lowercase())
            .filter(|s| !s.is_empty()),
        peers: count(status.num_peers.or(status.num_peers_connected)),
        seeds: count(status.num_seeds.or(status.total_seeds)),
        download_speed: status.download_payload_rate.map(|r| r.max(0.0) as u64),
        tracker_message: status.tracker_status.filter(|m| !m.is_empty()),
    }
}

#[async_trait]
impl TorrentClient for DelugeClient {
    fn name(&self) -> &'static str {
        "deluge"
    }

    async fn inspect(&self, hash: &str) -> Result<Option<ClientEnrichment>, TransportError> {
        let result = self
            .rpc("core.get_torrent_status", json!([hash, STATUS_KEYS]))
            .await?;
        // Unknown torrents come back as an empty object.
        if result.as_object().map_or(true, |o| o.is_empty()) {
            return Ok(None);
        }
        let status: TorrentStatus =
            serde_json::from_value(result).map_err(|e| TransportError::Decode {
                url: self.rpc_url.clone(),
                message: e.to_string(),
            })?;
        Ok(Some(to_enrichment(status)))
    }

    async fn reannounce(&self, hash: &str, recheck: bool) -> Result<bool, TransportError> {
        let mut accepted = self
            .rpc("core.force_reannounce", json!([[hash]]))
            .await?
            .as_bool()
            .unwrap_or(false);
        if recheck {
            accepted |= self
                .rpc("core.force_recheck", json!([[hash]]))
                .await?
                .as_bool()
                .unwrap_or(false);
        }
        Ok(accepted)
    }
}
