//! Transmission RPC adapter.

use super::TorrentClient;
use crate::clients::error::TransportError;
use crate::clients::http::{decode_json, ensure_success, HttpExecutor};
use crate::config::ClientEndpoint;
use crate::queue::ClientEnrichment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

const SESSION_HEADER: &str = "X-Transmission-Session-Id";
const TORRENT_FIELDS: [&str; 4] = ["status", "peersConnected", "rateDownload", "trackerStats"];

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    arguments: &'a Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Default, Deserialize)]
struct TorrentList {
    #[serde(default)]
    torrents: Vec<TorrentStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TorrentStatus {
    status: Option<i64>,
    peers_connected: Option<i64>,
    rate_download: Option<i64>,
    #[serde(default)]
    tracker_stats: Vec<TrackerStat>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackerStat {
    seeder_count: Option<i64>,
    last_announce_result: Option<String>,
    last_scrape_result: Option<String>,
}

/// Map Transmission's numeric torrent status to a state name.
pub fn transmission_state(status: Option<i64>) -> &'static str {
    match status {
        Some(0) => "stopped",
        Some(1) => "check_wait",
        Some(2) => "checking",
        Some(3) => "download_wait",
        Some(4) => "downloading",
        Some(5) => "seed_wait",
        Some(6) => "seeding",
        _ => "unknown",
    }
}

pub struct TransmissionClient {
    rpc_url: String,
    username: Option<String>,
    password: Option<String>,
    http: HttpExecutor,
    session_id: Mutex<Option<String>>,
}

impl TransmissionClient {
    pub fn new(endpoint: &ClientEndpoint, http: HttpExecutor) -> Self {
        Self {
            rpc_url: endpoint.url.clone(),
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
            http,
            session_id: Mutex::new(None),
        }
    }

    /// Call an RPC method. A 409 carries a fresh session id; the call is
    /// repeated once with it.
    async fn rpc(&self, method: &str, arguments: Value) -> Result<Value, TransportError> {
        let body = RpcRequest {
            method,
            arguments: &arguments,
        };
        let label = format!("transmission {}", method);

        for _ in 0..2 {
            let session = self.session_id.lock().await.clone();
            let response = self
                .http
                .execute(&label, |client| {
                    let mut request = client.post(&self.rpc_url).json(&body);
                    if let Some(id) = &session {
                        request = request.header(SESSION_HEADER, id);
                    }
                    if let Some(user) = &self.username {
                        request = request.basic_auth(user, self.password.as_ref());
                    }
                    request
                })
                .await?;

            if response.status() == reqwest::StatusCode::CONFLICT {
                let fresh = response
                    .headers()
                    .get(SESSION_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                if let Some(fresh) = fresh {
                    debug!("transmission: refreshed session id");
                    *self.session_id.lock().await = Some(fresh);
                    continue;
                }
            }

            let response = ensure_success(response).await?;
            let reply: RpcResponse = decode_json(response).await?;
            if reply.result != "success" {
                return Err(TransportError::Rpc {
                    url: self.rpc_url.clone(),
                    message: reply.result,
                });
            }
            return Ok(reply.arguments);
        }

        Err(TransportError::Status {
            url: self.rpc_url.clone(),
            status: 409,
            body: "session id was not accepted".to_string(),
        })
    }
}

fn to_enrichment(torrent: TorrentStatus) -> ClientEnrichment {
    let seeds = torrent
        .tracker_stats
        .iter()
        .filter_map(|t| t.seeder_count)
        .max()
        .map(|s| s.clamp(0, u32::MAX as i64) as u32);
    let messages: Vec<String> = torrent
        .tracker_stats
        .into_iter()
        .filter_map(|t| {
            t.last_announce_result
                .filter(|m| !m.is_empty())
                .or(t.last_scrape_result.filter(|m| !m.is_empty()))
        })
        .collect();

    ClientEnrichment {
        state: Some(transmission_state(torrent.status).to_string()),
        peers: torrent
            .peers_connected
            .map(|p| p.clamp(0, u32::MAX as i64) as u32),
        seeds,
        download_speed: torrent.rate_download.map(|r| r.max(0) as u64),
        tracker_message: (!messages.is_empty()).then(|| messages.join(" | ")),
    }
}

#[async_trait]
impl TorrentClient for TransmissionClient {
    fn name(&self) -> &'static str {
        "transmission"
    }

    async fn inspect(&self, hash: &str) -> Result<Option<ClientEnrichment>, TransportError> {
        let arguments = self
            .rpc(
                "torrent-get",
                json!({"ids": [hash], "fields": TORRENT_FIELDS}),
            )
            .await?;
        let list: TorrentList =
            serde_json::from_value(arguments).map_err(|e| TransportError::Decode {
                url: self.rpc_url.clone(),
                message: e.to_string(),
            })?;
        Ok(list.torrents.into_iter().next().map(to_enrichment))
    }

    async fn reannounce(&self, hash: &str, recheck: bool) -> Result<bool, TransportError> {
        self.rpc("torrent-reannounce", json!({"ids": [hash]})).await?;
        if recheck {
            self.rpc("torrent-verify", json!({"ids": [hash]})).await?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(transmission_state(Some(0)), "stopped");
        assert_eq!(transmission_state(Some(4)), "downloading");
        assert_eq!(transmission_state(Some(6)), "seeding");
        assert_eq!(transmission_state(Some(42)), "unknown");
        assert_eq!(transmission_state(None), "unknown");
    }

    #[test]
    fn test_enrichment_from_torrent_get() {
        let list: TorrentList = serde_json::from_value(json!({
            "torrents": [{
                "status": 4,
                "peersConnected": 3,
                "rateDownload": 2048,
                "trackerStats": [
                    {"seederCount": 2, "lastAnnounceResult": "Success"},
                    {"seederCount": 7, "lastAnnounceResult": "", "lastScrapeResult": "Could not connect"},
                    {"seederCount": -1}
                ]
            }]
        }))
        .unwrap();
        let enrichment = to_enrichment(list.torrents.into_iter().next().unwrap());

        assert_eq!(enrichment.state.as_deref(), Some("downloading"));
        assert_eq!(enrichment.peers, Some(3));
        assert_eq!(enrichment.seeds, Some(7));
        assert_eq!(enrichment.download_speed, Some(2048));
        assert_eq!(
            enrichment.tracker_message.as_deref(),
            Some("Success | Could not connect")
        );
    }

    #[test]
    fn test_enrichment_without_trackers() {
        let list: TorrentList =
            serde_json::from_value(json!({"torrents": [{"status": 0}]})).unwrap();
        let enrichment = to_enrichment(list.torrents.into_iter().next().unwrap());
        assert_eq!(enrichment.state.as_deref(), Some("stopped"));
        assert_eq!(enrichment.seeds, None);
        assert_eq!(enrichment.tracker_message, None);
    }
}
