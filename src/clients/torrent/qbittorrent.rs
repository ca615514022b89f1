//! qBittorrent Web API v2 adapter.

use super::TorrentClient;
use crate::clients::error::TransportError;
use crate::clients::http::{decode_json, ensure_success, HttpExecutor};
use crate::config::ClientEndpoint;
use crate::queue::ClientEnrichment;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct TorrentInfo {
    state: Option<String>,
    num_seeds: Option<i64>,
    num_leechs: Option<i64>,
    dlspeed: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TrackerInfo {
    #[serde(default)]
    msg: Option<String>,
}

/// Session-cookie client. Logs in lazily and again after a 403.
pub struct QbittorrentClient {
    base_url: String,
    username: String,
    password: String,
    http: HttpExecutor,
    logged_in: Mutex<bool>,
}

impl QbittorrentClient {
    /// `http` must carry a cookie store for the session to stick.
    pub fn new(endpoint: &ClientEndpoint, http: HttpExecutor) -> Self {
        Self {
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            username: endpoint.username.clone().unwrap_or_default(),
            password: endpoint.password.clone().unwrap_or_default(),
            http,
            logged_in: Mutex::new(false),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.base_url, path)
    }

    async fn login(&self, logged_in: &mut bool) -> Result<(), TransportError> {
        let url = self.url("auth/login");
        let response = self
            .http
            .send("qbittorrent login", |client| {
                client.post(&url).form(&[
                    ("username", self.username.as_str()),
                    ("password", self.password.as_str()),
                ])
            })
            .await?;
        let body = response.text().await.unwrap_or_default();
        if body.trim().eq_ignore_ascii_case("fails.") {
            *logged_in = false;
            return Err(TransportError::Auth { url });
        }
        debug!("qbittorrent: logged in to {}", self.base_url);
        *logged_in = true;
        Ok(())
    }

    /// Send an authenticated request, logging in again once on 403.
    async fn request<F>(&self, label: &str, build: F) -> Result<Response, TransportError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        {
            let mut logged_in = self.logged_in.lock().await;
            if !*logged_in {
                self.login(&mut logged_in).await?;
            }
        }

        let response = self.http.execute(label, &build).await?;
        if response.status() != StatusCode::FORBIDDEN {
            return ensure_success(response).await;
        }

        {
            let mut logged_in = self.logged_in.lock().await;
            self.login(&mut logged_in).await?;
        }
        let response = self.http.execute(label, &build).await?;
        ensure_success(response).await
    }

    async fn tracker_message(&self, hash: &str) -> Result<Option<String>, TransportError> {
        let url = self.url("torrents/trackers");
        let response = self
            .request("qbittorrent trackers", |client| {
                client.get(&url).query(&[("hash", hash)])
            })
            .await?;
        let trackers: Vec<TrackerInfo> = decode_json(response).await?;
        let messages: Vec<String> = trackers
            .into_iter()
            .filter_map(|t| t.msg)
            .filter(|m| !m.is_empty())
            .collect();
        Ok((!messages.is_empty()).then(|| messages.join(" | ")))
    }
}

fn count(value: Option<i64>) -> Option<u32> {
    value.map(|v| v.clamp(0, u32::MAX as i64) as u32)
}

#[async_trait]
impl TorrentClient for QbittorrentClient {
    fn name(&self) -> &'static str {
        "qbittorrent"
    }

    async fn inspect(&self, hash: &str) -> Result<Option<ClientEnrichment>, TransportError> {
        let url = self.url("torrents/info");
        let response = self
            .request("qbittorrent info", |client| {
                client.get(&url).query(&[("hashes", hash)])
            })
            .await?;
        let torrents: Vec<TorrentInfo> = decode_json(response).await?;
        let Some(info) = torrents.into_iter().next() else {
            return Ok(None);
        };

        let tracker_message = self.tracker_message(hash).await?;
        Ok(Some(ClientEnrichment {
            state: info.state,
            peers: count(info.num_leechs),
            seeds: count(info.num_seeds),
            download_speed: info.dlspeed.map(|v| v.max(0) as u64),
            tracker_message,
        }))
    }

    async fn reannounce(&self, hash: &str, recheck: bool) -> Result<bool, TransportError> {
        let url = self.url("torrents/reannounce");
        self.request("qbittorrent reannounce", |client| {
            client.post(&url).form(&[("hashes", hash)])
        })
        .await?;

        if recheck {
            let url = self.url("torrents/recheck");
            self.request("qbittorrent recheck", |client| {
                client.post(&url).form(&[("hashes", hash)])
            })
            .await?;
        }
        Ok(true)
    }
}
