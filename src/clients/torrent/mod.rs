//! Torrent client adapters used to enrich queue items and to reannounce.

mod deluge;
mod qbittorrent;
mod transmission;

pub use deluge::DelugeClient;
pub use qbittorrent::QbittorrentClient;
pub use transmission::{transmission_state, TransmissionClient};

use super::error::TransportError;
use super::gate::RequestGate;
use super::http::{build_client, HttpExecutor};
use super::retry::RetryPolicy;
use crate::config::{ClientSettings, GeneralSettings};
use crate::queue::ClientEnrichment;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait TorrentClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Live state of a torrent, or `None` when this client does not know it.
    async fn inspect(&self, hash: &str) -> Result<Option<ClientEnrichment>, TransportError>;

    /// Force a tracker announce, optionally followed by a recheck.
    /// Returns whether the client accepted the request.
    async fn reannounce(&self, hash: &str, recheck: bool) -> Result<bool, TransportError>;
}

/// The configured torrent clients, queried in a fixed order:
/// qBittorrent, Transmission, Deluge.
#[derive(Default)]
pub struct ClientPool {
    clients: Vec<Box<dyn TorrentClient>>,
}

impl ClientPool {
    pub fn new(clients: Vec<Box<dyn TorrentClient>>) -> Self {
        Self { clients }
    }

    pub fn from_settings(settings: &ClientSettings, general: &GeneralSettings) -> Result<Self> {
        let retry = RetryPolicy::new(general);
        let executor = |cookies: bool| -> Result<HttpExecutor> {
            Ok(HttpExecutor::new(
                build_client(general.request_timeout_secs, cookies)?,
                retry.clone(),
                Arc::new(RequestGate::open()),
            ))
        };

        let mut clients: Vec<Box<dyn TorrentClient>> = Vec::new();
        if let Some(endpoint) = &settings.qbittorrent {
            clients.push(Box::new(QbittorrentClient::new(endpoint, executor(true)?)));
        }
        if let Some(endpoint) = &settings.transmission {
            clients.push(Box::new(TransmissionClient::new(endpoint, executor(false)?)));
        }
        if let Some(endpoint) = &settings.deluge {
            clients.push(Box::new(DelugeClient::new(endpoint, executor(true)?)));
        }
        Ok(Self { clients })
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Merge what every client knows about `download_id`.
    /// Earlier clients win field by field; failures are logged and skipped.
    pub async fn enrich(&self, download_id: &str) -> Option<ClientEnrichment> {
        let hash = download_id.to_lowercase();
        let mut merged: Option<ClientEnrichment> = None;
        for client in &self.clients {
            match client.inspect(&hash).await {
                Ok(Some(found)) => match merged.as_mut() {
                    Some(existing) => existing.fill_missing(found),
                    None => merged = Some(found),
                },
                Ok(None) => debug!("{} does not know torrent {}", client.name(), hash),
                Err(e) => warn!("{}: failed to inspect {}: {}", client.name(), hash, e),
            }
        }
        merged
    }

    /// Reannounce through every client. Succeeds when any client accepted.
    pub async fn reannounce(&self, download_id: &str, recheck: bool) -> bool {
        let hash = download_id.to_lowercase();
        let mut accepted = false;
        for client in &self.clients {
            match client.reannounce(&hash, recheck).await {
                Ok(ok) => {
                    debug!("{}: reannounce {} accepted={}", client.name(), hash, ok);
                    accepted |= ok;
                }
                Err(e) => warn!("{}: reannounce of {} failed: {}", client.name(), hash, e),
            }
        }
        accepted
    }
}
