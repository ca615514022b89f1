//! Client for the managed services (Sonarr, Radarr, Lidarr).

use super::arr_types::{ArrQueuePage, SearchCommand};
use super::error::TransportError;
use super::gate::RequestGate;
use super::http::{build_client, HttpExecutor};
use super::retry::RetryPolicy;
use crate::config::{GeneralSettings, ServiceKind, ServiceLimits, ServiceSettings};
use crate::queue::{QueueItem, SearchTarget};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const PAGE_SIZE: u64 = 100;
const API_KEY_HEADER: &str = "X-Api-Key";

/// Operations the cleaner needs from a managed service.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch every queue record, following pagination.
    async fn fetch_queue(&self) -> Result<Vec<QueueItem>, TransportError>;

    /// Delete a queue entry, optionally blocklisting its release.
    async fn remove(&self, item_id: i64, blacklist: bool) -> Result<(), TransportError>;

    /// Ask the service to look for a replacement.
    /// Returns false when the item carries nothing to search for.
    async fn search(&self, item: &QueueItem) -> Result<bool, TransportError>;
}

/// Builds the replacement search command for a service flavor.
pub fn search_command(kind: ServiceKind, target: &SearchTarget) -> Option<SearchCommand> {
    match kind {
        ServiceKind::Sonarr => {
            if !target.episode_ids.is_empty() {
                Some(SearchCommand::EpisodeSearch {
                    episode_ids: target.episode_ids.clone(),
                })
            } else {
                target
                    .series_id
                    .map(|series_id| SearchCommand::SeriesSearch { series_id })
            }
        }
        ServiceKind::Radarr => target.movie_id.map(|id| SearchCommand::MoviesSearch {
            movie_ids: vec![id],
        }),
        ServiceKind::Lidarr => target.album_id.map(|id| SearchCommand::AlbumSearch {
            album_ids: vec![id],
        }),
    }
}

/// HTTP client for the v3 queue API shared by the *arr family.
pub struct ArrClient {
    name: String,
    kind: ServiceKind,
    base_url: String,
    api_key: String,
    remove_from_client: bool,
    use_blocklist_param: bool,
    http: HttpExecutor,
}

impl ArrClient {
    pub fn new(settings: &ServiceSettings, http: HttpExecutor) -> Self {
        Self {
            name: settings.name.clone(),
            kind: settings.kind,
            base_url: settings.url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            remove_from_client: settings.remove_from_client,
            use_blocklist_param: settings.use_blocklist_param,
            http,
        }
    }

    /// Build a client with its own gate, timeout and retry policy.
    pub fn from_settings(
        settings: &ServiceSettings,
        general: &GeneralSettings,
        limits: &ServiceLimits,
    ) -> Result<Self> {
        let http = HttpExecutor::new(
            build_client(general.request_timeout_secs, false)?,
            RetryPolicy::new(general),
            Arc::new(RequestGate::new(limits)),
        );
        Ok(Self::new(settings, http))
    }

    pub fn gate(&self) -> &Arc<RequestGate> {
        self.http.gate()
    }

    fn remove_params(&self, blacklist: bool) -> Vec<(&'static str, &'static str)> {
        let mut params = Vec::new();
        if blacklist {
            let name = if self.use_blocklist_param {
                "blocklist"
            } else {
                "blacklist"
            };
            params.push((name, "true"));
        }
        if self.remove_from_client {
            params.push(("removeFromClient", "true"));
            params.push(("skipImport", "true"));
        }
        params
    }
}

#[async_trait]
impl ServiceClient for ArrClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_queue(&self) -> Result<Vec<QueueItem>, TransportError> {
        let url = format!("{}/queue", self.base_url);
        let mut items = Vec::new();
        let mut page: u64 = 1;

        loop {
            let label = format!("{} queue page {}", self.name, page);
            let body: ArrQueuePage = self
                .http
                .json(&label, |client| {
                    client
                        .get(&url)
                        .header(API_KEY_HEADER, &self.api_key)
                        .query(&[("page", page), ("pageSize", PAGE_SIZE)])
                })
                .await?;

            let received = body.records.len();
            items.extend(
                body.records
                    .into_iter()
                    .map(|record| record.into_queue_item(&self.name)),
            );
            debug!(
                "{}: fetched page {} ({} records, {}/{} total)",
                self.name,
                page,
                received,
                items.len(),
                body.total_records
            );

            if received == 0 || items.len() as u64 >= body.total_records {
                break;
            }
            page += 1;
        }

        Ok(items)
    }

    async fn remove(&self, item_id: i64, blacklist: bool) -> Result<(), TransportError> {
        let url = format!("{}/queue/{}", self.base_url, item_id);
        let params = self.remove_params(blacklist);
        let label = format!("{} remove {}", self.name, item_id);
        self.http
            .send(&label, |client| {
                client
                    .delete(&url)
                    .header(API_KEY_HEADER, &self.api_key)
                    .query(&params)
            })
            .await?;
        Ok(())
    }

    async fn search(&self, item: &QueueItem) -> Result<bool, TransportError> {
        let Some(command) = search_command(self.kind, &item.search) else {
            return Ok(false);
        };
        let url = format!("{}/command", self.base_url);
        let label = format!("{} search {}", self.name, item.id);
        self.http
            .send(&label, |client| {
                client
                    .post(&url)
                    .header(API_KEY_HEADER, &self.api_key)
                    .json(&command)
            })
            .await?;
        Ok(true)
    }
}
