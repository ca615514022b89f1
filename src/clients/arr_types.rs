//! Wire types for the Sonarr/Radarr/Lidarr v3 queue API.

use crate::queue::{Protocol, QueueItem, SearchTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One page of `GET /queue`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrQueuePage {
    #[serde(default)]
    pub total_records: u64,
    #[serde(default)]
    pub records: Vec<ArrQueueRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrStatusMessage {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrRelease {
    pub seeders: Option<u32>,
    pub seeder_count: Option<u32>,
    pub indexer: Option<String>,
    pub indexer_name: Option<String>,
}

impl ArrRelease {
    fn seeders(&self) -> Option<u32> {
        self.seeders.or(self.seeder_count)
    }

    fn indexer(&self) -> Option<&str> {
        self.indexer
            .as_deref()
            .or(self.indexer_name.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArrRemote {
    #[serde(default)]
    pub release: Option<ArrRelease>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrQueueRecord {
    pub id: i64,
    #[serde(default, alias = "downloadID")]
    pub download_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub size: Option<f64>,
    #[serde(default)]
    pub sizeleft: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "trackedDownloadState")]
    pub tracked_download_status: Option<String>,
    #[serde(default)]
    pub status_messages: Vec<ArrStatusMessage>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Either a name ("torrent") or the numeric enum (1 = torrent, 2 = usenet).
    #[serde(default)]
    pub protocol: Option<Value>,
    #[serde(default)]
    pub added: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub release: ArrRelease,
    #[serde(default)]
    pub remote_episode: Option<ArrRemote>,
    #[serde(default)]
    pub remote_movie: Option<ArrRemote>,
    #[serde(default, rename = "release")]
    pub release_info: Option<ArrRelease>,
    #[serde(default)]
    pub episode_id: Option<i64>,
    #[serde(default)]
    pub episode_ids: Vec<i64>,
    #[serde(default)]
    pub series_id: Option<i64>,
    #[serde(default)]
    pub movie_id: Option<i64>,
    #[serde(default)]
    pub album_id: Option<i64>,
}

impl ArrQueueRecord {
    /// Release details may sit on the record, under `release`, or under
    /// `remoteEpisode.release` / `remoteMovie.release`.
    fn releases(&self) -> impl Iterator<Item = &ArrRelease> {
        std::iter::once(&self.release)
            .chain(self.release_info.iter())
            .chain(self.remote_episode.iter().filter_map(|r| r.release.as_ref()))
            .chain(self.remote_movie.iter().filter_map(|r| r.release.as_ref()))
    }

    pub fn into_queue_item(self, service: &str) -> QueueItem {
        let seeders = self.releases().find_map(|r| r.seeders());
        let indexer = self
            .releases()
            .find_map(|r| r.indexer())
            .map(str::to_string);

        let protocol = match &self.protocol {
            Some(Value::String(s)) => Protocol::from_str(s),
            Some(Value::Number(n)) => Protocol::from_str(&n.to_string()),
            _ => Protocol::Unknown,
        };

        let mut messages = Vec::new();
        for msg in &self.status_messages {
            if let Some(title) = msg.title.as_deref().filter(|t| !t.is_empty()) {
                messages.push(title.to_string());
            }
            messages.extend(msg.messages.iter().filter(|m| !m.is_empty()).cloned());
        }
        if let Some(err) = self.error_message.filter(|e| !e.is_empty()) {
            messages.push(err);
        }

        let mut episode_ids = self.episode_ids;
        if let Some(id) = self.episode_id {
            if !episode_ids.contains(&id) {
                episode_ids.insert(0, id);
            }
        }

        QueueItem {
            service: service.to_string(),
            id: self.id,
            download_id: self.download_id.filter(|d| !d.is_empty()),
            title: self.title.unwrap_or_default(),
            size: non_negative(self.size),
            size_left: non_negative(self.sizeleft),
            status: self.status.unwrap_or_default(),
            tracked_status: self.tracked_download_status,
            messages,
            protocol,
            added: self.added,
            seeders,
            indexer,
            search: SearchTarget {
                episode_ids,
                series_id: self.series_id,
                movie_id: self.movie_id,
                album_id: self.album_id,
            },
            enrichment: None,
        }
    }
}

fn non_negative(value: Option<f64>) -> u64 {
    value.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(0.0) as u64
}

/// Body of `POST /command` that triggers a replacement search.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name")]
pub enum SearchCommand {
    EpisodeSearch {
        #[serde(rename = "episodeIds")]
        episode_ids: Vec<i64>,
    },
    SeriesSearch {
        #[serde(rename = "seriesId")]
        series_id: i64,
    },
    MoviesSearch {
        #[serde(rename = "movieIds")]
        movie_ids: Vec<i64>,
    },
    AlbumSearch {
        #[serde(rename = "albumIds")]
        album_ids: Vec<i64>,
    },
}
