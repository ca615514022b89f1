use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    static ref TRACKER_ERROR_RE: Regex =
        Regex::new(r"(?i)unregistered|not registered|torrent not found|not found on tracker")
            .unwrap();
}

const WAITING_MARKERS: [&str; 3] = ["queued", "pending", "waiting"];

/// Download protocol reported by the managing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Torrent,
    Usenet,
    #[default]
    Unknown,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Torrent => "torrent",
            Protocol::Usenet => "usenet",
            Protocol::Unknown => "unknown",
        }
    }

    /// Parse the loose protocol values found in queue records.
    pub fn from_str(s: &str) -> Self {
        let lower = s.to_lowercase();
        if lower.contains("torrent") || lower == "1" {
            Protocol::Torrent
        } else if lower.contains("usenet") || lower == "2" {
            Protocol::Usenet
        } else {
            Protocol::Unknown
        }
    }
}

/// Identifiers used to ask the managing service for a replacement release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTarget {
    pub episode_ids: Vec<i64>,
    pub series_id: Option<i64>,
    pub movie_id: Option<i64>,
    pub album_id: Option<i64>,
}

impl SearchTarget {
    pub fn is_empty(&self) -> bool {
        self.episode_ids.is_empty()
            && self.series_id.is_none()
            && self.movie_id.is_none()
            && self.album_id.is_none()
    }
}

/// Live data reported by the torrent client owning a download.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientEnrichment {
    pub state: Option<String>,
    pub peers: Option<u32>,
    pub seeds: Option<u32>,
    /// Bytes per second.
    pub download_speed: Option<u64>,
    pub tracker_message: Option<String>,
}

impl ClientEnrichment {
    /// Fill fields still unknown here from `other`.
    pub fn fill_missing(&mut self, other: ClientEnrichment) {
        self.state = self.state.take().or(other.state);
        self.peers = self.peers.or(other.peers);
        self.seeds = self.seeds.or(other.seeds);
        self.download_speed = self.download_speed.or(other.download_speed);
        self.tracker_message = self.tracker_message.take().or(other.tracker_message);
    }
}

/// One entry of a service queue, rebuilt on every poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub service: String,
    pub id: i64,
    pub download_id: Option<String>,
    pub title: String,
    pub size: u64,
    pub size_left: u64,
    pub status: String,
    pub tracked_status: Option<String>,
    pub messages: Vec<String>,
    pub protocol: Protocol,
    pub added: Option<DateTime<Utc>>,
    pub seeders: Option<u32>,
    pub indexer: Option<String>,
    pub search: SearchTarget,
    pub enrichment: Option<ClientEnrichment>,
}

impl QueueItem {
    pub fn strike_key(&self) -> StrikeKey {
        StrikeKey::new(&self.service, self.id)
    }

    pub fn is_torrent(&self) -> bool {
        self.protocol == Protocol::Torrent
    }

    /// Percentage of bytes already transferred. An unknown size counts as 0%.
    pub fn progress_percent(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        let done = self.size.saturating_sub(self.size_left) as f64;
        (done / self.size as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Fully transferred items, including ones that failed post-processing.
    pub fn is_completed(&self) -> bool {
        (self.size > 0 && self.size_left == 0) || self.progress_percent() >= 99.9
    }

    /// Seeders as reported by the service, falling back to the torrent client.
    pub fn seeders(&self) -> Option<u32> {
        self.seeders
            .or_else(|| self.enrichment.as_ref().and_then(|e| e.seeds))
    }

    pub fn client_state(&self) -> Option<String> {
        self.enrichment
            .as_ref()
            .and_then(|e| e.state.as_ref())
            .map(|s| s.to_lowercase())
    }

    /// True while the item is waiting for a download slot or metadata.
    pub fn is_queued(&self) -> bool {
        let status = self.status.to_lowercase();
        let tracked = self
            .tracked_status
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();
        if WAITING_MARKERS
            .iter()
            .any(|m| status.contains(m) || tracked.contains(m))
        {
            return true;
        }
        match self.client_state() {
            Some(state) => {
                state.contains("queue") || state == "download_wait" || state == "check_wait"
            }
            None => false,
        }
    }

    /// True when the service or the client reports that the tracker no
    /// longer knows the torrent.
    pub fn has_tracker_error(&self) -> bool {
        if self.messages.iter().any(|m| TRACKER_ERROR_RE.is_match(m)) {
            return true;
        }
        self.enrichment
            .as_ref()
            .and_then(|e| e.tracker_message.as_deref())
            .map(|m| TRACKER_ERROR_RE.is_match(m))
            .unwrap_or(false)
    }
}

/// Stable identity of a queue item for strike accounting: `service:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrikeKey(String);

impl StrikeKey {
    pub fn new(service: &str, id: i64) -> Self {
        Self(format!("{}:{}", service, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The service part of the key. Service names may themselves contain `:`.
    pub fn service(&self) -> &str {
        self.0.rsplit_once(':').map(|(s, _)| s).unwrap_or(&self.0)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (service, id) = s.rsplit_once(':')?;
        if service.is_empty() {
            return None;
        }
        let id: i64 = id.parse().ok()?;
        Some(Self::new(service, id))
    }
}

impl fmt::Display for StrikeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
