use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Number of consecutive successful polls an item may be missing from before
/// its record is pruned.
pub const STALE_AFTER_MISSED_POLLS: u32 = 2;

/// Persisted per-item state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeRecord {
    pub count: u32,
    /// `size_left` at the previous observation, for progress detection.
    #[serde(default)]
    pub last_size_left: Option<u64>,
    #[serde(default = "Utc::now")]
    pub first_seen: DateTime<Utc>,
    #[serde(default)]
    pub tracker_error_count: u32,
    #[serde(default)]
    pub last_progress_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub zero_seeders_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_reason: Option<String>,
    #[serde(default)]
    pub missed_polls: u32,
}

impl StrikeRecord {
    pub fn new(first_seen: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            last_size_left: None,
            first_seen,
            tracker_error_count: 0,
            last_progress_at: None,
            zero_seeders_since: None,
            last_reason: None,
            missed_polls: 0,
        }
    }
}

/// How `apply` changes the strike count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrikeDelta {
    Unchanged,
    Add(u32),
    /// Decrement, clamped at zero.
    Subtract(u32),
    Zero,
}

impl StrikeDelta {
    pub fn apply_to(&self, count: u32) -> u32 {
        match self {
            StrikeDelta::Unchanged => count,
            StrikeDelta::Add(n) => count.saturating_add(*n),
            StrikeDelta::Subtract(n) => count.saturating_sub(*n),
            StrikeDelta::Zero => 0,
        }
    }
}

/// Observation data written alongside a strike delta.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub observed_at: DateTime<Utc>,
    pub size_left: u64,
    pub progressed: bool,
    pub tracker_error_count: u32,
    pub zero_seeders_since: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl ProgressSnapshot {
    /// Fold this observation into `record`.
    pub fn merge_into(&self, record: &mut StrikeRecord) {
        record.last_size_left = Some(self.size_left);
        if self.progressed || record.last_progress_at.is_none() {
            record.last_progress_at = Some(self.observed_at);
        }
        record.tracker_error_count = self.tracker_error_count;
        record.zero_seeders_since = self.zero_seeders_since;
        if self.reason.is_some() {
            record.last_reason = self.reason.clone();
        }
        record.missed_polls = 0;
    }
}

/// Errors reading or writing the strike document.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read strike file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse strike file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write strike file {path:?}: {reason}")]
    Write { path: PathBuf, reason: String },
}
