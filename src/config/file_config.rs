use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FileConfig {
    pub general: Option<GeneralConfig>,
    /// Global rule defaults.
    pub rules: Option<RuleOverrides>,
    pub services: BTreeMap<String, ServiceConfig>,
    /// Title-matched override groups, evaluated in declaration order.
    pub categories: Vec<CategoryConfig>,
    pub whitelist: Option<WhitelistConfig>,
    pub clients: Option<ClientsConfig>,
    pub notifications: Option<NotificationsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub interval_secs: Option<u64>,
    pub strike_file_path: Option<String>,
    pub dry_run: Option<bool>,
    pub explain_decisions: Option<bool>,
    pub structured_logs: Option<bool>,
    /// `"all"` or a positive amount.
    pub reset_strikes_on_progress: Option<ResetValue>,
    pub request_timeout_secs: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_backoff_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ResetValue {
    Amount(i64),
    Text(String),
}

/// Rule fields that may be set globally, per service and per category.
/// `None` means "not set at this layer".
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct RuleOverrides {
    pub stall_limit: Option<u32>,
    pub grace_period_minutes: Option<f64>,
    pub no_progress_max_age_minutes: Option<f64>,
    pub max_queue_age_hours: Option<f64>,
    pub tracker_error_strikes: Option<u32>,
    pub min_speed_bytes_per_sec: Option<f64>,
    pub min_speed_duration_minutes: Option<f64>,
    pub client_state_as_stalled: Option<bool>,
    pub client_zero_activity_minutes: Option<f64>,
    pub seeder_stall_threshold: Option<i64>,
    pub seeder_stall_progress_ceiling: Option<f64>,
    pub large_size_gb: Option<f64>,
    pub large_zero_seeders_remove_minutes: Option<f64>,
    pub large_progress_ceiling_percent: Option<f64>,
    // Request gating, honored at service and global level only
    pub min_request_interval_ms: Option<u64>,
    pub max_concurrent_requests: Option<usize>,
    pub reannounce: Option<ReannounceOverrides>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct ReannounceOverrides {
    pub enabled: Option<bool>,
    pub cooldown_minutes: Option<f64>,
    pub max_attempts: Option<u32>,
    pub do_recheck: Option<bool>,
    pub only_when_seeds_zero: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    /// sonarr, radarr or lidarr. Inferred from the service name when absent.
    pub kind: Option<String>,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub enabled: Option<bool>,
    pub auto_search: Option<bool>,
    pub remove_from_client: Option<bool>,
    pub use_blocklist_param: Option<bool>,
    #[serde(flatten)]
    pub rules: RuleOverrides,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CategoryConfig {
    pub name: Option<String>,
    pub title_contains: Vec<String>,
    #[serde(flatten)]
    pub rules: RuleOverrides,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WhitelistConfig {
    pub ids: Vec<i64>,
    pub download_ids: Vec<String>,
    pub title_contains: Vec<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ClientsConfig {
    pub qbittorrent: Option<ClientEndpointConfig>,
    pub transmission: Option<ClientEndpointConfig>,
    pub deluge: Option<ClientEndpointConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ClientEndpointConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct NotificationsConfig {
    pub destinations: Vec<DestinationConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DestinationConfig {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub url: Option<String>,
    pub template: Option<String>,
    pub reasons: Option<Vec<String>>,
    pub batch: Option<bool>,
    pub raw_json: Option<bool>,
    pub headers: HashMap<String, String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
