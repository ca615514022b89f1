mod file_config;
mod resolver;
mod whitelist;

pub use file_config::{
    CategoryConfig, ClientEndpointConfig, ClientsConfig, DestinationConfig, FileConfig,
    GeneralConfig, NotificationsConfig, ReannounceOverrides, ResetValue, RuleOverrides,
    ServiceConfig, WhitelistConfig,
};
pub use resolver::{
    match_category, resolve, resolve_service_limits, EffectiveConfig, LargeItemRule,
    MinSpeedRule, ReannouncePolicy, SeederStallRule, ServiceLimits, DEFAULT_STALL_LIMIT,
};
pub use whitelist::Whitelist;

use crate::notifications::{Destination, DestinationType, ReasonFilter, DEFAULT_TEMPLATE};
use anyhow::Result;
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "/app/config.toml";
pub const DEFAULT_STRIKE_FILE_PATH: &str = "/app/data/strikes.json";
pub const DEFAULT_INTERVAL_SECS: u64 = 600;
/// Longest accepted cycle interval: one week.
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 3600;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub strike_file: Option<PathBuf>,
    pub interval_secs: u64,
    pub dry_run: bool,
    pub structured_logs: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            strike_file: None,
            interval_secs: DEFAULT_INTERVAL_SECS,
            dry_run: false,
            structured_logs: false,
        }
    }
}

/// How many strikes a progressing item sheds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPolicy {
    All,
    Amount(u32),
}

impl ResetPolicy {
    fn from_value(value: Option<&ResetValue>) -> Self {
        match value {
            None => ResetPolicy::All,
            Some(ResetValue::Amount(n)) => {
                ResetPolicy::Amount((*n).clamp(1, u32::MAX as i64) as u32)
            }
            Some(ResetValue::Text(text)) => {
                let text = text.trim();
                if text.eq_ignore_ascii_case("all") {
                    ResetPolicy::All
                } else if let Ok(n) = text.parse::<i64>() {
                    ResetPolicy::Amount(n.clamp(1, u32::MAX as i64) as u32)
                } else {
                    warn!(
                        "Invalid reset_strikes_on_progress {:?}, using \"all\"",
                        text
                    );
                    ResetPolicy::All
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneralSettings {
    pub interval_secs: u64,
    pub strike_file_path: PathBuf,
    pub dry_run: bool,
    pub explain_decisions: bool,
    pub structured_logs: bool,
    pub reset_policy: ResetPolicy,
    pub request_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_backoff_secs: f64,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            strike_file_path: PathBuf::from(DEFAULT_STRIKE_FILE_PATH),
            dry_run: false,
            explain_decisions: false,
            structured_logs: false,
            reset_policy: ResetPolicy::All,
            request_timeout_secs: 10,
            retry_attempts: 2,
            retry_backoff_secs: 1.0,
        }
    }
}

/// Flavor of a managed service, which decides its search command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Sonarr,
    Radarr,
    Lidarr,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [
        ServiceKind::Sonarr,
        ServiceKind::Radarr,
        ServiceKind::Lidarr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Sonarr => "sonarr",
            ServiceKind::Radarr => "radarr",
            ServiceKind::Lidarr => "lidarr",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sonarr" => Some(ServiceKind::Sonarr),
            "radarr" => Some(ServiceKind::Radarr),
            "lidarr" => Some(ServiceKind::Lidarr),
            _ => None,
        }
    }

    /// Guess the kind from a service name such as `radarr-4k`.
    pub fn infer(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| lower.contains(k.as_str()))
    }
}

/// A managed service with a complete endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub name: String,
    pub kind: ServiceKind,
    pub url: String,
    pub api_key: String,
    pub auto_search: bool,
    pub remove_from_client: bool,
    pub use_blocklist_param: bool,
    pub rules: RuleOverrides,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientEndpoint {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientSettings {
    pub qbittorrent: Option<ClientEndpoint>,
    pub transmission: Option<ClientEndpoint>,
    pub deluge: Option<ClientEndpoint>,
}

impl ClientSettings {
    pub fn is_empty(&self) -> bool {
        self.qbittorrent.is_none() && self.transmission.is_none() && self.deluge.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub general: GeneralSettings,
    /// Global rule defaults.
    pub rules: RuleOverrides,
    pub categories: Vec<CategoryConfig>,
    pub services: Vec<ServiceSettings>,
    pub whitelist: Whitelist,
    pub clients: ClientSettings,
    pub destinations: Vec<Destination>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present. Service endpoints fall
    /// back to `<NAME>_URL` / `<NAME>_API_KEY` environment variables.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        Self::resolve_with_env(cli, file_config, |key| {
            std::env::var(key).ok().filter(|v| !v.is_empty())
        })
    }

    pub fn resolve_with_env(
        cli: &CliConfig,
        file_config: Option<FileConfig>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let file = file_config.unwrap_or_default();
        let general_file = file.general.unwrap_or_default();
        let defaults = GeneralSettings::default();

        let general = GeneralSettings {
            interval_secs: general_file
                .interval_secs
                .unwrap_or(cli.interval_secs)
                .clamp(1, MAX_INTERVAL_SECS),
            strike_file_path: general_file
                .strike_file_path
                .map(PathBuf::from)
                .or_else(|| cli.strike_file.clone())
                .unwrap_or(defaults.strike_file_path),
            dry_run: general_file.dry_run.unwrap_or(cli.dry_run),
            explain_decisions: general_file
                .explain_decisions
                .unwrap_or(defaults.explain_decisions),
            structured_logs: general_file.structured_logs.unwrap_or(cli.structured_logs),
            reset_policy: ResetPolicy::from_value(general_file.reset_strikes_on_progress.as_ref()),
            request_timeout_secs: general_file
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs)
                .max(1),
            retry_attempts: general_file
                .retry_attempts
                .unwrap_or(defaults.retry_attempts),
            retry_backoff_secs: general_file
                .retry_backoff_secs
                .unwrap_or(defaults.retry_backoff_secs)
                .max(0.0),
        };

        let rules = file.rules.unwrap_or_default();
        if rules.min_request_interval_ms.unwrap_or(0) > 0
            && rules.max_concurrent_requests.unwrap_or(0) == 0
        {
            warn!(
                "min_request_interval_ms set without max_concurrent_requests; consider setting both"
            );
        }

        let services = resolve_services(&file.services, &env);
        let whitelist = Whitelist::from_config(&file.whitelist.unwrap_or_default());
        let clients = resolve_clients(file.clients.unwrap_or_default());
        let destinations = file
            .notifications
            .map(|n| resolve_destinations(&n.destinations))
            .unwrap_or_default();

        Ok(Self {
            general,
            rules,
            categories: file.categories,
            services,
            whitelist,
            clients,
            destinations,
        })
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSettings> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Settings in force for an item of `service` titled `title`.
    pub fn effective_config(&self, service: &str, title: &str) -> EffectiveConfig {
        let overrides = self.service(service).map(|s| &s.rules);
        resolve(&self.rules, overrides, &self.categories, title)
    }

    pub fn service_limits(&self, service: &str) -> ServiceLimits {
        resolve_service_limits(&self.rules, self.service(service).map(|s| &s.rules))
    }
}

fn resolve_services(
    configured: &std::collections::BTreeMap<String, ServiceConfig>,
    env: &impl Fn(&str) -> Option<String>,
) -> Vec<ServiceSettings> {
    let mut services = Vec::new();

    let mut candidates: Vec<(String, ServiceConfig)> = configured
        .iter()
        .map(|(name, cfg)| (name.clone(), cfg.clone()))
        .collect();
    // Well-known services may be configured from the environment alone.
    for kind in ServiceKind::ALL {
        if !configured.contains_key(kind.as_str()) {
            candidates.push((kind.as_str().to_string(), ServiceConfig::default()));
        }
    }

    for (name, cfg) in candidates {
        if !cfg.enabled.unwrap_or(true) {
            continue;
        }
        let upper = name.to_uppercase().replace('-', "_");
        let url = cfg.url.clone().or_else(|| env(&format!("{}_URL", upper)));
        let api_key = cfg
            .api_key
            .clone()
            .or_else(|| env(&format!("{}_API_KEY", upper)));

        let (url, api_key) = match (url, api_key) {
            (Some(url), Some(api_key)) => (url, api_key),
            (None, None) => continue,
            _ => {
                warn!("Service {} has partial config (url/api_key); it will be skipped", name);
                continue;
            }
        };

        let kind = match cfg
            .kind
            .as_deref()
            .and_then(ServiceKind::from_str)
            .or_else(|| ServiceKind::infer(&name))
        {
            Some(kind) => kind,
            None => {
                warn!(
                    "Cannot determine kind of service {}; set kind = \"sonarr|radarr|lidarr\"",
                    name
                );
                continue;
            }
        };

        if cfg.rules.min_request_interval_ms.unwrap_or(0) > 0
            && cfg.rules.max_concurrent_requests.unwrap_or(0) == 0
        {
            warn!(
                "Service {}: min_request_interval_ms set without max_concurrent_requests",
                name
            );
        }

        services.push(ServiceSettings {
            name,
            kind,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            auto_search: cfg.auto_search.unwrap_or(false),
            remove_from_client: cfg.remove_from_client.unwrap_or(true),
            use_blocklist_param: cfg.use_blocklist_param.unwrap_or(true),
            rules: cfg.rules,
        });
    }
    services
}

fn resolve_clients(clients: ClientsConfig) -> ClientSettings {
    let endpoint = |name: &str, cfg: Option<ClientEndpointConfig>| {
        let cfg = cfg?;
        match cfg.url {
            Some(url) if !url.is_empty() => Some(ClientEndpoint {
                url: url.trim_end_matches('/').to_string(),
                username: cfg.username,
                password: cfg.password,
            }),
            _ => {
                warn!("Client {} has no url; it will be ignored", name);
                None
            }
        }
    };
    ClientSettings {
        qbittorrent: endpoint("qbittorrent", clients.qbittorrent),
        transmission: endpoint("transmission", clients.transmission),
        deluge: endpoint("deluge", clients.deluge),
    }
}

fn resolve_destinations(configured: &[DestinationConfig]) -> Vec<Destination> {
    let mut out = Vec::new();
    for (idx, cfg) in configured.iter().enumerate() {
        let label = cfg
            .name
            .clone()
            .or_else(|| cfg.url.clone())
            .unwrap_or_else(|| format!("destination-{}", idx));
        let Some(url) = cfg.url.clone().filter(|u| !u.is_empty()) else {
            warn!("Notification destination '{}' missing url; it will be ignored", label);
            continue;
        };
        let kind_name = cfg.kind.as_deref().unwrap_or("generic");
        let Some(kind) = DestinationType::from_str(kind_name) else {
            warn!(
                "Notification destination '{}' has unknown type {:?}; it will be ignored",
                label, kind_name
            );
            continue;
        };
        out.push(Destination {
            name: label,
            kind,
            url,
            template: cfg
                .template
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            reasons: ReasonFilter::from_list(cfg.reasons.as_deref().unwrap_or_default()),
            batch: cfg.batch.unwrap_or(false),
            raw_json: cfg.raw_json.unwrap_or(false),
            headers: cfg
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        });
    }
    out
}
