//! Per-item settings resolution.
//!
//! Every rule field is resolved on its own: the first layer that sets it wins,
//! in the order matched category, service, global. The result is recomputed
//! for every item and never stored.

use super::file_config::{CategoryConfig, ReannounceOverrides, RuleOverrides};
use chrono::Duration;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub const DEFAULT_STALL_LIMIT: u32 = 3;
pub const DEFAULT_TRACKER_ERROR_STRIKES: u32 = 2;
pub const DEFAULT_SEEDER_STALL_PROGRESS_CEILING: f64 = 25.0;
pub const DEFAULT_LARGE_PROGRESS_CEILING: f64 = 100.0;
pub const DEFAULT_REANNOUNCE_COOLDOWN_MINUTES: f64 = 60.0;
pub const DEFAULT_REANNOUNCE_MAX_ATTEMPTS: u32 = 1;

/// Stall on low client-reported speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinSpeedRule {
    pub bytes_per_sec: f64,
    pub duration: Duration,
}

/// Stall torrents with few seeders that have not got far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeederStallRule {
    pub threshold: u32,
    pub progress_ceiling: f64,
}

/// Aggressive policy for big torrents nobody seeds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LargeItemRule {
    pub min_size_bytes: u64,
    pub zero_seeders_for: Duration,
    pub progress_ceiling: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReannouncePolicy {
    pub enabled: bool,
    pub cooldown: Duration,
    pub max_attempts: u32,
    pub do_recheck: bool,
    pub only_when_seeds_zero: bool,
}

impl Default for ReannouncePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            cooldown: minutes(DEFAULT_REANNOUNCE_COOLDOWN_MINUTES),
            max_attempts: DEFAULT_REANNOUNCE_MAX_ATTEMPTS,
            do_recheck: false,
            only_when_seeds_zero: true,
        }
    }
}

/// Settings in force for one queue item. Disabled rules are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub stall_limit: u32,
    pub grace_period: Duration,
    pub no_progress_max_age: Option<Duration>,
    pub max_queue_age: Option<Duration>,
    /// Zero disables tracker-error removal.
    pub tracker_error_strikes: u32,
    pub min_speed: Option<MinSpeedRule>,
    pub client_state_as_stalled: bool,
    pub client_zero_activity: Option<Duration>,
    pub seeder_stall: Option<SeederStallRule>,
    pub large_item: Option<LargeItemRule>,
    pub reannounce: ReannouncePolicy,
    /// Name of the category that matched, if any.
    pub category: Option<String>,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        resolve(&RuleOverrides::default(), None, &[], "")
    }
}

/// Request gating for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceLimits {
    pub min_request_interval_ms: u64,
    /// Zero means unbounded.
    pub max_concurrent_requests: usize,
}

pub(crate) fn minutes(value: f64) -> Duration {
    Duration::milliseconds((value.max(0.0) * 60_000.0) as i64)
}

fn positive(value: f64) -> Option<f64> {
    (value > 0.0).then_some(value)
}

fn first<T>(layers: &[&RuleOverrides], f: impl Fn(&RuleOverrides) -> Option<T>) -> Option<T> {
    layers.iter().find_map(|l| f(l))
}

fn first_reannounce<T>(
    layers: &[&RuleOverrides],
    f: impl Fn(&ReannounceOverrides) -> Option<T>,
) -> Option<T> {
    layers
        .iter()
        .find_map(|l| l.reannounce.as_ref().and_then(&f))
}

/// First category whose `title_contains` matches the title, ignoring case.
pub fn match_category<'a>(
    categories: &'a [CategoryConfig],
    title: &str,
) -> Option<&'a CategoryConfig> {
    let title = title.to_lowercase();
    categories.iter().find(|c| {
        c.title_contains
            .iter()
            .any(|s| !s.is_empty() && title.contains(&s.to_lowercase()))
    })
}

/// Resolve the settings for an item titled `title`.
pub fn resolve(
    global: &RuleOverrides,
    service: Option<&RuleOverrides>,
    categories: &[CategoryConfig],
    title: &str,
) -> EffectiveConfig {
    let category = match_category(categories, title);
    let mut layers: Vec<&RuleOverrides> = Vec::with_capacity(3);
    if let Some(c) = category {
        layers.push(&c.rules);
    }
    if let Some(s) = service {
        layers.push(s);
    }
    layers.push(global);

    // A zero stall limit is treated as unset at that layer.
    let stall_limit = layers
        .iter()
        .find_map(|l| l.stall_limit.filter(|v| *v > 0))
        .unwrap_or(DEFAULT_STALL_LIMIT);

    let grace_period = minutes(first(&layers, |l| l.grace_period_minutes).unwrap_or(0.0));
    let no_progress_max_age = first(&layers, |l| l.no_progress_max_age_minutes)
        .and_then(positive)
        .map(minutes);
    let max_queue_age = first(&layers, |l| l.max_queue_age_hours)
        .and_then(positive)
        .map(|h| minutes(h * 60.0));
    let tracker_error_strikes =
        first(&layers, |l| l.tracker_error_strikes).unwrap_or(DEFAULT_TRACKER_ERROR_STRIKES);

    let min_speed = match (
        first(&layers, |l| l.min_speed_bytes_per_sec).and_then(positive),
        first(&layers, |l| l.min_speed_duration_minutes).and_then(positive),
    ) {
        (Some(bytes_per_sec), Some(duration)) => Some(MinSpeedRule {
            bytes_per_sec,
            duration: minutes(duration),
        }),
        _ => None,
    };

    let client_state_as_stalled = first(&layers, |l| l.client_state_as_stalled).unwrap_or(false);
    let client_zero_activity = first(&layers, |l| l.client_zero_activity_minutes)
        .and_then(positive)
        .map(minutes);

    let seeder_stall = first(&layers, |l| l.seeder_stall_threshold)
        .filter(|t| *t >= 0)
        .map(|threshold| SeederStallRule {
            threshold: threshold.min(u32::MAX as i64) as u32,
            progress_ceiling: first(&layers, |l| l.seeder_stall_progress_ceiling)
                .unwrap_or(DEFAULT_SEEDER_STALL_PROGRESS_CEILING),
        });

    let large_item = match (
        first(&layers, |l| l.large_size_gb).and_then(positive),
        first(&layers, |l| l.large_zero_seeders_remove_minutes).and_then(positive),
    ) {
        (Some(gb), Some(mins)) => Some(LargeItemRule {
            min_size_bytes: (gb * BYTES_PER_GB) as u64,
            zero_seeders_for: minutes(mins),
            progress_ceiling: first(&layers, |l| l.large_progress_ceiling_percent)
                .unwrap_or(DEFAULT_LARGE_PROGRESS_CEILING),
        }),
        _ => None,
    };

    let defaults = ReannouncePolicy::default();
    let reannounce = ReannouncePolicy {
        enabled: first_reannounce(&layers, |r| r.enabled).unwrap_or(defaults.enabled),
        cooldown: first_reannounce(&layers, |r| r.cooldown_minutes)
            .map(minutes)
            .unwrap_or(defaults.cooldown),
        max_attempts: first_reannounce(&layers, |r| r.max_attempts)
            .unwrap_or(defaults.max_attempts),
        do_recheck: first_reannounce(&layers, |r| r.do_recheck).unwrap_or(defaults.do_recheck),
        only_when_seeds_zero: first_reannounce(&layers, |r| r.only_when_seeds_zero)
            .unwrap_or(defaults.only_when_seeds_zero),
    };

    EffectiveConfig {
        stall_limit,
        grace_period,
        no_progress_max_age,
        max_queue_age,
        tracker_error_strikes,
        min_speed,
        client_state_as_stalled,
        client_zero_activity,
        seeder_stall,
        large_item,
        reannounce,
        category: category.and_then(|c| c.name.clone()),
    }
}

/// Resolve request gating for a service: service value, then global, then off.
pub fn resolve_service_limits(
    global: &RuleOverrides,
    service: Option<&RuleOverrides>,
) -> ServiceLimits {
    ServiceLimits {
        min_request_interval_ms: service
            .and_then(|s| s.min_request_interval_ms)
            .or(global.min_request_interval_ms)
            .unwrap_or(0),
        max_concurrent_requests: service
            .and_then(|s| s.max_concurrent_requests)
            .or(global.max_concurrent_requests)
            .unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReannounceOverrides;

    fn category(name: &str, needle: &str, rules: RuleOverrides) -> CategoryConfig {
        CategoryConfig {
            name: Some(name.to_string()),
            title_contains: vec![needle.to_string()],
            rules,
        }
    }

    #[test]
    fn test_defaults() {
        let eff = EffectiveConfig::default();
        assert_eq!(eff.stall_limit, 3);
        assert_eq!(eff.grace_period, Duration::zero());
        assert_eq!(eff.no_progress_max_age, None);
        assert_eq!(eff.max_queue_age, None);
        assert_eq!(eff.tracker_error_strikes, 2);
        assert_eq!(eff.seeder_stall, None);
        assert_eq!(eff.large_item, None);
        assert!(!eff.reannounce.enabled);
        assert_eq!(eff.reannounce.cooldown, Duration::minutes(60));
        assert_eq!(eff.category, None);
    }

    #[test]
    fn test_precedence_is_per_field() {
        let global = RuleOverrides {
            stall_limit: Some(3),
            grace_period_minutes: Some(10.0),
            tracker_error_strikes: Some(4),
            ..Default::default()
        };
        let service = RuleOverrides {
            stall_limit: Some(5),
            grace_period_minutes: Some(20.0),
            ..Default::default()
        };
        let cats = vec![category(
            "anime",
            "subgroup",
            RuleOverrides {
                grace_period_minutes: Some(30.0),
                ..Default::default()
            },
        )];

        let eff = resolve(&global, Some(&service), &cats, "[SubGroup] Show 01");
        assert_eq!(eff.grace_period, Duration::minutes(30));
        assert_eq!(eff.stall_limit, 5);
        assert_eq!(eff.tracker_error_strikes, 4);
        assert_eq!(eff.category.as_deref(), Some("anime"));

        let eff = resolve(&global, Some(&service), &cats, "Other Show");
        assert_eq!(eff.grace_period, Duration::minutes(20));
        assert_eq!(eff.category, None);
    }

    #[test]
    fn test_first_declared_category_wins() {
        let cats = vec![
            category(
                "first",
                "show",
                RuleOverrides {
                    stall_limit: Some(7),
                    ..Default::default()
                },
            ),
            category(
                "second",
                "show",
                RuleOverrides {
                    stall_limit: Some(9),
                    ..Default::default()
                },
            ),
        ];
        let eff = resolve(&RuleOverrides::default(), None, &cats, "A Show");
        assert_eq!(eff.stall_limit, 7);
        assert_eq!(eff.category.as_deref(), Some("first"));
    }

    #[test]
    fn test_explicit_zero_disables_age_cap() {
        let global = RuleOverrides {
            max_queue_age_hours: Some(48.0),
            ..Default::default()
        };
        let service = RuleOverrides {
            max_queue_age_hours: Some(0.0),
            ..Default::default()
        };
        assert_eq!(resolve(&global, None, &[], "x").max_queue_age, Some(Duration::hours(48)));
        assert_eq!(resolve(&global, Some(&service), &[], "x").max_queue_age, None);
    }

    #[test]
    fn test_zero_stall_limit_falls_through() {
        let global = RuleOverrides {
            stall_limit: Some(6),
            ..Default::default()
        };
        let service = RuleOverrides {
            stall_limit: Some(0),
            ..Default::default()
        };
        assert_eq!(resolve(&global, Some(&service), &[], "x").stall_limit, 6);
    }

    #[test]
    fn test_seeder_stall_threshold_negative_disables() {
        let global = RuleOverrides {
            seeder_stall_threshold: Some(2),
            ..Default::default()
        };
        let service = RuleOverrides {
            seeder_stall_threshold: Some(-1),
            ..Default::default()
        };
        let enabled = resolve(&global, None, &[], "x").seeder_stall.unwrap();
        assert_eq!(enabled.threshold, 2);
        assert_eq!(enabled.progress_ceiling, 25.0);
        assert_eq!(resolve(&global, Some(&service), &[], "x").seeder_stall, None);
    }

    #[test]
    fn test_large_item_rule_needs_size_and_minutes() {
        let global = RuleOverrides {
            large_size_gb: Some(50.0),
            ..Default::default()
        };
        assert_eq!(resolve(&global, None, &[], "x").large_item, None);

        let global = RuleOverrides {
            large_size_gb: Some(1.0),
            large_zero_seeders_remove_minutes: Some(30.0),
            ..Default::default()
        };
        let rule = resolve(&global, None, &[], "x").large_item.unwrap();
        assert_eq!(rule.min_size_bytes, 1024 * 1024 * 1024);
        assert_eq!(rule.zero_seeders_for, Duration::minutes(30));
        assert_eq!(rule.progress_ceiling, 100.0);
    }

    #[test]
    fn test_reannounce_fields_layer_independently() {
        let global = RuleOverrides {
            reannounce: Some(ReannounceOverrides {
                enabled: Some(true),
                cooldown_minutes: Some(15.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let service = RuleOverrides {
            reannounce: Some(ReannounceOverrides {
                max_attempts: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        };
        let policy = resolve(&global, Some(&service), &[], "x").reannounce;
        assert!(policy.enabled);
        assert_eq!(policy.cooldown, Duration::minutes(15));
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.only_when_seeds_zero);
    }

    #[test]
    fn test_min_speed_rule() {
        let global = RuleOverrides {
            min_speed_bytes_per_sec: Some(1024.0),
            min_speed_duration_minutes: Some(10.0),
            ..Default::default()
        };
        let rule = resolve(&global, None, &[], "x").min_speed.unwrap();
        assert_eq!(rule.bytes_per_sec, 1024.0);
        assert_eq!(rule.duration, Duration::minutes(10));
    }

    #[test]
    fn test_service_limits() {
        let global = RuleOverrides {
            min_request_interval_ms: Some(250),
            ..Default::default()
        };
        let service = RuleOverrides {
            max_concurrent_requests: Some(2),
            ..Default::default()
        };
        let limits = resolve_service_limits(&global, Some(&service));
        assert_eq!(limits.min_request_interval_ms, 250);
        assert_eq!(limits.max_concurrent_requests, 2);
    }
}
