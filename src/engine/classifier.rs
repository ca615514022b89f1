//! Stall/progress classification of a single queue item.

use crate::config::EffectiveConfig;
use crate::queue::QueueItem;
use crate::strikes::{ProgressSnapshot, StrikeRecord};
use chrono::{DateTime, Duration, Utc};

const STALLED_CLIENT_STATES: [&str; 3] = ["stalleddl", "stalledup", "error"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Waiting for a download slot or metadata.
    Queued,
    GracePeriod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallCause {
    NoProgress,
    LargeZeroSeeders,
    LowSeeders,
    ClientState,
    ClientNoPeers,
    MinSpeed,
}

impl StallCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            StallCause::NoProgress => "no_progress",
            StallCause::LargeZeroSeeders => "large_zero_seeders",
            StallCause::LowSeeders => "low_seeders",
            StallCause::ClientState => "client_state",
            StallCause::ClientNoPeers => "client_no_peers",
            StallCause::MinSpeed => "min_speed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Waiting(WaitReason),
    /// Fully transferred; never penalized.
    Completed,
    Progressing,
    Stalled(StallCause),
    TrackerError,
    AgedOut,
    NoProgressTimeout,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Waiting(WaitReason::Queued) => "queued",
            Verdict::Waiting(WaitReason::GracePeriod) => "grace_period",
            Verdict::Completed => "completed",
            Verdict::Progressing => "progressing",
            Verdict::Stalled(cause) => cause.as_str(),
            Verdict::TrackerError => "tracker_error",
            Verdict::AgedOut => "max_age",
            Verdict::NoProgressTimeout => "no_progress_timeout",
        }
    }
}

/// Verdict plus the observation to record for this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub verdict: Verdict,
    pub snapshot: ProgressSnapshot,
}

/// Classify `item` against its previous record. `now` is captured once per
/// cycle by the caller.
pub fn classify(
    item: &QueueItem,
    record: Option<&StrikeRecord>,
    config: &EffectiveConfig,
    now: DateTime<Utc>,
) -> Classification {
    let first_seen = record.map(|r| r.first_seen).unwrap_or(now);
    let previous_size_left = record.and_then(|r| r.last_size_left);
    let progressed = previous_size_left
        .map(|prev| item.size_left < prev)
        .unwrap_or(true);
    let last_progress = record
        .and_then(|r| r.last_progress_at)
        .unwrap_or(first_seen);

    // Hits accumulate across polls; a clean poll does not reset them.
    let tracker_error_now = item.has_tracker_error();
    let previous_errors = record.map(|r| r.tracker_error_count).unwrap_or(0);
    let tracker_error_count = if tracker_error_now {
        previous_errors.saturating_add(1)
    } else {
        previous_errors
    };
    let zero_seeders_since = match item.seeders() {
        Some(0) => Some(record.and_then(|r| r.zero_seeders_since).unwrap_or(now)),
        _ => None,
    };

    let verdict = evaluate(
        item,
        config,
        now,
        first_seen,
        last_progress,
        progressed,
        tracker_error_now.then_some(tracker_error_count),
        zero_seeders_since,
    );

    Classification {
        verdict,
        snapshot: ProgressSnapshot {
            observed_at: now,
            size_left: item.size_left,
            progressed,
            tracker_error_count,
            zero_seeders_since,
            reason: None,
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn evaluate(
    item: &QueueItem,
    config: &EffectiveConfig,
    now: DateTime<Utc>,
    first_seen: DateTime<Utc>,
    last_progress: DateTime<Utc>,
    progressed: bool,
    tracker_error_hits: Option<u32>,
    zero_seeders_since: Option<DateTime<Utc>>,
) -> Verdict {
    if item.is_queued() {
        return Verdict::Waiting(WaitReason::Queued);
    }
    if item.is_completed() {
        return Verdict::Completed;
    }
    let age = now - first_seen;
    if age < config.grace_period {
        return Verdict::Waiting(WaitReason::GracePeriod);
    }
    // Only a poll that shows the error can trip the threshold.
    if let Some(hits) = tracker_error_hits {
        if config.tracker_error_strikes > 0 && hits >= config.tracker_error_strikes {
            return Verdict::TrackerError;
        }
    }
    if let Some(cap) = config.max_queue_age {
        if age >= cap {
            return Verdict::AgedOut;
        }
    }
    if progressed {
        return Verdict::Progressing;
    }

    let stalled_for = now - last_progress;
    if let Some(limit) = config.no_progress_max_age {
        if stalled_for >= limit {
            return Verdict::NoProgressTimeout;
        }
    }

    if item.is_torrent() {
        if let Some(rule) = &config.large_item {
            let zero_for = zero_seeders_since
                .map(|since| now - since)
                .unwrap_or_else(Duration::zero);
            if item.size >= rule.min_size_bytes
                && zero_seeders_since.is_some()
                && zero_for >= rule.zero_seeders_for
                && item.progress_percent() <= rule.progress_ceiling
            {
                return Verdict::Stalled(StallCause::LargeZeroSeeders);
            }
        }

        if let (Some(rule), Some(seeders)) = (&config.seeder_stall, item.seeders()) {
            if seeders <= rule.threshold && item.progress_percent() <= rule.progress_ceiling {
                return Verdict::Stalled(StallCause::LowSeeders);
            }
        }
    }

    if let Some(cause) = client_stall(item, config, stalled_for) {
        return Verdict::Stalled(cause);
    }

    Verdict::Stalled(StallCause::NoProgress)
}

/// Stall signals that need torrent-client enrichment.
fn client_stall(
    item: &QueueItem,
    config: &EffectiveConfig,
    stalled_for: Duration,
) -> Option<StallCause> {
    let enrichment = item.enrichment.as_ref()?;

    if config.client_state_as_stalled {
        if let Some(state) = item.client_state() {
            if STALLED_CLIENT_STATES.contains(&state.as_str()) {
                return Some(StallCause::ClientState);
            }
        }
    }

    if let Some(window) = config.client_zero_activity {
        if enrichment.peers == Some(0) && enrichment.seeds == Some(0) && stalled_for >= window {
            return Some(StallCause::ClientNoPeers);
        }
    }

    if let (Some(rule), Some(speed)) = (&config.min_speed, enrichment.download_speed) {
        if item.is_torrent()
            && (speed as f64) < rule.bytes_per_sec
            && stalled_for >= rule.duration
        {
            return Some(StallCause::MinSpeed);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LargeItemRule, MinSpeedRule, SeederStallRule};
    use crate::queue::{ClientEnrichment, Protocol};

    const GB: u64 = 1024 * 1024 * 1024;

    fn item(size: u64, size_left: u64) -> QueueItem {
        QueueItem {
            service: "sonarr".to_string(),
            id: 1,
            download_id: Some("HASH1".to_string()),
            title: "Show.S01E01".to_string(),
            size,
            size_left,
            status: "downloading".to_string(),
            protocol: Protocol::Torrent,
            ..Default::default()
        }
    }

    fn record(now: DateTime<Utc>, last_size_left: u64, age_minutes: i64) -> StrikeRecord {
        let first_seen = now - Duration::minutes(age_minutes);
        StrikeRecord {
            last_size_left: Some(last_size_left),
            last_progress_at: Some(first_seen),
            ..StrikeRecord::new(first_seen)
        }
    }

    #[test]
    fn test_first_observation_is_progressing() {
        let now = Utc::now();
        let c = classify(&item(1000, 1000), None, &EffectiveConfig::default(), now);
        assert_eq!(c.verdict, Verdict::Progressing);
        assert!(c.snapshot.progressed);
        assert_eq!(c.snapshot.size_left, 1000);
    }

    #[test]
    fn test_decreasing_size_left_is_progressing() {
        let now = Utc::now();
        let rec = record(now, 1000, 30);
        let c = classify(&item(1000, 900), Some(&rec), &EffectiveConfig::default(), now);
        assert_eq!(c.verdict, Verdict::Progressing);
    }

    #[test]
    fn test_unchanged_size_left_is_stalled() {
        let now = Utc::now();
        let rec = record(now, 1000, 30);
        let c = classify(&item(1000, 1000), Some(&rec), &EffectiveConfig::default(), now);
        assert_eq!(c.verdict, Verdict::Stalled(StallCause::NoProgress));
        assert!(!c.snapshot.progressed);
    }

    #[test]
    fn test_queued_waits() {
        let now = Utc::now();
        let rec = record(now, 1000, 30);
        let mut it = item(1000, 1000);
        it.status = "queued".to_string();
        let c = classify(&it, Some(&rec), &EffectiveConfig::default(), now);
        assert_eq!(c.verdict, Verdict::Waiting(WaitReason::Queued));
    }

    #[test]
    fn test_completed_is_preserved_even_with_errors() {
        let now = Utc::now();
        let rec = record(now, 0, 30);
        let mut it = item(1000, 0);
        it.messages = vec!["unregistered torrent".to_string()];
        let config = EffectiveConfig {
            tracker_error_strikes: 1,
            ..Default::default()
        };
        let c = classify(&it, Some(&rec), &config, now);
        assert_eq!(c.verdict, Verdict::Completed);
    }

    #[test]
    fn test_grace_period_waits() {
        let now = Utc::now();
        let rec = record(now, 1000, 5);
        let config = EffectiveConfig {
            grace_period: Duration::minutes(10),
            ..Default::default()
        };
        let c = classify(&item(1000, 1000), Some(&rec), &config, now);
        assert_eq!(c.verdict, Verdict::Waiting(WaitReason::GracePeriod));

        let rec = record(now, 1000, 15);
        let c = classify(&item(1000, 1000), Some(&rec), &config, now);
        assert_eq!(c.verdict, Verdict::Stalled(StallCause::NoProgress));
    }

    #[test]
    fn test_tracker_error_needs_threshold() {
        let now = Utc::now();
        let mut it = item(1000, 900);
        it.messages = vec!["Torrent not registered with this tracker".to_string()];
        let mut rec = record(now, 1000, 30);

        let c = classify(&it, Some(&rec), &EffectiveConfig::default(), now);
        assert_eq!(c.snapshot.tracker_error_count, 1);
        assert_eq!(c.verdict, Verdict::Progressing);

        rec.tracker_error_count = 1;
        let c = classify(&it, Some(&rec), &EffectiveConfig::default(), now);
        assert_eq!(c.snapshot.tracker_error_count, 2);
        assert_eq!(c.verdict, Verdict::TrackerError);
    }

    #[test]
    fn test_tracker_error_count_kept_without_signal() {
        let now = Utc::now();
        let mut rec = record(now, 1000, 30);
        rec.tracker_error_count = 5;
        let c = classify(
            &item(1000, 900),
            Some(&rec),
            &EffectiveConfig::default(),
            now,
        );
        assert_eq!(c.snapshot.tracker_error_count, 5);
        assert_eq!(c.verdict, Verdict::Progressing);
    }

    #[test]
    fn test_intermittent_tracker_error_accumulates() {
        let now = Utc::now();
        let config = EffectiveConfig::default();
        let mut erroring = item(1000, 900);
        erroring.messages = vec!["unregistered torrent".to_string()];
        let clean = item(1000, 800);

        let mut rec = record(now, 1000, 30);
        let c = classify(&erroring, Some(&rec), &config, now);
        assert_eq!(c.verdict, Verdict::Progressing);
        c.snapshot.merge_into(&mut rec);

        let c = classify(&clean, Some(&rec), &config, now);
        assert_eq!(c.verdict, Verdict::Progressing);
        assert_eq!(c.snapshot.tracker_error_count, 1);
        c.snapshot.merge_into(&mut rec);

        erroring.size_left = 700;
        let c = classify(&erroring, Some(&rec), &config, now);
        assert_eq!(c.snapshot.tracker_error_count, 2);
        assert_eq!(c.verdict, Verdict::TrackerError);
    }

    #[test]
    fn test_tracker_error_disabled_with_zero() {
        let now = Utc::now();
        let mut it = item(1000, 1000);
        it.messages = vec!["unregistered".to_string()];
        let mut rec = record(now, 1000, 30);
        rec.tracker_error_count = 10;
        let config = EffectiveConfig {
            tracker_error_strikes: 0,
            ..Default::default()
        };
        let c = classify(&it, Some(&rec), &config, now);
        assert_ne!(c.verdict, Verdict::TrackerError);
    }

    #[test]
    fn test_age_cap_beats_progress() {
        let now = Utc::now();
        let rec = record(now, 1000, 25 * 60);
        let config = EffectiveConfig {
            max_queue_age: Some(Duration::hours(24)),
            ..Default::default()
        };
        let c = classify(&item(1000, 100), Some(&rec), &config, now);
        assert_eq!(c.verdict, Verdict::AgedOut);
    }

    #[test]
    fn test_no_progress_timeout() {
        let now = Utc::now();
        let mut rec = record(now, 1000, 120);
        rec.last_progress_at = Some(now - Duration::minutes(90));
        let config = EffectiveConfig {
            no_progress_max_age: Some(Duration::minutes(60)),
            ..Default::default()
        };
        let c = classify(&item(1000, 1000), Some(&rec), &config, now);
        assert_eq!(c.verdict, Verdict::NoProgressTimeout);

        let c = classify(&item(1000, 999), Some(&rec), &config, now);
        assert_eq!(c.verdict, Verdict::Progressing);
    }

    #[test]
    fn test_large_zero_seeders_rule() {
        let now = Utc::now();
        let size = 60 * GB;
        let size_left = size - size / 10;
        let mut it = item(size, size_left);
        it.seeders = Some(0);
        let mut rec = record(now, size_left, 120);
        rec.zero_seeders_since = Some(now - Duration::minutes(45));

        let config = EffectiveConfig {
            large_item: Some(LargeItemRule {
                min_size_bytes: 50 * GB,
                zero_seeders_for: Duration::minutes(30),
                progress_ceiling: 100.0,
            }),
            seeder_stall: None,
            ..Default::default()
        };
        let c = classify(&it, Some(&rec), &config, now);
        assert_eq!(c.verdict, Verdict::Stalled(StallCause::LargeZeroSeeders));
        assert_eq!(c.snapshot.zero_seeders_since, rec.zero_seeders_since);
    }

    #[test]
    fn test_large_rule_waits_for_zero_seed_window() {
        let now = Utc::now();
        let mut it = item(60 * GB, 50 * GB);
        it.seeders = Some(0);
        let rec = record(now, 50 * GB, 120);

        let config = EffectiveConfig {
            large_item: Some(LargeItemRule {
                min_size_bytes: 50 * GB,
                zero_seeders_for: Duration::minutes(30),
                progress_ceiling: 100.0,
            }),
            ..Default::default()
        };
        let c = classify(&it, Some(&rec), &config, now);
        // Zero seeders first seen now, so only the default rule applies.
        assert_eq!(c.verdict, Verdict::Stalled(StallCause::NoProgress));
        assert_eq!(c.snapshot.zero_seeders_since, Some(now));
    }

    #[test]
    fn test_seeder_stall_rule() {
        let now = Utc::now();
        let mut it = item(1000, 900);
        it.seeders = Some(1);
        let rec = record(now, 900, 30);
        let config = EffectiveConfig {
            seeder_stall: Some(SeederStallRule {
                threshold: 1,
                progress_ceiling: 25.0,
            }),
            ..Default::default()
        };
        let c = classify(&it, Some(&rec), &config, now);
        assert_eq!(c.verdict, Verdict::Stalled(StallCause::LowSeeders));

        // Past the progress ceiling the generic rule applies.
        let mut it = item(1000, 500);
        it.seeders = Some(1);
        let rec = record(now, 500, 30);
        let c = classify(&it, Some(&rec), &config, now);
        assert_eq!(c.verdict, Verdict::Stalled(StallCause::NoProgress));
    }

    #[test]
    fn test_seeder_rules_skip_usenet() {
        let now = Utc::now();
        let mut it = item(1000, 900);
        it.protocol = Protocol::Usenet;
        it.seeders = Some(0);
        let rec = record(now, 900, 30);
        let config = EffectiveConfig {
            seeder_stall: Some(SeederStallRule {
                threshold: 0,
                progress_ceiling: 100.0,
            }),
            ..Default::default()
        };
        let c = classify(&it, Some(&rec), &config, now);
        assert_eq!(c.verdict, Verdict::Stalled(StallCause::NoProgress));
    }

    #[test]
    fn test_client_state_stall() {
        let now = Utc::now();
        let mut it = item(1000, 900);
        it.enrichment = Some(ClientEnrichment {
            state: Some("stalledDL".to_string()),
            ..Default::default()
        });
        let rec = record(now, 900, 30);
        let config = EffectiveConfig {
            client_state_as_stalled: true,
            ..Default::default()
        };
        let c = classify(&it, Some(&rec), &config, now);
        assert_eq!(c.verdict, Verdict::Stalled(StallCause::ClientState));
    }

    #[test]
    fn test_client_zero_activity() {
        let now = Utc::now();
        let mut it = item(1000, 900);
        it.enrichment = Some(ClientEnrichment {
            peers: Some(0),
            seeds: Some(0),
            ..Default::default()
        });
        let rec = record(now, 900, 30);
        let config = EffectiveConfig {
            client_zero_activity: Some(Duration::minutes(20)),
            ..Default::default()
        };
        let c = classify(&it, Some(&rec), &config, now);
        assert_eq!(c.verdict, Verdict::Stalled(StallCause::ClientNoPeers));
    }

    #[test]
    fn test_min_speed() {
        let now = Utc::now();
        let mut it = item(1000, 900);
        it.enrichment = Some(ClientEnrichment {
            download_speed: Some(100),
            peers: Some(3),
            ..Default::default()
        });
        let rec = record(now, 900, 30);
        let config = EffectiveConfig {
            min_speed: Some(MinSpeedRule {
                bytes_per_sec: 1024.0,
                duration: Duration::minutes(10),
            }),
            ..Default::default()
        };
        let c = classify(&it, Some(&rec), &config, now);
        assert_eq!(c.verdict, Verdict::Stalled(StallCause::MinSpeed));
    }

    #[test]
    fn test_zero_size_item_does_not_panic() {
        let now = Utc::now();
        let rec = record(now, 0, 30);
        let c = classify(&item(0, 0), Some(&rec), &EffectiveConfig::default(), now);
        assert_eq!(c.verdict, Verdict::Stalled(StallCause::NoProgress));
    }
}
