//! Turning a classification into one action per item.
//!
//! Per strike key the item moves through strikes until it is removed, which
//! deletes its record. `evaluate` is pure: it reads the record and the
//! reannounce tracker and returns the decision together with the store write
//! the caller should apply. Running it twice on the same input yields the same
//! result.

use super::classifier::{classify, StallCause, Verdict};
use super::reannounce::{ReannounceCheck, ReannounceCoordinator};
use crate::config::{EffectiveConfig, ResetPolicy};
use crate::queue::QueueItem;
use crate::strikes::{ProgressSnapshot, StrikeDelta, StrikeRecord};
use chrono::{DateTime, Utc};

/// Why a decision was taken. Drives notification routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    Whitelisted,
    Waiting,
    Completed,
    Progress,
    Stalled,
    StrikeLimit,
    TrackerError,
    MaxAge,
    NoProgressTimeout,
    Reannounce,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Whitelisted => "whitelisted",
            Reason::Waiting => "waiting",
            Reason::Completed => "completed",
            Reason::Progress => "progress",
            Reason::Stalled => "stalled",
            Reason::StrikeLimit => "strike_limit",
            Reason::TrackerError => "tracker_error",
            Reason::MaxAge => "max_age",
            Reason::NoProgressTimeout => "no_progress_timeout",
            Reason::Reannounce => "reannounce",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    NoOp { reason: Reason },
    /// Strike count after this cycle.
    Strike { count: u32 },
    /// Strikes shed because the item progressed; `count` is the new value.
    Reset { count: u32 },
    Remove {
        blacklist: bool,
        search: bool,
        reason: Reason,
    },
    Reannounce { download_id: String, recheck: bool },
}

impl Decision {
    pub fn reason(&self) -> Reason {
        match self {
            Decision::NoOp { reason } => *reason,
            Decision::Strike { .. } => Reason::Stalled,
            Decision::Reset { .. } => Reason::Progress,
            Decision::Remove { reason, .. } => *reason,
            Decision::Reannounce { .. } => Reason::Reannounce,
        }
    }

    /// Only removals and reannounces are sent to notification destinations.
    pub fn is_notifiable(&self) -> bool {
        matches!(self, Decision::Remove { .. } | Decision::Reannounce { .. })
    }
}

/// Mutation the caller applies to the strike store after acting.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    None,
    Apply {
        delta: StrikeDelta,
        snapshot: ProgressSnapshot,
    },
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// `None` for whitelisted items, which skip classification.
    pub verdict: Option<Verdict>,
    pub decision: Decision,
    pub write: StoreWrite,
}

pub struct DecisionInput<'a> {
    pub item: &'a QueueItem,
    pub record: Option<&'a StrikeRecord>,
    pub config: &'a EffectiveConfig,
    pub whitelisted: bool,
    /// The service's auto-search flag.
    pub auto_search: bool,
    /// Cycle timestamp.
    pub now: DateTime<Utc>,
}

pub struct DecisionEngine {
    reset_policy: ResetPolicy,
}

impl DecisionEngine {
    pub fn new(reset_policy: ResetPolicy) -> Self {
        Self { reset_policy }
    }

    pub fn evaluate(
        &self,
        input: &DecisionInput<'_>,
        reannounce: &ReannounceCoordinator,
    ) -> Evaluation {
        if input.whitelisted {
            return Evaluation {
                verdict: None,
                decision: Decision::NoOp {
                    reason: Reason::Whitelisted,
                },
                write: StoreWrite::None,
            };
        }

        let classification = classify(input.item, input.record, input.config, input.now);
        let verdict = classification.verdict;
        let snapshot = classification.snapshot;
        let count = input.record.map(|r| r.count).unwrap_or(0);

        let keep = |reason: Reason, snapshot: ProgressSnapshot| Evaluation {
            verdict: Some(verdict),
            decision: Decision::NoOp { reason },
            write: StoreWrite::Apply {
                delta: StrikeDelta::Unchanged,
                snapshot,
            },
        };
        let remove = |reason: Reason| Evaluation {
            verdict: Some(verdict),
            decision: Decision::Remove {
                blacklist: true,
                search: input.auto_search,
                reason,
            },
            write: StoreWrite::Remove,
        };

        match verdict {
            Verdict::Waiting(_) => keep(Reason::Waiting, snapshot),
            Verdict::Completed => keep(Reason::Completed, snapshot),
            Verdict::Progressing => {
                if count == 0 {
                    return keep(Reason::Progress, snapshot);
                }
                let delta = match self.reset_policy {
                    ResetPolicy::All => StrikeDelta::Zero,
                    ResetPolicy::Amount(n) => StrikeDelta::Subtract(n),
                };
                Evaluation {
                    verdict: Some(verdict),
                    decision: Decision::Reset {
                        count: delta.apply_to(count),
                    },
                    write: StoreWrite::Apply {
                        delta,
                        snapshot: with_reason(snapshot, Reason::Progress),
                    },
                }
            }
            Verdict::TrackerError => remove(Reason::TrackerError),
            Verdict::AgedOut => remove(Reason::MaxAge),
            Verdict::NoProgressTimeout => remove(Reason::NoProgressTimeout),
            Verdict::Stalled(cause) => {
                if let Some(download_id) = reannounce_candidate(input) {
                    match reannounce.evaluate(download_id, &input.config.reannounce, input.now) {
                        ReannounceCheck::Schedule { .. } => {
                            return Evaluation {
                                verdict: Some(verdict),
                                decision: Decision::Reannounce {
                                    download_id: download_id.to_string(),
                                    recheck: input.config.reannounce.do_recheck,
                                },
                                write: StoreWrite::Apply {
                                    delta: StrikeDelta::Unchanged,
                                    snapshot: with_reason(snapshot, Reason::Reannounce),
                                },
                            };
                        }
                        ReannounceCheck::AlreadyScheduled => {
                            return keep(Reason::Reannounce, snapshot);
                        }
                        ReannounceCheck::CoolingDown
                        | ReannounceCheck::Exhausted
                        | ReannounceCheck::Disabled => {}
                    }
                }

                let next = count.saturating_add(1);
                if next >= input.config.stall_limit {
                    return remove(Reason::StrikeLimit);
                }
                let mut snapshot = with_reason(snapshot, Reason::Stalled);
                if cause != StallCause::NoProgress {
                    snapshot.reason = Some(cause.as_str().to_string());
                }
                Evaluation {
                    verdict: Some(verdict),
                    decision: Decision::Strike { count: next },
                    write: StoreWrite::Apply {
                        delta: StrikeDelta::Add(1),
                        snapshot,
                    },
                }
            }
        }
    }
}

fn with_reason(mut snapshot: ProgressSnapshot, reason: Reason) -> ProgressSnapshot {
    snapshot.reason = Some(reason.as_str().to_string());
    snapshot
}

/// Download id of a stalled torrent eligible for reannounce under the policy.
fn reannounce_candidate<'a>(input: &DecisionInput<'a>) -> Option<&'a str> {
    let policy = &input.config.reannounce;
    if !policy.enabled || !input.item.is_torrent() {
        return None;
    }
    if policy.only_when_seeds_zero && input.item.seeders().unwrap_or(0) > 0 {
        return None;
    }
    input.item.download_id.as_deref().filter(|id| !id.is_empty())
}
