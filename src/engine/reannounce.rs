//! Reannounce/recheck coordination.
//!
//! Tracks reannounce attempts per download id and decides whether a stalled
//! zero-seed torrent gets a reannounce instead of a strike. State lives for
//! the process lifetime only.

use crate::config::ReannouncePolicy;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Attempt bookkeeping for one download id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReannounceState {
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Cycle-scoped: the owning item is exempt from strikes this cycle.
    pub scheduled_this_cycle: bool,
}

/// Outcome of checking a download id against the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReannounceCheck {
    /// Reannounce now; this would be attempt number `attempt`.
    Schedule { attempt: u32 },
    /// Already scheduled earlier in this cycle.
    AlreadyScheduled,
    CoolingDown,
    Exhausted,
    Disabled,
}

#[derive(Debug, Default)]
pub struct ReannounceCoordinator {
    states: HashMap<String, ReannounceState>,
}

impl ReannounceCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the per-cycle flags. Called once before a cycle's decisions.
    pub fn begin_cycle(&mut self) {
        for state in self.states.values_mut() {
            state.scheduled_this_cycle = false;
        }
    }

    pub fn state(&self, download_id: &str) -> Option<&ReannounceState> {
        self.states.get(&normalize(download_id))
    }

    pub fn is_scheduled(&self, download_id: &str) -> bool {
        self.state(download_id)
            .map(|s| s.scheduled_this_cycle)
            .unwrap_or(false)
    }

    /// Check without mutating anything.
    pub fn evaluate(
        &self,
        download_id: &str,
        policy: &ReannouncePolicy,
        now: DateTime<Utc>,
    ) -> ReannounceCheck {
        if !policy.enabled || policy.max_attempts == 0 {
            return ReannounceCheck::Disabled;
        }
        let state = self.state(download_id).cloned().unwrap_or_default();
        if state.scheduled_this_cycle {
            return ReannounceCheck::AlreadyScheduled;
        }
        if state.attempts >= policy.max_attempts {
            return ReannounceCheck::Exhausted;
        }
        if let Some(last) = state.last_attempt_at {
            if now - last < policy.cooldown {
                return ReannounceCheck::CoolingDown;
            }
        }
        ReannounceCheck::Schedule {
            attempt: state.attempts + 1,
        }
    }

    /// Record a scheduled reannounce.
    pub fn commit(&mut self, download_id: &str, now: DateTime<Utc>) -> &ReannounceState {
        let state = self.states.entry(normalize(download_id)).or_default();
        state.attempts += 1;
        state.last_attempt_at = Some(now);
        state.scheduled_this_cycle = true;
        state
    }

    /// Drop tracking for a download that left the queue.
    pub fn forget(&mut self, download_id: &str) {
        self.states.remove(&normalize(download_id));
    }

    /// Keep only the download ids in `present` (lowercased). Returns how many
    /// were dropped.
    pub fn retain(&mut self, present: &HashSet<String>) -> usize {
        let before = self.states.len();
        self.states.retain(|id, _| present.contains(id));
        before - self.states.len()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

fn normalize(download_id: &str) -> String {
    download_id.to_lowercase()
}
