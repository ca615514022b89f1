//! Per-service request gating.
//!
//! Bounds in-flight requests and spaces request starts by a minimum interval.

use crate::config::ServiceLimits;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

/// Admission control shared by every request sent to one service.
#[derive(Debug)]
pub struct RequestGate {
    slots: Option<Semaphore>,
    min_interval: Duration,
    /// Start time reserved by the most recent admitted request.
    last_start: Mutex<Option<Instant>>,
}

/// Held for the lifetime of one request.
pub struct GatePermit<'a> {
    _slot: Option<SemaphorePermit<'a>>,
}

impl RequestGate {
    pub fn new(limits: &ServiceLimits) -> Self {
        Self {
            slots: (limits.max_concurrent_requests > 0)
                .then(|| Semaphore::new(limits.max_concurrent_requests)),
            min_interval: Duration::from_millis(limits.min_request_interval_ms),
            last_start: Mutex::new(None),
        }
    }

    /// A gate that admits everything immediately.
    pub fn open() -> Self {
        Self::new(&ServiceLimits::default())
    }

    pub fn is_bounded(&self) -> bool {
        self.slots.is_some()
    }

    /// Wait for a concurrency slot, then for the next interval slot.
    pub async fn acquire(&self) -> GatePermit<'_> {
        let slot = match &self.slots {
            // The semaphore is never closed.
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        };

        if !self.min_interval.is_zero() {
            let wait = {
                let mut last = self.last_start.lock().await;
                let now = Instant::now();
                let start = match *last {
                    Some(prev) => (prev + self.min_interval).max(now),
                    None => now,
                };
                *last = Some(start);
                start.saturating_duration_since(now)
            };
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        GatePermit { _slot: slot }
    }
}
