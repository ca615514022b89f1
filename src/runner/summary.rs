use chrono::{DateTime, Utc};
use tracing::info;

/// Counters for one cycle, logged when it finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub services_polled: usize,
    pub services_failed: usize,
    pub processed: usize,
    pub removed: usize,
    pub strikes_increased: usize,
    pub strikes_decreased: usize,
    pub reannounces: usize,
    pub waiting: usize,
    pub errors: usize,
    /// Records with a non-zero count after the cycle.
    pub items_with_strikes: usize,
}

impl CycleSummary {
    pub fn log(&self, next_run: Option<DateTime<Utc>>) {
        let next = next_run
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "none".to_string());
        info!(
            "Finished run: services={} failed={} processed={} removed={} strikes_increased={} \
             strikes_decreased={} reannounces={} waiting={} errors={} with_strikes={} next_run={}",
            self.services_polled,
            self.services_failed,
            self.processed,
            self.removed,
            self.strikes_increased,
            self.strikes_decreased,
            self.reannounces,
            self.waiting,
            self.errors,
            self.items_with_strikes,
            next
        );
    }
}
