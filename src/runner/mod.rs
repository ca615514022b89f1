//! The polling loop: fetch, enrich, decide, act, notify.

mod cycle;
mod summary;

pub use cycle::{CycleRunner, ServiceHandle, EVENTS_TARGET};
pub use summary::CycleSummary;
