//! Queue snapshot types shared by the service clients, the rule engine and
//! the strike store.

mod models;

pub use models::{ClientEnrichment, Protocol, QueueItem, SearchTarget, StrikeKey};
