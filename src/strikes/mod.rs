//! Durable strike accounting.
//!
//! A strike is one cycle in which an item looked stalled. The store keeps one
//! [`StrikeRecord`] per [`StrikeKey`](crate::queue::StrikeKey) and rewrites the
//! whole document on every mutation.

mod json_store;
mod models;

pub use json_store::JsonFileStrikeStore;
pub use models::{
    PersistenceError, ProgressSnapshot, StrikeDelta, StrikeRecord, STALE_AFTER_MISSED_POLLS,
};

use crate::queue::StrikeKey;
use anyhow::Result;
use std::collections::HashSet;

/// Trait for strike persistence.
///
/// Implementations use interior mutability; the runner owns the single
/// instance and only writes to it from the decision loop.
pub trait StrikeStore: Send + Sync {
    /// Get the record for a key, if any.
    fn get(&self, key: &StrikeKey) -> Result<Option<StrikeRecord>>;

    /// Read-modify-write a record: apply the count delta and the observation
    /// snapshot, creating the record when missing. Returns the new record.
    fn apply(
        &self,
        key: &StrikeKey,
        delta: StrikeDelta,
        snapshot: &ProgressSnapshot,
    ) -> Result<StrikeRecord>;

    /// Delete a record. Returns true if it existed.
    fn remove(&self, key: &StrikeKey) -> Result<bool>;

    /// All records, ordered by key.
    fn list(&self) -> Result<Vec<(StrikeKey, StrikeRecord)>>;

    /// Delete every record. Returns the number removed.
    fn clear(&self) -> Result<usize>;

    /// Age out records of `service` whose key was not part of a successful
    /// poll. A record is only dropped after [`STALE_AFTER_MISSED_POLLS`]
    /// consecutive misses. Returns the removed keys.
    ///
    /// Must only be called with the result of a successful fetch.
    fn sweep(&self, service: &str, seen: &HashSet<StrikeKey>) -> Result<Vec<StrikeKey>>;

    /// Retry any write that failed earlier.
    fn flush(&self) -> Result<()>;
}
