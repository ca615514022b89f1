//! Queue Cleaner Library
//!
//! Watches the download queues of Sonarr/Radarr/Lidarr, strikes downloads
//! that stop making progress and removes them once they run out of strikes.
//! This library exposes the internal modules for the binaries and for testing.

pub mod clients;
pub mod config;
pub mod engine;
pub mod notifications;
pub mod queue;
pub mod runner;
pub mod strikes;

// Re-export commonly used types for convenience
pub use config::AppConfig;
pub use runner::{CycleRunner, CycleSummary};
pub use strikes::{JsonFileStrikeStore, StrikeStore};
