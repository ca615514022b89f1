//! Shared constants for end-to-end tests

/// API key the mock service accepts
pub const API_KEY: &str = "test-api-key";

/// Name the mock service is configured under; also infers its kind
pub const SERVICE_NAME: &str = "sonarr";

/// Series every mock queue record belongs to
pub const SERIES_ID: i64 = 7;

/// Size of every mock queue record, in bytes
pub const ITEM_SIZE: u64 = 1000;
