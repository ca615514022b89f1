//! Common test infrastructure
//!
//! Spawns an in-process mock of the *arr queue API plus a webhook receiver,
//! and builds a `CycleRunner` pointed at them with an isolated strike file.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{queue_record, TestEnv};
//!
//! #[tokio::test]
//! async fn test_first_poll_records_item() {
//!     let env = TestEnv::spawn(vec![queue_record(1, 800)]).await;
//!     let mut runner = env.runner("");
//!     runner.run_cycle().await;
//!     assert_eq!(env.strike_document().as_object().unwrap().len(), 1);
//! }
//! ```

mod constants;
mod server;

// Public API - this is what tests import
pub use constants::*;
pub use server::{queue_record, MockArr, RecordedDelete, TestEnv};
