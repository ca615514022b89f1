//! The rule engine: classification, reannounce coordination and decisions.
//!
//! Everything in here is synchronous and free of I/O. The runner feeds it
//! snapshots and applies the writes and actions it returns.

mod classifier;
mod decision;
mod reannounce;

pub use classifier::{classify, Classification, StallCause, Verdict, WaitReason};
pub use decision::{Decision, DecisionEngine, DecisionInput, Evaluation, Reason, StoreWrite};
pub use reannounce::{ReannounceCheck, ReannounceCoordinator, ReannounceState};
