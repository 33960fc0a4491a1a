//! Pending operations
//!
//! Timeout-bound waits with exactly one terminal transition.

pub mod tracker;

pub use tracker::{PendingHandle, PendingKind, PendingReceiver, PendingTracker};
