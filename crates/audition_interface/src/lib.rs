//! Capability traits for the Audition batch experiment runner.
//!
//! [`BatchClient`] is the uniform provider contract; callers above it never
//! branch on provider identity. [`RunStore`] is the persistence contract the
//! orchestrator, poller, and reconciler rely on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod store;

pub use batch::{BatchClient, BatchLimits, check_batch_limits};
pub use store::RunStore;
