//! Rate limiting and configuration for Audition.
//!
//! Limits are loaded once from layered TOML ([`AuditionConfig`]) and
//! enforced by a process-wide [`RateTracker`] that keeps a sixty-second
//! sliding window of requests and tokens per provider and model.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod tracker;
mod window;

pub use config::{
    Admission, AuditionConfig, DefaultLimits, ModelTierConfig, OrchestratorConfig,
    ProviderConfig, RateLimitSection, ReconcilerConfig, TierConfig,
};
pub use tracker::RateTracker;
pub use window::{RateLimits, SlidingWindow, Usage, WINDOW};
