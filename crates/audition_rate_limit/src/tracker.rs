//! Shared admission gate across all submission paths.

use crate::{Admission, RateLimits, SlidingWindow, Usage};
use audition_error::{AdmissionError, AdmissionErrorKind};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

type WindowKey = (String, String);

fn key(provider: &str, model: &str) -> WindowKey {
    (provider.to_lowercase(), model.to_lowercase())
}

/// Sliding-window rate tracker keyed by provider and model,
/// case-insensitively.
///
/// Construct one per process and share it by reference. Every check and
/// record happens under one lock, so two callers can never both see room
/// for the same budget.
///
/// # Example
///
/// ```
/// use audition_rate_limit::{Admission, RateLimits, RateTracker};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let tracker = RateTracker::new();
/// let admission = Admission::Throttled(RateLimits::new(60, 100_000));
///
/// tracker.acquire("anthropic", "claude-3-5-haiku-latest", 2_000, &admission).await?;
/// let usage = tracker.usage("Anthropic", "CLAUDE-3-5-HAIKU-LATEST").await;
/// assert_eq!(*usage.requests(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct RateTracker {
    windows: Mutex<HashMap<WindowKey, SlidingWindow>>,
}

impl RateTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an admitted request now.
    pub async fn record(&self, provider: &str, model: &str, tokens: u64) {
        let mut windows = self.windows.lock().await;
        windows
            .entry(key(provider, model))
            .or_default()
            .record_at(Instant::now(), tokens);
    }

    /// Totals over the live window.
    pub async fn usage(&self, provider: &str, model: &str) -> Usage {
        let mut windows = self.windows.lock().await;
        match windows.get_mut(&key(provider, model)) {
            Some(window) => window.usage_at(Instant::now()),
            None => Usage::default(),
        }
    }

    /// Whether a request of `tokens` fits now.
    pub async fn can_accept(
        &self,
        provider: &str,
        model: &str,
        tokens: u64,
        limits: &RateLimits,
    ) -> bool {
        let mut windows = self.windows.lock().await;
        windows
            .entry(key(provider, model))
            .or_default()
            .can_accept_at(Instant::now(), tokens, limits)
    }

    /// How long until a request of `tokens` fits.
    pub async fn wait_time(
        &self,
        provider: &str,
        model: &str,
        tokens: u64,
        limits: &RateLimits,
    ) -> Duration {
        let mut windows = self.windows.lock().await;
        windows
            .entry(key(provider, model))
            .or_default()
            .wait_time_at(Instant::now(), tokens, limits)
    }

    /// Block until a request of `tokens` fits, then record it.
    ///
    /// This is the single admission gate before any submission. Returns the
    /// total time spent waiting. Self-managed providers pass straight
    /// through unrecorded.
    ///
    /// # Errors
    ///
    /// `TokensExceedLimit` when `tokens` alone exceeds the per-minute token
    /// ceiling and could never be admitted.
    #[instrument(skip(self, admission))]
    pub async fn acquire(
        &self,
        provider: &str,
        model: &str,
        tokens: u64,
        admission: &Admission,
    ) -> Result<Duration, AdmissionError> {
        let limits = match admission {
            Admission::SelfManaged => return Ok(Duration::ZERO),
            Admission::Throttled(limits) => limits,
        };
        if tokens > limits.tokens_per_minute {
            return Err(AdmissionError::new(AdmissionErrorKind::TokensExceedLimit {
                tokens,
                limit: limits.tokens_per_minute,
            }));
        }

        let mut waited = Duration::ZERO;
        loop {
            let wait = {
                let mut windows = self.windows.lock().await;
                let window = windows.entry(key(provider, model)).or_default();
                let now = Instant::now();
                let wait = window.wait_time_at(now, tokens, limits);
                if wait.is_zero() {
                    window.record_at(now, tokens);
                    return Ok(waited);
                }
                wait
            };
            debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
            waited += wait;
        }
    }
}
