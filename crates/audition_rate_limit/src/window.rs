//! Sliding-window accounting of requests and tokens.

use crate::DefaultLimits;
use crate::config::TierConfig;
use derive_getters::Getters;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Width of the accounting window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Per-minute ceilings enforced by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimits {
    /// Requests per minute
    pub requests_per_minute: u64,
    /// Tokens per minute
    pub tokens_per_minute: u64,
}

impl RateLimits {
    /// Create limits. Zero ceilings are raised to one so a wait always ends.
    pub fn new(requests_per_minute: u64, tokens_per_minute: u64) -> Self {
        Self {
            requests_per_minute: requests_per_minute.max(1),
            tokens_per_minute: tokens_per_minute.max(1),
        }
    }

    /// Limits from a tier, filling gaps from `fallback`.
    pub fn from_tier(tier: &TierConfig, fallback: &DefaultLimits) -> Self {
        Self::new(
            u64::from(tier.rpm.unwrap_or(fallback.rpm)),
            tier.tpm.unwrap_or(fallback.tpm),
        )
    }

    /// Limits from the `[rate_limit.default]` section.
    pub fn from_default(fallback: &DefaultLimits) -> Self {
        Self::new(u64::from(fallback.rpm), fallback.tpm)
    }
}

/// Live totals over the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Getters)]
pub struct Usage {
    /// Tokens recorded in the window
    tokens: u64,
    /// Requests recorded in the window
    requests: u64,
}

/// Recent `(timestamp, tokens)` events for one provider/model.
///
/// Every event counts as one request. Methods take `now` explicitly; the
/// tracker passes the current instant.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindow {
    events: VecDeque<(Instant, u64)>,
}

impl SlidingWindow {
    /// Empty window.
    pub fn new() -> Self {
        Self::default()
    }

    fn prune(&mut self, now: Instant) {
        while let Some((at, _)) = self.events.front() {
            if *at + WINDOW <= now {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Append an event and drop expired ones.
    pub fn record_at(&mut self, now: Instant, tokens: u64) {
        self.prune(now);
        self.events.push_back((now, tokens));
    }

    /// Totals over the live window.
    pub fn usage_at(&mut self, now: Instant) -> Usage {
        self.prune(now);
        Usage {
            tokens: self.events.iter().map(|(_, tokens)| tokens).sum(),
            requests: self.events.len() as u64,
        }
    }

    /// Whether one more request of `tokens` stays within both ceilings.
    pub fn can_accept_at(&mut self, now: Instant, tokens: u64, limits: &RateLimits) -> bool {
        let usage = self.usage_at(now);
        usage.requests < limits.requests_per_minute
            && usage.tokens.saturating_add(tokens) <= limits.tokens_per_minute
    }

    /// How long until one more request of `tokens` would be accepted.
    ///
    /// Zero when it fits now. A request larger than the whole token budget
    /// waits for the window to empty; callers reject such requests up front.
    pub fn wait_time_at(&mut self, now: Instant, tokens: u64, limits: &RateLimits) -> Duration {
        let usage = self.usage_at(now);
        let mut wait = Duration::ZERO;

        if usage.requests >= limits.requests_per_minute {
            // enough of the oldest events must expire to free one slot
            let index = (usage.requests - limits.requests_per_minute) as usize;
            if let Some((at, _)) = self.events.get(index) {
                wait = wait.max(self.until_expiry(*at, now));
            }
        }

        let projected = usage.tokens.saturating_add(tokens);
        if projected > limits.tokens_per_minute {
            let excess = projected - limits.tokens_per_minute;
            let mut freed = 0u64;
            let mut last_needed = None;
            for (at, event_tokens) in &self.events {
                freed = freed.saturating_add(*event_tokens);
                last_needed = Some(*at);
                if freed >= excess {
                    break;
                }
            }
            if let Some(at) = last_needed {
                wait = wait.max(self.until_expiry(at, now));
            }
        }

        wait
    }

    fn until_expiry(&self, at: Instant, now: Instant) -> Duration {
        (at + WINDOW).saturating_duration_since(now)
    }
}
