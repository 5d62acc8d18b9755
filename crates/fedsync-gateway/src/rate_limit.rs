//! Per-platform fixed-window rate accounting.

use fedsync_types::RateLimitProfile;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct WindowState {
    minute_count: u32,
    minute_reset_at: Instant,
    hour_count: u32,
    hour_reset_at: Instant,
}

/// Outcome of a rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Admitted; remaining capacity after this request.
    Admitted {
        minute_remaining: u32,
        hour_remaining: u32,
    },
    /// Denied; seconds until the exhausted window resets.
    Denied { retry_after_secs: u64 },
}

/// Fixed-window counters per platform, two windows per entry.
///
/// Windows reset lazily on the first check after expiry; reset drift under
/// sparse traffic is accepted. State is local to one process. The map is
/// keyed by registered platform ids, so its size is bounded by the
/// registration count.
pub struct RateLimitTracker {
    minute_window: Duration,
    hour_window: Duration,
    state: Mutex<HashMap<String, WindowState>>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::with_windows(Duration::from_secs(60), Duration::from_secs(3600))
    }

    /// Custom window durations, for tests exercising window rollover.
    pub fn with_windows(minute_window: Duration, hour_window: Duration) -> Self {
        Self {
            minute_window,
            hour_window,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Checks and, on admission, consumes one unit of quota in both
    /// windows. A denial consumes nothing.
    pub fn check(&self, platform_id: &str, profile: &RateLimitProfile) -> RateDecision {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A stale counter is better than refusing every request.
                tracing::error!("rate tracker lock poisoned, recovering with stale state");
                poisoned.into_inner()
            }
        };
        let now = Instant::now();

        let entry = state
            .entry(platform_id.to_string())
            .or_insert_with(|| WindowState {
                minute_count: 0,
                minute_reset_at: now + self.minute_window,
                hour_count: 0,
                hour_reset_at: now + self.hour_window,
            });

        if now >= entry.minute_reset_at {
            entry.minute_count = 0;
            entry.minute_reset_at = now + self.minute_window;
        }
        if now >= entry.hour_reset_at {
            entry.hour_count = 0;
            entry.hour_reset_at = now + self.hour_window;
        }

        if entry.minute_count >= profile.requests_per_minute {
            return RateDecision::Denied {
                retry_after_secs: retry_after(entry.minute_reset_at, now),
            };
        }
        if entry.hour_count >= profile.requests_per_hour {
            return RateDecision::Denied {
                retry_after_secs: retry_after(entry.hour_reset_at, now),
            };
        }

        // Both counters move together, only on full admission.
        entry.minute_count += 1;
        entry.hour_count += 1;

        RateDecision::Admitted {
            minute_remaining: profile.requests_per_minute - entry.minute_count,
            hour_remaining: profile.requests_per_hour - entry.hour_count,
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Whole seconds until `reset_at`, rounded up so a client that waits the
/// advertised time always lands in the next window.
fn retry_after(reset_at: Instant, now: Instant) -> u64 {
    let remaining = reset_at.saturating_duration_since(now);
    remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
}
