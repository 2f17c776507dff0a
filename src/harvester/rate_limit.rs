//! Backpressure from the platform's rate-limit headers.
//!
//! Every matched response reports how many requests remain in the current
//! window. The policy turns that into pauses: a short one every
//! `responses_wait_count` consumed requests, and a long one until the window
//! resets once `remaining` drops to the floor.

use std::time::Duration;

use crate::browser::CapturedResponse;
use crate::constants::{
    RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER, RATE_LIMIT_RESET_GRACE_SECS,
    RATE_LIMIT_RESET_HEADER,
};

/// Thresholds and pause lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Pause after every N requests consumed from the window.
    pub responses_wait_count: u32,
    /// Length of that periodic pause.
    pub responses_wait: Duration,
    /// Remaining count at which to wait for the window to reset.
    pub rate_limit_stop: u32,
    /// Longest reset wait accepted before giving up.
    pub max_wait: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            responses_wait_count: 10,
            responses_wait: Duration::from_secs(60),
            rate_limit_stop: 5,
            max_wait: Duration::from_secs(20 * 60),
        }
    }
}

/// Last counters reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Window reset, epoch seconds.
    pub reset: Option<i64>,
}

impl RateLimitState {
    /// Update from a response's headers. Returns whether anything changed.
    ///
    /// Missing or unparseable headers leave the previous value in place.
    pub fn observe(&mut self, response: &CapturedResponse) -> bool {
        let before = *self;
        let parse = |name| response.header(name).and_then(|v| v.trim().parse().ok());
        if let Some(limit) = parse(RATE_LIMIT_LIMIT_HEADER) {
            self.limit = Some(limit);
        }
        if let Some(remaining) = parse(RATE_LIMIT_REMAINING_HEADER) {
            self.remaining = Some(remaining);
        }
        if let Some(reset) = response
            .header(RATE_LIMIT_RESET_HEADER)
            .and_then(|v| v.trim().parse().ok())
        {
            self.reset = Some(reset);
        }
        *self != before
    }

    /// Requests consumed from the current window.
    #[must_use]
    pub fn used(&self) -> Option<u32> {
        Some(self.limit?.saturating_sub(self.remaining?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Periodic breather every `responses_wait_count` requests.
    Periodic,
    /// Waiting for the window to reset.
    WindowReset,
}

/// What the session should do after a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    Proceed,
    Pause { wait: Duration, reason: PauseReason },
    /// The reset is further away than the policy accepts.
    Exhausted { reset: i64, wait: Duration },
}

impl RateLimitPolicy {
    /// Decide on backpressure for `state` at `now_epoch` (seconds).
    ///
    /// When both pauses apply the longer one wins.
    #[must_use]
    pub fn assess(&self, state: &RateLimitState, now_epoch: i64) -> Backpressure {
        let (Some(used), Some(remaining)) = (state.used(), state.remaining) else {
            return Backpressure::Proceed;
        };

        let mut pause = None;
        if self.responses_wait_count > 0 && used > 0 && used % self.responses_wait_count == 0 {
            pause = Some((self.responses_wait, PauseReason::Periodic));
        }

        if remaining <= self.rate_limit_stop {
            if let Some(reset) = state.reset {
                let secs = (reset + RATE_LIMIT_RESET_GRACE_SECS as i64 - now_epoch).max(0);
                let wait = Duration::from_secs(secs as u64);
                if wait > self.max_wait {
                    return Backpressure::Exhausted { reset, wait };
                }
                if pause.map_or(true, |(current, _)| wait > current) {
                    pause = Some((wait, PauseReason::WindowReset));
                }
            }
        }

        pause.map_or(Backpressure::Proceed, |(wait, reason)| Backpressure::Pause {
            wait,
            reason,
        })
    }
}
