//! Response interception and the shared session state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::rate_limit::{Backpressure, PauseReason, RateLimitPolicy, RateLimitState};
use crate::browser::{CapturedResponse, ResponseListener};
use crate::error::{HarvestError, Result};

/// Background request names the web client issues, matched against URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestName {
    UserTweets,
    SearchTimeline,
    TweetDetail,
    UserByScreenName,
}

impl RequestName {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserTweets => "UserTweets",
            Self::SearchTimeline => "SearchTimeline",
            Self::TweetDetail => "TweetDetail",
            Self::UserByScreenName => "UserByScreenName",
        }
    }
}

impl fmt::Display for RequestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared between the interceptor and the scroll loop.
///
/// Captured bodies belong to the current operation; rate-limit counters and
/// any pending halt carry over between operations of one harvester.
#[derive(Debug, Default)]
pub struct SessionState {
    captured: Vec<Value>,
    rate: RateLimitState,
    halted_until: Option<Instant>,
    exhausted: Option<(i64, Duration)>,
}

impl SessionState {
    /// Start a new operation.
    pub fn begin(&mut self) {
        self.captured.clear();
    }

    /// Apply one matched response: update counters and schedule any pause,
    /// whatever the status, then append the body when the response succeeded.
    pub fn record(
        &mut self,
        response: CapturedResponse,
        policy: &RateLimitPolicy,
        now_epoch: i64,
        now: Instant,
    ) {
        self.rate.observe(&response);

        debug!(
            remaining = ?self.rate.remaining,
            limit = ?self.rate.limit,
            reset = ?self.rate.reset,
            "Rate limit status"
        );

        match policy.assess(&self.rate, now_epoch) {
            Backpressure::Proceed => {}
            Backpressure::Pause { wait, reason } => {
                match reason {
                    PauseReason::Periodic => info!(
                        remaining = ?self.rate.remaining,
                        wait_secs = wait.as_secs(),
                        "Pausing session"
                    ),
                    PauseReason::WindowReset => warn!(
                        reset = ?self.rate.reset,
                        wait_secs = wait.as_secs(),
                        "Rate limit reached, waiting for reset"
                    ),
                }
                let deadline = now + wait;
                if self.halted_until.map_or(true, |current| deadline > current) {
                    self.halted_until = Some(deadline);
                }
            }
            Backpressure::Exhausted { reset, wait } => {
                warn!(reset, wait_secs = wait.as_secs(), "Rate limit reset too far away");
                self.exhausted = Some((reset, wait));
            }
        }

        if !response.is_ok() {
            warn!(url = %response.url, status = response.status, "Intercepted response failed");
            return;
        }
        match response.body {
            Some(body) => {
                self.captured.push(body);
                debug!(captured = self.captured.len(), "Caught a response");
            }
            None => debug!(url = %response.url, "Matched response had no JSON body"),
        }
    }

    /// The pending halt deadline, if the session is halted at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::RateLimitExhausted`] once the policy gave up
    /// waiting.
    pub fn halt_deadline(&mut self, now: Instant) -> Result<Option<Instant>> {
        if let Some((reset, wait)) = self.exhausted.take() {
            return Err(HarvestError::RateLimitExhausted { reset, wait });
        }
        match self.halted_until {
            Some(deadline) if deadline > now => Ok(Some(deadline)),
            _ => {
                self.halted_until = None;
                Ok(None)
            }
        }
    }

    #[must_use]
    pub fn captured_len(&self) -> usize {
        self.captured.len()
    }

    #[must_use]
    pub fn last_captured(&self) -> Option<&Value> {
        self.captured.last()
    }

    pub fn take_captured(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.captured)
    }

    #[must_use]
    pub const fn rate_limits(&self) -> RateLimitState {
        self.rate
    }
}

pub type SharedSession = Arc<Mutex<SessionState>>;

pub(crate) fn lock(session: &SharedSession) -> MutexGuard<'_, SessionState> {
    session
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Listener bound to one request name.
pub struct Interceptor {
    request: RequestName,
    policy: RateLimitPolicy,
    session: SharedSession,
}

impl Interceptor {
    #[must_use]
    pub fn new(request: RequestName, policy: RateLimitPolicy, session: SharedSession) -> Self {
        Self {
            request,
            policy,
            session,
        }
    }
}

impl ResponseListener for Interceptor {
    fn wants(&self, url: &str) -> bool {
        url.contains(self.request.as_str())
    }

    fn on_response(&self, response: CapturedResponse) {
        if !response.kind.is_background() || !self.wants(&response.url) {
            return;
        }
        let now_epoch = chrono::Utc::now().timestamp();
        lock(&self.session).record(response, &self.policy, now_epoch, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{json_response, ResourceKind};
    use crate::constants::{
        RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER, RATE_LIMIT_RESET_HEADER,
    };
    use serde_json::json;

    const URL: &str = "https://x.com/i/api/graphql/V7H0Ap3_Hh2FyS75OCDO3Q/UserTweets?variables=%7B%7D";

    fn with_limits(mut response: CapturedResponse, limit: u32, remaining: u32, reset: i64) -> CapturedResponse {
        response.headers.insert(RATE_LIMIT_LIMIT_HEADER.into(), limit.to_string());
        response.headers.insert(RATE_LIMIT_REMAINING_HEADER.into(), remaining.to_string());
        response.headers.insert(RATE_LIMIT_RESET_HEADER.into(), reset.to_string());
        response
    }

    fn interceptor() -> (Interceptor, SharedSession) {
        let session = SharedSession::default();
        (
            Interceptor::new(RequestName::UserTweets, RateLimitPolicy::default(), session.clone()),
            session,
        )
    }

    #[test]
    fn test_appends_matching_responses_in_order() {
        let (interceptor, session) = interceptor();
        interceptor.on_response(json_response(URL, json!({"n": 1})));
        interceptor.on_response(json_response("https://x.com/i/api/graphql/x/HomeTimeline", json!({"n": 2})));
        interceptor.on_response(json_response(URL, json!({"n": 3})));

        let captured = lock(&session).take_captured();
        assert_eq!(captured, vec![json!({"n": 1}), json!({"n": 3})]);
    }

    #[test]
    fn test_ignores_documents_and_failures() {
        let (interceptor, session) = interceptor();
        let mut document = json_response(URL, json!({}));
        document.kind = ResourceKind::Document;
        let mut failed = json_response(URL, json!({}));
        failed.status = 429;

        interceptor.on_response(document);
        interceptor.on_response(failed);
        assert_eq!(lock(&session).captured_len(), 0);
    }

    #[test]
    fn test_failed_response_still_updates_counters() {
        let (interceptor, session) = interceptor();
        let mut failed = with_limits(json_response(URL, json!({})), 50, 0, 1);
        failed.status = 429;
        interceptor.on_response(failed);
        assert_eq!(lock(&session).rate_limits().remaining, Some(0));
    }

    #[test]
    fn test_rejected_response_at_floor_halts() {
        let mut state = SessionState::default();
        let now = Instant::now();
        let mut rejected = with_limits(json_response(URL, json!({})), 50, 0, 1_000_300);
        rejected.status = 429;
        state.record(rejected, &RateLimitPolicy::default(), 1_000_000, now);

        assert_eq!(state.captured_len(), 0);
        assert_eq!(
            state.halt_deadline(now).unwrap(),
            Some(now + Duration::from_secs(330))
        );
    }

    #[test]
    fn test_periodic_pause_sets_deadline() {
        let mut state = SessionState::default();
        let now = Instant::now();
        let response = with_limits(json_response(URL, json!({})), 50, 40, 0);
        state.record(response, &RateLimitPolicy::default(), 0, now);

        assert_eq!(state.captured_len(), 1);
        assert_eq!(
            state.halt_deadline(now).unwrap(),
            Some(now + Duration::from_secs(60))
        );
        assert_eq!(state.halt_deadline(now + Duration::from_secs(61)).unwrap(), None);
    }

    #[test]
    fn test_exhaustion_surfaces_once() {
        let mut state = SessionState::default();
        let now = Instant::now();
        let response = with_limits(json_response(URL, json!({})), 50, 1, 1_000_000);
        state.record(response, &RateLimitPolicy::default(), 0, now);

        assert!(matches!(
            state.halt_deadline(now),
            Err(HarvestError::RateLimitExhausted { reset: 1_000_000, .. })
        ));
        assert!(state.halt_deadline(now).unwrap().is_none());
    }

    #[test]
    fn test_begin_keeps_rate_limits() {
        let mut state = SessionState::default();
        let response = with_limits(json_response(URL, json!({})), 50, 47, 0);
        state.record(response, &RateLimitPolicy::default(), 0, Instant::now());
        state.begin();
        assert_eq!(state.captured_len(), 0);
        assert_eq!(state.rate_limits().remaining, Some(47));
    }
}
