//! Browser-driven harvesting of the platform's background responses.
//!
//! A [`Harvester`] opens one page at a time, listens for the background
//! request that carries the data, scrolls until a termination condition
//! holds and then extracts records from the captured bodies.

pub mod interceptor;
pub mod rate_limit;
mod scroll;
pub mod target;

use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::browser::{BrowserContext, BrowserPage, SessionCookie};
use crate::constants::{
    AUTH_TOKEN_COOKIE, COOKIE_DOMAINS, CSRF_COOKIE, POST_SELECTOR, USERNAME_SELECTOR,
};
use crate::error::{HarvestError, Result};
use crate::filters::{filter_by_count, filter_by_date, remove_replies, DateWindow};
use crate::query::{json_path, JsonPath};

use interceptor::{lock, Interceptor, RequestName, SessionState, SharedSession};
use rate_limit::{RateLimitPolicy, RateLimitState};
use scroll::ScrollLoop;
pub use scroll::{predates_window, ScrollPolicy, Termination};
use target::{profile_url, PostRef, SearchQuery};

static TIMELINE_POSTS: LazyLock<JsonPath> =
    json_path!("$..entries..itemContent.tweet_results.result");
static REPLY_ENTRIES: LazyLock<JsonPath> = json_path!("$..entries..content");
static CLIENT_EVENT: LazyLock<JsonPath> = json_path!("$.clientEventInfo.component");
static PROMOTED: LazyLock<JsonPath> = json_path!("$..promotedMetadata");
static ENTRY_POSTS: LazyLock<JsonPath> = json_path!("$..itemContent.tweet_results.result");
static MODULE_POSTS: LazyLock<JsonPath> =
    json_path!("$..moduleItems..itemContent.tweet_results.result");
static USER_RESULT: LazyLock<JsonPath> = json_path!("$.data.user.result");

const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The logged-in session's cookies.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub auth_token: String,
    pub ct0: String,
}

impl SessionCredentials {
    #[must_use]
    pub fn new(auth_token: impl Into<String>, ct0: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            ct0: ct0.into(),
        }
    }

    /// Both cookies for every platform domain.
    #[must_use]
    pub fn cookies(&self) -> Vec<SessionCookie> {
        let mut cookies = Vec::with_capacity(COOKIE_DOMAINS.len() * 2);
        for domain in COOKIE_DOMAINS {
            for (name, value) in [(AUTH_TOKEN_COOKIE, &self.auth_token), (CSRF_COOKIE, &self.ct0)] {
                cookies.push(SessionCookie {
                    name: name.to_string(),
                    value: value.clone(),
                    domain: domain.to_string(),
                    path: "/".to_string(),
                });
            }
        }
        cookies
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("auth_token", &"[REDACTED]")
            .field("ct0", &"[REDACTED]")
            .finish()
    }
}

/// Timing and backpressure knobs for a [`Harvester`].
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub credentials: Option<SessionCredentials>,
    /// Inclusive range of whole seconds to sleep after each scroll.
    pub delay_secs: (u64, u64),
    pub rate_limits: RateLimitPolicy,
    pub navigation_timeout: Duration,
    pub spinner_timeout: Duration,
    /// Pause between rounds of reply expansion.
    pub expand_pause: Duration,
    pub max_expand_rounds: usize,
    /// How long operations without scrolling wait for the first response.
    pub capture_timeout: Duration,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            credentials: None,
            delay_secs: (7, 10),
            rate_limits: RateLimitPolicy::default(),
            navigation_timeout: Duration::from_secs(30),
            spinner_timeout: Duration::from_secs(120),
            expand_pause: Duration::from_secs(5),
            max_expand_rounds: 50,
            capture_timeout: Duration::from_secs(5),
        }
    }
}

impl HarvestSettings {
    /// No sleeps at all; for driving a scripted browser.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            delay_secs: (0, 0),
            navigation_timeout: Duration::ZERO,
            spinner_timeout: Duration::ZERO,
            expand_pause: Duration::ZERO,
            capture_timeout: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Where a harvesting session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    PageOpened,
    Listening,
    Scrolling,
    Halted,
    Terminated,
    Extracted,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::PageOpened => "page_opened",
            Self::Listening => "listening",
            Self::Scrolling => "scrolling",
            Self::Halted => "halted",
            Self::Terminated => "terminated",
            Self::Extracted => "extracted",
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorPostsOptions {
    pub pages: Option<usize>,
    pub count: Option<usize>,
    pub window: Option<DateWindow>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RepliesOptions {
    pub pages: Option<usize>,
    pub count: Option<usize>,
    /// Click "Show replies" and collect the threaded replies it reveals.
    pub expand_replies: bool,
    /// Click "Show" to reveal additional or hidden replies.
    pub expand_additional: bool,
}

/// One logical browsing session.
pub struct Harvester<B: BrowserContext> {
    browser: B,
    settings: HarvestSettings,
    page: Option<Box<dyn BrowserPage>>,
    session: SharedSession,
    phase: SessionPhase,
    closed: bool,
}

impl<B: BrowserContext> Harvester<B> {
    pub fn new(browser: B, settings: HarvestSettings) -> Self {
        Self {
            browser,
            settings,
            page: None,
            session: Arc::new(std::sync::Mutex::new(SessionState::default())),
            phase: SessionPhase::Idle,
            closed: false,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub const fn settings(&self) -> &HarvestSettings {
        &self.settings
    }

    /// Most recent rate-limit counters seen on any response.
    #[must_use]
    pub fn rate_limits(&self) -> RateLimitState {
        lock(&self.session).rate_limits()
    }

    /// Posts from an account's timeline, replies removed.
    ///
    /// # Errors
    ///
    /// Browser, timeout, rate-limit and timestamp errors from the session.
    #[instrument(skip(self, options), fields(request = %RequestName::UserTweets))]
    pub async fn fetch_author_posts(
        &mut self,
        handle: &str,
        options: &AuthorPostsOptions,
    ) -> Result<Vec<Value>> {
        self.listen(RequestName::UserTweets, &profile_url(handle), POST_SELECTOR)
            .await?;
        let policy = ScrollPolicy {
            window: options.window,
            pages: options.pages,
            ..ScrollPolicy::default()
        };
        self.scroll(&policy).await?;

        let captured = self.take_captured();
        let mut records = remove_replies(&extract(&TIMELINE_POSTS, &captured));
        if let Some(ref window) = options.window {
            records = filter_by_date(&records, window);
        }
        Ok(self.finish(records, options.count))
    }

    /// Posts from a latest-first search.
    ///
    /// # Errors
    ///
    /// Browser, timeout and rate-limit errors from the session.
    #[instrument(skip(self, query), fields(request = %RequestName::SearchTimeline, q = %query.to_query_string()))]
    pub async fn fetch_search_timeline(
        &mut self,
        query: &SearchQuery,
        pages: Option<usize>,
    ) -> Result<Vec<Value>> {
        self.listen(RequestName::SearchTimeline, &query.url(), POST_SELECTOR)
            .await?;
        let policy = ScrollPolicy {
            pages,
            ..ScrollPolicy::default()
        };
        self.scroll(&policy).await?;

        let captured = self.take_captured();
        let records = extract(&TIMELINE_POSTS, &captured);
        Ok(self.finish(records, None))
    }

    /// The post itself.
    ///
    /// # Errors
    ///
    /// [`HarvestError::EntityNotFound`] when no post record was captured.
    #[instrument(skip(self), fields(request = %RequestName::TweetDetail))]
    pub async fn fetch_post_detail(&mut self, post: &PostRef) -> Result<Value> {
        self.listen(RequestName::TweetDetail, &post.url(), POST_SELECTOR)
            .await?;
        self.await_capture().await;

        let captured = self.take_captured();
        let mut records = extract(&TIMELINE_POSTS, &captured);
        self.phase = SessionPhase::Extracted;
        if records.is_empty() {
            return Err(HarvestError::EntityNotFound(format!("post {post}")));
        }
        Ok(records.swap_remove(0))
    }

    /// Replies under a post, the post itself excluded.
    ///
    /// With `expand_replies`, threaded replies are collected twice per
    /// response: once among the conversation entries and again from the
    /// revealed thread modules. Callers that need unique posts deduplicate by
    /// id.
    ///
    /// # Errors
    ///
    /// Browser, timeout and rate-limit errors from the session.
    #[instrument(skip(self, options), fields(request = %RequestName::TweetDetail))]
    pub async fn fetch_post_replies(
        &mut self,
        post: &PostRef,
        options: &RepliesOptions,
    ) -> Result<Vec<Value>> {
        self.listen(RequestName::TweetDetail, &post.url(), POST_SELECTOR)
            .await?;
        let policy = ScrollPolicy {
            pages: options.pages,
            expand_replies: options.expand_replies,
            expand_additional: options.expand_additional,
            ..ScrollPolicy::default()
        };
        self.scroll(&policy).await?;

        let captured = self.take_captured();
        let mut records = reply_records(&captured, options.expand_replies);
        if !records.is_empty() {
            records.remove(0);
        }
        Ok(self.finish(records, options.count))
    }

    /// The raw account record for `handle`, if the account exists.
    ///
    /// # Errors
    ///
    /// Browser and timeout errors from the session.
    #[instrument(skip(self), fields(request = %RequestName::UserByScreenName))]
    pub async fn resolve_author(&mut self, handle: &str) -> Result<Option<Value>> {
        self.listen(
            RequestName::UserByScreenName,
            &profile_url(handle),
            USERNAME_SELECTOR,
        )
        .await?;
        self.await_capture().await;

        let captured = self.take_captured();
        self.phase = SessionPhase::Extracted;
        Ok(captured
            .iter()
            .find_map(|body| USER_RESULT.first(body).cloned()))
    }

    /// Close the page and the browser. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns the browser's error if shutting it down failed.
    pub async fn close(&mut self) -> Result<()> {
        self.close_page().await;
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.phase = SessionPhase::Idle;
        self.browser.close().await
    }

    async fn close_page(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!(error = %e, "Failed to close page");
            }
        }
    }

    async fn open_page(&mut self) -> Result<&dyn BrowserPage> {
        if self.closed {
            return Err(HarvestError::Browser("harvester is closed".to_string()));
        }
        self.close_page().await;
        self.phase = SessionPhase::Idle;

        let page = self.browser.new_page().await?;
        if let Some(ref credentials) = self.settings.credentials {
            page.set_cookies(&credentials.cookies()).await?;
        } else {
            debug!("No session credentials configured");
        }
        self.phase = SessionPhase::PageOpened;
        Ok(&**self.page.insert(page))
    }

    async fn listen(&mut self, request: RequestName, url: &str, selector: &str) -> Result<()> {
        lock(&self.session).begin();
        let listener = Arc::new(Interceptor::new(
            request,
            self.settings.rate_limits.clone(),
            Arc::clone(&self.session),
        ));
        let timeout = self.settings.navigation_timeout;

        let page = self.open_page().await?;
        page.on_response(listener).await?;
        page.goto(url).await?;
        page.wait_for_selector(selector, timeout).await?;

        self.phase = SessionPhase::Listening;
        info!(%request, url, "Listening");
        Ok(())
    }

    async fn scroll(&mut self, policy: &ScrollPolicy) -> Result<Termination> {
        let page = self
            .page
            .as_deref()
            .ok_or_else(|| HarvestError::Browser("no open page".to_string()))?;
        ScrollLoop {
            page,
            session: &self.session,
            settings: &self.settings,
            phase: &mut self.phase,
        }
        .run(policy)
        .await
    }

    /// Wait briefly for the first matched response on a page that is not
    /// scrolled.
    async fn await_capture(&self) {
        let deadline = Instant::now() + self.settings.capture_timeout;
        while lock(&self.session).captured_len() == 0 {
            if Instant::now() >= deadline {
                debug!("No response captured before timeout");
                return;
            }
            tokio::time::sleep(CAPTURE_POLL_INTERVAL).await;
        }
    }

    fn take_captured(&self) -> Vec<Value> {
        lock(&self.session).take_captured()
    }

    fn finish(&mut self, records: Vec<Value>, count: Option<usize>) -> Vec<Value> {
        let records = match count {
            Some(count) => filter_by_count(&records, count),
            None => records,
        };
        self.phase = SessionPhase::Extracted;
        info!(records = records.len(), "Extracted records");
        records
    }
}

fn extract(path: &JsonPath, captured: &[Value]) -> Vec<Value> {
    captured.iter().flat_map(|body| path.find_cloned(body)).collect()
}

/// Conversation entries minus client-event modules and promotions, in
/// arrival order. Threaded replies follow each response's entries.
fn reply_records(captured: &[Value], include_threads: bool) -> Vec<Value> {
    let mut records = Vec::new();
    for body in captured {
        for entry in REPLY_ENTRIES.find(body) {
            if CLIENT_EVENT.exists(entry) || PROMOTED.exists(entry) {
                continue;
            }
            records.extend(ENTRY_POSTS.find_cloned(entry));
        }
        if include_threads {
            records.extend(MODULE_POSTS.find_cloned(body));
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post(id: &str) -> Value {
        json!({"itemContent": {"tweet_results": {"result": {"__typename": "Tweet", "rest_id": id}}}})
    }

    fn ids(records: &[Value]) -> Vec<&str> {
        records
            .iter()
            .filter_map(|r| r.get("rest_id").and_then(Value::as_str))
            .collect()
    }

    #[test]
    fn test_credentials_cover_both_domains() {
        let cookies = SessionCredentials::new("token", "csrf").cookies();
        assert_eq!(cookies.len(), 4);
        assert!(cookies
            .iter()
            .any(|c| c.name == "ct0" && c.value == "csrf" && c.domain == ".x.com"));
        assert!(cookies.iter().all(|c| c.path == "/"));
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let debug = format!("{:?}", SessionCredentials::new("secret-token", "secret-csrf"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_reply_records_skip_promotions_and_client_events() {
        let body = json!({"entries": [
            {"content": post("1")},
            {"content": {"clientEventInfo": {"component": "related_tweet"}, "itemContent": {"tweet_results": {"result": {"rest_id": "9"}}}}},
            {"content": {"itemContent": {"promotedMetadata": {}, "tweet_results": {"result": {"rest_id": "8"}}}}},
            {"content": post("2")},
        ]});
        assert_eq!(ids(&reply_records(&[body], false)), vec!["1", "2"]);
    }

    #[test]
    fn test_reply_records_append_threads() {
        let body = json!({"entries": [
            {"content": post("1")},
            {"content": {"moduleItems": [{"item": post("3")}]}},
        ]});
        assert_eq!(ids(&reply_records(&[body.clone()], false)), vec!["1", "3"]);
        assert_eq!(ids(&reply_records(&[body], true)), vec!["1", "3", "3"]);
    }

    #[test]
    fn test_extract_keeps_arrival_order() {
        let first = json!({"entries": [{"content": post("1")}]});
        let second = json!({"entries": [{"content": post("2")}, {"content": post("3")}]});
        assert_eq!(ids(&extract(&TIMELINE_POSTS, &[first, second])), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SessionPhase::PageOpened.to_string(), "page_opened");
    }
}
