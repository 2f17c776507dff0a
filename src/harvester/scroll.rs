//! The scroll-and-intercept loop.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::interceptor::{lock, SharedSession};
use super::{HarvestSettings, SessionPhase};
use crate::browser::BrowserPage;
use crate::constants::{
    SCROLL_HEIGHT_SCRIPT, SHOW_ADDITIONAL_LABEL, SHOW_REPLIES_LABEL, SPINNER_SELECTOR,
};
use crate::error::{HarvestError, Result};
use crate::filters::DateWindow;
use crate::query::{json_path, JsonPath};
use crate::timestamp::parse_platform_timestamp;

static TIMELINE_DATES: LazyLock<JsonPath> =
    json_path!("$..entries..itemContent.tweet_results.result.legacy.created_at");

const SPINNER_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// When to stop scrolling and what to do on the way.
#[derive(Debug, Clone, Default)]
pub struct ScrollPolicy {
    /// Stop once the newest response only holds posts older than the window.
    pub window: Option<DateWindow>,
    /// Stop once this many responses were captured.
    pub pages: Option<usize>,
    /// Click "Show replies" buttons before each step.
    pub expand_replies: bool,
    /// Click "Show" (more/hidden replies) buttons before each step.
    pub expand_additional: bool,
}

/// Why scrolling stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    DateRangeReached,
    PageCapReached,
    EndOfContent,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DateRangeReached => "date range is reached",
            Self::PageCapReached => "page limit is reached",
            Self::EndOfContent => "scrolling is not possible",
        })
    }
}

/// Whether every post in `body` predates `window`.
///
/// A response without any post timestamps never ends the window.
///
/// # Errors
///
/// Returns [`HarvestError::MalformedTimestamp`] on an unparseable date.
pub fn predates_window(body: &Value, window: &DateWindow) -> Result<bool> {
    let dates = TIMELINE_DATES.find(body);
    if dates.is_empty() {
        return Ok(false);
    }
    for date in dates {
        let Some(date) = date.as_str() else {
            continue;
        };
        if parse_platform_timestamp(date)? >= window.start {
            return Ok(false);
        }
    }
    Ok(true)
}

pub(super) struct ScrollLoop<'a> {
    pub page: &'a dyn BrowserPage,
    pub session: &'a SharedSession,
    pub settings: &'a HarvestSettings,
    pub phase: &'a mut SessionPhase,
}

impl ScrollLoop<'_> {
    pub async fn run(mut self, policy: &ScrollPolicy) -> Result<Termination> {
        let mut previous_height = 0;
        let mut current_height = self.scroll_height().await?;

        loop {
            let deadline = lock(self.session).halt_deadline(Instant::now())?;
            if let Some(deadline) = deadline {
                self.enter(SessionPhase::Halted);
                info!(
                    wait_secs = deadline.saturating_duration_since(Instant::now()).as_secs(),
                    "Session halted by rate limit"
                );
                tokio::time::sleep_until(deadline).await;
                continue;
            }
            self.enter(SessionPhase::Scrolling);

            if policy.expand_replies {
                self.expand(SHOW_REPLIES_LABEL).await?;
            }
            if policy.expand_additional {
                self.expand(SHOW_ADDITIONAL_LABEL).await?;
            }
            self.wait_for_spinners().await?;

            if let Some(reason) = self.termination(policy, previous_height, current_height)? {
                info!(%reason, "Scrolling terminated");
                self.enter(SessionPhase::Terminated);
                return Ok(reason);
            }

            self.page.scroll_to_bottom().await?;
            self.jitter().await;
            previous_height = current_height;
            current_height = self.scroll_height().await?;
            debug!(height = current_height, "Scrolled");
        }
    }

    fn enter(&mut self, phase: SessionPhase) {
        if *self.phase != phase {
            debug!(from = %self.phase, to = %phase, "Session phase");
            *self.phase = phase;
        }
    }

    fn termination(
        &self,
        policy: &ScrollPolicy,
        previous_height: i64,
        current_height: i64,
    ) -> Result<Option<Termination>> {
        let session = lock(self.session);

        if let Some(ref window) = policy.window {
            if let Some(last) = session.last_captured() {
                if predates_window(last, window)? {
                    return Ok(Some(Termination::DateRangeReached));
                }
            }
        }
        if let Some(pages) = policy.pages {
            if session.captured_len() >= pages {
                return Ok(Some(Termination::PageCapReached));
            }
        }
        if current_height == previous_height {
            return Ok(Some(Termination::EndOfContent));
        }
        Ok(None)
    }

    async fn scroll_height(&self) -> Result<i64> {
        let value = self.page.evaluate(SCROLL_HEIGHT_SCRIPT).await?;
        Ok(value
            .as_i64()
            .or_else(|| value.as_f64().map(|h| h as i64))
            .unwrap_or(0))
    }

    /// Click every matching button until none are left.
    async fn expand(&self, label: &str) -> Result<()> {
        for _ in 0..self.settings.max_expand_rounds {
            let clicked = self.page.click_buttons(label).await?;
            if clicked == 0 {
                return Ok(());
            }
            debug!(clicked, label, "Expanded replies");
            tokio::time::sleep(self.settings.expand_pause).await;
            self.wait_for_spinners().await?;
        }
        warn!(label, "Gave up expanding replies");
        Ok(())
    }

    async fn wait_for_spinners(&self) -> Result<()> {
        let timeout = self.settings.spinner_timeout;
        let started = Instant::now();
        loop {
            let spinners = self.page.count(SPINNER_SELECTOR).await?;
            if spinners == 0 {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(HarvestError::SelectorTimeout {
                    selector: SPINNER_SELECTOR.to_string(),
                    timeout,
                });
            }
            debug!(spinners, "Waiting for spinners");
            tokio::time::sleep(SPINNER_POLL_INTERVAL).await;
        }
    }

    async fn jitter(&self) {
        let (min, max) = self.settings.delay_secs;
        let secs = rand::thread_rng().gen_range(min..=max.max(min));
        if secs > 0 {
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
    }
}
