//! A browser double that replays a fixed script.
//!
//! Each page reports the configured scroll heights in order (repeating the
//! last one), delivers the initial responses on navigation and one batch of
//! responses per scroll.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    BrowserContext, BrowserPage, CapturedResponse, ResourceKind, ResponseListener,
    SessionCookie,
};
use crate::constants::SCROLL_HEIGHT_SCRIPT;
use crate::error::{HarvestError, Result};

/// What the scripted pages were asked to do.
#[derive(Debug, Default, Clone)]
pub struct ScriptedPageLog {
    pub pages_opened: usize,
    pub pages_closed: usize,
    pub browser_closed: bool,
    pub cookies: Vec<SessionCookie>,
    pub navigations: Vec<String>,
    pub selectors_waited: Vec<String>,
    pub scrolls: usize,
    pub clicks: Vec<String>,
}

#[derive(Default)]
struct Script {
    heights: VecDeque<i64>,
    last_height: i64,
    on_navigate: Vec<CapturedResponse>,
    per_scroll: VecDeque<Vec<CapturedResponse>>,
    buttons: HashMap<String, VecDeque<usize>>,
    missing_selectors: Vec<String>,
    query_error: Option<String>,
    listeners: Vec<Arc<dyn ResponseListener>>,
    log: ScriptedPageLog,
}

impl Script {
    fn deliver(&self, responses: Vec<CapturedResponse>) {
        for response in responses {
            for listener in &self.listeners {
                if listener.wants(&response.url) {
                    listener.on_response(response.clone());
                }
            }
        }
    }
}

/// Scripted [`BrowserContext`]. Clones share one script.
#[derive(Clone, Default)]
pub struct ScriptedBrowser {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBrowser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scroll heights reported by successive height reads.
    #[must_use]
    pub fn with_scroll_heights(self, heights: impl IntoIterator<Item = i64>) -> Self {
        self.lock().heights = heights.into_iter().collect();
        self
    }

    /// A background JSON response delivered when the page navigates.
    #[must_use]
    pub fn on_navigate(self, url: &str, body: Value) -> Self {
        self.lock().on_navigate.push(json_response(url, body));
        self
    }

    /// A raw response delivered when the page navigates.
    #[must_use]
    pub fn on_navigate_raw(self, response: CapturedResponse) -> Self {
        self.lock().on_navigate.push(response);
        self
    }

    /// Responses delivered by the next scroll that has none queued yet.
    #[must_use]
    pub fn on_scroll(self, responses: Vec<CapturedResponse>) -> Self {
        self.lock().per_scroll.push_back(responses);
        self
    }

    /// Successive visible-button counts for a label; exhausted means zero.
    #[must_use]
    pub fn with_buttons(self, label: &str, counts: impl IntoIterator<Item = usize>) -> Self {
        self.lock()
            .buttons
            .insert(label.to_string(), counts.into_iter().collect());
        self
    }

    /// Make waits on `selector` time out.
    #[must_use]
    pub fn without_selector(self, selector: &str) -> Self {
        self.lock().missing_selectors.push(selector.to_string());
        self
    }

    /// Make element counting and button lookup fail with `message`.
    #[must_use]
    pub fn with_query_error(self, message: &str) -> Self {
        self.lock().query_error = Some(message.to_string());
        self
    }

    /// Snapshot of what has happened so far.
    #[must_use]
    pub fn log(&self) -> ScriptedPageLog {
        self.lock().log.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// A successful background JSON response for `url`.
#[must_use]
pub fn json_response(url: &str, body: Value) -> CapturedResponse {
    CapturedResponse {
        url: url.to_string(),
        kind: ResourceKind::Xhr,
        status: 200,
        headers: HashMap::new(),
        body: Some(body),
    }
}

#[async_trait]
impl BrowserContext for ScriptedBrowser {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>> {
        let mut script = self.lock();
        script.log.pages_opened += 1;
        script.listeners.clear();
        Ok(Box::new(ScriptedPage {
            browser: self.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.lock().log.browser_closed = true;
        Ok(())
    }
}

struct ScriptedPage {
    browser: ScriptedBrowser,
}

#[async_trait]
impl BrowserPage for ScriptedPage {
    async fn set_cookies(&self, cookies: &[SessionCookie]) -> Result<()> {
        self.browser.lock().log.cookies.extend_from_slice(cookies);
        Ok(())
    }

    async fn on_response(&self, listener: Arc<dyn ResponseListener>) -> Result<()> {
        self.browser.lock().listeners.push(listener);
        Ok(())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        let mut script = self.browser.lock();
        script.log.navigations.push(url.to_string());
        let responses = std::mem::take(&mut script.on_navigate);
        script.deliver(responses);
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let mut script = self.browser.lock();
        script.log.selectors_waited.push(selector.to_string());
        if script.missing_selectors.iter().any(|s| s == selector) {
            return Err(HarvestError::SelectorTimeout {
                selector: selector.to_string(),
                timeout,
            });
        }
        Ok(())
    }

    async fn evaluate(&self, script_source: &str) -> Result<Value> {
        if script_source != SCROLL_HEIGHT_SCRIPT {
            return Ok(Value::Null);
        }
        let mut script = self.browser.lock();
        if let Some(height) = script.heights.pop_front() {
            script.last_height = height;
        }
        Ok(Value::from(script.last_height))
    }

    async fn count(&self, _selector: &str) -> Result<usize> {
        match self.browser.lock().query_error {
            Some(ref message) => Err(HarvestError::Browser(message.clone())),
            None => Ok(0),
        }
    }

    async fn click_buttons(&self, label: &str) -> Result<usize> {
        let mut script = self.browser.lock();
        if let Some(ref message) = script.query_error {
            return Err(HarvestError::Browser(message.clone()));
        }
        let clicked = script
            .buttons
            .get_mut(label)
            .and_then(VecDeque::pop_front)
            .unwrap_or(0);
        for _ in 0..clicked {
            script.log.clicks.push(label.to_string());
        }
        Ok(clicked)
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        let mut script = self.browser.lock();
        script.log.scrolls += 1;
        if let Some(responses) = script.per_scroll.pop_front() {
            script.deliver(responses);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut script = self.browser.lock();
        script.log.pages_closed += 1;
        script.listeners.clear();
        Ok(())
    }
}
