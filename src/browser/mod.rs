//! Browser primitives the harvester drives.
//!
//! [`ChromiumBrowser`] talks to a real Chromium over CDP; [`ScriptedBrowser`]
//! replays canned scroll heights and responses for tests.

mod chromium;
mod scripted;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use chromium::{BrowserSettings, ChromiumBrowser};
pub use scripted::{json_response, ScriptedBrowser, ScriptedPageLog};

/// How the page issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Xhr,
    Fetch,
    Document,
    Other,
}

impl ResourceKind {
    /// Background data requests, as opposed to documents and assets.
    #[must_use]
    pub const fn is_background(self) -> bool {
        matches!(self, Self::Xhr | Self::Fetch)
    }
}

/// A network response observed by the page.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub url: String,
    pub kind: ResourceKind,
    pub status: u16,
    /// Header names are lower-case.
    pub headers: HashMap<String, String>,
    /// Parsed JSON body, when the body was available and valid JSON.
    pub body: Option<Value>,
}

impl CapturedResponse {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// A cookie injected before navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// Receives responses as the page sees them.
///
/// Called from the browser's event task, concurrently with the code driving
/// the page.
pub trait ResponseListener: Send + Sync {
    /// Cheap pre-filter on the URL so bodies are only fetched when wanted.
    fn wants(&self, _url: &str) -> bool {
        true
    }

    fn on_response(&self, response: CapturedResponse);
}

/// A browser that can open pages.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Open a new blank page.
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>>;

    /// Shut the browser down. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// One open page.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn set_cookies(&self, cookies: &[SessionCookie]) -> Result<()>;

    /// Register a listener for every subsequent response.
    async fn on_response(&self, listener: Arc<dyn ResponseListener>) -> Result<()>;

    async fn goto(&self, url: &str) -> Result<()>;

    /// Wait until `selector` matches at least one element.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HarvestError::SelectorTimeout`] if nothing matched in time.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// Number of elements currently matching `selector`.
    async fn count(&self, selector: &str) -> Result<usize>;

    /// Click every visible button whose label starts with `label`
    /// (case-insensitive). Returns how many were clicked.
    async fn click_buttons(&self, label: &str) -> Result<usize>;

    async fn scroll_to_bottom(&self) -> Result<()>;

    /// Close the page and stop its listeners. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}
