//! Chromium over the DevTools protocol.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams,
    ResourceType,
};
use chromiumoxide::Page;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    BrowserContext, BrowserPage, CapturedResponse, ResourceKind, ResponseListener,
    SessionCookie,
};
use crate::constants::{HARVEST_USER_AGENT, SCROLL_TO_BOTTOM_SCRIPT};
use crate::error::{HarvestError, Result};

/// Default viewport width in pixels.
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;

/// Default viewport height in pixels.
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 1600;

/// Interval between selector polls.
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Browser launch configuration.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// CDP request timeout.
    pub request_timeout: Duration,
    /// Path to Chrome/Chromium executable (None for auto-detection).
    pub chrome_path: Option<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            request_timeout: Duration::from_secs(30),
            chrome_path: None,
        }
    }
}

/// A launched Chromium instance.
pub struct ChromiumBrowser {
    browser: Mutex<Option<Browser>>,
    handler: JoinHandle<()>,
}

impl ChromiumBrowser {
    /// Launch Chromium and start driving its CDP event loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser cannot be configured or started.
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        info!(headless = settings.headless, "Launching browser");

        let mut config_builder = BrowserConfig::builder()
            .window_size(settings.viewport_width, settings.viewport_height)
            .request_timeout(settings.request_timeout)
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--lang=en-US,en")
            .arg(format!("--user-agent={HARVEST_USER_AGENT}"));

        if !settings.headless {
            config_builder = config_builder.with_head();
        }
        if let Some(ref chrome_path) = settings.chrome_path {
            config_builder = config_builder.chrome_executable(chrome_path);
        }

        let browser_config = config_builder
            .build()
            .map_err(|e| HarvestError::Browser(format!("Failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(HarvestError::browser)?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        info!("Browser launched");

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler,
        })
    }
}

#[async_trait]
impl BrowserContext for ChromiumBrowser {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| HarvestError::Browser("browser already closed".to_string()))?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(HarvestError::browser)?;
        Ok(Box::new(ChromiumPage {
            page,
            listeners: std::sync::Mutex::new(Vec::new()),
        }))
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            if let Err(e) = browser.close().await {
                error!("Failed to close browser: {e}");
            } else {
                info!("Browser shutdown complete");
            }
            let _ = browser.wait().await;
        }
        self.handler.abort();
        Ok(())
    }
}

struct ChromiumPage {
    page: Page,
    listeners: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ChromiumPage {
    fn abort_listeners(&self) {
        let handles = match self.listeners.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            handle.abort();
        }
    }
}

fn resource_kind(kind: &ResourceType) -> ResourceKind {
    match kind {
        ResourceType::Xhr => ResourceKind::Xhr,
        ResourceType::Fetch => ResourceKind::Fetch,
        ResourceType::Document => ResourceKind::Document,
        _ => ResourceKind::Other,
    }
}

fn lowercase_headers(headers: &Value) -> HashMap<String, String> {
    headers
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let value = v.as_str().map_or_else(|| v.to_string(), str::to_string);
                    (k.to_ascii_lowercase(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn response_body(page: &Page, event: &EventLoadingFinished) -> Option<Value> {
    let reply = match page
        .execute(GetResponseBodyParams::new(event.request_id.clone()))
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            debug!(error = %e, "Response body unavailable");
            return None;
        }
    };
    if reply.result.base64_encoded {
        debug!("Skipping base64-encoded response body");
        return None;
    }
    match serde_json::from_str(&reply.result.body) {
        Ok(body) => Some(body),
        Err(e) => {
            debug!(error = %e, "Response body is not JSON");
            None
        }
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn set_cookies(&self, cookies: &[SessionCookie]) -> Result<()> {
        let params = cookies
            .iter()
            .map(|c| {
                CookieParam::builder()
                    .name(c.name.clone())
                    .value(c.value.clone())
                    .domain(c.domain.clone())
                    .path(c.path.clone())
                    .secure(true)
                    .build()
                    .map_err(HarvestError::Browser)
            })
            .collect::<Result<Vec<_>>>()?;
        self.page
            .set_cookies(params)
            .await
            .map_err(HarvestError::browser)?;
        Ok(())
    }

    async fn on_response(&self, listener: Arc<dyn ResponseListener>) -> Result<()> {
        let mut received = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(HarvestError::browser)?;
        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(HarvestError::browser)?;
        let page = self.page.clone();

        let handle = tokio::spawn(async move {
            // Bodies can only be read once loading finished.
            let mut pending: HashMap<String, CapturedResponse> = HashMap::new();
            loop {
                tokio::select! {
                    Some(event) = received.next() => {
                        let kind = resource_kind(&event.r#type);
                        if !kind.is_background() || !listener.wants(&event.response.url) {
                            continue;
                        }
                        pending.insert(
                            event.request_id.inner().clone(),
                            CapturedResponse {
                                url: event.response.url.clone(),
                                kind,
                                status: u16::try_from(event.response.status).unwrap_or(0),
                                headers: lowercase_headers(event.response.headers.inner()),
                                body: None,
                            },
                        );
                    }
                    Some(event) = finished.next() => {
                        if let Some(mut response) = pending.remove(event.request_id.inner()) {
                            response.body = response_body(&page, &event).await;
                            listener.on_response(response);
                        }
                    }
                    else => break,
                }
            }
        });

        match self.listeners.lock() {
            Ok(mut guard) => guard.push(handle),
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
        Ok(())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        debug!(url = %url, "Navigating");
        self.page
            .goto(url)
            .await
            .map_err(|e| HarvestError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let poll = async {
            loop {
                if self.page.find_element(selector).await.is_ok() {
                    return;
                }
                tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| HarvestError::SelectorTimeout {
                selector: selector.to_string(),
                timeout,
            })
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(HarvestError::browser)?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(HarvestError::browser)?;
        Ok(elements.len())
    }

    async fn click_buttons(&self, label: &str) -> Result<usize> {
        let label = label.to_lowercase();
        let buttons = self
            .page
            .find_elements("[role='button']")
            .await
            .map_err(HarvestError::browser)?;

        let mut clicked = 0;
        for button in buttons {
            let text = match button.inner_text().await {
                Ok(Some(text)) => text,
                _ => continue,
            };
            if !text.trim().to_lowercase().starts_with(&label) {
                continue;
            }
            match button.click().await {
                Ok(_) => clicked += 1,
                Err(e) => warn!(error = %e, label = %label, "Failed to click button"),
            }
        }
        Ok(clicked)
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.page
            .evaluate(SCROLL_TO_BOTTOM_SCRIPT)
            .await
            .map_err(HarvestError::browser)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.abort_listeners();
        if let Err(e) = self.page.clone().close().await {
            // Already-closed pages report an error; nothing left to release.
            debug!("Failed to close page: {e}");
        }
        Ok(())
    }
}
