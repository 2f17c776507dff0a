//! Shared constants used across the application.

/// User agent string presented by the harvesting browser.
///
/// A realistic desktop Chrome user agent, so the web client serves the same
/// payloads it serves to ordinary visitors.
pub const HARVEST_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Base URL of the web client.
pub const PLATFORM_BASE_URL: &str = "https://twitter.com";

/// Cookie domains the session credentials are injected into.
pub const COOKIE_DOMAINS: [&str; 2] = [".twitter.com", ".x.com"];

/// Name of the session auth cookie.
pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// Name of the CSRF companion cookie.
pub const CSRF_COOKIE: &str = "ct0";

/// Selector for a rendered post in any timeline.
pub const POST_SELECTOR: &str = "[data-testid='tweet']";

/// Selector for the username header on a profile page.
pub const USERNAME_SELECTOR: &str = "[data-testid='UserName']";

/// Selector for loading spinners.
pub const SPINNER_SELECTOR: &str = "[role='progressbar']";

/// Button label that expands a collapsed reply thread.
pub const SHOW_REPLIES_LABEL: &str = "Show replies";

/// Button label prefix that reveals additional (hidden or low-ranked) replies.
pub const SHOW_ADDITIONAL_LABEL: &str = "Show";

/// Script returning the current scrollable height of the page.
pub const SCROLL_HEIGHT_SCRIPT: &str = "document.body.scrollHeight";

/// Script scrolling the page to the bottom.
pub const SCROLL_TO_BOTTOM_SCRIPT: &str =
    "window.scrollTo({top: document.body.scrollHeight, behavior: 'smooth'})";

/// Rate-limit response header names (lower-case).
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-rate-limit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-rate-limit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-rate-limit-reset";

/// Extra seconds waited past the advertised rate-limit reset.
pub const RATE_LIMIT_RESET_GRACE_SECS: u64 = 30;
