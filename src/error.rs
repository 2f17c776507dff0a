use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by harvesting operations.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("malformed platform timestamp {value:?}: {source}")]
    MalformedTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("not found: {0}")]
    EntityNotFound(String),
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("timed out after {timeout:?} waiting for selector {selector}")]
    SelectorTimeout { selector: String, timeout: Duration },
    #[error("rate limit exhausted; reset at epoch {reset} is {wait:?} away")]
    RateLimitExhausted { reset: i64, wait: Duration },
    #[error("browser error: {0}")]
    Browser(String),
    #[error("invalid reporting offset: {0} hours")]
    InvalidOffset(i32),
}

pub type Result<T, E = HarvestError> = std::result::Result<T, E>;

impl HarvestError {
    /// Wrap any displayable browser-side failure.
    pub fn browser(err: impl std::fmt::Display) -> Self {
        Self::Browser(err.to_string())
    }

    /// Whether this error is the "nothing found" outcome rather than a failure
    /// of the browser or the platform.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound(_))
    }
}
