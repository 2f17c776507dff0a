//! Feed harvester library.
//!
//! Drives a logged-in browser session against the platform's web client,
//! captures the background JSON responses it issues while scrolling and
//! turns them into post and account records.

pub mod browser;
pub mod config;
pub mod constants;
pub mod entities;
pub mod error;
pub mod filters;
pub mod harvester;
pub mod query;
pub mod timestamp;

pub use error::{HarvestError, Result};
