//! A small service for resolving and caching the embedded player URL behind
//! a video preview page.
//!
//! The interesting part lives in [`Resolver`]: given a source page URL it
//! decides whether a previously extracted result is still fresh enough to
//! reuse, or whether the [`Extractor`] has to drive a headless browser to
//! pull the embedded frame's address again. Everything else is plumbing
//! around it - a JSON config file holding the tracked URL, a JSON cache file
//! holding past extractions, and a three-endpoint HTTP surface.

#![forbid(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations)]

pub mod cache;
pub mod config;
pub mod extract;
pub mod resolve;
pub mod server;

pub use cache::{Cache, CacheEntry, CacheStore, CACHE_EXPIRY};
pub use config::{Config, ConfigError, ConfigStore, TRACKED_URL_PREFIX};
pub use extract::{
    BrowserExtractor, ExtractionError, Extractor, LAUNCH_TIMEOUT,
    NAVIGATION_TIMEOUT,
};
pub use resolve::Resolver;
pub use server::{router, AppState};
