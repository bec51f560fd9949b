//! gpu-ladder - resilient mirror of the TechPowerUp GPU database.
//!
//! Crawls the filterable listing API and per-GPU detail pages into a local
//! JSON dataset. The fetch path survives rate limiting and bot challenges by
//! combining a shared throttle, a refreshable cookie session, and a
//! browser-assisted fallback tier.

pub mod config;
pub mod crawl;
pub mod error;
pub mod models;
pub mod normalize;
pub mod parse;
pub mod scrapers;
pub mod storage;

pub use config::{Config, Settings};
pub use crawl::{RunMode, RunSummary, Runner};
pub use error::{ConfigError, RunError, StoreError};
pub use models::{Dataset, DetailRecord, FailureEntry, Listing, NormalizedKey};
