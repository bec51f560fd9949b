//! Crawl orchestration: listing queries, the detail pool, the failure
//! ledger and the merge into the persisted dataset.

pub mod ledger;
pub mod listing;
pub mod merge;
pub mod pool;
pub mod runner;

pub use ledger::FailureLedger;
pub use listing::{ListingCrawler, ListingReport};
pub use merge::{merge, patch_listings, CrawlBatch, PatchReport};
pub use pool::{DetailEvent, DetailPool, DetailTarget, PoolReport, StopSignal};
pub use runner::{RunMode, RunSummary, Runner};
