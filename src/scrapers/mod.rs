//! Fetch machinery for the GPU database.
//!
//! Two tiers reach the site: direct HTTP ([`http_client`]) and a real
//! browser ([`browser`]). The [`rate_limiter`] paces both, the [`session`]
//! manager keeps cookies valid, and [`strategy`] decides which tier to use
//! next for an item. [`executor`] ties them together for one request.

pub mod browser;
pub mod executor;
pub mod http_client;
pub mod rate_limiter;
pub mod session;
pub mod strategy;

pub use browser::{BrowserCapability, BrowserEngineConfig, BrowserFetcher, ConfirmationSignal};
pub use executor::{FetchExecutor, FetchFailure, FetchRequest, FetchSuccess};
pub use http_client::{HttpCapability, HttpClient, HttpResponse};
pub use rate_limiter::{Channel, RateLimitConfig, RateLimiter};
pub use session::{RefreshOutcome, SessionConfig, SessionManager, SessionPhase};
pub use strategy::{Decision, FetchOutcome, StrategyPolicy, Target};
