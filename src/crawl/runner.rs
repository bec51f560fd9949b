//! One end-to-end run: load, fetch, merge, save.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::listing::ListingCrawler;
use super::merge::{fill_missing_candidates, listing_targets, merge, retry_candidates, CrawlBatch};
use super::pool::{DetailEvent, DetailPool, DetailTarget, StopSignal};
use crate::config::Settings;
use crate::error::{RunError, StoreError};
use crate::models::Dataset;
use crate::scrapers::browser::{browser_available, BrowserCapability};
use crate::scrapers::session::SessionError;
use crate::scrapers::{
    BrowserFetcher, Channel, ConfirmationSignal, FetchExecutor, HttpCapability, HttpClient, RateLimiter,
    SessionManager,
};
use crate::storage::{DatasetStore, JsonDatasetStore, StorageStateFile};

/// What a run does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Crawl listings for the configured range, then their details.
    Full,
    /// Fetch details for listed keys that have none yet.
    FillMissing,
    /// Re-fetch entries from the failure ledger.
    Retry,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "scrape",
            Self::FillMissing => "fill-missing",
            Self::Retry => "retry",
        }
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub mode: RunMode,
    pub listings_fetched: usize,
    pub filters_failed: usize,
    pub details_fetched: usize,
    pub details_failed: usize,
    /// Targets never started because of a cap or a stop.
    pub skipped: usize,
    pub remaining_failures: usize,
    pub total_listings: usize,
    pub total_details: usize,
    /// False when there was nothing to do and the dataset was left alone.
    pub saved: bool,
    pub interrupted: bool,
    pub session_refreshes: u64,
    pub rate_limit_hits: u64,
    pub location: String,
}

impl RunSummary {
    fn new(mode: RunMode, location: String) -> Self {
        Self {
            mode,
            listings_fetched: 0,
            filters_failed: 0,
            details_fetched: 0,
            details_failed: 0,
            skipped: 0,
            remaining_failures: 0,
            total_listings: 0,
            total_details: 0,
            saved: false,
            interrupted: false,
            session_refreshes: 0,
            rate_limit_hits: 0,
            location,
        }
    }
}

pub struct Runner {
    settings: Settings,
    store: Arc<dyn DatasetStore>,
    executor: FetchExecutor,
    browser: Option<Arc<BrowserFetcher>>,
    stop: StopSignal,
}

impl Runner {
    pub fn new(settings: Settings, store: Arc<dyn DatasetStore>, executor: FetchExecutor) -> Self {
        Self {
            settings,
            store,
            executor,
            browser: None,
            stop: StopSignal::new(),
        }
    }

    /// Wire the real HTTP client, browser, session file and dataset file.
    pub fn from_settings(
        settings: Settings,
        confirmation: Option<Arc<dyn ConfirmationSignal>>,
    ) -> Result<Self, RunError> {
        settings.validate()?;

        let referer = settings
            .base_url
            .join("gpu-specs/")
            .map(|u| u.to_string())
            .unwrap_or_else(|_| settings.base_url.to_string());
        let http = HttpClient::new(settings.http_timeout, settings.user_agent.as_deref(), &referer)
            .map_err(|e| RunError::Client(e.to_string()))?;
        let http: Arc<dyn HttpCapability> = Arc::new(http);

        let browser = browser_available()
            .then(|| Arc::new(BrowserFetcher::new(settings.browser_config(), confirmation)));
        let capability = browser.clone().map(|b| b as Arc<dyn BrowserCapability>);

        let session = Arc::new(SessionManager::new(
            settings.session_config(),
            Arc::new(StorageStateFile::new(settings.storage_state.clone())),
            capability.clone(),
        ));
        let policy = settings.strategy_policy(capability.is_some());
        let limiter = RateLimiter::with_config(settings.rate_limit_config());
        let executor = FetchExecutor::new(limiter, session, http, capability, policy);

        let store = Arc::new(JsonDatasetStore::new(settings.output.clone(), settings.pretty));
        let mut runner = Self::new(settings, store, executor);
        runner.browser = browser;
        Ok(runner)
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run `mode` to completion. Progress events for detail fetches go to
    /// `events` when given.
    ///
    /// Fatal errors (bad settings, unreadable store, failed session
    /// bootstrap) are returned before anything is fetched or written.
    pub async fn run(
        &self,
        mode: RunMode,
        events: Option<mpsc::Sender<DetailEvent>>,
    ) -> Result<RunSummary, RunError> {
        self.settings.validate()?;
        let mut summary = RunSummary::new(mode, self.store.location());

        let existing = self.store.load()?;
        let existing = match (mode, existing) {
            (RunMode::Full, Some(d)) => d,
            (RunMode::Full, None) => Dataset::empty(
                self.settings.start_year,
                self.settings.end_year,
                self.settings.manufacturers.clone(),
                self.settings.filter_template.clone(),
            ),
            (_, Some(d)) => d,
            (_, None) => return Err(StoreError::NotFound(PathBuf::from(self.store.location())).into()),
        };

        let planned = match mode {
            RunMode::Full => None,
            RunMode::FillMissing => Some(fill_missing_candidates(&existing)),
            RunMode::Retry => Some(retry_candidates(&existing, self.settings.max_retry)),
        };
        if let Some(targets) = &planned {
            if targets.is_empty() {
                info!("Nothing to fetch for {}", mode.as_str());
                summary.total_listings = existing.listings.len();
                summary.total_details = existing.details.len();
                summary.remaining_failures = existing.failed_details.len();
                return Ok(summary);
            }
            info!("{} detail targets for {}", targets.len(), mode.as_str());
        }

        self.ensure_session().await?;

        let mut batch = CrawlBatch::default();
        let mut base = existing;
        let targets = match planned {
            Some(targets) => targets,
            None => {
                let report = ListingCrawler::new(
                    self.executor.clone(),
                    self.settings.base_url.clone(),
                    self.settings.filter_template.clone(),
                )
                .with_max_items(self.settings.max_items)
                .with_stop_signal(self.stop.clone())
                .run(&self.settings.manufacturers, self.settings.start_year, self.settings.end_year)
                .await;

                summary.listings_fetched = report.listings.len();
                summary.filters_failed = report.filters.iter().filter(|f| f.error.is_some()).count();
                base.start_year = self.settings.start_year;
                base.end_year = self.settings.end_year;
                base.manufacturers = self.settings.manufacturers.clone();
                base.filter_template = self.settings.filter_template.clone();

                let targets = if self.settings.skip_details {
                    Vec::new()
                } else {
                    listing_targets(&report.listings)
                };
                batch.listings = report.listings;
                batch.filters = report.filters;
                targets
            }
        };

        let limit = match mode {
            RunMode::FillMissing => self.settings.max_items,
            _ => None,
        };
        let report = self.fetch_details(targets, limit, events).await;
        summary.details_fetched = report.details.len();
        summary.details_failed = report.failures.len();
        summary.skipped = report.skipped;
        batch.details = report.details;
        batch.failures = report.failures;

        let mut merged = merge(base, &batch);
        merged.generated_at = Utc::now();
        self.store.save(&merged)?;

        summary.saved = true;
        summary.interrupted = self.stop.is_stopped();
        summary.total_listings = merged.listings.len();
        summary.total_details = merged.details.len();
        summary.remaining_failures = merged.failed_details.len();
        summary.session_refreshes = self.executor.session().refresh_count().await;
        summary.rate_limit_hits = self.executor.limiter().stats(Channel::Listing).await.rate_limit_hits
            + self.executor.limiter().stats(Channel::Detail).await.rate_limit_hits;
        if summary.details_failed > 0 {
            warn!(
                "{} detail fetches failed and were recorded for retry",
                summary.details_failed
            );
        }
        info!(
            "Saved {} listings, {} details, {} failures to {}",
            summary.total_listings, summary.total_details, summary.remaining_failures, summary.location
        );
        Ok(summary)
    }

    async fn ensure_session(&self) -> Result<(), RunError> {
        self.executor.session().ensure_session().await.map_err(|e| match e {
            SessionError::Challenge(msg) => RunError::Challenge(msg),
            SessionError::Failed(msg) => RunError::Session(msg),
        })
    }

    async fn fetch_details(
        &self,
        targets: Vec<DetailTarget>,
        limit: Option<usize>,
        events: Option<mpsc::Sender<DetailEvent>>,
    ) -> super::pool::PoolReport {
        if targets.is_empty() {
            return super::pool::PoolReport::default();
        }
        DetailPool::new(
            self.executor.clone(),
            self.settings.base_url.clone(),
            self.settings.concurrency,
        )
        .with_limit(limit)
        .with_stop_signal(self.stop.clone())
        .run(targets, events)
        .await
    }

    /// Release the browser, if one was launched.
    pub async fn shutdown(&self) {
        if let Some(browser) = &self.browser {
            browser.close().await;
        }
    }
}
