//! Cookie session lifecycle.
//!
//! ```text
//! Absent -> Valid -> (Expired | Challenged) -> Refreshing -> Valid
//! ```
//!
//! The session is loaded lazily from the [`SessionStore`]. Refreshes go
//! through the browser capability and are single-flight: callers that arrive
//! while a refresh runs wait for it and reuse its result. A cooldown between
//! refresh attempts holds no matter how many workers ask. Store I/O runs on
//! the blocking pool, never under the state lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::browser::{cookie_header, filter_by_domain, BrowserCapability, BrowserCookie, ChallengeUnresolved, RefreshOptions};
use crate::normalize::to_human_listing_url;
use crate::storage::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Absent,
    Valid,
    Expired,
    Challenged,
    Refreshing,
}

/// Cookies plus refresh bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub cookies: Vec<BrowserCookie>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub refresh_in_progress: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// This call obtained new cookies.
    Refreshed,
    /// Another caller refreshed recently, or the cooldown has not elapsed.
    ReusedRecent,
    /// No browser, or automatic refresh is off.
    Unavailable,
    Failed(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Challenge(String),
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Only cookies whose domain contains this are used.
    pub cookie_domain: String,
    /// Page opened to bootstrap a session before the first request.
    pub bootstrap_url: String,
    pub refresh_cooldown: Duration,
    /// Allow refreshes in response to challenges and repeated 429s.
    pub auto_refresh: bool,
    /// Bootstrap even when stored cookies exist.
    pub refresh_on_start: bool,
    pub options: RefreshOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_domain: "techpowerup.com".to_string(),
            bootstrap_url: "https://www.techpowerup.com/gpu-specs/".to_string(),
            refresh_cooldown: Duration::from_secs(20),
            auto_refresh: false,
            refresh_on_start: false,
            options: RefreshOptions::default(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    phase: SessionPhase,
    state: SessionState,
    bootstrapped: bool,
    /// Bumped on every successful refresh.
    generation: u64,
    last_attempt: Option<Instant>,
    refreshes: u64,
}

/// Owns the session cookies for a run.
pub struct SessionManager {
    config: SessionConfig,
    store: Arc<dyn SessionStore>,
    browser: Option<Arc<dyn BrowserCapability>>,
    inner: Mutex<Inner>,
    refresh_lock: Mutex<()>,
    loaded: OnceCell<()>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        browser: Option<Arc<dyn BrowserCapability>>,
    ) -> Self {
        Self {
            config,
            store,
            browser,
            inner: Mutex::new(Inner {
                phase: SessionPhase::Absent,
                state: SessionState::default(),
                bootstrapped: false,
                generation: 0,
                last_attempt: None,
                refreshes: 0,
            }),
            refresh_lock: Mutex::new(()),
            loaded: OnceCell::new(),
        }
    }

    pub fn has_browser(&self) -> bool {
        self.browser.is_some()
    }

    pub fn auto_refresh(&self) -> bool {
        self.config.auto_refresh
    }

    async fn load_if_needed(&self) {
        self.loaded
            .get_or_init(|| async {
                let store = Arc::clone(&self.store);
                let loaded = tokio::task::spawn_blocking(move || store.load()).await;
                let cookies = match loaded {
                    Ok(Ok(cookies)) => filter_by_domain(&cookies, &self.config.cookie_domain),
                    Ok(Err(e)) => {
                        warn!("Ignoring unreadable session store: {}", e);
                        return;
                    }
                    Err(e) => {
                        warn!("Session store load did not complete: {}", e);
                        return;
                    }
                };
                debug!("Loaded {} session cookies", cookies.len());
                let mut inner = self.inner.lock().await;
                if !cookies.is_empty() {
                    inner.phase = SessionPhase::Valid;
                }
                inner.state.cookies = cookies;
            })
            .await;
    }

    async fn persist(&self, cookies: Vec<BrowserCookie>) {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.save(&cookies)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to persist session cookies: {}", e),
            Err(e) => warn!("Session store save did not complete: {}", e),
        }
    }

    /// Load stored cookies and, when there are none (or a fresh session was
    /// requested) and a browser is available, bootstrap one.
    pub async fn ensure_session(&self) -> Result<(), SessionError> {
        self.load_if_needed().await;

        let needs_bootstrap = {
            let mut inner = self.inner.lock().await;
            let wanted = !inner.bootstrapped && (inner.state.cookies.is_empty() || self.config.refresh_on_start);
            inner.bootstrapped = true;
            wanted
        };
        if !needs_bootstrap {
            return Ok(());
        }

        let Some(browser) = self.browser.clone() else {
            debug!("No stored session and no browser; continuing without cookies");
            return Ok(());
        };

        info!("Bootstrapping session from {}", self.config.bootstrap_url);
        let _guard = self.refresh_lock.lock().await;
        match self.run_refresh(browser.as_ref(), &self.config.bootstrap_url).await {
            Ok(()) => Ok(()),
            Err(e) if e.downcast_ref::<ChallengeUnresolved>().is_some() => Err(SessionError::Challenge(e.to_string())),
            Err(e) => Err(SessionError::Failed(e.to_string())),
        }
    }

    pub async fn phase(&self) -> SessionPhase {
        self.inner.lock().await.phase
    }

    pub async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }

    pub async fn refresh_count(&self) -> u64 {
        self.inner.lock().await.refreshes
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state.clone()
    }

    pub async fn cookies(&self) -> Vec<BrowserCookie> {
        self.load_if_needed().await;
        self.inner.lock().await.state.cookies.clone()
    }

    /// `Cookie` header for direct requests, if any cookies are held.
    pub async fn cookie_header(&self) -> Option<String> {
        self.load_if_needed().await;
        cookie_header(&self.inner.lock().await.state.cookies)
    }

    /// Record that the current cookies no longer pass the site's checks.
    pub async fn mark_challenged(&self) {
        let mut inner = self.inner.lock().await;
        if inner.phase != SessionPhase::Refreshing {
            inner.phase = SessionPhase::Challenged;
        }
    }

    /// Merge cookies observed during an assisted fetch into the session.
    pub async fn absorb(&self, cookies: &[BrowserCookie]) {
        let fresh = filter_by_domain(cookies, &self.config.cookie_domain);
        if fresh.is_empty() {
            return;
        }
        let snapshot = {
            let mut inner = self.inner.lock().await;
            for cookie in fresh {
                match inner.state.cookies.iter_mut().find(|c| c.name == cookie.name && c.domain == cookie.domain) {
                    Some(existing) => *existing = cookie,
                    None => inner.state.cookies.push(cookie),
                }
            }
            inner.state.cookies.clone()
        };
        self.persist(snapshot).await;
    }

    /// Refresh the session after a failure at `context_url`.
    ///
    /// `seen_generation` is the generation the caller observed before its
    /// failing request; if a refresh has completed since, the caller simply
    /// retries with the new cookies.
    pub async fn refresh(&self, context_url: &str, seen_generation: u64) -> RefreshOutcome {
        let Some(browser) = self.browser.clone() else {
            return RefreshOutcome::Unavailable;
        };
        if !self.config.auto_refresh {
            return RefreshOutcome::Unavailable;
        }

        let _guard = self.refresh_lock.lock().await;
        {
            let inner = self.inner.lock().await;
            if inner.generation != seen_generation {
                return RefreshOutcome::ReusedRecent;
            }
            if let Some(last) = inner.last_attempt {
                if last.elapsed() < self.config.refresh_cooldown {
                    debug!("Session refresh skipped: cooldown {:?} not elapsed", self.config.refresh_cooldown);
                    return RefreshOutcome::ReusedRecent;
                }
            }
        }

        let target = to_human_listing_url(context_url);
        match self.run_refresh(browser.as_ref(), &target).await {
            Ok(()) => RefreshOutcome::Refreshed,
            Err(e) => RefreshOutcome::Failed(e.to_string()),
        }
    }

    /// Drive one refresh. Caller holds `refresh_lock`.
    async fn run_refresh(&self, browser: &dyn BrowserCapability, target: &str) -> anyhow::Result<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.phase = SessionPhase::Refreshing;
            inner.state.refresh_in_progress = true;
            inner.last_attempt = Some(Instant::now());
        }

        let result = browser.refresh_session(target, &self.config.options).await;

        let mut inner = self.inner.lock().await;
        inner.state.refresh_in_progress = false;
        match result {
            Ok(cookies) => {
                let cookies = filter_by_domain(&cookies, &self.config.cookie_domain);
                info!("Session refreshed via {} ({} cookies)", target, cookies.len());
                if !cookies.is_empty() {
                    inner.state.cookies = cookies;
                }
                inner.state.last_refresh = Some(Utc::now());
                inner.generation += 1;
                inner.refreshes += 1;
                inner.phase = SessionPhase::Valid;
                let snapshot = inner.state.cookies.clone();
                drop(inner);
                self.persist(snapshot).await;
                Ok(())
            }
            Err(e) => {
                warn!("Session refresh via {} failed: {}", target, e);
                inner.phase = if e.downcast_ref::<ChallengeUnresolved>().is_some() {
                    SessionPhase::Challenged
                } else {
                    SessionPhase::Expired
                };
                Err(e)
            }
        }
    }
}
