//! Carries out strategy decisions against the real capabilities.

use std::sync::Arc;

use tracing::{debug, warn};

use super::browser::{BrowserCapability, ChallengeUnresolved};
use super::http_client::HttpCapability;
use super::rate_limiter::RateLimiter;
use super::session::{RefreshOutcome, SessionManager};
use super::strategy::{
    classify_rendered, classify_response, classify_transport, select, AttemptHistory, Decision, FetchOutcome,
    StrategyPolicy, Target, Tier,
};
use crate::models::{FailureKind, FetchStrategy};

/// One logical fetch: the URL for direct HTTP and the URL a browser should
/// open for the same content.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub target: Target,
    pub direct_url: String,
    pub assisted_url: String,
}

impl FetchRequest {
    pub fn detail(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            target: Target::Detail,
            assisted_url: url.clone(),
            direct_url: url,
        }
    }

    pub fn listing(direct_url: impl Into<String>, assisted_url: impl Into<String>) -> Self {
        Self {
            target: Target::Listing,
            direct_url: direct_url.into(),
            assisted_url: assisted_url.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchSuccess {
    pub body: String,
    pub via: FetchStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub detail: String,
}

/// Shared by every worker of a run. Holds the only mutable shared state:
/// the rate limiter and the session manager.
#[derive(Clone)]
pub struct FetchExecutor {
    limiter: RateLimiter,
    session: Arc<SessionManager>,
    http: Arc<dyn HttpCapability>,
    browser: Option<Arc<dyn BrowserCapability>>,
    policy: StrategyPolicy,
}

impl FetchExecutor {
    pub fn new(
        limiter: RateLimiter,
        session: Arc<SessionManager>,
        http: Arc<dyn HttpCapability>,
        browser: Option<Arc<dyn BrowserCapability>>,
        policy: StrategyPolicy,
    ) -> Self {
        Self {
            limiter,
            session,
            http,
            browser,
            policy,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchSuccess, FetchFailure> {
        let mut history = AttemptHistory::default();
        let mut generation = self.session.generation().await;

        loop {
            let decision = select(&self.policy, request.target, &history);
            debug!("{} -> {:?}", request.direct_url, decision);

            match decision {
                Decision::Direct => {}
                Decision::BackoffThenDirect(delay) => {
                    debug!("Backing off {:?} before retrying {}", delay, request.direct_url);
                    tokio::time::sleep(delay).await;
                }
                Decision::RefreshThenDirect => {
                    let outcome = self.session.refresh(&request.direct_url, generation).await;
                    let refreshed = matches!(outcome, RefreshOutcome::Refreshed | RefreshOutcome::ReusedRecent);
                    if let RefreshOutcome::Failed(reason) = &outcome {
                        warn!("Session refresh for {} failed: {}", request.direct_url, reason);
                    }
                    history.record_refresh(refreshed);
                    if !refreshed {
                        continue;
                    }
                }
                Decision::Assisted => {
                    let outcome = self.attempt_assisted(request).await;
                    if let FetchOutcome::Success(body) = outcome {
                        return Ok(FetchSuccess {
                            body,
                            via: FetchStrategy::Assisted,
                        });
                    }
                    history.record(Tier::Assisted, outcome);
                    continue;
                }
                Decision::Fail { kind, detail } => {
                    return Err(FetchFailure { kind, detail });
                }
            }

            generation = self.session.generation().await;
            let outcome = self.attempt_direct(request).await;
            if let FetchOutcome::Success(body) = outcome {
                return Ok(FetchSuccess {
                    body,
                    via: FetchStrategy::Direct,
                });
            }
            history.record(Tier::Direct, outcome);
        }
    }

    async fn attempt_direct(&self, request: &FetchRequest) -> FetchOutcome {
        let channel = request.target.channel();
        self.limiter.throttle(channel).await;

        let cookies = self.session.cookie_header().await;
        let outcome = match self.http.get(&request.direct_url, cookies.as_deref()).await {
            Ok(response) => classify_response(&response),
            Err(e) => classify_transport(&e),
        };

        match &outcome {
            FetchOutcome::Success(_) => self.limiter.report_success(channel).await,
            FetchOutcome::RateLimited { retry_after } => {
                self.limiter.on_rate_limited(channel, *retry_after).await;
            }
            FetchOutcome::Challenge { reason } => {
                debug!("Challenge at {}: {}", request.direct_url, reason);
                self.session.mark_challenged().await;
            }
            FetchOutcome::Transient { detail } | FetchOutcome::Terminal { detail } => {
                debug!("Direct fetch of {} failed: {}", request.direct_url, detail);
            }
        }
        outcome
    }

    async fn attempt_assisted(&self, request: &FetchRequest) -> FetchOutcome {
        let Some(browser) = &self.browser else {
            return FetchOutcome::Terminal {
                detail: "no browser available".to_string(),
            };
        };

        let channel = request.target.channel();
        self.limiter.throttle(channel).await;

        let cookies = self.session.cookies().await;
        match browser.fetch_rendered(&request.assisted_url, &cookies).await {
            Ok(page) => {
                let outcome = classify_rendered(&page.content);
                if outcome.is_success() {
                    self.session.absorb(&page.cookies).await;
                    self.limiter.report_success(channel).await;
                }
                outcome
            }
            Err(e) if e.downcast_ref::<ChallengeUnresolved>().is_some() => FetchOutcome::Challenge {
                reason: e.to_string(),
            },
            Err(e) => FetchOutcome::Terminal { detail: e.to_string() },
        }
    }
}
