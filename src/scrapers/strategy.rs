//! Fetch strategy selection.
//!
//! Every fetch attempt ends in a tagged [`FetchOutcome`]. [`select`] is a
//! pure function from the policy and the attempt history so far to the next
//! [`Decision`]; the executor carries the decision out and records the
//! result, so all retry, refresh and escalation rules live here.

use std::time::Duration;

use crate::error::TransportError;
use crate::models::FailureKind;
use crate::parse::{BLOCK_PAGE_MARKERS, BOT_CHECK_MARKER};
use crate::scrapers::http_client::HttpResponse;
use crate::scrapers::rate_limiter::{parse_retry_after, Channel};

/// What is being fetched. Listings and details can prefer different tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Listing,
    Detail,
}

impl Target {
    pub fn channel(self) -> Channel {
        match self {
            Target::Listing => Channel::Listing,
            Target::Detail => Channel::Detail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Direct,
    Assisted,
}

/// Result of a single fetch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(String),
    RateLimited { retry_after: Option<Duration> },
    Challenge { reason: String },
    Transient { detail: String },
    Terminal { detail: String },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            FetchOutcome::Success(_) => None,
            FetchOutcome::RateLimited { .. } => Some(FailureKind::RateLimited),
            FetchOutcome::Challenge { .. } => Some(FailureKind::Challenge),
            FetchOutcome::Transient { .. } => Some(FailureKind::Transient),
            FetchOutcome::Terminal { .. } => Some(FailureKind::Terminal),
        }
    }

    pub fn detail(&self) -> String {
        match self {
            FetchOutcome::Success(_) => "ok".to_string(),
            FetchOutcome::RateLimited { .. } => "HTTP 429 Too Many Requests".to_string(),
            FetchOutcome::Challenge { reason } => reason.clone(),
            FetchOutcome::Transient { detail } | FetchOutcome::Terminal { detail } => detail.clone(),
        }
    }
}

/// Classify a direct HTTP response.
pub fn classify_response(response: &HttpResponse) -> FetchOutcome {
    match response.status {
        200..=299 if response.body.contains(BOT_CHECK_MARKER) => FetchOutcome::Challenge {
            reason: "bot check page served".to_string(),
        },
        200..=299 => FetchOutcome::Success(response.body.clone()),
        429 => FetchOutcome::RateLimited {
            retry_after: parse_retry_after(response.retry_after()),
        },
        401 | 403 => FetchOutcome::Challenge {
            reason: format!("HTTP {}", response.status),
        },
        408 | 500..=599 => FetchOutcome::Transient {
            detail: format!("HTTP {}", response.status),
        },
        status => FetchOutcome::Terminal {
            detail: format!("HTTP {}", status),
        },
    }
}

/// A request that produced no response is always worth retrying.
pub fn classify_transport(error: &TransportError) -> FetchOutcome {
    FetchOutcome::Transient {
        detail: error.to_string(),
    }
}

/// Classify a page rendered by the browser. A page still showing a block
/// marker is a failure even though the browser loaded it.
pub fn classify_rendered(content: &str) -> FetchOutcome {
    let lowered = content.to_lowercase();
    match BLOCK_PAGE_MARKERS
        .iter()
        .find(|marker| lowered.contains(&marker.to_lowercase()))
    {
        Some(marker) => FetchOutcome::Challenge {
            reason: format!("assisted fetch still blocked ({})", marker),
        },
        None => FetchOutcome::Success(content.to_string()),
    }
}

/// Knobs that shape the decision function.
#[derive(Debug, Clone)]
pub struct StrategyPolicy {
    /// Direct attempts allowed per item, not counting rate-limited ones.
    pub retries: u32,
    /// Rate-limit responses tolerated per item before giving up.
    pub max_rate_limit_retries: u32,
    pub prefer_assisted_listings: bool,
    pub prefer_assisted_details: bool,
    /// Escalate to the assisted tier once direct attempts are exhausted.
    pub assisted_fallback: bool,
    /// A browser capability is present.
    pub assisted_available: bool,
    /// Session refreshes are possible (browser present and auto refresh on).
    pub refresh_available: bool,
}

impl Default for StrategyPolicy {
    fn default() -> Self {
        Self {
            retries: 4,
            max_rate_limit_retries: 6,
            prefer_assisted_listings: false,
            prefer_assisted_details: false,
            assisted_fallback: false,
            assisted_available: false,
            refresh_available: false,
        }
    }
}

impl StrategyPolicy {
    fn prefers_assisted(&self, target: Target) -> bool {
        match target {
            Target::Listing => self.prefer_assisted_listings,
            Target::Detail => self.prefer_assisted_details,
        }
    }
}

/// Attempts made so far for one item.
#[derive(Debug, Clone, Default)]
pub struct AttemptHistory {
    pub direct_attempts: u32,
    pub assisted_attempts: u32,
    /// Direct attempts that count against the retry budget.
    pub budget_used: u32,
    pub transient_failures: u32,
    pub challenges: u32,
    pub rate_limits: u32,
    /// Rate limits since the last successful refresh.
    pub rate_limit_streak: u32,
    pub refreshes: u32,
    pub refresh_failed: bool,
    pub last: Option<(Tier, FetchOutcome)>,
}

impl AttemptHistory {
    pub fn record(&mut self, tier: Tier, outcome: FetchOutcome) {
        match tier {
            Tier::Direct => {
                self.direct_attempts += 1;
                match &outcome {
                    FetchOutcome::RateLimited { .. } => {
                        self.rate_limits += 1;
                        self.rate_limit_streak += 1;
                    }
                    FetchOutcome::Challenge { .. } => {
                        self.challenges += 1;
                        self.budget_used += 1;
                        self.rate_limit_streak = 0;
                    }
                    FetchOutcome::Transient { .. } => {
                        self.transient_failures += 1;
                        self.budget_used += 1;
                        self.rate_limit_streak = 0;
                    }
                    _ => {
                        self.budget_used += 1;
                        self.rate_limit_streak = 0;
                    }
                }
            }
            Tier::Assisted => self.assisted_attempts += 1,
        }
        self.last = Some((tier, outcome));
    }

    pub fn record_refresh(&mut self, succeeded: bool) {
        if succeeded {
            self.refreshes += 1;
            self.rate_limit_streak = 0;
        } else {
            self.refresh_failed = true;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Direct,
    RefreshThenDirect,
    BackoffThenDirect(Duration),
    Assisted,
    Fail { kind: FailureKind, detail: String },
}

/// Backoff before the direct retry that follows the `n`-th transient
/// failure: `clamp(1.5 * 2^(n-1), 1s, 20s)`.
pub fn transient_backoff(n: u32) -> Duration {
    let exp = n.saturating_sub(1).min(16);
    let secs = 1.5 * f64::from(1u32 << exp);
    Duration::from_secs_f64(secs.clamp(1.0, 20.0))
}

/// Next step for an item given everything tried so far.
pub fn select(policy: &StrategyPolicy, target: Target, history: &AttemptHistory) -> Decision {
    let Some((tier, outcome)) = &history.last else {
        if policy.prefers_assisted(target) && policy.assisted_available {
            return Decision::Assisted;
        }
        return Decision::Direct;
    };

    if *tier == Tier::Assisted {
        return match outcome {
            FetchOutcome::Success(_) => Decision::Direct,
            failed => Decision::Fail {
                kind: failed.failure_kind().unwrap_or_default(),
                detail: format!("assisted fetch failed: {}", failed.detail()),
            },
        };
    }

    let can_refresh = policy.refresh_available && !history.refresh_failed;
    match outcome {
        FetchOutcome::Success(_) => Decision::Direct,
        FetchOutcome::RateLimited { .. } => {
            if history.rate_limits > policy.max_rate_limit_retries {
                escalate(policy, history, FailureKind::RateLimited, outcome.detail())
            } else if history.rate_limit_streak >= 2 && can_refresh {
                Decision::RefreshThenDirect
            } else {
                Decision::Direct
            }
        }
        FetchOutcome::Challenge { .. } => {
            if history.challenges == 1 && can_refresh {
                Decision::RefreshThenDirect
            } else {
                escalate(policy, history, FailureKind::Challenge, outcome.detail())
            }
        }
        FetchOutcome::Transient { .. } => {
            if history.budget_used < policy.retries {
                Decision::BackoffThenDirect(transient_backoff(history.transient_failures))
            } else {
                escalate(policy, history, FailureKind::Transient, outcome.detail())
            }
        }
        FetchOutcome::Terminal { .. } => escalate(policy, history, FailureKind::Terminal, outcome.detail()),
    }
}

fn escalate(policy: &StrategyPolicy, history: &AttemptHistory, kind: FailureKind, detail: String) -> Decision {
    if policy.assisted_fallback && policy.assisted_available && history.assisted_attempts == 0 {
        Decision::Assisted
    } else {
        Decision::Fail { kind, detail }
    }
}
