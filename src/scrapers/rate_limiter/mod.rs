//! Shared request pacing for the listing and detail channels.
//!
//! Every request on a channel passes through [`RateLimiter::throttle`], which
//! enforces the channel's spacing delay and any cooldown set after a 429.
//! Admission within a channel is serialized; channels never block each other.

mod channel_state;
mod config;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use channel_state::ChannelState;
pub use config::{Channel, ChannelStats, RateLimitConfig};

/// Parse a Retry-After header given in (possibly fractional) seconds.
/// Non-positive or non-numeric values are ignored.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let secs = header_value?.trim().parse::<f64>().ok()?;
    if secs.is_finite() && secs > 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

#[derive(Debug)]
struct ChannelSlot {
    /// Held for the whole admission so waiters are admitted in order.
    admission: Mutex<()>,
    state: Mutex<ChannelState>,
}

impl ChannelSlot {
    fn new(delay: Duration) -> Self {
        Self {
            admission: Mutex::new(()),
            state: Mutex::new(ChannelState::new(delay)),
        }
    }
}

/// Rate/backoff controller shared by every worker of a run.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    listing: Arc<ChannelSlot>,
    detail: Arc<ChannelSlot>,
}

impl RateLimiter {
    /// Create a new rate limiter with default config.
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    /// Create a new rate limiter with custom config.
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            listing: Arc::new(ChannelSlot::new(config.listing_delay)),
            detail: Arc::new(ChannelSlot::new(config.detail_delay)),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn slot(&self, channel: Channel) -> &ChannelSlot {
        match channel {
            Channel::Listing => &self.listing,
            Channel::Detail => &self.detail,
        }
    }

    /// Wait until the channel is ready, then mark a request as admitted.
    pub async fn throttle(&self, channel: Channel) {
        let slot = self.slot(channel);
        let _turn = slot.admission.lock().await;

        // Re-check after every sleep: a cooldown may be set while we wait.
        loop {
            let wait = {
                let state = slot.state.lock().await;
                state.time_until_ready(Instant::now())
            };
            if wait.is_zero() {
                break;
            }
            debug!("Throttling {} channel: waiting {:?}", channel, wait);
            tokio::time::sleep(wait).await;
        }

        slot.state.lock().await.mark_admitted(Instant::now());
    }

    /// Record a rate-limit response and set the shared cooldown.
    ///
    /// Uses `retry_after` when the server supplied a positive value, else the
    /// configured default, capped at `max_cooldown`. Returns the cooldown
    /// applied.
    pub async fn on_rate_limited(&self, channel: Channel, retry_after: Option<Duration>) -> Duration {
        let cooldown = retry_after
            .filter(|d| !d.is_zero())
            .unwrap_or(self.config.rate_limit_sleep)
            .min(self.config.max_cooldown);

        let mut state = self.slot(channel).state.lock().await;
        state.extend_cooldown(Instant::now(), cooldown);
        state.rate_limit_hits += 1;
        state.consecutive_successes = 0;

        warn!(
            "Rate limited on {} channel (hit #{}), cooling down for {:?}",
            channel, state.rate_limit_hits, cooldown
        );
        cooldown
    }

    /// Report a successful request.
    pub async fn report_success(&self, channel: Channel) {
        let mut state = self.slot(channel).state.lock().await;
        state.consecutive_successes += 1;
        if state.rate_limit_hits > 0 && state.consecutive_successes == 1 {
            info!("{} channel recovered after rate limiting", channel);
        }
    }

    /// Get statistics for a channel.
    pub async fn stats(&self, channel: Channel) -> ChannelStats {
        let state = self.slot(channel).state.lock().await;
        ChannelStats {
            delay: state.delay,
            total_requests: state.total_requests,
            rate_limit_hits: state.rate_limit_hits,
            cooldown_remaining: state.cooldown_remaining(Instant::now()),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
