//! Rate limiter configuration and types.

use std::fmt;
use std::time::Duration;

/// Independent request streams with their own pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Listing,
    Detail,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Listing => f.write_str("listing"),
            Channel::Detail => f.write_str("detail"),
        }
    }
}

/// Configuration for rate limiting behavior.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Minimum spacing between admitted listing requests.
    pub listing_delay: Duration,
    /// Minimum spacing between admitted detail requests.
    pub detail_delay: Duration,
    /// Cooldown applied after a 429 without a usable Retry-After.
    pub rate_limit_sleep: Duration,
    /// Ceiling for any single cooldown.
    pub max_cooldown: Duration,
}

impl RateLimitConfig {
    pub fn delay_for(&self, channel: Channel) -> Duration {
        match channel {
            Channel::Listing => self.listing_delay,
            Channel::Detail => self.detail_delay,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            listing_delay: Duration::from_secs(1),
            detail_delay: Duration::from_secs(1),
            rate_limit_sleep: Duration::from_secs(12),
            max_cooldown: Duration::from_secs(300),
        }
    }
}

/// Statistics for a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub delay: Duration,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
    pub cooldown_remaining: Duration,
}
