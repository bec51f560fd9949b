//! Per-channel rate limiting state.

use std::time::Duration;

use tokio::time::Instant;

/// State for a single channel.
#[derive(Debug, Clone)]
pub struct ChannelState {
    /// Spacing between admitted requests.
    pub delay: Duration,
    /// When the last request was admitted.
    pub last_admitted: Option<Instant>,
    /// Shared cooldown set after a rate-limit response.
    pub cooldown_until: Option<Instant>,
    /// Consecutive successes since the last rate limit.
    pub consecutive_successes: u32,
    /// Total requests admitted.
    pub total_requests: u64,
    /// Total rate limit hits.
    pub rate_limit_hits: u64,
}

impl ChannelState {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_admitted: None,
            cooldown_until: None,
            consecutive_successes: 0,
            total_requests: 0,
            rate_limit_hits: 0,
        }
    }

    /// Time until both the spacing delay and any cooldown have passed.
    pub fn time_until_ready(&self, now: Instant) -> Duration {
        let spacing = self
            .last_admitted
            .map(|last| (last + self.delay).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);
        spacing.max(self.cooldown_remaining(now))
    }

    pub fn cooldown_remaining(&self, now: Instant) -> Duration {
        self.cooldown_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Extend the cooldown so it lasts at least `duration` from `now`.
    /// An existing, longer cooldown is kept.
    pub fn extend_cooldown(&mut self, now: Instant, duration: Duration) {
        let candidate = now + duration;
        self.cooldown_until = Some(match self.cooldown_until {
            Some(existing) if existing > candidate => existing,
            _ => candidate,
        });
    }

    pub fn mark_admitted(&mut self, now: Instant) {
        self.last_admitted = Some(now);
        self.total_requests += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cooldown_never_shrinks() {
        let now = Instant::now();
        let mut state = ChannelState::new(Duration::from_secs(1));
        state.extend_cooldown(now, Duration::from_secs(30));
        state.extend_cooldown(now, Duration::from_secs(5));
        assert_eq!(state.cooldown_remaining(now), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_time_is_max_of_spacing_and_cooldown() {
        let now = Instant::now();
        let mut state = ChannelState::new(Duration::from_secs(2));
        assert_eq!(state.time_until_ready(now), Duration::ZERO);
        state.mark_admitted(now);
        assert_eq!(state.time_until_ready(now), Duration::from_secs(2));
        state.extend_cooldown(now, Duration::from_secs(7));
        assert_eq!(state.time_until_ready(now), Duration::from_secs(7));
    }
}
