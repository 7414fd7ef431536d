use std::time::Duration;

use bon::Builder;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(20);

/// Settings governing a manager instance.
#[derive(Debug, Clone, Builder)]
pub struct ManagerConfig {
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    connect_timeout: Duration,
    #[builder(default = DEFAULT_DISCONNECT_TIMEOUT)]
    disconnect_timeout: Duration,
    /// Service discovery is typically slower than connection setup, so it
    /// gets its own, longer window.
    #[builder(default = DEFAULT_DISCOVERY_TIMEOUT)]
    discovery_timeout: Duration,
    #[builder(default)]
    retry: RetryPolicy,
}

impl ManagerConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub fn disconnect_timeout(&self) -> Duration {
        self.disconnect_timeout
    }

    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        self.discovery_timeout
    }

    #[must_use]
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Bounded exponential backoff schedule for the fetch pipeline.
///
/// `max_retries` attempts run on the schedule; one final unconditional
/// attempt always follows, so the total attempt count is `max_retries + 1`.
#[derive(Debug, Clone, Builder)]
pub struct RetryPolicy {
    #[builder(default = 3)]
    max_retries: u32,
    #[builder(default = Duration::from_millis(250))]
    initial_delay: Duration,
    #[builder(default = 2.0)]
    multiplier: f64,
    #[builder(default = Duration::from_secs(5))]
    max_delay: Duration,
    #[builder(default = Duration::from_secs(30))]
    overall_deadline: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn overall_deadline(&self) -> Duration {
        self.overall_deadline
    }

    /// Returns the backoff delay before retry `attempt` (zero-based),
    /// `initial_delay * multiplier^attempt` capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let scaled = self.initial_delay.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Per-call options of [`crate::BleManager::fetch_services`].
#[derive(Debug, Clone, Copy, Builder)]
pub struct FetchOptions {
    /// Serve from and populate the service cache.
    #[builder(default = true)]
    use_cache: bool,
    /// Issue a best-effort disconnect after the fetch settles.
    #[builder(default = true)]
    disconnect_after: bool,
}

impl FetchOptions {
    #[must_use]
    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    #[must_use]
    pub fn disconnect_after(&self) -> bool {
        self.disconnect_after
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, Duration::from_millis(250))]
    #[case(1, Duration::from_millis(500))]
    #[case(2, Duration::from_millis(1000))]
    #[case(3, Duration::from_millis(2000))]
    fn delay_doubles_per_attempt(#[case] attempt: u32, #[case] expected: Duration) {
        let policy = RetryPolicy::default();
        assert_eq!(expected, policy.delay_for(attempt));
    }

    #[test]
    fn delay_is_capped_by_max_delay() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_secs(1))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(3))
            .build();
        assert_eq!(Duration::from_secs(3), policy.delay_for(5));
        assert_eq!(Duration::from_secs(3), policy.delay_for(u32::MAX));
    }

    #[test]
    fn fetch_options_default_to_cached_and_disconnecting() {
        let options = FetchOptions::default();
        assert!(options.use_cache());
        assert!(options.disconnect_after());
    }
}
