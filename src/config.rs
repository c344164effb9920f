//! Runtime configuration
//!
//! A fluent builder over the numeric timing knobs the controller and its
//! transport need, rather than hardcoding them inline in
//! `transport.rs`/`controller.rs`.

use std::time::Duration;

/// Tunable timing knobs for a [`crate::controller::Controller`] /
/// [`crate::transport::Session`] pair.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Minimum spacing between outbound HTTP calls on one session. `ZERO`
    /// disables rate limiting.
    pub min_interval: Duration,
    /// Deadline for a non-worker `re_authenticate` call.
    pub reauthenticatetimeout: Duration,
    /// Sleep between `re_authenticate` attempts.
    pub retryinterval: Duration,
    /// Per-HTTP-call timeout.
    pub request_timeout: Duration,
    /// Default `waitForResourceValueChanges` wait, in seconds.
    pub default_wait_seconds: u32,
    /// Transient-retry attempt budget for 502/503/504.
    pub retry_attempts: u32,
    /// Exponential backoff factor for the transient-retry loop.
    pub retry_backoff_factor: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::ZERO,
            reauthenticatetimeout: Duration::from_secs(30),
            retryinterval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            default_wait_seconds: 10,
            retry_attempts: 3,
            retry_backoff_factor: Duration::from_millis(200),
        }
    }
}

/// Fluent builder for [`ControllerConfig`].
#[derive(Debug, Clone, Default)]
pub struct ControllerConfigBuilder {
    config: ControllerConfig,
}

impl ControllerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_interval(mut self, value: Duration) -> Self {
        self.config.min_interval = value;
        self
    }

    pub fn reauthenticatetimeout(mut self, value: Duration) -> Self {
        self.config.reauthenticatetimeout = value;
        self
    }

    pub fn retryinterval(mut self, value: Duration) -> Self {
        self.config.retryinterval = value;
        self
    }

    pub fn request_timeout(mut self, value: Duration) -> Self {
        self.config.request_timeout = value;
        self
    }

    pub fn default_wait_seconds(mut self, value: u32) -> Self {
        self.config.default_wait_seconds = value;
        self
    }

    pub fn retry_attempts(mut self, value: u32) -> Self {
        self.config.retry_attempts = value;
        self
    }

    pub fn retry_backoff_factor(mut self, value: Duration) -> Self {
        self.config.retry_backoff_factor = value;
        self
    }

    pub fn build(self) -> ControllerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let config = ControllerConfig::default();
        assert_eq!(config.reauthenticatetimeout, Duration::from_secs(30));
        assert_eq!(config.retryinterval, Duration::from_secs(10));
        assert_eq!(config.default_wait_seconds, 10);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.min_interval, Duration::ZERO);
    }

    #[test]
    fn builder_overrides_individual_fields() {
        let config = ControllerConfigBuilder::new()
            .min_interval(Duration::from_millis(100))
            .retry_attempts(5)
            .build();
        assert_eq!(config.min_interval, Duration::from_millis(100));
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.retryinterval, Duration::from_secs(10));
    }
}
