//! Client connection settings.

use std::time::Duration;

/// Connection and retry settings for an [`EndpointClient`](crate::EndpointClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Connect-and-ping cycles before an endpoint is declared unreachable.
    pub max_retries: u32,
    /// Fixed pause between two connect attempts.
    pub retry_backoff: Duration,
    /// Age after which a healthy connection is pinged again before use.
    pub health_check_interval: Duration,
    /// Upper bound on waiting for a response.
    pub receive_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(30),
            receive_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Reads `AXO_MAX_RETRIES`, `AXO_HEALTH_CHECK_INTERVAL_SECS` and
    /// `AXO_RECEIVE_TIMEOUT_SECS`; anything unset or unparsable keeps its default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_retries: u32 = std::env::var("AXO_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_retries);

        let health_check_interval = std::env::var("AXO_HEALTH_CHECK_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.health_check_interval);

        let receive_timeout = std::env::var("AXO_RECEIVE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.receive_timeout);

        Self {
            max_retries,
            health_check_interval,
            receive_timeout,
            ..defaults
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff, Duration::from_secs(1));
        assert_eq!(config.health_check_interval, Duration::from_secs(30));
        assert_eq!(config.receive_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_builders() {
        let config = ClientConfig::default()
            .with_max_retries(1)
            .with_retry_backoff(Duration::from_millis(5));
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_backoff, Duration::from_millis(5));
    }
}
