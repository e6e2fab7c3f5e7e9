use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;

/// Path of the completion callback route on the rep's listener.
pub const TASK_COMPLETED_PATH: &str = "/task_completed";

/// Backoff bounds for retrying transient feed failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// First delay after a failure
    pub initial_backoff: Duration,
    /// Upper bound on any single delay
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Immutable configuration handed to every rep component at construction.
#[derive(Debug, Clone)]
pub struct RepConfig {
    /// Capability stack this host runs. Required.
    pub stack: String,
    /// Address the completion callback listener binds to
    pub listen_addr: SocketAddr,
    /// Address the executor should use to reach the callback listener.
    /// Falls back to `listen_addr` when unset.
    pub advertise_addr: Option<String>,
    /// Base URL of the local executor
    pub executor_url: String,
    /// Interval between presence renewals
    pub heartbeat_interval: Duration,
    /// TTL of the presence lease. Must exceed `heartbeat_interval`.
    pub presence_ttl: Duration,
    /// Timeout on each executor request
    pub executor_timeout: Duration,
    /// Timeout on each feed call made outside a watch
    pub feed_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for RepConfig {
    fn default() -> Self {
        Self {
            stack: String::new(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 20515)),
            advertise_addr: None,
            executor_url: "http://127.0.0.1:1700".to_string(),
            heartbeat_interval: Duration::from_secs(60),
            presence_ttl: Duration::from_secs(120),
            executor_timeout: Duration::from_secs(10),
            feed_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

impl RepConfig {
    pub fn new(stack: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            stack: stack.into(),
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_executor_url(mut self, url: impl Into<String>) -> Self {
        self.executor_url = url.into();
        self
    }

    pub fn with_advertise_addr(mut self, addr: impl Into<String>) -> Self {
        self.advertise_addr = Some(addr.into());
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, ttl: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.presence_ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Check the configuration for values the rep cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack.trim().is_empty() {
            return Err(ConfigError::MissingStack);
        }

        for (name, value) in [
            ("heartbeat interval", self.heartbeat_interval),
            ("executor timeout", self.executor_timeout),
            ("feed timeout", self.feed_timeout),
            ("initial backoff", self.retry.initial_backoff),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }

        if self.presence_ttl <= self.heartbeat_interval {
            return Err(ConfigError::TtlTooShort {
                ttl_ms: self.presence_ttl.as_millis(),
                interval_ms: self.heartbeat_interval.as_millis(),
            });
        }

        if !self.executor_url.starts_with("http://") {
            return Err(ConfigError::InvalidExecutorUrl(self.executor_url.clone()));
        }

        Ok(())
    }

    /// URL the executor calls back once a task container finishes.
    pub fn completion_callback_url(&self) -> String {
        let host = self
            .advertise_addr
            .clone()
            .unwrap_or_else(|| self.listen_addr.to_string());
        format!("http://{}{}", host, TASK_COMPLETED_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RepConfig {
        RepConfig::new("linux64", "127.0.0.1:20515".parse().unwrap())
    }

    #[test]
    fn rep_config_default() {
        let cfg = RepConfig::default();
        assert!(cfg.stack.is_empty());
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:20515");
        assert_eq!(cfg.executor_url, "http://127.0.0.1:1700");
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(cfg.presence_ttl, Duration::from_secs(120));
        assert!(cfg.advertise_addr.is_none());
    }

    #[test]
    fn valid_config_passes() {
        assert_eq!(valid().validate(), Ok(()));
    }

    #[test]
    fn empty_stack_is_rejected() {
        let mut cfg = valid();
        cfg.stack = "  ".to_string();
        assert_eq!(cfg.validate(), Err(ConfigError::MissingStack));
    }

    #[test]
    fn ttl_must_exceed_heartbeat() {
        let cfg = valid().with_heartbeat(Duration::from_secs(10), Duration::from_secs(10));
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::TtlTooShort { .. })
        ));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let mut cfg = valid();
        cfg.executor_timeout = Duration::ZERO;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroDuration("executor timeout"))
        );
    }

    #[test]
    fn executor_url_needs_http_scheme() {
        let cfg = valid().with_executor_url("127.0.0.1:1700");
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidExecutorUrl(_))
        ));
    }

    #[test]
    fn callback_url_uses_listen_addr_by_default() {
        assert_eq!(
            valid().completion_callback_url(),
            "http://127.0.0.1:20515/task_completed"
        );
    }

    #[test]
    fn callback_url_prefers_advertise_addr() {
        let cfg = valid().with_advertise_addr("10.0.0.7:20515");
        assert_eq!(
            cfg.completion_callback_url(),
            "http://10.0.0.7:20515/task_completed"
        );
    }
}
