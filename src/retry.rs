use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;

/// Exponential backoff with equal jitter for retrying transient feed
/// failures.
///
/// Each delay is drawn uniformly from the upper half of the current ceiling;
/// the ceiling doubles after every draw up to `max_backoff`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    ceiling: Duration,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        let initial = config.initial_backoff.min(config.max_backoff);
        Self {
            initial,
            max: config.max_backoff,
            ceiling: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let ceiling_ms = self.ceiling.as_millis() as u64;
        let delay_ms = if ceiling_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(ceiling_ms.div_ceil(2)..=ceiling_ms)
        };
        self.ceiling = (self.ceiling * 2).min(self.max);
        Duration::from_millis(delay_ms)
    }

    pub fn reset(&mut self) {
        self.ceiling = self.initial;
    }
}

/// Sleep for `delay` unless the token fires first. Returns false if cancelled.
pub async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
