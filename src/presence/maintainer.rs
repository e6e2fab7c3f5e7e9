use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{RepConfig, RetryConfig};
use crate::feed::{with_timeout, PresenceHandle, WorkFeed};
use crate::models::RepPresence;
use crate::retry::{sleep_or_cancel, Backoff};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    /// Acquiring (or re-acquiring) the lease
    Initializing,
    /// Holding the lease and renewing it every heartbeat
    Maintaining,
    /// A renewal failed; the lease is about to be re-acquired
    Lost,
    /// Shut down; the lease has been released
    Terminated,
}

impl std::fmt::Display for PresenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresenceState::Initializing => write!(f, "initializing"),
            PresenceState::Maintaining => write!(f, "maintaining"),
            PresenceState::Lost => write!(f, "lost"),
            PresenceState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Keeps this host's presence lease alive in the work feed.
///
/// The maintainer never gives up on its own: a failed renewal goes back to
/// acquiring, with backoff, for as long as the process runs. Only
/// cancellation ends it, after a best-effort release of the lease.
/// Readiness is published on a watch channel and is re-signalled every
/// time the lease is re-acquired.
pub struct PresenceMaintainer {
    feed: Arc<dyn WorkFeed>,
    presence: RepPresence,
    interval: Duration,
    ttl: Duration,
    feed_timeout: Duration,
    retry: RetryConfig,
    state_tx: watch::Sender<PresenceState>,
}

impl PresenceMaintainer {
    pub fn new(config: &RepConfig, rep_id: &str, feed: Arc<dyn WorkFeed>) -> Self {
        let (state_tx, _) = watch::channel(PresenceState::Initializing);
        Self {
            feed,
            presence: RepPresence::new(rep_id, config.stack.clone()),
            interval: config.heartbeat_interval,
            ttl: config.presence_ttl,
            feed_timeout: config.feed_timeout,
            retry: config.retry,
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PresenceState> {
        self.state_tx.subscribe()
    }

    pub async fn run(self, token: CancellationToken) {
        let mut backoff = Backoff::new(self.retry);
        let mut handle: Option<Box<dyn PresenceHandle>> = None;
        let mut state = PresenceState::Initializing;

        loop {
            self.state_tx.send_replace(state);

            state = match state {
                PresenceState::Initializing => {
                    let acquired = tokio::select! {
                        _ = token.cancelled() => {
                            state = PresenceState::Terminated;
                            continue;
                        }
                        result = with_timeout(
                            self.feed_timeout,
                            self.feed.maintain_presence(&self.presence, self.ttl),
                        ) => result,
                    };

                    match acquired {
                        Ok(h) => {
                            tracing::info!(
                                rep_id = %self.presence.rep_id,
                                stack = %self.presence.stack,
                                ttl_ms = self.ttl.as_millis() as u64,
                                "Maintaining presence"
                            );
                            handle = Some(h);
                            backoff.reset();
                            PresenceState::Maintaining
                        }
                        Err(e) => {
                            tracing::warn!(
                                rep_id = %self.presence.rep_id,
                                error = %e,
                                "Failed to acquire presence, retrying"
                            );
                            if sleep_or_cancel(backoff.next_delay(), &token).await {
                                PresenceState::Initializing
                            } else {
                                PresenceState::Terminated
                            }
                        }
                    }
                }

                PresenceState::Maintaining => match handle.as_mut() {
                    Some(h) => self.heartbeat(&mut **h, &token).await,
                    None => PresenceState::Initializing,
                },

                PresenceState::Lost => {
                    handle = None;
                    PresenceState::Initializing
                }

                PresenceState::Terminated => {
                    if let Some(h) = handle.take() {
                        match with_timeout(self.feed_timeout, h.release()).await {
                            Ok(()) => tracing::info!(
                                rep_id = %self.presence.rep_id,
                                "Released presence"
                            ),
                            Err(e) => tracing::warn!(
                                rep_id = %self.presence.rep_id,
                                error = %e,
                                "Failed to release presence"
                            ),
                        }
                    }
                    return;
                }
            };
        }
    }

    /// Renew on every tick until a renewal fails or the token fires.
    async fn heartbeat(
        &self,
        handle: &mut dyn PresenceHandle,
        token: &CancellationToken,
    ) -> PresenceState {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => return PresenceState::Terminated,
                _ = ticker.tick() => {}
            }

            match with_timeout(self.feed_timeout, handle.renew()).await {
                Ok(()) => tracing::debug!(rep_id = %self.presence.rep_id, "Renewed presence"),
                Err(e) => {
                    tracing::warn!(
                        rep_id = %self.presence.rep_id,
                        error = %e,
                        "Lost presence"
                    );
                    return PresenceState::Lost;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MemoryFeed;

    fn config() -> RepConfig {
        RepConfig::new("linux64", "127.0.0.1:0".parse().unwrap())
            .with_heartbeat(Duration::from_secs(1), Duration::from_secs(3))
    }

    #[tokio::test(start_paused = true)]
    async fn renews_past_the_ttl() {
        let feed = MemoryFeed::new();
        let maintainer = PresenceMaintainer::new(&config(), "rep-1", Arc::new(feed.clone()));
        let mut state = maintainer.subscribe();
        let token = CancellationToken::new();
        let handle = tokio::spawn(maintainer.run(token.clone()));

        state
            .wait_for(|s| *s == PresenceState::Maintaining)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        let live = feed.live_presences().await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].rep_id, "rep-1");
        assert_eq!(live[0].stack, "linux64");

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reacquires_after_lease_is_revoked() {
        let feed = MemoryFeed::new();
        let maintainer = PresenceMaintainer::new(&config(), "rep-1", Arc::new(feed.clone()));
        let mut state = maintainer.subscribe();
        let token = CancellationToken::new();
        let handle = tokio::spawn(maintainer.run(token.clone()));

        state
            .wait_for(|s| *s == PresenceState::Maintaining)
            .await
            .unwrap();
        assert!(feed.revoke_presence("rep-1").await);
        assert!(feed.live_presences().await.is_empty());

        // The next heartbeat fails and the lease is taken again.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(feed.live_presences().await.len(), 1);
        assert_eq!(*state.borrow(), PresenceState::Maintaining);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_releases_the_lease() {
        let feed = MemoryFeed::new();
        let maintainer = PresenceMaintainer::new(&config(), "rep-1", Arc::new(feed.clone()));
        let state = maintainer.subscribe();
        let token = CancellationToken::new();
        let handle = tokio::spawn(maintainer.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(feed.live_presences().await.len(), 1);

        token.cancel();
        handle.await.unwrap();

        assert_eq!(*state.borrow(), PresenceState::Terminated);
        assert!(feed.live_presences().await.is_empty());
    }
}
