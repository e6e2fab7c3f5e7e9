use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::{RepConfig, RetryConfig};
use crate::error::FeedError;
use crate::feed::{with_timeout, ItemStream, WorkFeed};
use crate::models::{LrpSpec, LrpState, Task, TaskState};
use crate::retry::{sleep_or_cancel, Backoff};

/// Claimed items waiting for dispatch. Small, so a stalled dispatcher
/// pushes back on claiming rather than hoarding work.
const CLAIMED_BUFFER: usize = 16;

/// An item the rep can watch for and claim from the work feed.
pub trait Claimable: Clone + Send + Sync + 'static {
    const KIND: &'static str;

    fn guid(&self) -> &str;

    fn stack(&self) -> &str;

    /// Reflect a successful claim in the local copy.
    fn mark_claimed(&mut self, rep_id: &str);

    fn watch<'a>(
        feed: &'a dyn WorkFeed,
        stack: &'a str,
    ) -> BoxFuture<'a, Result<ItemStream<Self>, FeedError>>;

    fn claim<'a>(
        feed: &'a dyn WorkFeed,
        item: &'a Self,
        rep_id: &'a str,
    ) -> BoxFuture<'a, Result<bool, FeedError>>;
}

impl Claimable for Task {
    const KIND: &'static str = "task";

    fn guid(&self) -> &str {
        &self.guid
    }

    fn stack(&self) -> &str {
        &self.stack
    }

    fn mark_claimed(&mut self, rep_id: &str) {
        self.state = TaskState::Claimed;
        self.claimed_by = Some(rep_id.to_string());
    }

    fn watch<'a>(
        feed: &'a dyn WorkFeed,
        stack: &'a str,
    ) -> BoxFuture<'a, Result<ItemStream<Self>, FeedError>> {
        feed.watch_desired_tasks(stack)
    }

    fn claim<'a>(
        feed: &'a dyn WorkFeed,
        item: &'a Self,
        rep_id: &'a str,
    ) -> BoxFuture<'a, Result<bool, FeedError>> {
        feed.claim_task(item, rep_id)
    }
}

impl Claimable for LrpSpec {
    const KIND: &'static str = "lrp";

    fn guid(&self) -> &str {
        &self.guid
    }

    fn stack(&self) -> &str {
        &self.stack
    }

    fn mark_claimed(&mut self, rep_id: &str) {
        self.state = LrpState::Claimed;
        self.claimed_by = Some(rep_id.to_string());
    }

    fn watch<'a>(
        feed: &'a dyn WorkFeed,
        stack: &'a str,
    ) -> BoxFuture<'a, Result<ItemStream<Self>, FeedError>> {
        feed.watch_desired_lrps(stack)
    }

    fn claim<'a>(
        feed: &'a dyn WorkFeed,
        item: &'a Self,
        rep_id: &'a str,
    ) -> BoxFuture<'a, Result<bool, FeedError>> {
        feed.claim_lrp(item, rep_id)
    }
}

enum ClaimOutcome<T> {
    Claimed(T),
    /// Another stack's item, or a race lost to another rep
    Skipped,
    /// The feed could not answer; the item must be seen again
    Failed,
}

/// Turns the feed's desired-item watch into a channel of items this rep
/// claimed.
///
/// The watch is at-least-once: it replays on every reconnect, so the same
/// item can arrive many times. Only the claim compare-and-swap decides who
/// runs it; a lost race is skipped quietly.
pub struct WatchAndClaim<T> {
    feed: Arc<dyn WorkFeed>,
    rep_id: String,
    stack: String,
    feed_timeout: Duration,
    retry: RetryConfig,
    _item: PhantomData<fn() -> T>,
}

impl<T: Claimable> WatchAndClaim<T> {
    pub fn new(config: &RepConfig, rep_id: &str, feed: Arc<dyn WorkFeed>) -> Self {
        Self {
            feed,
            rep_id: rep_id.to_string(),
            stack: config.stack.clone(),
            feed_timeout: config.feed_timeout,
            retry: config.retry,
            _item: PhantomData,
        }
    }

    /// Start watching. `ready` fires once the first watch subscription is
    /// established. The returned channel closes after `token` is cancelled
    /// and every already-claimed item has been handed over.
    pub fn spawn(
        self,
        ready: oneshot::Sender<()>,
        token: CancellationToken,
    ) -> (mpsc::Receiver<T>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CLAIMED_BUFFER);
        let handle = tokio::spawn(async move {
            self.run(tx, ready, token).await;
        });
        (rx, handle)
    }

    async fn run(self, tx: mpsc::Sender<T>, ready: oneshot::Sender<()>, token: CancellationToken) {
        let mut ready = Some(ready);
        let mut backoff = Backoff::new(self.retry);

        loop {
            let watch = tokio::select! {
                _ = token.cancelled() => break,
                result = T::watch(self.feed.as_ref(), &self.stack) => result,
            };

            match watch {
                Ok(stream) => {
                    if let Some(ready) = ready.take() {
                        tracing::info!(kind = T::KIND, stack = %self.stack, "Watching for desired work");
                        let _ = ready.send(());
                    }
                    if !self.drain(stream, &tx, &token, &mut backoff).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(kind = T::KIND, error = %e, "Failed to watch work feed");
                }
            }

            if !sleep_or_cancel(backoff.next_delay(), &token).await {
                break;
            }
        }

        tracing::debug!(kind = T::KIND, "Stopped watching for desired work");
    }

    /// Claim items off one watch subscription. Returns false when the
    /// watcher should stop entirely, true when it should reconnect.
    async fn drain(
        &self,
        mut stream: ItemStream<T>,
        tx: &mpsc::Sender<T>,
        token: &CancellationToken,
        backoff: &mut Backoff,
    ) -> bool {
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return false,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(item)) => match self.try_claim(item).await {
                    ClaimOutcome::Claimed(claimed) => {
                        backoff.reset();
                        if tx.send(claimed).await.is_err() {
                            // Dispatcher is gone
                            return false;
                        }
                    }
                    ClaimOutcome::Skipped => backoff.reset(),
                    // Resubscribing replays the item
                    ClaimOutcome::Failed => return true,
                },
                Some(Err(e)) => {
                    tracing::warn!(kind = T::KIND, error = %e, "Watch broke, reconnecting");
                    return true;
                }
                None => {
                    tracing::warn!(kind = T::KIND, "Watch ended, reconnecting");
                    return true;
                }
            }
        }
    }

    async fn try_claim(&self, mut item: T) -> ClaimOutcome<T> {
        if item.stack() != self.stack {
            tracing::warn!(
                kind = T::KIND,
                guid = %item.guid(),
                item_stack = %item.stack(),
                stack = %self.stack,
                "Ignoring desired item for another stack"
            );
            return ClaimOutcome::Skipped;
        }

        let claim = with_timeout(
            self.feed_timeout,
            T::claim(self.feed.as_ref(), &item, &self.rep_id),
        )
        .await;

        match claim {
            Ok(true) => {
                tracing::info!(kind = T::KIND, guid = %item.guid(), "Claimed");
                item.mark_claimed(&self.rep_id);
                ClaimOutcome::Claimed(item)
            }
            Ok(false) => {
                tracing::debug!(kind = T::KIND, guid = %item.guid(), "Lost claim to another rep");
                ClaimOutcome::Skipped
            }
            Err(e) => {
                tracing::warn!(
                    kind = T::KIND,
                    guid = %item.guid(),
                    error = %e,
                    "Claim failed, resubscribing"
                );
                ClaimOutcome::Failed
            }
        }
    }
}
