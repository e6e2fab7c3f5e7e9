//! Work feed: the cluster-wide store of desired, claimed and completed work
//! and of host presence leases.
//!
//! The rep only depends on the [`WorkFeed`] trait. [`MemoryFeed`] is an
//! in-process implementation used by tests and by the standalone binary.
//!
//! # Guarantees expected of an implementation
//!
//! - Watches replay every currently desired item on subscribe and may
//!   deliver an item more than once.
//! - `claim_*` is a single compare-and-swap: of any number of concurrent
//!   claims on one item, exactly one returns `true`.
//! - `complete_task` resolves a task at most once.
//! - Presence renewals are scoped to the handle that acquired the lease.

pub mod admin;
pub mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::FeedError;
use crate::models::{LrpSpec, RepPresence, Task};

pub use memory::MemoryFeed;

/// Stream of desired items. An `Err` item means the watch broke and the
/// subscriber should reconnect.
pub type ItemStream<T> = BoxStream<'static, Result<T, FeedError>>;

/// Handle on an acquired presence lease.
#[async_trait]
pub trait PresenceHandle: Send + Sync {
    /// Extend the lease by its TTL. Fails once the lease expired or was
    /// taken over by a newer acquisition.
    async fn renew(&mut self) -> Result<(), FeedError>;

    /// Drop the lease so observers see the host leave immediately.
    async fn release(self: Box<Self>) -> Result<(), FeedError>;
}

#[async_trait]
pub trait WorkFeed: Send + Sync {
    async fn watch_desired_tasks(&self, stack: &str) -> Result<ItemStream<Task>, FeedError>;

    async fn watch_desired_lrps(&self, stack: &str) -> Result<ItemStream<LrpSpec>, FeedError>;

    /// Pending → Claimed. `Ok(false)` means another rep won.
    async fn claim_task(&self, task: &Task, rep_id: &str) -> Result<bool, FeedError>;

    /// Desired → Claimed. `Ok(false)` means another rep won.
    async fn claim_lrp(&self, lrp: &LrpSpec, rep_id: &str) -> Result<bool, FeedError>;

    /// Claimed → Running once the executor accepted the container.
    async fn start_task(&self, guid: &str, container_guid: &str) -> Result<(), FeedError>;

    /// Claimed/Running → Completed, recording the outcome verbatim.
    async fn complete_task(
        &self,
        guid: &str,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<(), FeedError>;

    async fn maintain_presence(
        &self,
        presence: &RepPresence,
        ttl: Duration,
    ) -> Result<Box<dyn PresenceHandle>, FeedError>;
}

/// Bound a single feed call.
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, FeedError>
where
    F: Future<Output = Result<T, FeedError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(FeedError::Timeout),
    }
}
