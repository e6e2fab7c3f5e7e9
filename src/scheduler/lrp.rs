use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::RepConfig;
use crate::executor::ExecutorClient;
use crate::feed::WorkFeed;
use crate::models::{ContainerRequest, LrpSpec};
use crate::scheduler::claim::WatchAndClaim;

pub fn lrp_container_request(lrp: &LrpSpec) -> ContainerRequest {
    ContainerRequest {
        guid: lrp.guid.clone(),
        memory_mb: lrp.memory_mb,
        disk_mb: lrp.disk_mb,
        actions: lrp.actions.clone(),
        complete_url: None,
        metadata: None,
    }
}

/// Claims desired LRPs for the local stack and starts each one once.
///
/// There is no completion feedback. A failed start is only logged and the
/// claim stays in place; recovering such claims is left to whatever
/// reconciles LRPs cluster-wide.
pub struct LrpScheduler {
    config: RepConfig,
    rep_id: String,
    feed: Arc<dyn WorkFeed>,
    executor: Arc<dyn ExecutorClient>,
    token: CancellationToken,
}

impl LrpScheduler {
    pub fn new(
        config: &RepConfig,
        rep_id: &str,
        feed: Arc<dyn WorkFeed>,
        executor: Arc<dyn ExecutorClient>,
    ) -> Self {
        Self {
            config: config.clone(),
            rep_id: rep_id.to_string(),
            feed,
            executor,
            token: CancellationToken::new(),
        }
    }

    pub fn start(&self, ready: oneshot::Sender<()>) -> JoinHandle<()> {
        let watcher = WatchAndClaim::<LrpSpec>::new(&self.config, &self.rep_id, self.feed.clone());
        let (mut claimed, watch_handle) = watcher.spawn(ready, self.token.clone());
        let executor = self.executor.clone();

        tokio::spawn(async move {
            let in_flight = TaskTracker::new();

            while let Some(lrp) = claimed.recv().await {
                let executor = executor.clone();
                in_flight.spawn(async move {
                    start_lrp(executor.as_ref(), &lrp).await;
                });
            }

            in_flight.close();
            in_flight.wait().await;
            if let Err(e) = watch_handle.await {
                tracing::error!(error = %e, "LRP watcher panicked");
            }
            tracing::info!("LRP scheduler stopped");
        })
    }

    pub fn stop(&self) {
        self.token.cancel();
    }
}

async fn start_lrp(executor: &dyn ExecutorClient, lrp: &LrpSpec) {
    match executor.create_container(&lrp_container_request(lrp)).await {
        Ok(created) => tracing::info!(
            lrp_guid = %lrp.guid,
            executor_guid = %created.executor_guid,
            container_guid = %created.guid,
            "LRP started"
        ),
        Err(e) => tracing::error!(
            lrp_guid = %lrp.guid,
            error = %e,
            "Failed to start LRP, leaving claim in place"
        ),
    }
}
