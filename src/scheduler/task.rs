use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::RepConfig;
use crate::error::MetadataError;
use crate::executor::ExecutorClient;
use crate::feed::{with_timeout, WorkFeed};
use crate::models::metadata::encode_task;
use crate::models::{ContainerRequest, Task};
use crate::scheduler::claim::WatchAndClaim;

/// Build the container request for a claimed task. The task itself rides
/// along as metadata so the completion callback can identify it without
/// asking the feed.
pub fn task_container_request(
    task: &Task,
    complete_url: &str,
) -> Result<ContainerRequest, MetadataError> {
    Ok(ContainerRequest {
        guid: task.guid.clone(),
        memory_mb: task.memory_mb,
        disk_mb: task.disk_mb,
        actions: task.actions.clone(),
        complete_url: Some(complete_url.to_string()),
        metadata: Some(encode_task(task)?),
    })
}

/// Sends claimed tasks to the executor and resolves the ones it refuses.
pub struct TaskDispatcher {
    feed: Arc<dyn WorkFeed>,
    executor: Arc<dyn ExecutorClient>,
    complete_url: String,
    feed_timeout: Duration,
}

impl TaskDispatcher {
    pub fn new(
        config: &RepConfig,
        feed: Arc<dyn WorkFeed>,
        executor: Arc<dyn ExecutorClient>,
    ) -> Self {
        Self {
            feed,
            executor,
            complete_url: config.completion_callback_url(),
            feed_timeout: config.feed_timeout,
        }
    }

    /// Dispatch one claimed task.
    ///
    /// A task the executor does not accept is marked failed right away and
    /// never retried here; it must not stay claimed by a rep that will not
    /// run it.
    pub async fn dispatch(&self, task: Task) {
        let request = match task_container_request(&task, &self.complete_url) {
            Ok(request) => request,
            Err(e) => {
                self.fail(&task, format!("failed to encode task metadata: {}", e))
                    .await;
                return;
            }
        };

        match self.executor.create_container(&request).await {
            Ok(created) => {
                tracing::info!(
                    task_guid = %task.guid,
                    executor_guid = %created.executor_guid,
                    container_guid = %created.guid,
                    "Task dispatched"
                );
                if let Err(e) = with_timeout(
                    self.feed_timeout,
                    self.feed.start_task(&task.guid, &created.guid),
                )
                .await
                {
                    tracing::warn!(
                        task_guid = %task.guid,
                        error = %e,
                        "Failed to mark task running"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(task_guid = %task.guid, error = %e, "Task dispatch failed");
                self.fail(&task, format!("failed to create container: {}", e))
                    .await;
            }
        }
    }

    async fn fail(&self, task: &Task, reason: String) {
        match with_timeout(
            self.feed_timeout,
            self.feed.complete_task(&task.guid, true, &reason, ""),
        )
        .await
        {
            Ok(()) => {
                tracing::info!(task_guid = %task.guid, reason = %reason, "Task marked failed")
            }
            Err(e) => tracing::error!(
                task_guid = %task.guid,
                error = %e,
                "Failed to mark undispatched task failed"
            ),
        }
    }
}

/// Claims desired tasks for the local stack and dispatches each one.
pub struct TaskScheduler {
    config: RepConfig,
    rep_id: String,
    feed: Arc<dyn WorkFeed>,
    dispatcher: Arc<TaskDispatcher>,
    token: CancellationToken,
}

impl TaskScheduler {
    pub fn new(
        config: &RepConfig,
        rep_id: &str,
        feed: Arc<dyn WorkFeed>,
        executor: Arc<dyn ExecutorClient>,
    ) -> Self {
        Self {
            config: config.clone(),
            rep_id: rep_id.to_string(),
            dispatcher: Arc::new(TaskDispatcher::new(config, feed.clone(), executor)),
            feed,
            token: CancellationToken::new(),
        }
    }

    /// Start claiming. `ready` fires once the feed watch is established.
    /// The returned handle completes after [`stop`](Self::stop) once every
    /// in-flight dispatch has finished.
    pub fn start(&self, ready: oneshot::Sender<()>) -> JoinHandle<()> {
        let watcher = WatchAndClaim::<Task>::new(&self.config, &self.rep_id, self.feed.clone());
        let (mut claimed, watch_handle) = watcher.spawn(ready, self.token.clone());
        let dispatcher = self.dispatcher.clone();

        tokio::spawn(async move {
            let in_flight = TaskTracker::new();

            while let Some(task) = claimed.recv().await {
                let dispatcher = dispatcher.clone();
                in_flight.spawn(async move {
                    dispatcher.dispatch(task).await;
                });
            }

            in_flight.close();
            in_flight.wait().await;
            if let Err(e) = watch_handle.await {
                tracing::error!(error = %e, "Task watcher panicked");
            }
            tracing::info!("Task scheduler stopped");
        })
    }

    /// Stop claiming new tasks. Dispatches already under way are not
    /// cancelled.
    pub fn stop(&self) {
        self.token.cancel();
    }
}
