use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::config::RepConfig;
use crate::error::{RepError, Result};
use crate::executor::{ExecutorClient, HttpExecutorClient};
use crate::feed::WorkFeed;
use crate::models::generate_rep_id;
use crate::presence::{PresenceMaintainer, PresenceState};
use crate::scheduler::{LrpScheduler, TaskScheduler};

/// The per-host representative: owns the callback server, both schedulers
/// and the presence maintainer for one process lifetime.
pub struct Rep {
    config: RepConfig,
    rep_id: String,
    feed: Arc<dyn WorkFeed>,
    executor: Arc<dyn ExecutorClient>,
}

impl Rep {
    /// Validates `config` and picks a fresh identity for this host.
    pub fn new(
        config: RepConfig,
        feed: Arc<dyn WorkFeed>,
        executor: Arc<dyn ExecutorClient>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rep_id: generate_rep_id(),
            feed,
            executor,
        })
    }

    /// Like [`new`](Self::new), talking to the executor at
    /// `config.executor_url` over HTTP.
    pub fn connect(config: RepConfig, feed: Arc<dyn WorkFeed>) -> Result<Self> {
        config.validate()?;
        let executor = HttpExecutorClient::new(&config.executor_url, config.executor_timeout)?;
        Self::new(config, feed, Arc::new(executor))
    }

    pub fn rep_id(&self) -> &str {
        &self.rep_id
    }

    pub fn config(&self) -> &RepConfig {
        &self.config
    }

    /// Bind the callback listener and run until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Fails only if the listener cannot be bound. Everything after that
    /// retries or logs on its own.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RepError::Bind { addr, source })?;
        self.serve(listener, shutdown).await
    }

    /// Run on an already bound listener.
    ///
    /// Startup order is server, schedulers, presence, so that a host is
    /// never announced before it can accept callbacks. Teardown stops the
    /// schedulers first (waiting for in-flight dispatches), then releases
    /// presence, then stops the server.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let server_token = CancellationToken::new();
        let app = api::router(ApiState {
            feed: self.feed.clone(),
            feed_timeout: self.config.feed_timeout,
        });
        let server = tokio::spawn(api::serve(listener, app, server_token.clone()));

        let task_scheduler = TaskScheduler::new(
            &self.config,
            &self.rep_id,
            self.feed.clone(),
            self.executor.clone(),
        );
        let lrp_scheduler = LrpScheduler::new(
            &self.config,
            &self.rep_id,
            self.feed.clone(),
            self.executor.clone(),
        );
        let (task_ready_tx, task_ready_rx) = oneshot::channel();
        let (lrp_ready_tx, lrp_ready_rx) = oneshot::channel();
        let task_handle = task_scheduler.start(task_ready_tx);
        let lrp_handle = lrp_scheduler.start(lrp_ready_tx);

        let presence_token = CancellationToken::new();
        let maintainer = PresenceMaintainer::new(&self.config, &self.rep_id, self.feed.clone());
        let mut presence_rx = maintainer.subscribe();
        let presence_handle = tokio::spawn(maintainer.run(presence_token.clone()));

        let rep_id = self.rep_id.clone();
        let stack = self.config.stack.clone();
        let readiness = tokio::spawn(async move {
            if task_ready_rx.await.is_err() || lrp_ready_rx.await.is_err() {
                return;
            }
            if presence_rx
                .wait_for(|s| *s == PresenceState::Maintaining)
                .await
                .is_err()
            {
                return;
            }
            tracing::info!(rep_id = %rep_id, stack = %stack, "Representative started");
        });

        shutdown.cancelled().await;
        tracing::info!(rep_id = %self.rep_id, "Shutting down representative");
        readiness.abort();

        task_scheduler.stop();
        lrp_scheduler.stop();
        join("task scheduler", task_handle).await;
        join("LRP scheduler", lrp_handle).await;

        presence_token.cancel();
        join("presence maintainer", presence_handle).await;

        server_token.cancel();
        join("callback server", server).await;

        tracing::info!(rep_id = %self.rep_id, "Representative stopped");
        Ok(())
    }
}

async fn join(component: &str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        tracing::error!(component, error = %e, "Component panicked during shutdown");
    }
}
