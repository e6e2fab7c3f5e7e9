use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecutorError;
use crate::executor::ExecutorClient;
use crate::models::{ContainerCreated, ContainerRequest};

const CONTAINERS_PATH: &str = "/containers";

/// Executor client speaking JSON over plain HTTP. The executor is a local
/// service, so no TLS stack is linked.
#[derive(Debug, Clone)]
pub struct HttpExecutorClient {
    http: reqwest::Client,
    containers_url: String,
}

impl HttpExecutorClient {
    /// Build a client for the executor at `base_url`, bounding every request
    /// by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ExecutorError> {
        if !base_url.starts_with("http://") {
            return Err(ExecutorError::InvalidUrl(base_url.to_string()));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            containers_url: format!("{}{}", base_url.trim_end_matches('/'), CONTAINERS_PATH),
        })
    }
}

#[async_trait]
impl ExecutorClient for HttpExecutorClient {
    async fn create_container(
        &self,
        request: &ContainerRequest,
    ) -> Result<ContainerCreated, ExecutorError> {
        tracing::debug!(
            guid = %request.guid,
            url = %self.containers_url,
            memory_mb = request.memory_mb,
            disk_mb = request.disk_mb,
            "Creating container"
        );

        let response = self
            .http
            .post(&self.containers_url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecutorError::Timeout
                } else {
                    ExecutorError::Transport(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ExecutorError::InvalidResponse(e.to_string()))
    }
}
