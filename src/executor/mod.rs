//! Client side of the local execution agent.
//!
//! The rep hands the executor fully-formed container requests and never
//! looks inside the containers it creates.
//!
//! # Components
//!
//! - [`ExecutorClient`]: the seam both schedulers dispatch through
//! - [`HttpExecutorClient`]: JSON over HTTP against the executor's
//!   `/containers` route

pub mod client;

use async_trait::async_trait;

use crate::error::ExecutorError;
use crate::models::{ContainerCreated, ContainerRequest};

pub use client::HttpExecutorClient;

#[async_trait]
pub trait ExecutorClient: Send + Sync {
    async fn create_container(
        &self,
        request: &ContainerRequest,
    ) -> Result<ContainerCreated, ExecutorError>;
}
