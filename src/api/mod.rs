//! HTTP surface of the rep: the completion callback the executor calls
//! once a task's container has finished.

pub mod task_complete;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::TASK_COMPLETED_PATH;
use crate::feed::WorkFeed;

#[derive(Clone)]
pub struct ApiState {
    pub feed: Arc<dyn WorkFeed>,
    pub feed_timeout: Duration,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(TASK_COMPLETED_PATH, post(task_complete::task_completed_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `app` until `token` is cancelled. Requests already accepted are
/// allowed to finish.
pub async fn serve(listener: TcpListener, app: Router, token: CancellationToken) {
    let addr = listener.local_addr().ok();
    tracing::info!(addr = ?addr, "Completion callback server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Completion callback server failed");
    }
}
