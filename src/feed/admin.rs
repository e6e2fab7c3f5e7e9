//! Operator routes over the in-process feed, served only in standalone
//! mode. They let an operator desire work and see what the rep did with it.

use std::net::SocketAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::FeedError;
use crate::feed::MemoryFeed;
use crate::models::{ExecutorAction, LrpSpec, Task};

#[derive(Deserialize)]
struct DesireRequest {
    /// Generated when omitted
    #[serde(default)]
    guid: Option<String>,
    stack: String,
    #[serde(default)]
    memory_mb: u64,
    #[serde(default)]
    disk_mb: u64,
    #[serde(default)]
    actions: Vec<ExecutorAction>,
}

impl DesireRequest {
    fn guid(&mut self) -> String {
        self.guid
            .take()
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Serialize)]
struct DesireResponse {
    success: bool,
    guid: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct PresenceResponse {
    rep_id: String,
    stack: String,
    live: bool,
}

pub fn admin_router(feed: MemoryFeed) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/tasks", get(list_tasks_handler).post(desire_task_handler))
        .route("/api/tasks/:guid", get(get_task_handler))
        .route("/api/lrps", get(list_lrps_handler).post(desire_lrp_handler))
        .route("/api/presence", get(presence_handler))
        .layer(cors)
        .with_state(feed)
}

pub async fn run_admin(addr: SocketAddr, feed: MemoryFeed, token: CancellationToken) {
    tracing::info!(addr = %addr, "Starting feed admin server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind feed admin server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, admin_router(feed))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Feed admin server failed");
    }
}

async fn list_tasks_handler(State(feed): State<MemoryFeed>) -> impl IntoResponse {
    Json(feed.tasks().await)
}

async fn get_task_handler(
    State(feed): State<MemoryFeed>,
    Path(guid): Path<String>,
) -> impl IntoResponse {
    match feed.task(&guid).await {
        Some(task) => Json(task).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn desire_task_handler(
    State(feed): State<MemoryFeed>,
    Json(mut payload): Json<DesireRequest>,
) -> impl IntoResponse {
    if payload.stack.is_empty() {
        return rejected(StatusCode::BAD_REQUEST, "stack must not be empty");
    }

    let guid = payload.guid();
    let mut task = Task::new(guid.clone(), payload.stack)
        .with_resources(payload.memory_mb, payload.disk_mb);
    task.actions = payload.actions;

    desired(guid, feed.desire_task(task).await)
}

async fn list_lrps_handler(State(feed): State<MemoryFeed>) -> impl IntoResponse {
    Json(feed.lrps().await)
}

async fn desire_lrp_handler(
    State(feed): State<MemoryFeed>,
    Json(mut payload): Json<DesireRequest>,
) -> impl IntoResponse {
    if payload.stack.is_empty() {
        return rejected(StatusCode::BAD_REQUEST, "stack must not be empty");
    }

    let guid = payload.guid();
    let mut lrp = LrpSpec::new(guid.clone(), payload.stack)
        .with_resources(payload.memory_mb, payload.disk_mb);
    lrp.actions = payload.actions;

    desired(guid, feed.desire_lrp(lrp).await)
}

async fn presence_handler(State(feed): State<MemoryFeed>) -> impl IntoResponse {
    let live = feed.live_presences().await;
    let presences: Vec<PresenceResponse> = feed
        .presences()
        .await
        .into_iter()
        .map(|p| PresenceResponse {
            live: live.contains(&p),
            rep_id: p.rep_id,
            stack: p.stack,
        })
        .collect();

    Json(presences)
}

fn desired(guid: String, result: Result<(), FeedError>) -> (StatusCode, Json<DesireResponse>) {
    match result {
        Ok(()) => (
            StatusCode::CREATED,
            Json(DesireResponse {
                success: true,
                guid: Some(guid),
                error: None,
            }),
        ),
        Err(e @ FeedError::AlreadyDesired(_)) => rejected(StatusCode::CONFLICT, &e.to_string()),
        Err(e) => rejected(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn rejected(status: StatusCode, error: &str) -> (StatusCode, Json<DesireResponse>) {
    (
        status,
        Json(DesireResponse {
            success: false,
            guid: None,
            error: Some(error.to_string()),
        }),
    )
}
