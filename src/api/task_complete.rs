use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;

use crate::api::ApiState;
use crate::feed::with_timeout;
use crate::models::metadata::decode_task;
use crate::models::ContainerRunResult;

/// `POST /task_completed`
///
/// A body that is not a run result is rejected with 400. A run result whose
/// metadata is not a task is logged and acknowledged, since the executor
/// cannot do anything useful with a rejection. Feed errors while resolving
/// are logged and also acknowledged.
pub async fn task_completed_handler(State(state): State<ApiState>, body: Bytes) -> StatusCode {
    let run_result = match ContainerRunResult::from_json(&body) {
        Ok(run_result) => run_result,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting malformed run result");
            return StatusCode::BAD_REQUEST;
        }
    };

    let task = match decode_task(&run_result.metadata) {
        Ok(task) => task,
        Err(e) => {
            tracing::error!(error = %e, "Dropping run result with unreadable task metadata");
            return StatusCode::OK;
        }
    };

    tracing::info!(
        task_guid = %task.guid,
        failed = run_result.failed,
        "Task completed"
    );

    if let Err(e) = with_timeout(
        state.feed_timeout,
        state.feed.complete_task(
            &task.guid,
            run_result.failed,
            &run_result.failure_reason,
            &run_result.result,
        ),
    )
    .await
    {
        tracing::error!(task_guid = %task.guid, error = %e, "Failed to resolve completed task");
    }

    StatusCode::OK
}
