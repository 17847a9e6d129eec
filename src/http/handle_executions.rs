use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::http::{WebContext, errors::WebError};
use crate::store::{ExecutionFilter, ExecutionStatus};

#[derive(Debug, Default, Deserialize)]
pub(super) struct ListQuery {
    task_id: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
}

/// Handler for listing executions
///
/// GET /executions?task_id=...&status=...&limit=...
///
/// Results are ordered newest first. An unknown status value is a 400;
/// an unknown task id simply matches nothing.
pub async fn handle_list_executions(
    State(context): State<WebContext>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, WebError> {
    let status = query
        .status
        .as_deref()
        .map(|raw| {
            ExecutionStatus::parse(raw)
                .ok_or_else(|| WebError::InvalidQuery(format!("Unknown status: {}", raw)))
        })
        .transpose()?;

    let filter = ExecutionFilter {
        task_id: query.task_id,
        status,
        limit: query.limit.unwrap_or(0),
    };

    let executions = context.store().list(&filter).await?;

    Ok(Json(json!({
        "count": executions.len(),
        "executions": executions,
    })))
}

/// Handler for fetching a single execution record
///
/// GET /executions/{execution_id}
pub async fn handle_get_execution(
    State(context): State<WebContext>,
    Path(execution_id): Path<String>,
) -> Result<impl IntoResponse, WebError> {
    let execution = context
        .store()
        .get(&execution_id)
        .await?
        .ok_or(WebError::ExecutionNotFound(execution_id))?;

    Ok(Json(execution))
}

/// Handler for retrying a failed or timed-out execution
///
/// POST /executions/{execution_id}/retry
///
/// Creates a new execution replaying the original payload and responds
/// 202 with the new execution id. Rejected with 409 when the execution
/// is not in a retryable state and 410 when the task, its AI model, or
/// a referenced storage credential has been deleted since.
pub async fn handle_retry_execution(
    State(context): State<WebContext>,
    Path(execution_id): Path<String>,
) -> Result<impl IntoResponse, WebError> {
    let new_execution_id = context.orchestrator().retry(&execution_id).await?;

    info!(
        execution.id = %execution_id,
        execution.retry_id = %new_execution_id,
        "Execution retry accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "execution_id": new_execution_id,
            "original_execution_id": execution_id,
            "status": "pending",
        })),
    ))
}

/// Handler for cancelling a pending or processing execution
///
/// POST /executions/{execution_id}/cancel
///
/// Cancellation is cooperative: a stage already in flight completes and
/// the execution stops at the next stage boundary. Responds once the
/// request is registered, not once the execution has stopped.
pub async fn handle_cancel_execution(
    State(context): State<WebContext>,
    Path(execution_id): Path<String>,
) -> Result<impl IntoResponse, WebError> {
    context.orchestrator().cancel(&execution_id).await?;

    Ok(Json(json!({
        "execution_id": execution_id,
        "status": "cancellation_requested",
    })))
}

/// Handler for per-task execution statistics
///
/// GET /tasks/{task_id}/stats
///
/// Statistics are derived from stored execution records at request time.
pub async fn handle_task_stats(
    State(context): State<WebContext>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, WebError> {
    let stats = context.store().task_stats(&task_id).await?;
    Ok(Json(stats))
}
