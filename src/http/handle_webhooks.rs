use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Value, json};
use tracing::info;

use crate::http::{WebContext, errors::WebError};

/// Handler for webhook deliveries that trigger task execution
///
/// POST /webhooks/{task_id}
///
/// Accepts the payload, creates a pending execution, and queues it for
/// asynchronous processing. Responds 202 with the execution id before
/// the pipeline runs; callers poll `GET /executions/{execution_id}` for
/// the outcome.
pub async fn handle_webhook(
    State(context): State<WebContext>,
    Path(task_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, WebError> {
    let execution_id = context
        .orchestrator()
        .submit_webhook(&task_id, payload)
        .await?;

    info!(
        task.id = %task_id,
        execution.id = %execution_id,
        "Webhook accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "execution_id": execution_id,
            "status": "pending",
        })),
    ))
}

/// Handler for manual task triggers
///
/// POST /tasks/{task_id}/trigger
///
/// Runs the same pipeline as a webhook delivery over a caller-provided
/// payload. The resulting execution is indistinguishable from a
/// webhook-triggered one.
pub async fn handle_trigger_manual(
    State(context): State<WebContext>,
    Path(task_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, WebError> {
    let execution_id = context
        .orchestrator()
        .trigger_manual(&task_id, payload)
        .await?;

    info!(
        task.id = %task_id,
        execution.id = %execution_id,
        "Manual trigger accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "execution_id": execution_id,
            "status": "pending",
        })),
    ))
}
