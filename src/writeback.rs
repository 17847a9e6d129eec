//! Write-back of the AI response into the originating work item field.
//!
//! One idempotent field update per execution; last write wins on the
//! remote side, so repeating the call with the same arguments leaves the
//! field equal to the written value.

use crate::errors::ProjectError;
use crate::project_client::ProjectClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// Outcome of one confirmed field update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResult {
    pub work_item_id: i64,
    pub field_key: String,
    /// Raw response body, kept for the execution audit trail.
    pub response: Value,
    pub written_at: chrono::DateTime<chrono::Utc>,
}

/// Update one field on a work item with the analysis result.
pub async fn write_field(
    client: &ProjectClient,
    project_key: &str,
    work_item_type_key: &str,
    work_item_id: i64,
    field_key: &str,
    value: &str,
    timeout_ms: u64,
) -> Result<WriteResult, ProjectError> {
    let response = client
        .update_field(
            project_key,
            work_item_type_key,
            work_item_id,
            field_key,
            value,
            timeout_ms,
        )
        .await?;

    info!(
        work_item.id = work_item_id,
        field.key = %field_key,
        "Write-back confirmed"
    );

    Ok(WriteResult {
        work_item_id,
        field_key: field_key.to_string(),
        response,
        written_at: chrono::Utc::now(),
    })
}
