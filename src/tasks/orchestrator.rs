//! Execution state machine and pipeline orchestrator.
//!
//! The orchestrator is the only component that mutates `Execution`
//! records. It accepts triggers, sequences the pipeline stages, applies
//! the transient-error retry policy within a single execution, and
//! enforces the retry-as-new-execution and cooperative-cancel semantics.

use crate::ai::{AiGateway, AnalysisParams, ImageFetcher, assemble_attachments};
use crate::errors::{AiError, ErrorKind, OrchestratorError, ProjectError, Stage, StageError, StorageClientError};
use crate::extraction::{self, DEFAULT_RECORD_ID_PATH};
use crate::model::{ConfigRepository, Task, TaskRepository};
use crate::project_client::ProjectClient;
use crate::queue_adapter::QueueAdapter;
use crate::richtext::{RichTextImage, resolve_rich_text};
use crate::storage_client::client_for;
use crate::store::{Execution, ExecutionStatus, ExecutionStore};
use crate::tasks::ExecutionWork;
use crate::writeback;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Field-map keys injected for fetched and resolved content, available as
/// prompt template placeholders.
const FILE_CONTENT_PLACEHOLDER: &str = "file_content";
const RICH_TEXT_PLACEHOLDER: &str = "rich_text";

/// Retry and timeout policy applied inside a single execution.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Additional attempts after the first, for transient stage errors.
    pub max_retries: u32,
    /// Base backoff delay; doubles per retry.
    pub retry_delay_ms: u64,
    /// Stage timeout when the task carries no override.
    pub default_stage_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            default_stage_timeout_ms: 30000,
        }
    }
}

/// Why a pipeline run stopped before reaching write-back confirmation.
enum PipelineEnd {
    Cancelled,
    Stage(StageError),
}

impl From<StageError> for PipelineEnd {
    fn from(err: StageError) -> Self {
        PipelineEnd::Stage(err)
    }
}

/// Downloads inline images through the authenticated project client.
struct ProjectImageFetcher {
    client: Arc<ProjectClient>,
    timeout_ms: u64,
}

#[async_trait]
impl ImageFetcher for ProjectImageFetcher {
    async fn fetch(&self, image: &RichTextImage) -> anyhow::Result<(Vec<u8>, Option<String>)> {
        let src = image
            .src
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("image {} has no source url", image.reference()))?;
        Ok(self.client.download_attachment(src, self.timeout_ms).await?)
    }
}

pub struct Orchestrator {
    tasks: Arc<dyn TaskRepository>,
    configs: Arc<dyn ConfigRepository>,
    store: Arc<dyn ExecutionStore>,
    project_client: Arc<ProjectClient>,
    ai_gateway: AiGateway,
    http_client: Arc<reqwest::Client>,
    queue: Arc<dyn QueueAdapter<ExecutionWork>>,
    cancel_tokens: Mutex<HashMap<String, CancellationToken>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        configs: Arc<dyn ConfigRepository>,
        store: Arc<dyn ExecutionStore>,
        project_client: Arc<ProjectClient>,
        http_client: Arc<reqwest::Client>,
        queue: Arc<dyn QueueAdapter<ExecutionWork>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            tasks,
            configs,
            store,
            project_client,
            ai_gateway: AiGateway::new(http_client.clone()),
            http_client,
            queue,
            cancel_tokens: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Accept a webhook delivery: create a pending execution and queue it.
    pub async fn submit_webhook(
        &self,
        task_id: &str,
        payload: Value,
    ) -> Result<String, OrchestratorError> {
        let task = self.load_task(task_id).await?;
        if !task.is_active() {
            return Err(OrchestratorError::TaskNotActive {
                task_id: task_id.to_string(),
            });
        }

        let execution = Execution::new(task_id, payload);
        self.persist_or_submission_error(&execution).await?;
        self.enqueue(&execution).await?;

        info!(
            execution.id = %execution.execution_id,
            task.id = %task_id,
            "Execution accepted"
        );
        Ok(execution.execution_id)
    }

    /// Manual trigger: identical pipeline over a caller-provided payload.
    pub async fn trigger_manual(
        &self,
        task_id: &str,
        payload: Value,
    ) -> Result<String, OrchestratorError> {
        self.submit_webhook(task_id, payload).await
    }

    /// Create a new execution replaying a failed or timed-out one.
    ///
    /// The stored payload is replayed verbatim; the task, its AI model,
    /// and any referenced storage credential must still exist.
    pub async fn retry(&self, execution_id: &str) -> Result<String, OrchestratorError> {
        let original = self.load_execution(execution_id).await?;
        if !original.status.is_retryable() {
            return Err(OrchestratorError::NotRetryable {
                execution_id: execution_id.to_string(),
                status: original.status.to_string(),
            });
        }

        let task = self
            .tasks
            .get(&original.task_id)
            .await
            .map_err(|e| OrchestratorError::RepositoryFailed {
                details: e.to_string(),
            })?
            .ok_or_else(|| OrchestratorError::ConfigurationGone {
                details: format!("task {} deleted", original.task_id),
            })?;

        self.configs
            .ai_model(&task.ai_model_id)
            .await
            .map_err(|e| OrchestratorError::RepositoryFailed {
                details: e.to_string(),
            })?
            .ok_or_else(|| OrchestratorError::ConfigurationGone {
                details: format!("ai model {} deleted", task.ai_model_id),
            })?;

        if let Some(credential_id) = &task.storage_credential_id {
            self.configs
                .storage_credential(credential_id)
                .await
                .map_err(|e| OrchestratorError::RepositoryFailed {
                    details: e.to_string(),
                })?
                .ok_or_else(|| OrchestratorError::ConfigurationGone {
                    details: format!("storage credential {} deleted", credential_id),
                })?;
        }

        let execution = Execution::retry_of(&original);
        self.persist_or_submission_error(&execution).await?;
        self.enqueue(&execution).await?;

        info!(
            execution.id = %execution.execution_id,
            execution.original_id = %execution_id,
            task.id = %original.task_id,
            "Retry execution accepted"
        );
        Ok(execution.execution_id)
    }

    /// Request cancellation of a pending or processing execution.
    ///
    /// Cooperative: a processing execution stops at the next stage
    /// boundary; a stage already in flight completes.
    pub async fn cancel(&self, execution_id: &str) -> Result<(), OrchestratorError> {
        let mut execution = self.load_execution(execution_id).await?;
        if !execution.status.is_cancellable() {
            return Err(OrchestratorError::NotCancellable {
                execution_id: execution_id.to_string(),
                status: execution.status.to_string(),
            });
        }

        let tokens = self.cancel_tokens.lock().await;
        if let Some(token) = tokens.get(execution_id) {
            token.cancel();
            info!(execution.id = %execution_id, "Cancellation requested");
            return Ok(());
        }
        drop(tokens);

        // Not started yet: finalize directly; the worker skips non-pending
        // records when it eventually pulls the work item.
        execution.mark_completed(
            ExecutionStatus::Cancelled,
            None,
            Some("cancelled before processing started".to_string()),
        );
        self.store
            .upsert(&execution)
            .await
            .map_err(|e| OrchestratorError::SubmissionFailed {
                details: e.to_string(),
            })?;
        info!(execution.id = %execution_id, "Execution cancelled before start");
        Ok(())
    }

    /// Run one queued execution to a terminal state.
    #[instrument(skip(self), fields(execution.id = %work.execution_id, task.id = %work.task_id))]
    pub async fn run_execution(
        &self,
        work: &ExecutionWork,
    ) -> Result<ExecutionStatus, OrchestratorError> {
        let mut execution = self.load_execution(&work.execution_id).await?;
        if execution.status != ExecutionStatus::Pending {
            // Cancelled before start, or duplicate delivery.
            return Ok(execution.status);
        }

        let task = match self.load_task(&execution.task_id).await {
            Ok(task) => task,
            Err(e) => {
                execution.mark_started();
                execution.mark_completed(
                    ExecutionStatus::Failed,
                    Some(e.kind()),
                    Some(e.to_string()),
                );
                self.persist_or_submission_error(&execution).await?;
                return Ok(ExecutionStatus::Failed);
            }
        };

        let cancel_token = CancellationToken::new();
        self.cancel_tokens
            .lock()
            .await
            .insert(execution.execution_id.clone(), cancel_token.clone());

        let outcome = self
            .run_pipeline(&mut execution, &task, &cancel_token)
            .await;

        self.cancel_tokens
            .lock()
            .await
            .remove(&execution.execution_id);

        let status = match outcome {
            Ok(()) => {
                execution.mark_completed(ExecutionStatus::Success, None, None);
                ExecutionStatus::Success
            }
            Err(PipelineEnd::Cancelled) => {
                execution.mark_completed(
                    ExecutionStatus::Cancelled,
                    None,
                    Some("cancelled by request".to_string()),
                );
                ExecutionStatus::Cancelled
            }
            Err(PipelineEnd::Stage(stage_err)) => {
                let status = if stage_err.kind == ErrorKind::Timeout {
                    ExecutionStatus::Timeout
                } else {
                    ExecutionStatus::Failed
                };
                execution.mark_completed(
                    status,
                    Some(stage_err.kind),
                    Some(stage_err.to_string()),
                );
                status
            }
        };

        self.persist_or_submission_error(&execution).await?;

        info!(
            execution.status = %status,
            execution.duration_ms = execution.execution_time_ms.unwrap_or(0),
            execution.retries = execution.retry_count,
            "Execution finished"
        );
        Ok(status)
    }

    async fn run_pipeline(
        &self,
        execution: &mut Execution,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineEnd> {
        execution.mark_started();
        execution.log(Stage::Extraction, "execution started");
        self.persist(execution).await?;

        let timeout_ms = task
            .timeout_ms
            .unwrap_or(self.config.default_stage_timeout_ms);

        // Extraction is pure; its failures are never transient.
        let extraction_config = task.extraction.clone().unwrap_or_default();
        let outcome = extraction::extract(&execution.webhook_payload, &extraction_config)
            .map_err(|e| StageError::new(Stage::Extraction, e.kind(), e.to_string()))?;
        let work_item_id = work_item_id_from(&execution.webhook_payload)?;

        let mut field_map = outcome.field_map();
        let primary = outcome.primary_value().map(|v| v.to_string());
        execution.log(
            Stage::Extraction,
            format!(
                "extracted {} fields, {} failed",
                outcome.fields.len(),
                outcome.failed_fields.len()
            ),
        );
        execution.record_extraction(outcome);
        self.persist(execution).await?;
        self.check_cancelled(cancel)?;

        // Optional file fetch through the task's storage credential.
        if let (Some(path_field), Some(credential_id)) =
            (&task.file_path_field, &task.storage_credential_id)
        {
            let file_path = execution
                .extracted
                .as_ref()
                .and_then(|o| o.get(path_field))
                .map(|p| p.to_string());

            if let Some(file_path) = file_path {
                let credential = self
                    .configs
                    .storage_credential(credential_id)
                    .await
                    .map_err(|e| {
                        StageError::new(Stage::FileFetch, ErrorKind::Internal, e.to_string())
                    })?
                    .ok_or_else(|| {
                        StageError::new(
                            Stage::FileFetch,
                            ErrorKind::ConfigurationGone,
                            format!("storage credential {} deleted", credential_id),
                        )
                    })?;

                let client = client_for(credential.protocol, self.http_client.clone());
                let info = self
                    .with_retries(
                        execution,
                        Stage::FileFetch,
                        |e: &StorageClientError| e.kind(),
                        || client.fetch_file(&credential, &file_path, timeout_ms),
                    )
                    .await?;

                if let Some(preview) = &info.preview {
                    field_map.insert(FILE_CONTENT_PLACEHOLDER.to_string(), preview.clone());
                }
                execution.log(
                    Stage::FileFetch,
                    format!("fetched {} ({} bytes)", file_path, info.size.unwrap_or(0)),
                );
                execution.record_file_info(info);
                self.persist(execution).await?;
                self.check_cancelled(cancel)?;
            }
        }

        // Optional rich-text resolution via secondary project query.
        let mut rich_text_primary: Option<String> = None;
        if let Some(field_key) = &task.rich_text_field_key {
            let doc = self
                .with_retries(
                    execution,
                    Stage::RichText,
                    ProjectError::kind,
                    || {
                        resolve_rich_text(
                            &self.project_client,
                            &task.project_key,
                            &task.work_item_type_key,
                            work_item_id,
                            field_key,
                            timeout_ms,
                        )
                    },
                )
                .await?;

            if !doc.is_empty {
                field_map.insert(RICH_TEXT_PLACEHOLDER.to_string(), doc.plain_text.clone());
                rich_text_primary = Some(doc.plain_text.clone());
            }
            execution.log(
                Stage::RichText,
                format!(
                    "resolved rich text: {} chars, {} images",
                    doc.plain_text.len(),
                    doc.images.len()
                ),
            );
            execution.record_rich_text(doc);
            self.persist(execution).await?;
            self.check_cancelled(cancel)?;
        }

        // AI analysis.
        let model = self
            .configs
            .ai_model(&task.ai_model_id)
            .await
            .map_err(|e| StageError::new(Stage::AiAnalysis, ErrorKind::Internal, e.to_string()))?
            .ok_or_else(|| {
                StageError::new(
                    Stage::AiAnalysis,
                    ErrorKind::ConfigurationGone,
                    format!("ai model {} deleted", task.ai_model_id),
                )
            })?;

        let prompt_primary = rich_text_primary.as_deref().or(primary.as_deref());
        let prompt = extraction::render_prompt(&task.prompt_template, &field_map, prompt_primary);

        let images: Vec<RichTextImage> = execution
            .rich_text
            .as_ref()
            .map(|d| d.images.clone())
            .unwrap_or_default();
        let fetcher = ProjectImageFetcher {
            client: self.project_client.clone(),
            timeout_ms,
        };
        let attachments = assemble_attachments(&fetcher, &images).await;

        execution.record_ai_request(&prompt);
        self.persist(execution).await?;

        let params = AnalysisParams {
            temperature: task.temperature,
            max_tokens: task.max_tokens,
            timeout_ms,
        };
        let result = self
            .with_retries(execution, Stage::AiAnalysis, |e: &AiError| e.kind(), || {
                self.ai_gateway.analyze(&model, &prompt, &attachments, &params)
            })
            .await?;

        execution.log(
            Stage::AiAnalysis,
            format!(
                "model {} answered with {} tokens{}",
                result.model,
                result.usage.total_tokens,
                if result.usage.estimated {
                    " (estimated)"
                } else {
                    ""
                }
            ),
        );
        execution.record_ai_response(&result.text, result.usage.clone());
        self.persist(execution).await?;
        self.check_cancelled(cancel)?;

        // Write-back. Once this side effect lands the execution can no
        // longer be reported as cancelled-as-if-nothing-happened.
        let write = self
            .with_retries(execution, Stage::WriteBack, ProjectError::kind, || {
                writeback::write_field(
                    &self.project_client,
                    &task.project_key,
                    &task.work_item_type_key,
                    work_item_id,
                    &task.write_back_field_key,
                    &result.text,
                    timeout_ms,
                )
            })
            .await?;

        execution.log(
            Stage::WriteBack,
            format!("wrote field {}", task.write_back_field_key),
        );
        execution.record_write_back(&task.write_back_field_key, write.response);

        Ok(())
    }

    /// Run one stage operation under the transient-error retry policy.
    ///
    /// Only retryable kinds consume retry budget; everything else
    /// surfaces immediately. Backoff doubles per attempt.
    async fn with_retries<T, E, F, Fut>(
        &self,
        execution: &mut Execution,
        stage: Stage,
        kind_of: impl Fn(&E) -> ErrorKind,
        mut op: F,
    ) -> Result<T, StageError>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let kind = kind_of(&e);
                    if !kind.is_retryable() || attempt >= self.config.max_retries {
                        return Err(StageError::new(stage, kind, e.to_string()));
                    }
                    attempt += 1;
                    execution.increment_retry();
                    execution.log(stage, format!("transient {} error, retry {}", kind, attempt));

                    let delay = Duration::from_millis(
                        self.config.retry_delay_ms * 2u64.pow(attempt - 1),
                    );
                    warn!(
                        execution.id = %execution.execution_id,
                        stage = %stage,
                        error.kind = %kind,
                        retry.attempt = attempt,
                        retry.delay_ms = delay.as_millis() as u64,
                        "Stage failed with transient error, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    fn check_cancelled(&self, cancel: &CancellationToken) -> Result<(), PipelineEnd> {
        if cancel.is_cancelled() {
            Err(PipelineEnd::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn persist(&self, execution: &Execution) -> Result<(), StageError> {
        self.store
            .upsert(execution)
            .await
            .map_err(|e| StageError::new(Stage::Persistence, ErrorKind::Internal, e.to_string()))
    }

    async fn persist_or_submission_error(
        &self,
        execution: &Execution,
    ) -> Result<(), OrchestratorError> {
        self.store
            .upsert(execution)
            .await
            .map_err(|e| OrchestratorError::SubmissionFailed {
                details: e.to_string(),
            })
    }

    async fn enqueue(&self, execution: &Execution) -> Result<(), OrchestratorError> {
        self.queue
            .try_push(ExecutionWork {
                execution_id: execution.execution_id.clone(),
                task_id: execution.task_id.clone(),
            })
            .await
            .map_err(|e| OrchestratorError::SubmissionFailed {
                details: e.to_string(),
            })
    }

    async fn load_task(&self, task_id: &str) -> Result<Task, OrchestratorError> {
        self.tasks
            .get(task_id)
            .await
            .map_err(|e| OrchestratorError::RepositoryFailed {
                details: e.to_string(),
            })?
            .ok_or_else(|| OrchestratorError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    async fn load_execution(&self, execution_id: &str) -> Result<Execution, OrchestratorError> {
        self.store
            .get(execution_id)
            .await
            .map_err(|e| OrchestratorError::RepositoryFailed {
                details: e.to_string(),
            })?
            .ok_or_else(|| OrchestratorError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            })
    }
}

/// Pull the work item id out of the default webhook payload shape.
fn work_item_id_from(payload: &Value) -> Result<i64, StageError> {
    let missing = || {
        StageError::new(
            Stage::Extraction,
            ErrorKind::Validation,
            format!("work item id missing at {}", DEFAULT_RECORD_ID_PATH),
        )
    };

    let value = extraction::evaluate_path(payload, DEFAULT_RECORD_ID_PATH)
        .map_err(|e| StageError::new(Stage::Extraction, ErrorKind::Validation, e.to_string()))?
        .ok_or_else(missing)?;

    match value {
        Value::Number(n) => n.as_i64().ok_or_else(missing),
        Value::String(s) => s.parse::<i64>().map_err(|_| missing()),
        _ => Err(missing()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_fixtures::{test_model, test_task};
    use crate::model::InMemoryRepository;
    use crate::queue_adapter::MpscQueueAdapter;
    use crate::project_client::StaticTokenProvider;
    use crate::store::MemoryExecutionStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        repo: Arc<InMemoryRepository>,
        store: Arc<MemoryExecutionStore>,
        queue: Arc<MpscQueueAdapter<ExecutionWork>>,
    }

    async fn harness(project_base: &str) -> Harness {
        let repo = Arc::new(InMemoryRepository::new());
        let store = Arc::new(MemoryExecutionStore::new());
        let queue = Arc::new(MpscQueueAdapter::<ExecutionWork>::new(16));
        let http_client = Arc::new(reqwest::Client::new());
        let project_client = Arc::new(ProjectClient::new(
            http_client.clone(),
            project_base.to_string(),
            "user-1".to_string(),
            Arc::new(StaticTokenProvider("tok".to_string())),
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            repo.clone(),
            repo.clone(),
            store.clone(),
            project_client,
            http_client,
            queue.clone(),
            OrchestratorConfig {
                max_retries: 1,
                retry_delay_ms: 10,
                default_stage_timeout_ms: 5000,
            },
        ));

        Harness {
            orchestrator,
            repo,
            store,
            queue,
        }
    }

    fn payload() -> Value {
        serde_json::json!({
            "payload": {
                "id": 42,
                "changed_fields": [{"cur_field_value": "hello"}],
            }
        })
    }

    async fn mount_ai_success(server: &MockServer, answer: &str) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": answer}}],
                "usage": {"prompt_tokens": 9, "completion_tokens": 4, "total_tokens": 13},
            })))
            .mount(server)
            .await;
    }

    async fn mount_write_back(server: &MockServer, expected_calls: u64) {
        Mock::given(method("PUT"))
            .and(path("/open_api/proj/work_item/story/42"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"err_code": 0})),
            )
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_full_pipeline_success() {
        let server = MockServer::start().await;
        mount_ai_success(&server, "summary text").await;
        mount_write_back(&server, 1).await;

        let h = harness(&server.uri()).await;
        let mut model = test_model("m1");
        model.base_url = server.uri();
        h.repo.insert_ai_model(model).await;
        h.repo.insert_task(test_task("t1", "m1")).await;

        let execution_id = h
            .orchestrator
            .submit_webhook("t1", payload())
            .await
            .unwrap();

        let work = h.queue.pull().await.unwrap();
        assert_eq!(work.execution_id, execution_id);

        let status = h.orchestrator.run_execution(&work).await.unwrap();
        assert_eq!(status, ExecutionStatus::Success);

        let record = h.store.get(&execution_id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Success);
        assert_eq!(record.prompt_sent.as_deref(), Some("Summarize: hello"));
        assert_eq!(record.ai_response.as_deref(), Some("summary text"));
        assert_eq!(record.tokens_used.as_ref().unwrap().total_tokens, 13);
        assert!(record.write_back_response.is_some());
        assert!(record.execution_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_inactive_task_rejected() {
        let server = MockServer::start().await;
        let h = harness(&server.uri()).await;
        h.repo.insert_ai_model(test_model("m1")).await;
        let mut task = test_task("t1", "m1");
        task.status = crate::model::TaskStatus::Paused;
        h.repo.insert_task(task).await;

        let err = h
            .orchestrator
            .submit_webhook("t1", payload())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::TaskNotActive { .. }));
    }

    #[tokio::test]
    async fn test_ai_timeout_marks_execution_timeout_without_write_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(400))
                    .set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;
        // The write-back endpoint must never be reached.
        mount_write_back(&server, 0).await;

        let h = harness(&server.uri()).await;
        let mut model = test_model("m1");
        model.base_url = server.uri();
        h.repo.insert_ai_model(model).await;
        let mut task = test_task("t1", "m1");
        task.timeout_ms = Some(50);
        h.repo.insert_task(task).await;

        let execution_id = h
            .orchestrator
            .submit_webhook("t1", payload())
            .await
            .unwrap();
        let work = h.queue.pull().await.unwrap();
        let status = h.orchestrator.run_execution(&work).await.unwrap();

        assert_eq!(status, ExecutionStatus::Timeout);
        let record = h.store.get(&execution_id).await.unwrap().unwrap();
        assert_eq!(record.error_code.as_deref(), Some("Timeout"));
        // One initial attempt plus one transient retry.
        assert_eq!(record.retry_count, 1);
        assert!(record.write_back_response.is_none());
    }

    #[tokio::test]
    async fn test_retry_rules() {
        let server = MockServer::start().await;
        mount_ai_success(&server, "ok").await;
        mount_write_back(&server, 1).await;

        let h = harness(&server.uri()).await;
        let mut model = test_model("m1");
        model.base_url = server.uri();
        h.repo.insert_ai_model(model).await;
        h.repo.insert_task(test_task("t1", "m1")).await;

        let execution_id = h
            .orchestrator
            .submit_webhook("t1", payload())
            .await
            .unwrap();
        let work = h.queue.pull().await.unwrap();
        h.orchestrator.run_execution(&work).await.unwrap();

        // Success is never retryable.
        let err = h.orchestrator.retry(&execution_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotRetryable { .. }));

        // Force a failed record and retry it.
        let mut failed = h.store.get(&execution_id).await.unwrap().unwrap();
        failed.status = ExecutionStatus::Failed;
        h.store.upsert(&failed).await.unwrap();

        let retry_id = h.orchestrator.retry(&execution_id).await.unwrap();
        assert_ne!(retry_id, execution_id);
        let retry_record = h.store.get(&retry_id).await.unwrap().unwrap();
        assert_eq!(
            retry_record.original_execution_id.as_deref(),
            Some(execution_id.as_str())
        );
        assert_eq!(retry_record.webhook_payload, payload());
    }

    #[tokio::test]
    async fn test_retry_with_deleted_model_is_configuration_gone() {
        let server = MockServer::start().await;
        let h = harness(&server.uri()).await;
        h.repo.insert_ai_model(test_model("m1")).await;
        h.repo.insert_task(test_task("t1", "m1")).await;

        let execution_id = h
            .orchestrator
            .submit_webhook("t1", payload())
            .await
            .unwrap();
        let mut record = h.store.get(&execution_id).await.unwrap().unwrap();
        record.status = ExecutionStatus::Failed;
        h.store.upsert(&record).await.unwrap();

        h.repo.remove_ai_model("m1").await;

        let err = h.orchestrator.retry(&execution_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigurationGone { .. }));
        assert_eq!(err.kind(), ErrorKind::ConfigurationGone);
    }

    #[tokio::test]
    async fn test_cancel_pending_execution() {
        let server = MockServer::start().await;
        let h = harness(&server.uri()).await;
        h.repo.insert_ai_model(test_model("m1")).await;
        h.repo.insert_task(test_task("t1", "m1")).await;

        let execution_id = h
            .orchestrator
            .submit_webhook("t1", payload())
            .await
            .unwrap();
        h.orchestrator.cancel(&execution_id).await.unwrap();

        let record = h.store.get(&execution_id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Cancelled);

        // The queued work item is now a no-op.
        let work = h.queue.pull().await.unwrap();
        let status = h.orchestrator.run_execution(&work).await.unwrap();
        assert_eq!(status, ExecutionStatus::Cancelled);

        // Terminal states are never cancellable again.
        let err = h.orchestrator.cancel(&execution_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotCancellable { .. }));
    }

    #[tokio::test]
    async fn test_auth_failure_surfaces_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness(&server.uri()).await;
        let mut model = test_model("m1");
        model.base_url = server.uri();
        h.repo.insert_ai_model(model).await;
        h.repo.insert_task(test_task("t1", "m1")).await;

        let execution_id = h
            .orchestrator
            .submit_webhook("t1", payload())
            .await
            .unwrap();
        let work = h.queue.pull().await.unwrap();
        let status = h.orchestrator.run_execution(&work).await.unwrap();

        assert_eq!(status, ExecutionStatus::Failed);
        let record = h.store.get(&execution_id).await.unwrap().unwrap();
        assert_eq!(record.error_code.as_deref(), Some("AuthFailed"));
        assert_eq!(record.retry_count, 0);
    }

    #[tokio::test]
    async fn test_manual_trigger_matches_webhook_shape() {
        let server = MockServer::start().await;
        mount_ai_success(&server, "ok").await;
        mount_write_back(&server, 1).await;

        let h = harness(&server.uri()).await;
        let mut model = test_model("m1");
        model.base_url = server.uri();
        h.repo.insert_ai_model(model).await;
        h.repo.insert_task(test_task("t1", "m1")).await;

        let execution_id = h
            .orchestrator
            .trigger_manual("t1", payload())
            .await
            .unwrap();
        let work = h.queue.pull().await.unwrap();
        let status = h.orchestrator.run_execution(&work).await.unwrap();

        assert_eq!(status, ExecutionStatus::Success);
        let record = h.store.get(&execution_id).await.unwrap().unwrap();
        assert!(record.original_execution_id.is_none());
        assert_eq!(record.task_id, "t1");
    }

    #[test]
    fn test_work_item_id_parsing() {
        let numeric = serde_json::json!({"payload": {"id": 42}});
        assert_eq!(work_item_id_from(&numeric).unwrap(), 42);

        let stringy = serde_json::json!({"payload": {"id": "42"}});
        assert_eq!(work_item_id_from(&stringy).unwrap(), 42);

        let absent = serde_json::json!({"payload": {}});
        assert!(work_item_id_from(&absent).is_err());
    }
}
