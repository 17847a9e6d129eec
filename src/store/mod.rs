//! Durable execution records and the storage trait over them.
//!
//! Every webhook delivery, manual trigger, and retry produces exactly one
//! `Execution`. The record accumulates stage outputs as the pipeline runs
//! and is persisted after every transition, so a crash mid-pipeline leaves
//! an inspectable trail rather than a mystery.

pub mod filesystem;
pub mod memory;
pub mod postgres;

use crate::ai::TokenUsage;
use crate::errors::{ErrorKind, Stage, StoreError};
use crate::extraction::ExtractionOutcome;
use crate::richtext::RichTextDoc;
use crate::storage_client::FileInfo;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

pub use filesystem::FilesystemExecutionStore;
pub use memory::MemoryExecutionStore;
pub use postgres::PostgresExecutionStore;

/// Lifecycle state of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Failed
                | ExecutionStatus::Timeout
                | ExecutionStatus::Cancelled
        )
    }

    /// Only failed and timed-out executions may spawn a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionStatus::Failed | ExecutionStatus::Timeout)
    }

    /// Only in-flight executions may be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, ExecutionStatus::Pending | ExecutionStatus::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Processing => "processing",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ExecutionStatus::Pending),
            "processing" => Some(ExecutionStatus::Processing),
            "success" => Some(ExecutionStatus::Success),
            "failed" => Some(ExecutionStatus::Failed),
            "timeout" => Some(ExecutionStatus::Timeout),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the per-execution audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub stage: Stage,
    pub message: String,
}

/// The full record of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: String,
    pub task_id: String,
    /// Set when this execution was created by retrying another one.
    #[serde(default)]
    pub original_execution_id: Option<String>,
    pub status: ExecutionStatus,

    /// The triggering payload, kept verbatim so retries can replay it.
    pub webhook_payload: Value,
    #[serde(default)]
    pub extracted: Option<ExtractionOutcome>,
    #[serde(default)]
    pub file_info: Option<FileInfo>,
    #[serde(default)]
    pub rich_text: Option<RichTextDoc>,
    #[serde(default)]
    pub prompt_sent: Option<String>,
    #[serde(default)]
    pub ai_response: Option<String>,
    #[serde(default)]
    pub tokens_used: Option<TokenUsage>,
    #[serde(default)]
    pub write_back_response: Option<Value>,
    #[serde(default)]
    pub fields_updated: Option<Value>,

    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Transient-failure attempts consumed inside this execution.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub execution_log: Vec<LogEntry>,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub file_fetched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ai_called_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ai_responded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub write_back_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration from started_at to completed_at.
    #[serde(default)]
    pub execution_time_ms: Option<i64>,
}

impl Execution {
    /// Create a fresh pending execution for a trigger payload.
    pub fn new(task_id: &str, webhook_payload: Value) -> Self {
        Self {
            execution_id: Ulid::new().to_string(),
            task_id: task_id.to_string(),
            original_execution_id: None,
            status: ExecutionStatus::Pending,
            webhook_payload,
            extracted: None,
            file_info: None,
            rich_text: None,
            prompt_sent: None,
            ai_response: None,
            tokens_used: None,
            write_back_response: None,
            fields_updated: None,
            error_code: None,
            error_message: None,
            retry_count: 0,
            execution_log: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            file_fetched_at: None,
            ai_called_at: None,
            ai_responded_at: None,
            write_back_at: None,
            completed_at: None,
            execution_time_ms: None,
        }
    }

    /// Create a retry execution that replays the payload of a finished one.
    pub fn retry_of(original: &Execution) -> Self {
        let mut execution = Self::new(&original.task_id, original.webhook_payload.clone());
        execution.original_execution_id = Some(original.execution_id.clone());
        execution
    }

    pub fn log(&mut self, stage: Stage, message: impl Into<String>) {
        self.execution_log.push(LogEntry {
            at: Utc::now(),
            stage,
            message: message.into(),
        });
    }

    pub fn mark_started(&mut self) {
        self.status = ExecutionStatus::Processing;
        self.started_at = Some(Utc::now());
    }

    pub fn record_extraction(&mut self, outcome: ExtractionOutcome) {
        self.extracted = Some(outcome);
    }

    pub fn record_file_info(&mut self, info: FileInfo) {
        self.file_fetched_at = Some(Utc::now());
        self.file_info = Some(info);
    }

    pub fn record_rich_text(&mut self, doc: RichTextDoc) {
        self.rich_text = Some(doc);
    }

    pub fn record_ai_request(&mut self, prompt: &str) {
        self.prompt_sent = Some(prompt.to_string());
        self.ai_called_at = Some(Utc::now());
    }

    pub fn record_ai_response(&mut self, text: &str, usage: TokenUsage) {
        self.ai_response = Some(text.to_string());
        self.tokens_used = Some(usage);
        self.ai_responded_at = Some(Utc::now());
    }

    pub fn record_write_back(&mut self, field_key: &str, response: Value) {
        self.write_back_at = Some(Utc::now());
        self.fields_updated = Some(serde_json::json!([field_key]));
        self.write_back_response = Some(response);
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Finalize the record in a terminal status and fix the duration.
    pub fn mark_completed(
        &mut self,
        status: ExecutionStatus,
        error_kind: Option<ErrorKind>,
        error_message: Option<String>,
    ) {
        let completed_at = Utc::now();
        self.status = status;
        self.error_code = error_kind.map(|k| k.as_code().to_string());
        self.error_message = error_message;
        self.completed_at = Some(completed_at);
        if let Some(started_at) = self.started_at {
            self.execution_time_ms = Some((completed_at - started_at).num_milliseconds());
        }
    }
}

/// Listing filter; absent fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub task_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub limit: usize,
}

impl ExecutionFilter {
    pub fn matches(&self, execution: &Execution) -> bool {
        if let Some(task_id) = &self.task_id {
            if &execution.task_id != task_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if execution.status != status {
                return false;
            }
        }
        true
    }

    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 { 50 } else { self.limit }
    }
}

/// Aggregate counters derived from the stored executions of one task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskStats {
    pub task_id: String,
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub timeout: u64,
    pub cancelled: u64,
    pub in_flight: u64,
    pub total_tokens: u64,
    pub files_fetched: u64,
}

impl TaskStats {
    pub fn accumulate(&mut self, execution: &Execution) {
        self.total += 1;
        match execution.status {
            ExecutionStatus::Success => self.success += 1,
            ExecutionStatus::Failed => self.failed += 1,
            ExecutionStatus::Timeout => self.timeout += 1,
            ExecutionStatus::Cancelled => self.cancelled += 1,
            ExecutionStatus::Pending | ExecutionStatus::Processing => self.in_flight += 1,
        }
        if let Some(usage) = &execution.tokens_used {
            self.total_tokens += usage.total_tokens as u64;
        }
        if execution.file_info.as_ref().is_some_and(|f| f.exists) {
            self.files_fetched += 1;
        }
    }
}

/// Persistence boundary for execution records.
///
/// `upsert` is used for both the initial insert and every later state
/// transition; implementations replace the whole record keyed by
/// execution_id.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn upsert(&self, execution: &Execution) -> Result<(), StoreError>;

    async fn get(&self, execution_id: &str) -> Result<Option<Execution>, StoreError>;

    /// List matching executions, newest first by created_at.
    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError>;

    /// Derive aggregate counters for one task from its stored executions.
    async fn task_stats(&self, task_id: &str) -> Result<TaskStats, StoreError> {
        let executions = self
            .list(&ExecutionFilter {
                task_id: Some(task_id.to_string()),
                status: None,
                limit: usize::MAX,
            })
            .await?;
        let mut stats = TaskStats {
            task_id: task_id.to_string(),
            ..TaskStats::default()
        };
        for execution in &executions {
            stats.accumulate(execution);
        }
        Ok(stats)
    }
}
