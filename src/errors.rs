use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable classification shared by every stage of the pipeline.
///
/// The orchestrator keys its retry decision exclusively on this value:
/// `Network`, `RateLimited`, and `Timeout` are transient and retried with
/// backoff inside a single execution; everything else surfaces immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    NotFound,
    AuthFailed,
    Network,
    Timeout,
    RateLimited,
    Proxy,
    UnsupportedProvider,
    ConfigurationGone,
    PartialFailure,
    Internal,
}

impl ErrorKind {
    /// Transient errors worth another attempt within the same execution.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::RateLimited | ErrorKind::Timeout
        )
    }

    /// Stable code stored on the execution record and returned by the API.
    pub fn as_code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AuthFailed => "AuthFailed",
            ErrorKind::Network => "NetworkError",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::Proxy => "ProxyError",
            ErrorKind::UnsupportedProvider => "UnsupportedProvider",
            ErrorKind::ConfigurationGone => "ConfigurationGone",
            ErrorKind::PartialFailure => "PartialFailure",
            ErrorKind::Internal => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Pipeline stage that produced an error, recorded for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    FileFetch,
    RichText,
    AiAnalysis,
    WriteBack,
    Persistence,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Extraction => "extraction",
            Stage::FileFetch => "file_fetch",
            Stage::RichText => "rich_text",
            Stage::AiAnalysis => "ai_analysis",
            Stage::WriteBack => "write_back",
            Stage::Persistence => "persistence",
        };
        f.write_str(name)
    }
}

/// A classified failure attributed to one pipeline stage.
#[derive(Error, Debug, Clone)]
#[error("error-fieldflow-stage-1 {stage} stage failed ({kind}): {message}")]
pub struct StageError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error-fieldflow-config-1 Required environment variable not set: {var_name}")]
    EnvVarRequired { var_name: String },

    #[error("error-fieldflow-config-2 Invalid port number: {port}")]
    InvalidPortNumber { port: String },

    #[error("error-fieldflow-config-3 Invalid timeout value: {value}")]
    InvalidTimeout { value: String },

    #[error("error-fieldflow-config-4 Invalid numeric value: {details}")]
    InvalidNumber { details: String },

    #[error("error-fieldflow-config-5 Invalid store backend: {value}")]
    InvalidStoreBackend { value: String },
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("error-fieldflow-extract-1 Invalid path expression: {path}: {details}")]
    InvalidPath { path: String, details: String },

    #[error("error-fieldflow-extract-2 Required field missing: {key} at {path}")]
    RequiredFieldMissing { key: String, path: String },

    #[error("error-fieldflow-extract-3 Extraction failed for required fields: {keys}")]
    RequiredFieldsFailed { keys: String },
}

impl ExtractionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractionError::InvalidPath { .. } => ErrorKind::Validation,
            ExtractionError::RequiredFieldMissing { .. }
            | ExtractionError::RequiredFieldsFailed { .. } => ErrorKind::PartialFailure,
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageClientError {
    #[error("error-fieldflow-storage-1 File not found: {path}")]
    FileNotFound { path: String },

    #[error("error-fieldflow-storage-2 Authentication failed for {server}: {details}")]
    AuthFailed { server: String, details: String },

    #[error("error-fieldflow-storage-3 Network error accessing {server}: {details}")]
    Network { server: String, details: String },

    #[error("error-fieldflow-storage-4 Request timed out after {timeout_ms}ms: {path}")]
    Timeout { path: String, timeout_ms: u64 },

    #[error("error-fieldflow-storage-5 Unsupported protocol: {protocol}")]
    UnsupportedProtocol { protocol: String },

    #[error("error-fieldflow-storage-6 Mount point not accessible: {mount_point}: {details}")]
    MountUnavailable { mount_point: String, details: String },
}

impl StorageClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageClientError::FileNotFound { .. } => ErrorKind::NotFound,
            StorageClientError::AuthFailed { .. } => ErrorKind::AuthFailed,
            StorageClientError::Network { .. } => ErrorKind::Network,
            StorageClientError::Timeout { .. } => ErrorKind::Timeout,
            StorageClientError::UnsupportedProtocol { .. } => ErrorKind::Validation,
            StorageClientError::MountUnavailable { .. } => ErrorKind::Network,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("error-fieldflow-project-1 Token acquisition failed: {details}")]
    TokenAcquisitionFailed { details: String },

    #[error("error-fieldflow-project-2 Work item not found: {work_item_id}")]
    WorkItemNotFound { work_item_id: i64 },

    #[error("error-fieldflow-project-3 Project API request failed with status {status}: {details}")]
    RequestFailed { status: u16, details: String },

    #[error("error-fieldflow-project-4 Project API network error: {source}")]
    Network {
        #[source]
        source: reqwest::Error,
    },

    #[error("error-fieldflow-project-5 Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("error-fieldflow-project-6 Malformed project API response: {details}")]
    MalformedResponse { details: String },
}

impl ProjectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProjectError::TokenAcquisitionFailed { .. } => ErrorKind::AuthFailed,
            ProjectError::WorkItemNotFound { .. } => ErrorKind::NotFound,
            ProjectError::RequestFailed { status, .. } => classify_status(*status),
            ProjectError::Network { .. } => ErrorKind::Network,
            ProjectError::Timeout { .. } => ErrorKind::Timeout,
            ProjectError::MalformedResponse { .. } => ErrorKind::Validation,
        }
    }
}

#[derive(Error, Debug)]
pub enum AiError {
    #[error("error-fieldflow-ai-1 Unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },

    #[error("error-fieldflow-ai-2 Provider request failed with status {status}: {details}")]
    RequestFailed { status: u16, details: String },

    #[error("error-fieldflow-ai-3 Provider network error: {source}")]
    Network {
        #[source]
        source: reqwest::Error,
    },

    #[error("error-fieldflow-ai-4 Provider call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("error-fieldflow-ai-5 Proxy configuration invalid or unreachable: {details}")]
    Proxy { details: String },

    #[error("error-fieldflow-ai-6 Malformed provider response: {details}")]
    MalformedResponse { details: String },
}

impl AiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AiError::UnsupportedProvider { .. } => ErrorKind::UnsupportedProvider,
            AiError::RequestFailed { status, .. } => classify_status(*status),
            AiError::Network { .. } => ErrorKind::Network,
            AiError::Timeout { .. } => ErrorKind::Timeout,
            AiError::Proxy { .. } => ErrorKind::Proxy,
            AiError::MalformedResponse { .. } => ErrorKind::Validation,
        }
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("error-fieldflow-queue-1 MPSC queue operation failed: {operation}: {details}")]
    MpscOperationFailed { operation: String, details: String },

    #[error("error-fieldflow-queue-2 Queue capacity exceeded: {queue_type}: {capacity}")]
    CapacityExceeded { queue_type: String, capacity: usize },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("error-fieldflow-store-1 Execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: String },

    #[error("error-fieldflow-store-2 Database operation failed: {operation}: {source}")]
    DatabaseFailed {
        operation: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("error-fieldflow-store-3 Filesystem operation failed: {operation}: {details}")]
    FilesystemFailed { operation: String, details: String },

    #[error("error-fieldflow-store-4 Serialization failed: {details}")]
    SerializationFailed { details: String },
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("error-fieldflow-orchestrator-1 Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("error-fieldflow-orchestrator-2 Task is not active: {task_id}")]
    TaskNotActive { task_id: String },

    #[error(
        "error-fieldflow-orchestrator-3 Execution {execution_id} is not retryable from status {status}"
    )]
    NotRetryable {
        execution_id: String,
        status: String,
    },

    #[error(
        "error-fieldflow-orchestrator-4 Execution {execution_id} is not cancellable from status {status}"
    )]
    NotCancellable {
        execution_id: String,
        status: String,
    },

    #[error("error-fieldflow-orchestrator-5 Configuration gone for retry: {details}")]
    ConfigurationGone { details: String },

    #[error("error-fieldflow-orchestrator-6 Execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: String },

    #[error("error-fieldflow-orchestrator-7 Work queue submission failed: {details}")]
    SubmissionFailed { details: String },

    #[error("error-fieldflow-orchestrator-8 Configuration repository lookup failed: {details}")]
    RepositoryFailed { details: String },
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::TaskNotFound { .. }
            | OrchestratorError::ExecutionNotFound { .. } => ErrorKind::NotFound,
            OrchestratorError::TaskNotActive { .. }
            | OrchestratorError::NotRetryable { .. }
            | OrchestratorError::NotCancellable { .. } => ErrorKind::Validation,
            OrchestratorError::ConfigurationGone { .. } => ErrorKind::ConfigurationGone,
            OrchestratorError::SubmissionFailed { .. }
            | OrchestratorError::RepositoryFailed { .. } => ErrorKind::Internal,
        }
    }
}

/// Map an HTTP status from an upstream dependency onto the shared taxonomy.
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::AuthFailed,
        404 => ErrorKind::NotFound,
        429 => ErrorKind::RateLimited,
        408 | 504 => ErrorKind::Timeout,
        _ => ErrorKind::Network,
    }
}
