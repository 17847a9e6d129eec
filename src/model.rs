//! Configuration model consumed read-only by the execution engine.
//!
//! Tasks, AI model configs, and storage credentials are produced by an
//! external management layer. The engine snapshots them at the start of an
//! execution and never mutates them; configuration changes mid-flight do
//! not affect an in-progress execution.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Logical AI provider family. Unknown kinds are rejected when the
/// configuration is deserialized, not when a call is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
    Gemini,
    Claude,
    /// Providers without a dedicated adapter; spoken to with the
    /// OpenAI-compatible request shape.
    Other,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProviderKind::OpenAiCompatible => "openai_compatible",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Claude => "claude",
            ProviderKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// One configured AI model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiModelConfig {
    pub id: String,
    pub provider: ProviderKind,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    #[serde(default)]
    pub use_proxy: bool,
    #[serde(default)]
    pub proxy_url: Option<String>,
}

/// Network file store protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageProtocol {
    Smb,
    Nfs,
    Ftp,
    Http,
    Webdav,
}

impl std::fmt::Display for StorageProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StorageProtocol::Smb => "smb",
            StorageProtocol::Nfs => "nfs",
            StorageProtocol::Ftp => "ftp",
            StorageProtocol::Http => "http",
            StorageProtocol::Webdav => "webdav",
        };
        f.write_str(name)
    }
}

/// Immutable credential snapshot for one network file store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageCredential {
    pub id: String,
    pub protocol: StorageProtocol,
    pub server: String,
    #[serde(default)]
    pub share: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Local mount point for SMB/NFS shares mounted by the host.
    #[serde(default)]
    pub mount_point: Option<String>,
}

/// One named extraction entry in multi-field mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    pub path: String,
    /// Placeholder name used in the prompt template; defaults to the key.
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Extraction configuration: a single path expression or a list of named
/// fields, each evaluated independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExtractionConfig {
    SinglePath { path: String },
    MultiField {
        fields: Vec<FieldSpec>,
        #[serde(default)]
        fail_fast: bool,
    },
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig::SinglePath {
            path: "$.payload.changed_fields[0].cur_field_value".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
}

/// A stored task configuration binding a webhook to an AI model, optional
/// storage credential, extraction and prompt settings, and a write-back
/// target field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,

    pub ai_model_id: String,
    #[serde(default)]
    pub storage_credential_id: Option<String>,

    #[serde(default)]
    pub extraction: Option<ExtractionConfig>,

    pub prompt_template: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Per-stage timeout override in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Project coordinates for rich-text resolution and write-back.
    pub project_key: String,
    pub work_item_type_key: String,

    /// When set, the named field's rich text is resolved via a secondary
    /// project query before the AI call.
    #[serde(default)]
    pub rich_text_field_key: Option<String>,

    /// Extracted field key whose value is a file path to fetch through the
    /// storage credential. Requires `storage_credential_id`.
    #[serde(default)]
    pub file_path_field: Option<String>,

    /// Field on the work item that receives the AI response.
    pub write_back_field_key: String,
}

impl Task {
    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Active
    }
}

/// Read-only lookup of task configuration.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get(&self, task_id: &str) -> Result<Option<Task>>;
}

/// Read-only lookup of AI model configs and storage credentials.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn ai_model(&self, id: &str) -> Result<Option<AiModelConfig>>;
    async fn storage_credential(&self, id: &str) -> Result<Option<StorageCredential>>;
}

/// In-memory repository backed by a JSON configuration file.
pub struct InMemoryRepository {
    tasks: RwLock<HashMap<String, Task>>,
    ai_models: RwLock<HashMap<String, AiModelConfig>>,
    storage_credentials: RwLock<HashMap<String, StorageCredential>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            ai_models: RwLock::new(HashMap::new()),
            storage_credentials: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert_task(&self, task: Task) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    pub async fn insert_ai_model(&self, model: AiModelConfig) {
        self.ai_models.write().await.insert(model.id.clone(), model);
    }

    pub async fn insert_storage_credential(&self, credential: StorageCredential) {
        self.storage_credentials
            .write()
            .await
            .insert(credential.id.clone(), credential);
    }

    pub async fn remove_ai_model(&self, id: &str) -> Option<AiModelConfig> {
        self.ai_models.write().await.remove(id)
    }

    pub async fn remove_storage_credential(&self, id: &str) -> Option<StorageCredential> {
        self.storage_credentials.write().await.remove(id)
    }

    /// Load tasks, models, and credentials from a JSON configuration file.
    pub async fn load_file(&self, path: &str) -> Result<()> {
        let content = tokio::fs::read_to_string(path).await?;
        let file: EngineConfigFile = serde_json::from_str(&content)?;

        for task in file.tasks {
            self.insert_task(task).await;
        }
        for model in file.ai_models {
            self.insert_ai_model(model).await;
        }
        for credential in file.storage_credentials {
            self.insert_storage_credential(credential).await;
        }

        Ok(())
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryRepository {
    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }
}

#[async_trait]
impl ConfigRepository for InMemoryRepository {
    async fn ai_model(&self, id: &str) -> Result<Option<AiModelConfig>> {
        Ok(self.ai_models.read().await.get(id).cloned())
    }

    async fn storage_credential(&self, id: &str) -> Result<Option<StorageCredential>> {
        Ok(self.storage_credentials.read().await.get(id).cloned())
    }
}

/// Shape of the JSON configuration file loaded at startup.
#[derive(Debug, Default, Deserialize)]
pub struct EngineConfigFile {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub ai_models: Vec<AiModelConfig>,
    #[serde(default)]
    pub storage_credentials: Vec<StorageCredential>,
}
