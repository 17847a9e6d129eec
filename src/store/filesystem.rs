//! Filesystem execution store, one JSON file per execution.
//!
//! Layout: `<base>/<task_id>/<execution_id>.json`. Good enough for a
//! single-node deployment; the Postgres store is the multi-node option.

use super::{Execution, ExecutionFilter, ExecutionStore};
use crate::errors::StoreError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub struct FilesystemExecutionStore {
    base_directory: PathBuf,
}

impl FilesystemExecutionStore {
    pub fn new<P: AsRef<Path>>(base_directory: P) -> Self {
        Self {
            base_directory: base_directory.as_ref().to_path_buf(),
        }
    }

    fn task_directory(&self, task_id: &str) -> PathBuf {
        self.base_directory.join(task_id)
    }

    fn execution_file_path(&self, task_id: &str, execution_id: &str) -> PathBuf {
        self.task_directory(task_id)
            .join(format!("{}.json", execution_id))
    }

    fn io_error(operation: &str, err: std::io::Error) -> StoreError {
        StoreError::FilesystemFailed {
            operation: operation.to_string(),
            details: err.to_string(),
        }
    }

    /// Scan all task directories for an execution file.
    async fn find_execution_file(&self, execution_id: &str) -> Result<Option<PathBuf>, StoreError> {
        if !self.base_directory.exists() {
            return Ok(None);
        }

        let mut task_entries = tokio::fs::read_dir(&self.base_directory)
            .await
            .map_err(|e| Self::io_error("read_dir", e))?;
        while let Some(task_entry) = task_entries
            .next_entry()
            .await
            .map_err(|e| Self::io_error("read_dir", e))?
        {
            let file_type = task_entry
                .file_type()
                .await
                .map_err(|e| Self::io_error("file_type", e))?;
            if !file_type.is_dir() {
                continue;
            }

            let candidate = task_entry.path().join(format!("{}.json", execution_id));
            if candidate.exists() {
                return Ok(Some(candidate));
            }
        }

        Ok(None)
    }

    async fn read_execution(path: &Path) -> Result<Execution, StoreError> {
        let json_content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Self::io_error("read", e))?;
        serde_json::from_str(&json_content).map_err(|e| StoreError::SerializationFailed {
            details: e.to_string(),
        })
    }

    async fn load_directory(
        &self,
        dir_path: &Path,
        filter: &ExecutionFilter,
        results: &mut Vec<Execution>,
    ) -> Result<(), StoreError> {
        let mut entries = tokio::fs::read_dir(dir_path)
            .await
            .map_err(|e| Self::io_error("read_dir", e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Self::io_error("read_dir", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            match Self::read_execution(&path).await {
                Ok(execution) => {
                    if filter.matches(&execution) {
                        results.push(execution);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        file.path = %path.display(),
                        error = %e,
                        "Skipping unreadable execution record"
                    );
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for FilesystemExecutionStore {
    async fn upsert(&self, execution: &Execution) -> Result<(), StoreError> {
        let dir_path = self.task_directory(&execution.task_id);
        tokio::fs::create_dir_all(&dir_path)
            .await
            .map_err(|e| Self::io_error("create_dir_all", e))?;

        let file_path = self.execution_file_path(&execution.task_id, &execution.execution_id);
        let json_content = serde_json::to_string_pretty(execution).map_err(|e| {
            StoreError::SerializationFailed {
                details: e.to_string(),
            }
        })?;
        tokio::fs::write(&file_path, json_content)
            .await
            .map_err(|e| Self::io_error("write", e))?;

        tracing::debug!(
            execution.id = %execution.execution_id,
            task.id = %execution.task_id,
            file.path = %file_path.display(),
            "Saved execution record to filesystem"
        );

        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<Execution>, StoreError> {
        let file_path = match self.find_execution_file(execution_id).await? {
            Some(path) => path,
            None => return Ok(None),
        };
        Ok(Some(Self::read_execution(&file_path).await?))
    }

    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError> {
        let mut results = Vec::new();

        if let Some(task_id) = &filter.task_id {
            let dir_path = self.task_directory(task_id);
            if dir_path.exists() {
                self.load_directory(&dir_path, filter, &mut results).await?;
            }
        } else if self.base_directory.exists() {
            let mut task_entries = tokio::fs::read_dir(&self.base_directory)
                .await
                .map_err(|e| Self::io_error("read_dir", e))?;
            while let Some(task_entry) = task_entries
                .next_entry()
                .await
                .map_err(|e| Self::io_error("read_dir", e))?
            {
                let file_type = task_entry
                    .file_type()
                    .await
                    .map_err(|e| Self::io_error("file_type", e))?;
                if file_type.is_dir() {
                    self.load_directory(&task_entry.path(), filter, &mut results)
                        .await?;
                }
            }
        }

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        results.truncate(filter.effective_limit());
        Ok(results)
    }
}
