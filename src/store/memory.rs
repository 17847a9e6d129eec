//! In-memory execution store for development and tests.

use super::{Execution, ExecutionFilter, ExecutionStore};
use crate::errors::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

pub struct MemoryExecutionStore {
    executions: RwLock<HashMap<String, Execution>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn upsert(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        executions.insert(execution.execution_id.clone(), execution.clone());
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<Execution>, StoreError> {
        let executions = self.executions.read().await;
        Ok(executions.get(execution_id).cloned())
    }

    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError> {
        let executions = self.executions.read().await;
        let mut matching: Vec<Execution> = executions
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(filter.effective_limit());
        Ok(matching)
    }
}
