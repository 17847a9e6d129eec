//! Background worker pool for queued executions.
//!
//! The worker follows a producer-consumer pattern: trigger surfaces push
//! `ExecutionWork` through the queue adapter, the worker pulls items and
//! hands each one to the orchestrator inside a spawned task. A semaphore
//! bounds how many executions run at once; shutdown waits for in-flight
//! executions by reacquiring every permit.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::queue_adapter::QueueAdapter;
use crate::store::ExecutionStatus;
use crate::tasks::{ExecutionWork, Orchestrator};

/// Worker errors following the error-fieldflow-<domain>-<number> format
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("error-fieldflow-worker-1 Queue adapter health check failed: adapter is not healthy")]
    QueueAdapterUnhealthy,

    #[error("error-fieldflow-worker-2 Semaphore acquisition failed: {0}")]
    SemaphoreError(String),
}

/// Counters for processed executions, shared with spawned tasks.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    pub total_processed: std::sync::atomic::AtomicU64,
    pub total_succeeded: std::sync::atomic::AtomicU64,
    pub total_failed: std::sync::atomic::AtomicU64,
    pub total_cancelled: std::sync::atomic::AtomicU64,
}

/// Execution worker pulling from the queue and driving the orchestrator.
pub struct ExecutionTask {
    adapter: Arc<dyn QueueAdapter<ExecutionWork>>,
    orchestrator: Arc<Orchestrator>,
    cancel_token: CancellationToken,
    semaphore: Arc<Semaphore>,
    metrics: Arc<WorkerMetrics>,
    max_concurrent: usize,
}

impl ExecutionTask {
    pub fn new(
        adapter: Arc<dyn QueueAdapter<ExecutionWork>>,
        orchestrator: Arc<Orchestrator>,
        cancel_token: CancellationToken,
        max_concurrent: usize,
    ) -> Self {
        Self {
            adapter,
            orchestrator,
            cancel_token,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            metrics: Arc::new(WorkerMetrics::default()),
            max_concurrent,
        }
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        self.metrics.clone()
    }

    /// Run the worker loop until the cancellation token fires.
    #[instrument(skip(self))]
    pub async fn run(self) -> Result<(), WorkerError> {
        info!(
            worker.max_concurrent = self.max_concurrent,
            "Execution worker started"
        );

        // Check adapter health before starting
        if !self.adapter.is_healthy().await {
            return Err(WorkerError::QueueAdapterUnhealthy);
        }

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Execution worker shutting down");
                    break;
                }
                work = self.adapter.pull() => {
                    if let Some(work) = work {
                        let work_for_ack = work.clone();
                        let processor = self.clone_for_processing();
                        let adapter = self.adapter.clone();
                        tokio::spawn(async move {
                            processor.process(work).await;
                            // Acknowledge work after processing (ignore errors)
                            let _ = adapter.ack(&work_for_ack).await;
                        });
                    }
                }
            }
        }

        // Wait for all concurrent executions to complete
        info!("Waiting for in-flight executions to complete");
        let _permits = self
            .semaphore
            .acquire_many(self.max_concurrent as u32)
            .await
            .map_err(|e| WorkerError::SemaphoreError(e.to_string()))?;

        info!(
            total_processed = self
                .metrics
                .total_processed
                .load(std::sync::atomic::Ordering::Relaxed),
            total_succeeded = self
                .metrics
                .total_succeeded
                .load(std::sync::atomic::Ordering::Relaxed),
            total_failed = self
                .metrics
                .total_failed
                .load(std::sync::atomic::Ordering::Relaxed),
            total_cancelled = self
                .metrics
                .total_cancelled
                .load(std::sync::atomic::Ordering::Relaxed),
            "Execution worker stopped"
        );

        Ok(())
    }

    /// Process a single queued execution under the concurrency limit.
    #[instrument(skip(self), fields(
        execution.id = %work.execution_id,
        task.id = %work.task_id,
    ))]
    async fn process(&self, work: ExecutionWork) {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("Failed to acquire semaphore permit");
                return;
            }
        };

        debug!("Processing queued execution");

        self.metrics
            .total_processed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        match self.orchestrator.run_execution(&work).await {
            Ok(ExecutionStatus::Success) => {
                self.metrics
                    .total_succeeded
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Ok(ExecutionStatus::Cancelled) => {
                self.metrics
                    .total_cancelled
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Ok(_) => {
                self.metrics
                    .total_failed
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Err(e) => {
                // The execution record itself could not be loaded or saved;
                // the orchestrator has already logged the stage detail.
                error!(error = %e, "Execution processing failed");
                self.metrics
                    .total_failed
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
    }

    /// Clone components needed for concurrent processing
    fn clone_for_processing(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            orchestrator: self.orchestrator.clone(),
            cancel_token: self.cancel_token.clone(),
            semaphore: self.semaphore.clone(),
            metrics: self.metrics.clone(),
            max_concurrent: self.max_concurrent,
        }
    }
}
