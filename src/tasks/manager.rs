//! Helpers for spawning cancellable background tasks.

use std::future::Future;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info};

/// Spawn a background task with cancellation support
///
/// The task is tracked so shutdown can wait for it; an unexpected task
/// failure cancels the shared token and takes the application down with
/// it.
pub fn spawn_cancellable_task<F, Fut>(
    tracker: &TaskTracker,
    app_token: CancellationToken,
    task_builder: F,
) where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    info!("Starting cancellable background task");

    let task_token = app_token.clone();
    let cancel_token = app_token.clone();

    tracker.spawn(async move {
        tokio::select! {
            result = task_builder(cancel_token.clone()) => {
                match result {
                    Ok(()) => {
                        info!("Background task completed successfully");
                    }
                    Err(e) => {
                        error!(error = ?e, "Background task failed unexpectedly");
                        // Trigger application shutdown on task failure
                        task_token.cancel();
                    }
                }
            }
            () = task_token.cancelled() => {
                info!("Background task shutting down gracefully");
            }
        }
    });
}
