//! In-memory queue adapter backed by a bounded Tokio MPSC channel.
//!
//! No persistence: queued work is lost on restart, and unfinished
//! executions stay in their last stored status. Fits single-instance
//! deployments where the execution store is the durability layer.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::trace;

use super::QueueAdapter;
use crate::errors::QueueError;

/// Bounded channel wrapped for shared pull access.
///
/// The receiver sits behind an `Arc<Mutex>` so clones of the adapter can
/// compete for items; the sender is freely cloneable for producers.
pub struct MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    sender: mpsc::Sender<T>,
}

impl<T> MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    /// Create an adapter with the given buffer size. `push` blocks once
    /// the buffer is full; `try_push` errors instead.
    pub fn new(buffer: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer);
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            sender,
        }
    }

    /// Wrap existing channel halves, for tests that need direct control.
    pub fn from_channel(sender: mpsc::Sender<T>, receiver: mpsc::Receiver<T>) -> Self {
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            sender,
        }
    }

    /// Clone of the sender for producer tasks.
    pub fn sender(&self) -> mpsc::Sender<T> {
        self.sender.clone()
    }

    pub fn max_capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

#[async_trait]
impl<T> QueueAdapter<T> for MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    async fn pull(&self) -> Option<T> {
        let mut receiver = self.receiver.lock().await;
        let result = receiver.recv().await;
        trace!(has_item = result.is_some(), "Pulled item from MPSC queue");
        result
    }

    async fn push(&self, work: T) -> Result<()> {
        self.sender
            .send(work)
            .await
            .map_err(|e| QueueError::MpscOperationFailed {
                operation: "send".to_string(),
                details: e.to_string(),
            })?;
        trace!("Pushed item to MPSC queue");
        Ok(())
    }

    async fn try_push(&self, work: T) -> Result<()> {
        self.sender.try_send(work).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::CapacityExceeded {
                queue_type: "mpsc".to_string(),
                capacity: self.sender.max_capacity(),
            },
            mpsc::error::TrySendError::Closed(_) => QueueError::MpscOperationFailed {
                operation: "try_send".to_string(),
                details: "Channel closed".to_string(),
            },
        })?;
        Ok(())
    }

    async fn depth(&self) -> Option<usize> {
        // Approximate: items in flight between sender and receiver.
        Some(self.sender.max_capacity() - self.sender.capacity())
    }

    async fn is_healthy(&self) -> bool {
        !self.sender.is_closed()
    }
}

impl<T> Clone for MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
            sender: self.sender.clone(),
        }
    }
}
