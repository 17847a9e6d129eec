//! Work queue abstraction between the trigger surfaces and the worker pool.
//!
//! Webhook handlers, manual triggers, and retries all push `ExecutionWork`
//! through a `QueueAdapter`; the worker pulls from the other end. The trait
//! keeps the two sides decoupled so another backend can replace the
//! in-memory channel without touching either side.

use anyhow::Result;
use async_trait::async_trait;

mod mpsc;

pub use mpsc::MpscQueueAdapter;

/// Queue interface shared by all backends.
///
/// `T` is the work item type, `Send + Sync` so items can cross task
/// boundaries. Delivery is at-most-once for the in-memory implementation.
#[async_trait]
pub trait QueueAdapter<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Pull the next work item, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and drained.
    async fn pull(&self) -> Option<T>;

    /// Push a work item, waiting for space if the queue is full.
    async fn push(&self, work: T) -> Result<()>;

    /// Confirm processing of a pulled item.
    ///
    /// No-op by default; backends with at-least-once delivery override it.
    async fn ack(&self, _item: &T) -> Result<()> {
        Ok(())
    }

    /// Push without blocking; errors immediately when the queue is full.
    async fn try_push(&self, work: T) -> Result<()> {
        self.push(work).await
    }

    /// Current number of queued items, if the backend can report it.
    async fn depth(&self) -> Option<usize> {
        None
    }

    /// Whether the queue can still accept and deliver work.
    async fn is_healthy(&self) -> bool {
        true
    }
}
