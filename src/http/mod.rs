//! HTTP surface of the execution engine.
//!
//! Built on Axum. Exposes the webhook trigger endpoint, the manual
//! trigger, and the execution management API:
//!
//! - `POST /webhooks/{task_id}` - webhook trigger, responds 202 before
//!   the pipeline runs
//! - `POST /tasks/{task_id}/trigger` - manual trigger with a caller
//!   payload
//! - `GET /tasks/{task_id}/stats` - per-task execution statistics
//! - `GET /executions` - list executions, filterable by task and status
//! - `GET /executions/{execution_id}` - full execution record
//! - `POST /executions/{execution_id}/retry` - retry as a new execution
//! - `POST /executions/{execution_id}/cancel` - cooperative cancellation
//! - `GET /healthz` - liveness probe

/// HTTP context and application state management.
pub mod context;

pub(crate) mod errors;
pub(crate) mod handle_executions;
pub(crate) mod handle_webhooks;

/// HTTP server configuration and setup.
pub mod server;

pub use context::*;
pub use server::*;
