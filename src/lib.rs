//! # fieldflow
//!
//! fieldflow is a task execution engine built in Rust that turns webhook
//! events into AI-analyzed field updates. A configured task binds a webhook
//! to a pipeline: extract fields from the event payload, optionally fetch a
//! referenced file from a network store, optionally resolve a rich-text
//! field through the project API, run an AI analysis over the assembled
//! prompt, and write the answer back to the originating work item. Every
//! run is recorded as a durable execution with per-stage timestamps.
//!
//! ## Architecture Overview
//!
//! The service is built around several core components:
//!
//! ### Execution Pipeline
//! - **Triggers**: webhook deliveries and manual API triggers create
//!   pending executions and queue them
//! - **Stages**: extraction, file fetch, rich-text resolution, AI
//!   analysis, and write-back, each persisted as it completes
//! - **Retry policy**: transient stage errors (network, rate limit,
//!   timeout) back off exponentially; terminal executions can be retried
//!   as new executions replaying the original payload
//!
//! ### AI Gateway
//! - Adapters for OpenAI-compatible, Gemini, and Claude wire formats
//! - Optional per-model proxy routing and multimodal image attachments
//! - Token usage recorded from provider responses, estimated otherwise
//!
//! ### Storage
//! - Execution records in memory, on the filesystem, or in PostgreSQL
//! - Task, model, and credential configuration loaded from a JSON file
//!
//! ## Configuration
//!
//! The service is configured via environment variables. Key variables include:
//! - `HTTP_PORT`: HTTP server port
//! - `PROJECT_API_BASE`: Project API base URL
//! - `PROJECT_PLUGIN_ID` / `PROJECT_PLUGIN_SECRET`: Plugin credentials
//! - `STORE_BACKEND`: Execution store backend (memory, filesystem, postgres)
//! - `TASKS_FILE`: Path to the task configuration file
//!
//! ## Error Handling
//!
//! All error strings use the format: `error-fieldflow-<domain>-<number> <message>: <details>`

/// AI provider gateway with per-provider request adapters.
///
/// Dispatches analysis calls to OpenAI-compatible, Gemini, or Claude wire
/// formats, handles proxy routing, timeouts, and multimodal attachment
/// assembly, and normalizes token usage reporting.
pub mod ai;

/// Configuration management for the fieldflow service.
///
/// Contains configuration structures and loading logic for the HTTP
/// server, worker pool, execution store, and project API access.
/// Configuration is loaded from environment variables.
pub mod config;

/// Error taxonomy shared across the service.
///
/// Per-domain error enums, the transient/terminal `ErrorKind`
/// classification driving the retry policy, and stage attribution.
pub mod errors;

/// Field extraction from webhook payloads.
///
/// Path expression evaluation, single and multi-field extraction modes,
/// and prompt template rendering. Pure functions throughout.
pub mod extraction;

/// HTTP server and API endpoints for the fieldflow service.
///
/// Provides the webhook trigger endpoint and the execution management
/// API for listing, inspecting, retrying, and cancelling executions.
pub mod http;

/// Task, AI model, and storage credential configuration model.
///
/// Read-only repositories consumed by the execution engine; configuration
/// is produced by an external management layer.
pub mod model;

/// Authenticated client for the project collaboration API.
///
/// Plugin token acquisition, work item field queries, field updates, and
/// attachment downloads.
pub mod project_client;

/// Queue adapter abstractions for different queue backends.
///
/// Provides abstractions for execution work queues with an in-memory
/// MPSC channel implementation.
pub mod queue_adapter;

/// Rich-text field resolution via the project API.
///
/// Parses rich-text field values into plain text, HTML, and image
/// references for multimodal analysis.
pub mod richtext;

/// Network file store clients.
///
/// Protocol-specific clients for probing and fetching files over HTTP,
/// WebDAV, FTP, and host-mounted SMB/NFS shares.
pub mod storage_client;

/// Execution record storage.
///
/// The `Execution` record model, status state machine, and store
/// implementations for memory, filesystem, and PostgreSQL backends.
pub mod store;

/// Background task management and execution.
///
/// The orchestrator that drives the execution pipeline and the worker
/// pool that pulls queued work under a concurrency limit.
pub mod tasks;

/// Write-back of AI results to work item fields.
pub mod writeback;
