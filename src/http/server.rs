use std::time::Duration;

use axum::{
    Json, Router,
    routing::{get, post},
};
use http::{
    Method,
    header::{ACCEPT, CONTENT_TYPE},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tower_http::{classify::ServerErrorsFailureClass, timeout::TimeoutLayer};
use tower_http::cors::CorsLayer;
use tracing::Span;
use ulid::Ulid;

use crate::http::{
    context::WebContext,
    handle_executions::{
        handle_cancel_execution, handle_get_execution, handle_list_executions,
        handle_retry_execution, handle_task_stats,
    },
    handle_webhooks::{handle_trigger_manual, handle_webhook},
};

async fn handle_healthz() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

pub fn build_router(web_context: WebContext) -> Router {
    let router = Router::new()
        .route("/healthz", get(handle_healthz))
        .route("/webhooks/{task_id}", post(handle_webhook))
        .route("/tasks/{task_id}/trigger", post(handle_trigger_manual))
        .route("/tasks/{task_id}/stats", get(handle_task_stats))
        .route("/executions", get(handle_list_executions))
        .route("/executions/{execution_id}", get(handle_get_execution))
        .route(
            "/executions/{execution_id}/retry",
            post(handle_retry_execution),
        )
        .route(
            "/executions/{execution_id}/cancel",
            post(handle_cancel_execution),
        );

    let origins = [web_context.config.external_base.parse().unwrap()];

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &http::Request<_>| {
            // Extract trace context from headers if present
            let trace_id = request
                .headers()
                .get("x-trace-id")
                .and_then(|h| h.to_str().ok())
                .map(String::from)
                .unwrap_or_else(|| Ulid::new().to_string());

            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                trace_id = %trace_id,
                request_id = %Ulid::new(),
            )
        })
        .on_request(|request: &http::Request<_>, _span: &Span| {
            tracing::info!(
                "started processing request {} {}",
                request.method(),
                request.uri().path()
            );
        })
        .on_response(
            |response: &http::Response<_>, latency: Duration, _span: &Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis(),
                    "finished processing request"
                );
            },
        )
        .on_failure(
            |err: ServerErrorsFailureClass, latency: Duration, _span: &Span| {
                tracing::error!(
                    error = ?err,
                    latency_ms = latency.as_millis(),
                    "request failed"
                );
            },
        );

    router
        .layer((trace_layer, TimeoutLayer::new(Duration::from_secs(30))))
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([ACCEPT, CONTENT_TYPE]),
        )
        .with_state(web_context)
}
