use anyhow::Result;
use fieldflow::{
    config::{Config, StoreBackend},
    http::{context::WebContext, server::build_router},
    model::InMemoryRepository,
    project_client::{PluginTokenProvider, ProjectClient},
    queue_adapter::MpscQueueAdapter,
    store::{
        ExecutionStore, FilesystemExecutionStore, MemoryExecutionStore, PostgresExecutionStore,
    },
    tasks::{
        ExecutionTask, ExecutionWork, Orchestrator, OrchestratorConfig,
        manager::spawn_cancellable_task,
    },
};
use sqlx::postgres::PgPoolOptions;
use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

#[tokio::main]
async fn main() -> Result<()> {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("dev").to_string();

    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{version}");
            std::process::exit(0);
        }
    });

    let config = Config::new()?;

    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "fieldflow=info,tower_http=info,sqlx=warn".into()),
    );

    // Configure output format based on environment
    let fmt_layer = if std::env::var("JSON_LOGS").is_ok() {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!(version = %version, "Starting fieldflow application");

    // Select the execution store backend
    let store: Arc<dyn ExecutionStore> = match config.store_backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory execution store");
            Arc::new(MemoryExecutionStore::new())
        }
        StoreBackend::Filesystem => {
            // Presence of the directory is enforced by config validation
            let base_dir = config
                .store_directory
                .as_ref()
                .expect("Filesystem store directory should be validated in config");
            tracing::info!("Using filesystem execution store at: {}", base_dir);
            Arc::new(FilesystemExecutionStore::new(base_dir))
        }
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_ref()
                .expect("Database URL should be validated in config");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await?;
            let store = PostgresExecutionStore::new(Arc::new(pool));
            store.initialize_schema().await?;
            tracing::info!("Using PostgreSQL execution store");
            Arc::new(store)
        }
    };

    // Load task, model, and credential configuration
    let repository = Arc::new(InMemoryRepository::new());
    if let Some(tasks_file) = &config.tasks_file {
        repository.load_file(tasks_file).await?;
        tracing::info!(path = %tasks_file, "Loaded task configuration");
    } else {
        tracing::warn!("TASKS_FILE not set, starting with no configured tasks");
    }

    let http_client = Arc::new(
        reqwest::Client::builder()
            .timeout(*config.http_client_timeout.as_ref())
            .build()?,
    );

    let token_provider = Arc::new(PluginTokenProvider::new(
        http_client.clone(),
        config.project_api_base.clone(),
        config.project_plugin_id.clone(),
        config.project_plugin_secret.clone(),
    ));
    let project_client = Arc::new(ProjectClient::new(
        http_client.clone(),
        config.project_api_base.clone(),
        config.project_user_key.clone(),
        token_provider,
    ));

    let queue = Arc::new(MpscQueueAdapter::<ExecutionWork>::new(
        *config.queue_capacity.as_ref(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        repository.clone(),
        repository.clone(),
        store,
        project_client,
        http_client,
        queue.clone(),
        OrchestratorConfig {
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
            default_stage_timeout_ms: config.default_stage_timeout_ms,
        },
    ));

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    // Start the execution worker pool
    {
        let worker = ExecutionTask::new(
            queue.clone(),
            orchestrator.clone(),
            token.clone(),
            *config.max_concurrent.as_ref(),
        );

        spawn_cancellable_task(&tracker, token.clone(), |cancel_token| async move {
            tokio::select! {
                result = worker.run() => {
                    if let Err(e) = result {
                        tracing::error!(error = ?e, "Execution worker failed");
                        Err(anyhow::anyhow!(e))
                    } else {
                        Ok(())
                    }
                }
                _ = cancel_token.cancelled() => {
                    tracing::info!("Execution worker cancelled");
                    Ok(())
                }
            }
        });
    }

    let web_context = WebContext::new(config.clone(), orchestrator);
    let router = build_router(web_context);
    let port = *config.http_port.as_ref();
    let external_base = config.external_base.clone();

    // Setup signal handler
    {
        let signal_tracker = tracker.clone();
        let signal_token = token.clone();

        tracing::info!("Starting signal handler task");
        tokio::spawn(async move {
            let ctrl_c = async {
                signal::ctrl_c()
                    .await
                    .expect("failed to install Ctrl+C handler");
            };

            #[cfg(unix)]
            let terminate = async {
                signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to install signal handler")
                    .recv()
                    .await;
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                () = signal_token.cancelled() => {
                    tracing::info!("Signal handler task shutting down gracefully");
                },
                _ = terminate => {
                    tracing::info!("Received SIGTERM signal, initiating shutdown");
                },
                _ = ctrl_c => {
                    tracing::info!("Received Ctrl+C signal, initiating shutdown");
                },
            }

            signal_tracker.close();
            signal_token.cancel();
            tracing::info!("Signal handler task completed");
        });
    }

    // Start HTTP server
    spawn_cancellable_task(&tracker, token.clone(), move |cancel_token| {
        let external_base = external_base.clone();
        let version = version.clone();

        async move {
            let listener = TcpListener::bind(format!("0.0.0.0:{}", port))
                .await
                .map_err(|e| anyhow::anyhow!("Failed to bind to port {}: {}", port, e))?;

            tracing::info!(port = port, external_base = %external_base, version = %version, "HTTP server listening");

            let shutdown_token = cancel_token.clone();
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                })
                .await
                .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

            Ok(())
        }
    });

    // Wait for all tasks to complete
    tracing::info!("Waiting for all tasks to complete...");
    tracker.wait().await;

    tracing::info!("All tasks completed, application shutting down");

    Ok(())
}
