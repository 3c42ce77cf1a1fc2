//! DocChat API Gateway
//!
//! The entry point for all external API requests.
//! Handles:
//! - Document registration and listing
//! - Conversations over selected documents
//! - Chat turns streamed as Server-Sent Events
//! - Observability (logging, request metrics, Prometheus exporter)

mod handlers;
mod middleware;

use axum::{
    routing::{get, post},
    Router,
};
use docchat_common::{
    config::{AppConfig, ObservabilityConfig},
    db::DbPool,
    embeddings::create_embedder,
    llm::create_llm_client,
    metrics::{self, LATENCY_BUCKETS, TURN_BUCKETS},
    storage::create_object_store,
    ObjectStore, Repository,
};
use docchat_context::{ChatEngineFactory, ChatTurn};
use docchat_index::{create_vector_store, IndexBuilder, VectorStore};
use docchat_ingestion::DocumentFetcher;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub repo: Repository,
    pub objects: Arc<dyn ObjectStore>,
    pub vector_store: Arc<dyn VectorStore>,
    pub turns: Arc<ChatTurn>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load()?);

    // Initialize tracing
    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting DocChat API Gateway v{}",
        docchat_common::VERSION
    );

    // Initialize metrics
    install_metrics_exporter(&config.observability)?;
    metrics::register_metrics();

    // Initialize database connection
    let db = DbPool::new(&config.database).await?;
    if config.database.run_migrations {
        db.migrate().await?;
    }
    let repo = Repository::new(db.clone());

    // Retrieval stack
    let objects = create_object_store(&config.storage).await?;
    let embedder = create_embedder(&config.embedding)?;
    let vector_store = create_vector_store(&config.vector_store, Some(&db))?;
    let llm = create_llm_client(&config.llm)?;
    let fetcher = Arc::new(DocumentFetcher::from_config(objects.clone(), &config)?);
    let builder = IndexBuilder::from_config(
        &config,
        objects.clone(),
        vector_store.clone(),
        embedder,
        fetcher,
    );
    let factory = ChatEngineFactory::new(Arc::new(builder), llm, config.retrieval.clone());
    let turns = ChatTurn::new(Arc::new(factory), Arc::new(repo.clone()), config.chat.mode);
    info!(mode = config.chat.mode.as_str(), "Chat engine configured");

    let state = AppState {
        config: config.clone(),
        db,
        repo,
        objects,
        vector_store,
        turns: Arc::new(turns),
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_timeout = config.shutdown_timeout();
    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline(shutdown_timeout) => {
            warn!(timeout_secs = shutdown_timeout.as_secs(), "Open streams did not drain in time");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Log level and format come from configuration; `RUST_LOG` overrides the level
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Serve Prometheus metrics on their own port; port 0 disables the exporter
fn install_metrics_exporter(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], config.metrics_port)))
        .set_buckets_for_metric(
            Matcher::Suffix("request_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("chat_turn_duration_seconds".to_string()),
            TURN_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("index_build_duration_seconds".to_string()),
            TURN_BUCKETS,
        )?
        .install()?;

    info!(port = config.metrics_port, "Metrics exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Document endpoints
        .route(
            "/documents",
            post(handlers::documents::create_document).get(handlers::documents::list_documents),
        )
        // Conversation endpoints
        .route("/conversations", post(handlers::conversations::create_conversation))
        .route(
            "/conversations/{id}",
            get(handlers::conversations::get_conversation)
                .delete(handlers::conversations::delete_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            post(handlers::messages::send_message),
        );

    Router::new()
        .nest("/v1", api_routes)
        .layer(axum::middleware::from_fn(middleware::track_metrics))
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(GlobalConcurrencyLimitLayer::new(state.config.server.max_concurrent_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Resolves once shutdown was requested and the drain period has passed
async fn drain_deadline(timeout: Duration) {
    shutdown_signal().await;
    tokio::time::sleep(timeout).await;
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
