use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courseflow_server::{
    config, db, handlers, health,
    metrics::{self as app_metrics, MetricsRecorder},
    middleware,
    queue::{IntakeQueue, RedisQueue},
    worker::WorkerSupervisor,
};

#[derive(Clone, FromRef)]
struct AppState {
    db_pool: db::DbPool,
    queue: Arc<dyn IntakeQueue>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            "debug".to_string()
        }

        #[cfg(not(debug_assertions))]
        {
            "warn".to_string()
        }
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting CourseFlow server");

    let metrics_recorder = MetricsRecorder::new();
    let metrics_handle = metrics_recorder.handle().clone();
    tracing::info!("Metrics initialized");

    let db_pool = db::init_db_default().await?;
    tracing::info!("Database initialized");

    let queue_config = config::QueueConfig::default();
    let redis_queue = RedisQueue::connect(&queue_config).await?;
    let queue: Arc<dyn IntakeQueue> = Arc::new(redis_queue);
    tracing::info!(
        redis_host = %queue_config.redis_host,
        redis_port = queue_config.redis_port,
        "Intake queue connected"
    );

    let worker_config = config::WorkerConfig::default();
    let supervisor = WorkerSupervisor::start(db_pool.clone(), queue.clone(), worker_config).await?;
    tracing::info!("Allocator workers started");

    let app_state = AppState {
        db_pool: db_pool.clone(),
        queue: queue.clone(),
    };

    let metrics_router = if config::metrics_enabled() {
        Router::new()
            .route("/metrics", get(app_metrics::metrics_handler))
            .with_state(metrics_handle)
    } else {
        Router::new()
    };

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::readiness))
        .route("/enroll", post(handlers::enroll))
        .route("/courses", get(handlers::get_courses))
        .route("/metrics/json", get(app_metrics::metrics_json))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::logging::log_requests_middleware))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let port = config::server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.shutdown().await;
    tracing::info!("Clean shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining allocator workers");
}
