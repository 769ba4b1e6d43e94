//! tempforms server entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, http::HeaderValue, middleware};
use tempforms_api::{AppState, global_rate_limit, health_router, router as api_router};
use tempforms_common::{AppError, Clock, Config, StorageBackend, SystemClock};
use tempforms_core::Argon2Hasher;
use tempforms_db::{DatabaseStore, JsonFileStore, LifecycleStore, RedisStore};
use tempforms_queue::{ReclamationScheduler, SchedulerConfig};
use tokio::signal;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// How often stale rate limit windows are purged.
const RATE_LIMIT_CLEANUP_EVERY: Duration = Duration::from_secs(5 * 60);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
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
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tempforms=debug,tower_http=debug".into());
    let json = std::env::var("TEMPFORMS_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Build the configured store and run its startup hook.
async fn open_store(config: &Config) -> Result<Arc<dyn LifecycleStore>, AppError> {
    let store: Arc<dyn LifecycleStore> = match config.storage.backend {
        StorageBackend::Database => {
            let db_config = config.database.as_ref().ok_or_else(|| {
                AppError::Config("storage.backend is database but [database] is missing".into())
            })?;
            let db = tempforms_db::init(db_config).await?;
            Arc::new(DatabaseStore::new(Arc::new(db)))
        }
        StorageBackend::Json => Arc::new(JsonFileStore::new(config.storage.data_dir.clone())),
        StorageBackend::Redis => {
            let redis = config.redis.as_ref().ok_or_else(|| {
                AppError::Config("storage.backend is redis but [redis] is missing".into())
            })?;
            Arc::new(RedisStore::from_url(&redis.url, redis.prefix.clone())?)
        }
    };

    store.init().await?;
    info!(
        backend = config.storage.backend.as_str(),
        native_expiry = store.has_native_expiry(),
        "Storage ready"
    );
    Ok(store)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting tempforms server...");

    // Load configuration
    let config = Config::load()?;

    let store = open_store(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let mut state = AppState::new(Arc::clone(&store), Arc::clone(&clock), Arc::new(Argon2Hasher))
        .with_rate_limiting(config.rate_limit.enabled)
        .with_trusted_proxy(config.server.trust_proxy_headers);

    // Stores with native expiry need no sweep
    let mut background = Vec::new();
    if !store.has_native_expiry() {
        let scheduler = ReclamationScheduler::new(
            Arc::clone(&store),
            clock,
            SchedulerConfig::from(&config.lifecycle),
        );
        state = state.with_scheduler(scheduler.clone());
        background.extend(scheduler.spawn());
        info!(
            interval_secs = config.lifecycle.sweep_interval_secs,
            "Reclamation scheduler started"
        );
    }

    if config.rate_limit.enabled {
        background.push(state.rate_limiter.spawn_cleanup(RATE_LIMIT_CLEANUP_EVERY));
    }

    let api = api_router(&state).layer(middleware::from_fn_with_state(
        state.clone(),
        global_rate_limit,
    ));

    let app = Router::new()
        .merge(health_router())
        .nest("/api", api)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.server.allowed_origins))
        .with_state(state);

    // Start server with graceful shutdown
    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    for task in background {
        task.abort();
    }
    if let Err(e) = store.shutdown().await {
        error!(error = %e, "Store shutdown failed");
    }

    info!("Server shutdown complete");
    Ok(())
}
