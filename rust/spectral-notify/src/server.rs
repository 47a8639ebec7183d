//! HTTP server setup and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::database::{Database, IdempotencyStore};
use crate::gateway;
use crate::instance::InstanceDirectory;
use crate::logging::OpTimer;
use crate::{log_banner, log_init_step, log_init_warning, log_success, AppState};

/// SpectralNotify version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create the application with all routes and middleware.
pub async fn create_app(config: AppConfig) -> anyhow::Result<Router> {
    let overall_timer = OpTimer::new("server", "create_app");

    log_banner!(
        format!("📡 SpectralNotify v{}", VERSION),
        format!("Database: {}", config.database.path)
    );

    // [1/4] Open and migrate the database
    let step_timer = OpTimer::new("server", "database");
    let db = Database::open(&config.database.path).await?;
    log_init_step!(1, 4, "Database", format!("🗄️  {}", db.path().display()));
    step_timer.finish();

    // [2/4] Instance directory
    let step_timer = OpTimer::new("server", "directory");
    let config = Arc::new(config);
    let directory = Arc::new(InstanceDirectory::new(db.clone(), config.clone()));
    let (tasks, workflows) = directory.entity_counts().await?;
    log_init_step!(
        2,
        4,
        "Instance Directory",
        format!("📇 {tasks} tasks, {workflows} workflows registered")
    );
    step_timer.finish();

    // [3/4] Idempotency store and write protections
    let step_timer = OpTimer::new("server", "idempotency");
    let idempotency = IdempotencyStore::new(
        db,
        config.idempotency.ttl_secs,
        config.idempotency.reap_batch,
    );
    let write_limiter = gateway::rate_limit::build_write_limiter(&config.gateway);
    if config.auth.api_key.is_none() {
        log_init_warning!("No API key configured; write endpoints are unauthenticated");
    }
    log_init_step!(
        3,
        4,
        "Write Protection",
        format!(
            "🔐 API key {} | idempotency TTL {}s | rate limit {}",
            if config.auth.api_key.is_some() {
                "✓"
            } else {
                "✗"
            },
            config.idempotency.ttl_secs,
            if write_limiter.is_some() {
                "on"
            } else {
                "off"
            }
        )
    );
    step_timer.finish();

    // Create app state
    let state = AppState {
        config: config.clone(),
        directory,
        idempotency,
        write_limiter,
    };

    // [4/4] Build router with middleware.
    //
    // The write timeout wraps only the write routes; WebSocket upgrades
    // and reads stay outside it.
    let step_timer = OpTimer::new("server", "router");
    let write_routes = gateway::write_router()
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            gateway::rate_limit::write_rate_limit,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            gateway::auth::require_api_key,
        ))
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.server.write_timeout_secs),
        ));

    let app = gateway::read_router()
        .merge(write_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    log_init_step!(4, 4, "Router", "🌐 Routes + middleware configured");
    step_timer.finish();

    overall_timer.finish();
    log_success!("SpectralNotify broker created successfully");
    tracing::info!("");

    Ok(app)
}
