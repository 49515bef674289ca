use std::sync::Arc;
use std::time::Duration;

use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use itt_backend::api::{self, AppState};
use itt_backend::config::{self, Config};
use itt_backend::db::Database;
use itt_backend::metrics;
use itt_backend::rate_limit::RateLimiter;
use itt_backend::sweeper;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "itt_backend=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load();
    config::set_local_mode(config.local_mode);
    if config.local_mode {
        tracing::info!("Local mode enabled: rate limits are off");
    }
    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN is not set; admin routes are disabled");
    }

    metrics::register_metrics();

    let db = Database::new(&config.database_url)
        .await
        .expect("Failed to initialize database");
    let db = Arc::new(db);

    if config.expiry_sweep_secs > 0 {
        sweeper::spawn_expiry_sweeper(db.clone(), Duration::from_secs(config.expiry_sweep_secs));
    }

    let state = AppState::new(db, RateLimiter::new(), config.admin_token.as_deref());
    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("ITT backend listening on {addr}");
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
