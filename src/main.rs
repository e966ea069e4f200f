//! AI Tutor - an adaptive learning backend

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ai_tutor::{
    api::{self, AppState},
    config::Config,
    db,
    services::AiService,
};

/// Interval between sweeps of rate-limit windows and expired tokens
const CLEANUP_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before logging so the configured level applies
    let config = Config::load_with_env(Path::new("config.yml"))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting {} v{}...", config.app.name, config.app.version);
    if config.uses_default_secret() {
        tracing::warn!("Using the built-in secret key; set SECRET_KEY before deploying");
    }

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    let applied = db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed ({} applied)", applied);

    let ai = Arc::new(AiService::from_config(&config.ai)?);
    tracing::info!(model = %config.ai.model, available = ai.is_available(), "AI tutor initialized");

    let state = AppState::new(pool, &config, ai);

    // Periodic cleanup of limiter windows and expired tokens
    {
        let limiter = state.rate_limiter.clone();
        let users = state.user_service.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(CLEANUP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                limiter.cleanup().await;
                match users.cleanup_expired_tokens().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "Expired tokens removed"),
                    Err(e) => tracing::warn!("Token cleanup failed: {}", e),
                }
            }
        });
    }

    let app = api::build_router(state, &config.server);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
