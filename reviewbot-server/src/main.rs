use anyhow::Result;
use axum::{http::StatusCode, response::Json, routing::get, routing::post, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use reviewbot_core::{ReviewEngine, ReviewLimits};
use reviewbot_server::config::Config;
use reviewbot_server::db::{SqliteDb, SqliteRecordStore};
use reviewbot_server::github::GitHubClient;
use reviewbot_server::openai::OpenAiClient;
use reviewbot_server::webhook::{retry_review_handler, webhook_router};
use reviewbot_server::AppState;

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "reviewbot"
    })))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting PR review bot");

    let config =
        Config::from_env().expect("Failed to load configuration from environment variables");

    let github_client = Arc::new(GitHubClient::new(
        config.github_app_id,
        config.github_private_key,
    ));
    let openai_client = Arc::new(OpenAiClient::new(config.openai_api_key, config.openai_model));

    let db_path = config.state_dir.join("reviewbot-state.db");
    info!("Using state database: {}", db_path.display());
    let db = SqliteDb::new(&db_path).expect("Failed to initialize SQLite database");
    let store = Arc::new(SqliteRecordStore::new(Arc::new(db)));

    let limits = ReviewLimits {
        max_changes_per_file: config.max_file_changes,
        ..ReviewLimits::default()
    };

    let engine = Arc::new(ReviewEngine::new(
        github_client.clone(),
        openai_client,
        store,
        limits,
    ));

    let app_state = Arc::new(AppState {
        engine,
        github_client,
        webhook_secret: config.github_webhook_secret,
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/reviews/:owner/:repo/:pr_number/retry",
            post(retry_review_handler),
        )
        .merge(webhook_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state.clone());

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
