use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use taskboard::{
    db::{create_pool, run_migrations},
    routes::create_router,
    state::{AppState, Config},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,taskboard=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    tracing::info!("Connecting to database...");
    let db = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to the database")?;

    tracing::info!("Running migrations...");
    run_migrations(&db).await.context("failed to run migrations")?;

    let state = AppState::new(db, config.clone());

    // Keyed limiters keep an entry per client address until pruned
    let auth_limiter = state.auth_limiter.clone();
    let api_limiter = state.api_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            auth_limiter.retain_recent();
            api_limiter.retain_recent();
        }
    });

    let app = create_router(state)?;

    let addr = config.bind_addr();
    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("WebSocket endpoint at ws://{}/api/ws", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
