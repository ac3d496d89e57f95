//! Signs in and mirrors one user's board, logging every change pushed by the
//! server. Reconnects after the socket drops.

use anyhow::Context;
use chrono::Utc;
use std::time::Duration;
use taskboard::sync::{DashboardStats, SyncClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,taskboard=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let base_url =
        std::env::var("TASKBOARD_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let email = std::env::var("TASKBOARD_EMAIL").context("TASKBOARD_EMAIL must be set")?;
    let password = std::env::var("TASKBOARD_PASSWORD").context("TASKBOARD_PASSWORD must be set")?;

    let client = SyncClient::login(&base_url, &email, &password).await?;

    loop {
        match client.run().await {
            Ok(reason) => tracing::info!("Socket closed: {}", reason),
            Err(e) => tracing::warn!("Socket error: {:#}", e),
        }

        {
            let store = client.store();
            let store = store.lock().await;
            let stats = DashboardStats::compute(store.tasks(), store.viewer(), Utc::now());
            tracing::info!(
                "Board: {} assigned, {} overdue, {} created, {} unread",
                stats.assigned,
                stats.overdue,
                stats.created,
                store.unread_count()
            );
        }

        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
