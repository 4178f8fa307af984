// Main entry point for the notifier worker

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use notifier_core::kernel::cycle::run_cycle;
use notifier_core::kernel::queue::{subjects, NatsQueue, Outbound};
use notifier_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,notifier_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Search & Rescue notifier");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Connect to NATS
    let nats_client = async_nats::connect(&config.nats_url)
        .await
        .context("Failed to connect to NATS")?;
    let outbound = Outbound::new(Arc::new(NatsQueue::new(nats_client.clone())));

    let mut triggers = nats_client
        .subscribe(subjects::CYCLE)
        .await
        .context("Failed to subscribe to cycle subject")?;
    tracing::info!(subject = subjects::CYCLE, "subscribed to trigger subject");

    // Interval fallback: a lost continuation message must not strand a
    // backlog.
    let mut ticker = tokio::time::interval(Duration::from_secs(config.poll_interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let trigger_id = tokio::select! {
            message = triggers.next() => {
                match message {
                    Some(message) => trigger_id_from_payload(&message.payload),
                    None => {
                        tracing::warn!("trigger subscription closed, stopping");
                        break;
                    }
                }
            }
            _ = ticker.tick() => format!("poll-{}", Uuid::new_v4()),
        };

        if let Err(e) = run_cycle(&pool, &outbound, &trigger_id, None).await {
            tracing::error!(trigger_id, error = %e, "cycle returned an error");
        }
    }

    Ok(())
}

/// Inbound trigger payloads are opaque; a trigger id is extracted for
/// tracing only, with a generated fallback.
fn trigger_id_from_payload(payload: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| v.get("trigger_id").and_then(|t| t.as_str()).map(String::from))
        .unwrap_or_else(|| format!("trigger-{}", Uuid::new_v4()))
}
