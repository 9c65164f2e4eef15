// Main entry point for the acquisition worker

use anyhow::{Context, Result};
use discovery::{HttpFetcher, LlmClient, OpenAiClient};
use scrape_core::kernel::jobs::{
    JobRunner, JobStore, MemoryJobStore, PostgresJobStore, RetentionSweeper, MIGRATOR,
};
use scrape_core::kernel::WorkerDeps;
use scrape_core::Config;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scrape_core=debug,discovery=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting acquisition worker");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Database connected");

            tracing::info!("Running database migrations...");
            MIGRATOR
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Migrations complete");

            Arc::new(PostgresJobStore::new(pool).with_claim_lease(config.worker.claim_lease))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; jobs are kept in memory only");
            Arc::new(MemoryJobStore::new().with_claim_lease(config.worker.claim_lease))
        }
    };

    let mut fetcher = HttpFetcher::new().context("Failed to build HTTP fetcher")?;
    if let Some(user_agent) = &config.worker.user_agent {
        fetcher = fetcher.with_user_agent(user_agent);
    }

    let mut deps = WorkerDeps::new(store.clone(), Arc::new(fetcher), config.worker.clone());
    match &config.openai_api_key {
        Some(api_key) => {
            let mut client = OpenAiClient::new(api_key);
            if let Some(model) = &config.openai_model {
                client = client.with_model(model);
            }
            if let Some(base_url) = &config.openai_base_url {
                client = client.with_base_url(base_url);
            }
            tracing::info!(model = client.model(), "LLM client configured");
            let llm: Arc<dyn LlmClient> = Arc::new(client);
            deps = deps.with_llm(llm);
        }
        None => tracing::warn!("OPENAI_API_KEY not set; summary, json, branding and extract are unavailable"),
    }

    let sweeper = RetentionSweeper::new(store, config.retention.clone());
    let runner = JobRunner::new(Arc::new(deps)).with_sweeper(sweeper);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        });
    }

    runner.run(shutdown).await;
    Ok(())
}
