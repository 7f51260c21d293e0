use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use structured_products_indexer::{
    AppState,
    config::AppConfig,
    create_router,
    jobs::{ingestion_job::start_ingestion_job, settlement_job::start_settlement_job},
    services::{
        chain_registry::ChainRegistry, early_withdraw::EarlyWithdrawService,
        ingestion::IngestionEngine, pendle::PendleClient, product_store::ProductStore,
        settlement::SettlementService, webhook_ingestion::WebhookIngestionEngine,
    },
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,structured_products_indexer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    tracing::info!("Connecting to database...");
    let db = Database::connect(&config.database_url).await?;

    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None).await?;

    let chains = ChainRegistry::connect(&config.chains).await?;
    tracing::info!(chains = ?chains.chain_ids(), "Chain clients ready");

    let store = ProductStore::new(db.clone());
    let webhook = Arc::new(WebhookIngestionEngine::new(
        store.clone(),
        chains.clone(),
        config.webhook.clone(),
    ));
    let settlement = Arc::new(SettlementService::new(
        store.clone(),
        chains.clone(),
        config.settlement.clone(),
    ));
    let early_withdraw = Arc::new(EarlyWithdrawService::new(
        store.clone(),
        chains.clone(),
        PendleClient::new(config.pendle_api_url.clone()),
    ));

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    for handle in chains.handles() {
        let engine = Arc::new(IngestionEngine::new(
            handle.config.clone(),
            handle.client.clone(),
            store.clone(),
            config.ingestion.clone(),
        ));
        tasks.push(start_ingestion_job(engine, cancel.clone()));
    }
    tasks.push(start_settlement_job(settlement.clone(), cancel.clone()));

    let state = AppState {
        db,
        store,
        chains,
        webhook,
        settlement,
        early_withdraw,
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Background task panicked");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
