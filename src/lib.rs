// src/lib.rs

use axum::{
    Router,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use services::{
    chain_registry::ChainRegistry, early_withdraw::EarlyWithdrawService,
    product_store::ProductStore, settlement::SettlementService,
    webhook_ingestion::WebhookIngestionEngine,
};

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub store: ProductStore,
    pub chains: ChainRegistry,
    pub webhook: Arc<WebhookIngestionEngine>,
    pub settlement: Arc<SettlementService>,
    pub early_withdraw: Arc<EarlyWithdrawService>,
}

pub mod entities {
    pub mod prelude;
    pub mod histories;
    pub mod indexer_progress;
    pub mod products;
    pub mod users;
    pub mod withdraw_requests;
}

pub mod services {
    pub mod abi;
    pub mod chain_client;
    pub mod chain_registry;
    pub mod units;
    pub mod event_decoder;
    pub mod product_store;
    pub mod indexer_progress;
    pub mod log_watcher;
    pub mod ingestion;
    pub mod webhook_ingestion;
    pub mod settlement;
    pub mod pendle;
    pub mod early_withdraw;
}

pub mod config;
pub mod error;
pub mod models;
pub mod handlers;
pub mod jobs;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/webhook", post(handlers::webhook::handle_webhook))
        .route("/products", get(handlers::product::list_products))
        .route("/products/{address}", get(handlers::product::get_product))
        .route(
            "/products/get-withdraw-list",
            post(handlers::product::get_withdraw_list),
        )
        .route(
            "/products/update-withdraw-request",
            post(handlers::product::update_withdraw_request),
        )
        .route(
            "/products/get-admin-wallet",
            post(handlers::product::get_admin_wallet),
        )
        .route(
            "/products/get-pt-and-position",
            post(handlers::product::get_pt_and_position),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
