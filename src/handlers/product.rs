//! Product read routes and the settlement/early-withdraw write routes.
//!
//! Reads return empty results on a miss; writes return a result object.

use alloy::primitives::{Address, B256};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use std::str::FromStr;
use tracing::{error, info};

use crate::AppState;
use crate::config::ARBITRUM_CHAIN_ID;
use crate::handlers::{HandlerError, error_response};
use crate::models::product::{AdminWalletResponse, ProductView, ProductsQuery};
use crate::models::response::ActionResult;
use crate::models::withdraw_request::{
    EarlyWithdrawQuote, EarlyWithdrawQuoteBody, ProductQuery, UpdateWithdrawRequestBody,
    WithdrawList,
};
use crate::services::early_withdraw::QuoteRequest;
use crate::services::settlement::WithdrawConfirmation;

fn parse_address(raw: &str, field: &str) -> Result<Address, HandlerError> {
    Address::from_str(raw.trim()).map_err(|_| {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("Invalid {}: {}", field, raw),
        )
    })
}

/// Handler for GET /products
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductsQuery>,
) -> Result<Json<Vec<ProductView>>, HandlerError> {
    match state.store.list_active(query.chain_id).await {
        Ok(products) => Ok(Json(products.into_iter().map(ProductView::from).collect())),
        Err(e) => {
            error!(error = %e, "Failed to list products");
            Ok(Json(Vec::new()))
        }
    }
}

/// Handler for GET /products/{address}
pub async fn get_product(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<ProductsQuery>,
) -> Result<Json<Option<ProductView>>, HandlerError> {
    let Ok(address) = Address::from_str(address.trim()) else {
        return Ok(Json(None));
    };
    let chain_id = query.chain_id.unwrap_or(ARBITRUM_CHAIN_ID);

    match state.store.find_product(chain_id, &address).await {
        Ok(product) => Ok(Json(product.map(ProductView::from))),
        Err(e) => {
            error!(chain_id = chain_id, product = %address, error = %e, "Failed to load product");
            Ok(Json(None))
        }
    }
}

/// Handler for POST /products/get-withdraw-list
pub async fn get_withdraw_list(
    State(state): State<AppState>,
    Json(body): Json<ProductQuery>,
) -> Result<Json<WithdrawList>, HandlerError> {
    let product = parse_address(&body.product_address, "productAddress")?;

    state
        .settlement
        .get_withdraw_list(body.chain_id, &product)
        .await
        .map(Json)
        .map_err(|e| error_response(e.status_code(), e.to_string()))
}

/// Handler for POST /products/update-withdraw-request
pub async fn update_withdraw_request(
    State(state): State<AppState>,
    Json(body): Json<UpdateWithdrawRequestBody>,
) -> Result<Json<ActionResult>, HandlerError> {
    let product = parse_address(&body.product, "product")?;
    let user = parse_address(&body.address, "address")?;
    let txid = B256::from_str(body.txid.trim()).map_err(|_| {
        error_response(StatusCode::BAD_REQUEST, format!("Invalid txid: {}", body.txid))
    })?;

    let confirmation = WithdrawConfirmation {
        chain_id: body.chain_id,
        product,
        user,
        txid,
        amount_pt_unwind_price: body.amount_pt_unwind_price,
        amount_option_unwind_price: body.amount_option_unwind_price,
    };

    match state.settlement.update_withdraw_request(confirmation).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            error!(chain_id = body.chain_id, product = %product, error = %e, "Withdraw request update failed");
            Ok(Json(ActionResult::new("Failed")))
        }
    }
}

/// Handler for POST /products/get-admin-wallet
pub async fn get_admin_wallet(
    State(state): State<AppState>,
    Json(body): Json<ProductQuery>,
) -> Result<Json<AdminWalletResponse>, HandlerError> {
    let product = parse_address(&body.product_address, "productAddress")?;

    state
        .settlement
        .admin_wallet(body.chain_id, &product)
        .await
        .map(Json)
        .map_err(|e| error_response(e.status_code(), e.to_string()))
}

/// Handler for POST /products/get-pt-and-position
pub async fn get_pt_and_position(
    State(state): State<AppState>,
    Json(body): Json<EarlyWithdrawQuoteBody>,
) -> Result<Json<EarlyWithdrawQuote>, HandlerError> {
    let wallet = parse_address(&body.wallet_address, "walletAddress")?;
    let product = parse_address(&body.product_address, "productAddress")?;

    info!(
        chain_id = body.chain_id,
        product = %product,
        wallet = %wallet,
        no_of_block = body.no_of_block,
        "Early withdraw quote requested"
    );

    let quote = state
        .early_withdraw
        .quote(QuoteRequest {
            chain_id: body.chain_id,
            wallet,
            product,
            no_of_block: body.no_of_block,
            total_option_position: body.total_option_position,
        })
        .await;

    Ok(Json(quote))
}
